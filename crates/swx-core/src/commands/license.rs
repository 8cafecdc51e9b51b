use anyhow::Result;
use serde_json::json;

use swx_domain::LicenseState;

use crate::context::ServiceContext;
use crate::license::{LicenseError, StatusReport};
use crate::orchestrator::SwitchOrchestrator;
use crate::outcome::ExecutionOutcome;

pub fn license_activate(
    ctx: &ServiceContext,
    key: &str,
    server_override: Option<&str>,
) -> Result<ExecutionOutcome> {
    let process = ctx.process_controller();
    SwitchOrchestrator::new(ctx, &process).activate_license(key, server_override)
}

/// Online verification with the offline receipt as fallback when the
/// server is unreachable. Authoritative rejections surface as user errors.
pub fn license_verify(ctx: &ServiceContext) -> Result<ExecutionOutcome> {
    let verifier = ctx.verifier();
    match verifier.verify_online() {
        Ok(()) => {
            let report = verifier.status();
            let mut details = status_details(&report, Some("online"));
            if let Some(announcement) = verifier.current_announcement() {
                details["announcement"] = json!({
                    "title": announcement.title,
                    "body": announcement.body,
                });
            }
            Ok(ExecutionOutcome::success("license verified online", details))
        }
        Err(LicenseError::Network(cause)) => {
            let report = verifier.status();
            if report.usable() {
                Ok(ExecutionOutcome::success(
                    "server unreachable; cached receipt accepted",
                    status_details(&report, Some("offline")),
                ))
            } else {
                Ok(ExecutionOutcome::failure(
                    format!("server unreachable and no usable receipt: {cause}"),
                    status_details(&report, Some("offline")),
                ))
            }
        }
        Err(err) => Ok(ExecutionOutcome::user_error(
            err.to_string(),
            json!({ "reason": reason(&err) }),
        )),
    }
}

pub fn license_status(ctx: &ServiceContext) -> Result<ExecutionOutcome> {
    let report = ctx.verifier().status();
    let message = match report.state {
        LicenseState::Valid => "license valid".to_string(),
        LicenseState::Expired if report.within_grace => {
            "license expired; offline grace window still open".to_string()
        }
        LicenseState::Expired => "license expired".to_string(),
        LicenseState::GraceExpired => "license expired; offline grace exhausted".to_string(),
        LicenseState::SignatureInvalid => "cached receipt failed validation".to_string(),
        LicenseState::Unactivated => "no license activated".to_string(),
    };
    if report.usable() {
        Ok(ExecutionOutcome::success(message, status_details(&report, None)))
    } else {
        Ok(ExecutionOutcome::user_error(
            message,
            status_details(&report, None),
        ))
    }
}

pub fn license_deactivate(ctx: &ServiceContext) -> Result<ExecutionOutcome> {
    match ctx.verifier().deactivate() {
        Ok(()) => {
            ctx.store().append_log("deactivate_license", None)?;
            Ok(ExecutionOutcome::success(
                "device unbound; local license state cleared",
                json!({}),
            ))
        }
        Err(LicenseError::NotActivated) => Ok(ExecutionOutcome::user_error(
            "no license activated",
            json!({ "reason": "NotActivated" }),
        )),
        Err(err) => Ok(ExecutionOutcome::failure(
            err.to_string(),
            json!({ "reason": reason(&err) }),
        )),
    }
}

fn status_details(report: &StatusReport, path: Option<&str>) -> serde_json::Value {
    json!({
        "state": report.state,
        "expiresAt": report.expires_at,
        "notAfter": report.not_after,
        "withinGrace": report.within_grace,
        "validation": path,
    })
}

fn reason(err: &LicenseError) -> &'static str {
    match err {
        LicenseError::Network(_) => "NetworkError",
        LicenseError::InvalidKey => "InvalidKey",
        LicenseError::Revoked => "Revoked",
        LicenseError::Expired => "Expired",
        LicenseError::SignatureInvalid => "SignatureInvalid",
        LicenseError::NotActivated => "NotActivated",
        LicenseError::ServerNotConfigured => "ServerNotConfigured",
        LicenseError::Rejected(_) => "Rejected",
        LicenseError::Storage(_) => "Storage",
    }
}
