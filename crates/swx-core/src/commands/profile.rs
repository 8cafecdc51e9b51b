use anyhow::Result;
use serde_json::json;

use crate::context::ServiceContext;
use crate::orchestrator::SwitchOrchestrator;
use crate::outcome::ExecutionOutcome;
use crate::store::{ProfileUpdate, StoreError};
use swx_domain::Profile;

use super::resolve_profile;

#[derive(Debug, Clone)]
pub struct ProfileAddRequest {
    pub email: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ProfileUpdateRequest {
    pub selector: String,
    pub email: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub display_name: Option<String>,
}

pub fn profile_list(ctx: &ServiceContext) -> Result<ExecutionOutcome> {
    let profiles = ctx.store().list()?;
    let rows: Vec<_> = profiles.iter().map(profile_row).collect();
    let message = match profiles.len() {
        0 => "no profiles stored".to_string(),
        1 => "1 profile".to_string(),
        n => format!("{n} profiles"),
    };
    Ok(ExecutionOutcome::success(
        message,
        json!({ "profiles": rows }),
    ))
}

pub fn profile_show(ctx: &ServiceContext, selector: &str) -> Result<ExecutionOutcome> {
    match resolve_profile(ctx, selector)? {
        Some(profile) => Ok(ExecutionOutcome::success(
            profile.email.clone(),
            json!({ "profile": profile_row(&profile) }),
        )),
        None => Ok(not_found(selector)),
    }
}

pub fn profile_add(ctx: &ServiceContext, request: &ProfileAddRequest) -> Result<ExecutionOutcome> {
    match ctx.store().add(
        &request.email,
        &request.access_token,
        request.refresh_token.as_deref(),
        request.display_name.as_deref(),
    ) {
        Ok(profile) => {
            ctx.store().append_log("add_profile", Some(&profile.email))?;
            Ok(ExecutionOutcome::success(
                format!("profile {} added", profile.email),
                json!({ "id": profile.id }),
            ))
        }
        Err(err) => match err.downcast_ref::<StoreError>() {
            Some(StoreError::DuplicateEmail(email)) => Ok(ExecutionOutcome::user_error(
                format!("a profile with email {email} already exists"),
                json!({ "reason": "DuplicateEmail" }),
            )),
            _ => Err(err),
        },
    }
}

pub fn profile_update(
    ctx: &ServiceContext,
    request: &ProfileUpdateRequest,
) -> Result<ExecutionOutcome> {
    let Some(profile) = resolve_profile(ctx, &request.selector)? else {
        return Ok(not_found(&request.selector));
    };
    let update = ProfileUpdate {
        email: request.email.clone(),
        access_token: request.access_token.clone(),
        refresh_token: request.refresh_token.clone().map(Some),
        display_name: request.display_name.clone().map(Some),
        device_identity: None,
    };
    let updated = ctx.store().update(&profile.id, &update)?;
    ctx.store().append_log("update_profile", Some(&updated.email))?;
    Ok(ExecutionOutcome::success(
        format!("profile {} updated", updated.email),
        json!({ "id": updated.id }),
    ))
}

pub fn profile_remove(ctx: &ServiceContext, selector: &str) -> Result<ExecutionOutcome> {
    let Some(profile) = resolve_profile(ctx, selector)? else {
        return Ok(not_found(selector));
    };
    ctx.store().delete(&profile.id)?;
    ctx.store().append_log("delete_profile", Some(&profile.email))?;
    Ok(ExecutionOutcome::success(
        format!("profile {} deleted", profile.email),
        json!({ "id": profile.id }),
    ))
}

pub fn profile_import(
    ctx: &ServiceContext,
    display_name: Option<&str>,
) -> Result<ExecutionOutcome> {
    let process = ctx.process_controller();
    SwitchOrchestrator::new(ctx, &process).import_current(display_name)
}

fn profile_row(profile: &Profile) -> serde_json::Value {
    json!({
        "id": profile.id,
        "email": profile.email,
        "displayName": profile.display_name,
        "isCurrent": profile.is_current,
        "hasDeviceIdentity": profile.device_identity.is_some(),
        "tokenPreview": token_preview(&profile.access_token),
        "createdAt": profile.created_at.to_string(),
        "updatedAt": profile.updated_at.to_string(),
    })
}

/// Tokens never leave the store whole; listings show a short prefix.
fn token_preview(token: &str) -> String {
    let prefix: String = token.chars().take(8).collect();
    format!("{prefix}…")
}

fn not_found(selector: &str) -> ExecutionOutcome {
    ExecutionOutcome::user_error(
        format!("no profile matches {selector}"),
        json!({ "reason": "NotFound" }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::outcome::CommandStatus;

    fn ctx() -> ServiceContext {
        let config = Config {
            host: swx_domain::HostLayout::new("/tmp/none-data", "/tmp/none-install", "Host"),
            app: swx_domain::SwxLayout::new("/tmp/none-swx"),
            license: crate::config::LicenseConfig {
                server_url: None,
                public_key_b64: crate::config::EMBEDDED_PUBLIC_KEY_B64.into(),
                app_version: "0.0.0-test".into(),
            },
            auto_relaunch: false,
        };
        ServiceContext::for_tests(config)
    }

    #[test]
    fn add_then_list_then_remove_by_email() -> Result<()> {
        let ctx = ctx();
        let outcome = profile_add(
            &ctx,
            &ProfileAddRequest {
                email: "a@example.com".into(),
                access_token: "secret-token-value".into(),
                refresh_token: None,
                display_name: Some("main".into()),
            },
        )?;
        assert_eq!(outcome.status, CommandStatus::Ok);

        let listed = profile_list(&ctx)?;
        let rows = listed.details["profiles"].as_array().unwrap();
        assert_eq!(rows.len(), 1);
        // The full token must not appear in listings.
        assert!(!listed.details.to_string().contains("secret-token-value"));

        let removed = profile_remove(&ctx, "a@example.com")?;
        assert_eq!(removed.status, CommandStatus::Ok);
        assert_eq!(ctx.store().list()?.len(), 0);
        Ok(())
    }

    #[test]
    fn duplicate_add_is_a_user_error() -> Result<()> {
        let ctx = ctx();
        let request = ProfileAddRequest {
            email: "a@example.com".into(),
            access_token: "tok".into(),
            refresh_token: None,
            display_name: None,
        };
        profile_add(&ctx, &request)?;
        let outcome = profile_add(&ctx, &request)?;
        assert_eq!(outcome.status, CommandStatus::UserError);
        assert_eq!(outcome.details["reason"], "DuplicateEmail");
        Ok(())
    }

    #[test]
    fn unknown_selector_is_a_user_error() -> Result<()> {
        let ctx = ctx();
        let outcome = profile_show(&ctx, "ghost@example.com")?;
        assert_eq!(outcome.status, CommandStatus::UserError);
        Ok(())
    }
}
