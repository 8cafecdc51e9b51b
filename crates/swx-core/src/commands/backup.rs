use std::path::Path;

use anyhow::Result;
use serde_json::json;

use swx_domain::SnapshotKind;

use crate::context::ServiceContext;
use crate::outcome::ExecutionOutcome;

#[derive(Debug, Clone)]
pub struct BackupCreateRequest {
    pub kind: SnapshotKind,
    pub owner_email: Option<String>,
}

pub fn backup_create(
    ctx: &ServiceContext,
    request: &BackupCreateRequest,
) -> Result<ExecutionOutcome> {
    let snapshot = ctx.backup_engine().snapshot(
        request.kind,
        request.owner_email.as_deref(),
        false,
    )?;
    ctx.store().append_log(
        "backup_create",
        Some(&format!(
            "{} ({} members)",
            snapshot.path.display(),
            snapshot.members.len()
        )),
    )?;
    Ok(ExecutionOutcome::success(
        format!(
            "captured {} member(s) into {}",
            snapshot.members.len(),
            snapshot.path.display()
        ),
        json!({
            "path": snapshot.path,
            "kind": snapshot.kind.as_str(),
            "members": snapshot.members,
        }),
    ))
}

pub fn backup_list(ctx: &ServiceContext) -> Result<ExecutionOutcome> {
    let snapshots = ctx.backup_engine().list()?;
    let rows: Vec<_> = snapshots
        .iter()
        .map(|snapshot| {
            json!({
                "path": snapshot.path,
                "kind": snapshot.kind.as_str(),
                "ownerEmail": snapshot.owner_email,
                "timestamp": snapshot.timestamp,
                "members": snapshot.members.len(),
            })
        })
        .collect();
    Ok(ExecutionOutcome::success(
        format!("{} snapshot(s)", rows.len()),
        json!({ "snapshots": rows }),
    ))
}

pub fn backup_restore(ctx: &ServiceContext, path: &Path) -> Result<ExecutionOutcome> {
    let engine = ctx.backup_engine();
    let snapshot = match engine.load(path) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            return Ok(ExecutionOutcome::user_error(
                format!("not a snapshot: {err:#}"),
                json!({ "reason": "NotFound", "path": path }),
            ))
        }
    };
    let report = engine.restore(&snapshot)?;
    ctx.store().append_log(
        "backup_restore",
        Some(&format!(
            "{} ({}/{} members)",
            path.display(),
            report.restored.len(),
            report.intended
        )),
    )?;
    let details = json!({
        "restored": report.restored,
        "intended": report.intended,
        "error": report.error,
    });
    if report.complete() {
        Ok(ExecutionOutcome::success(
            format!("restored {} member(s)", report.intended),
            details,
        ))
    } else {
        Ok(ExecutionOutcome::failure(
            format!(
                "restore incomplete: {}/{} member(s)",
                report.restored.len(),
                report.intended
            ),
            details,
        ))
    }
}

pub fn backup_delete(ctx: &ServiceContext, path: &Path) -> Result<ExecutionOutcome> {
    let engine = ctx.backup_engine();
    let snapshot = match engine.load(path) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            return Ok(ExecutionOutcome::user_error(
                format!("not a snapshot: {err:#}"),
                json!({ "reason": "NotFound", "path": path }),
            ))
        }
    };
    engine.delete(&snapshot)?;
    ctx.store()
        .append_log("backup_delete", Some(&path.display().to_string()))?;
    Ok(ExecutionOutcome::success(
        format!("deleted {}", path.display()),
        json!({ "path": path }),
    ))
}
