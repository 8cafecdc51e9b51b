use anyhow::Result;
use serde_json::json;

use crate::context::ServiceContext;
use crate::outcome::ExecutionOutcome;

pub fn log_recent(ctx: &ServiceContext, limit: u32) -> Result<ExecutionOutcome> {
    let entries = ctx.store().recent_logs(limit)?;
    let rows: Vec<_> = entries
        .iter()
        .map(|entry| {
            json!({
                "action": entry.action,
                "details": entry.details,
                "timestamp": entry.timestamp.to_string(),
            })
        })
        .collect();
    Ok(ExecutionOutcome::success(
        format!("{} log entries", rows.len()),
        json!({ "entries": rows }),
    ))
}
