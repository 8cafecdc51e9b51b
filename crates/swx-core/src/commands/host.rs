use anyhow::Result;
use serde_json::json;

use crate::context::ServiceContext;
use crate::outcome::ExecutionOutcome;
use crate::process::HostProcess;

pub fn host_status(ctx: &ServiceContext) -> Result<ExecutionOutcome> {
    let process = ctx.process_controller();
    let running = process.is_running();
    let host = &ctx.config().host;
    Ok(ExecutionOutcome::success(
        if running {
            "host is running"
        } else {
            "host is not running"
        },
        json!({
            "running": running,
            "image": host.image_name(),
            "dataDir": host.data_dir(),
            "installDir": host.install_dir(),
            "identityPresent": ctx.identity_store().read().is_some(),
        }),
    ))
}

pub fn host_stop(ctx: &ServiceContext) -> Result<ExecutionOutcome> {
    let process = ctx.process_controller();
    if process.terminate() {
        ctx.store().append_log("host_stop", None)?;
        Ok(ExecutionOutcome::success("host terminated", json!({})))
    } else {
        Ok(ExecutionOutcome::failure(
            "the host did not terminate",
            json!({ "reason": "HostBusy" }),
        ))
    }
}

pub fn host_start(ctx: &ServiceContext) -> Result<ExecutionOutcome> {
    let process = ctx.process_controller();
    if process.launch() {
        ctx.store().append_log("host_start", None)?;
        Ok(ExecutionOutcome::success("host launched", json!({})))
    } else {
        Ok(ExecutionOutcome::failure(
            "the host could not be launched",
            json!({ "executable": ctx.config().host.executable() }),
        ))
    }
}
