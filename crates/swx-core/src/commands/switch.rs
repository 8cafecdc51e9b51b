use anyhow::Result;
use serde_json::json;

use crate::context::ServiceContext;
use crate::orchestrator::SwitchOrchestrator;
use crate::outcome::ExecutionOutcome;

use super::resolve_profile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetKind {
    /// Regenerate the device-identity bundle only.
    Identity,
    /// Patch the host's program files; no credential change.
    Deep,
    /// Wholesale wipe of identity, auth, caches, and session state.
    Factory,
}

pub fn switch(ctx: &ServiceContext, selector: &str) -> Result<ExecutionOutcome> {
    let Some(profile) = resolve_profile(ctx, selector)? else {
        return Ok(ExecutionOutcome::user_error(
            format!("no profile matches {selector}"),
            json!({ "reason": "NotFound" }),
        ));
    };
    let process = ctx.process_controller();
    SwitchOrchestrator::new(ctx, &process).switch_to(&profile.id)
}

pub fn reset(ctx: &ServiceContext, kind: ResetKind) -> Result<ExecutionOutcome> {
    let process = ctx.process_controller();
    let orchestrator = SwitchOrchestrator::new(ctx, &process);
    match kind {
        ResetKind::Identity => orchestrator.reset_identity(),
        ResetKind::Deep => orchestrator.deep_reset(),
        ResetKind::Factory => orchestrator.factory_reset(),
    }
}
