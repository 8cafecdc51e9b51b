//! Thin command wrappers: request structs in, [`ExecutionOutcome`]
//! envelopes out. All real sequencing lives in the orchestrator and the
//! component modules.

pub mod backup;
pub mod host;
pub mod license;
pub mod log;
pub mod profile;
pub mod switch;

use anyhow::Result;

use crate::context::ServiceContext;
use swx_domain::Profile;

/// Resolve a CLI selector to a profile: exact id first, then email.
pub(crate) fn resolve_profile(
    ctx: &ServiceContext,
    selector: &str,
) -> Result<Option<Profile>> {
    if let Some(profile) = ctx.store().get(selector)? {
        return Ok(Some(profile));
    }
    ctx.store().get_by_email(selector)
}
