use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::DeviceIdentityBundle;

/// A stored credential identity the operator can switch the host to.
///
/// At most one profile is marked current at any time; the store enforces
/// that invariant, callers never toggle the flag row-by-row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub email: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub display_name: Option<String>,
    /// Fingerprint bundle captured from the host the last time the operator
    /// switched away from this profile. None until first capture.
    pub device_identity: Option<DeviceIdentityBundle>,
    pub is_current: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Profile {
    /// Name shown in listings: nickname when set, email otherwise.
    #[must_use]
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.email)
    }
}

/// Append-only operation log row, written after every externally visible
/// workflow step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationLogEntry {
    pub id: i64,
    pub action: String,
    pub details: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}
