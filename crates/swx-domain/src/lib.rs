#![deny(clippy::all)]

//! Data model shared by the swx engine and CLI: profile records, the host's
//! device-identity bundle, snapshot metadata, license receipts, and the
//! host/app filesystem layout. This crate does no I/O beyond path math.

mod identity;
mod layout;
mod license;
mod profile;
mod rules;
mod snapshot;

pub use identity::DeviceIdentityBundle;
pub use layout::{HostLayout, SwxLayout, AUTH_CLEAR_KEYS, SESSION_AUTH_KEYS};
pub use license::{LicenseDevice, LicenseReceipt, LicenseState};
pub use profile::{OperationLogEntry, Profile};
pub use rules::{
    fingerprint_rules, literal_rewrites, FingerprintRule, LiteralKind, LiteralRewrite,
    RulePlatform,
};
pub use snapshot::{Snapshot, SnapshotKind, SnapshotMember};

/// Timestamp format used in backup/patch artifact names: RFC 3339 with the
/// separators stripped so it is filesystem-safe on every platform.
#[must_use]
pub fn filename_timestamp(at: time::OffsetDateTime) -> String {
    let format = time::macros::format_description!("[year][month][day]-[hour][minute][second]");
    at.format(&format)
        .unwrap_or_else(|_| at.unix_timestamp().to_string())
}
