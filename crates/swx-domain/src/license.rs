use serde::{Deserialize, Serialize};

/// Device binding inside a license receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseDevice {
    pub machine_id: String,
    pub platform: String,
}

/// Server-issued, signed statement of entitlement. Immutable once received;
/// superseded by the next successful verify call.
///
/// Field order matters: the detached signature covers the canonical JSON
/// encoding of this struct in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseReceipt {
    pub license_id: i64,
    pub key_prefix: String,
    pub device: LicenseDevice,
    pub max_devices: u32,
    pub issued_at: String,
    pub expires_at: String,
    /// Hard cutoff for offline use past `expires_at`.
    pub not_after: String,
}

impl LicenseReceipt {
    /// The byte sequence the detached signature is computed over.
    #[must_use]
    pub fn canonical_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// Outcome of offline receipt evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseState {
    /// No key has been activated on this install.
    Unactivated,
    /// Receipt present, signature good, inside the validity window.
    Valid,
    /// Past `expires_at`.
    Expired,
    /// Past `not_after`: the offline grace window is exhausted.
    GraceExpired,
    /// The cached receipt no longer verifies against the public key.
    SignatureInvalid,
}

impl LicenseState {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, LicenseState::Valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt() -> LicenseReceipt {
        LicenseReceipt {
            license_id: 7,
            key_prefix: "SWX-12AB".into(),
            device: LicenseDevice {
                machine_id: "abc123".into(),
                platform: "linux".into(),
            },
            max_devices: 3,
            issued_at: "2026-01-01T00:00:00Z".into(),
            expires_at: "2026-02-01T00:00:00Z".into(),
            not_after: "2026-02-08T00:00:00Z".into(),
        }
    }

    #[test]
    fn canonical_bytes_are_stable_for_equal_receipts() {
        assert_eq!(receipt().canonical_bytes(), receipt().canonical_bytes());
    }

    #[test]
    fn canonical_bytes_change_with_any_field() {
        let mut other = receipt();
        other.max_devices = 4;
        assert_ne!(receipt().canonical_bytes(), other.canonical_bytes());
    }

    #[test]
    fn serde_uses_the_wire_field_names() {
        let value: serde_json::Value =
            serde_json::from_slice(&receipt().canonical_bytes()).unwrap();
        assert!(value.get("keyPrefix").is_some());
        assert!(value.get("notAfter").is_some());
        assert!(value["device"].get("machineId").is_some());
    }
}
