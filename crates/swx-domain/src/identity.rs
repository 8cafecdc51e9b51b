use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The four correlated identifiers the host uses to recognize "this
/// machine". They are always replaced as a set; swapping only one of them
/// desynchronizes the host's self-consistency checks.
///
/// The field formats are dictated by the host's own schema and must be
/// reproduced exactly: a 128-bit lowercase hex token, two lowercase UUIDs,
/// and a brace-wrapped uppercase UUID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentityBundle {
    pub machine_id: String,
    pub mac_machine_id: String,
    pub device_id: String,
    pub sqm_id: String,
}

impl DeviceIdentityBundle {
    /// Generate a bundle of four independently random identifiers.
    #[must_use]
    pub fn generate() -> Self {
        let mut raw = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut raw);
        Self {
            machine_id: hex::encode(raw),
            mac_machine_id: Uuid::new_v4().to_string(),
            device_id: Uuid::new_v4().to_string(),
            sqm_id: format!("{{{}}}", Uuid::new_v4().to_string().to_uppercase()),
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_machine_id_is_128_bit_hex() {
        let bundle = DeviceIdentityBundle::generate();
        assert_eq!(bundle.machine_id.len(), 32);
        assert!(bundle.machine_id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(bundle.machine_id, bundle.machine_id.to_lowercase());
    }

    #[test]
    fn generated_uuids_parse() {
        let bundle = DeviceIdentityBundle::generate();
        assert!(Uuid::parse_str(&bundle.mac_machine_id).is_ok());
        assert!(Uuid::parse_str(&bundle.device_id).is_ok());
    }

    #[test]
    fn sqm_id_is_braced_uppercase_uuid() {
        let bundle = DeviceIdentityBundle::generate();
        assert!(bundle.sqm_id.starts_with('{') && bundle.sqm_id.ends_with('}'));
        let inner = &bundle.sqm_id[1..bundle.sqm_id.len() - 1];
        assert!(Uuid::parse_str(inner).is_ok());
        assert_eq!(inner, inner.to_uppercase());
    }

    #[test]
    fn bundles_are_independent() {
        let a = DeviceIdentityBundle::generate();
        let b = DeviceIdentityBundle::generate();
        assert_ne!(a.machine_id, b.machine_id);
        assert_ne!(a.device_id, b.device_id);
    }
}
