//! Reads and rewrites the host's device-identity fields inside its
//! identity-configuration file (`storage.json`).
//!
//! The four telemetry ids are always replaced as a set, and the file is
//! rewritten in full through a temp file + rename so a crash mid-write
//! leaves either the old or the new complete file, never a hybrid.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use time::OffsetDateTime;
use tracing::{debug, warn};

use swx_domain::{filename_timestamp, DeviceIdentityBundle};

const KEY_MACHINE_ID: &str = "telemetry.machineId";
const KEY_MAC_MACHINE_ID: &str = "telemetry.macMachineId";
const KEY_DEVICE_ID: &str = "telemetry.devDeviceId";
const KEY_SQM_ID: &str = "telemetry.sqmId";

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("identity configuration not found at {0}")]
    ConfigNotFound(PathBuf),
    #[error("failed to rewrite identity configuration: {0}")]
    WriteFailed(String),
}

pub struct DeviceIdentityStore {
    storage_path: PathBuf,
}

impl DeviceIdentityStore {
    #[must_use]
    pub fn new(storage_path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: storage_path.into(),
        }
    }

    #[must_use]
    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    /// The live bundle, or `None` when the configuration file is absent,
    /// unreadable, or missing any of the four correlated keys.
    pub fn read(&self) -> Option<DeviceIdentityBundle> {
        let content = fs::read_to_string(&self.storage_path).ok()?;
        let value: Value = match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(err) => {
                warn!(path = %self.storage_path.display(), %err, "identity configuration is not valid JSON");
                return None;
            }
        };
        let object = value.as_object()?;
        let field = |key: &str| {
            object
                .get(key)
                .and_then(Value::as_str)
                .map(ToOwned::to_owned)
        };
        Some(DeviceIdentityBundle {
            machine_id: field(KEY_MACHINE_ID)?,
            mac_machine_id: field(KEY_MAC_MACHINE_ID)?,
            device_id: field(KEY_DEVICE_ID)?,
            sqm_id: field(KEY_SQM_ID)?,
        })
    }

    /// Replace all four identity fields, preserving every other key in the
    /// file. A timestamped backup sibling is written first.
    pub fn replace(&self, bundle: &DeviceIdentityBundle) -> Result<(), IdentityError> {
        if !self.storage_path.exists() {
            return Err(IdentityError::ConfigNotFound(self.storage_path.clone()));
        }
        let content = fs::read_to_string(&self.storage_path)
            .map_err(|err| IdentityError::WriteFailed(err.to_string()))?;
        let mut object: Map<String, Value> = serde_json::from_str(&content)
            .map_err(|err| IdentityError::WriteFailed(format!("existing file unparseable: {err}")))?;

        let backup = self.backup_path();
        fs::copy(&self.storage_path, &backup)
            .map_err(|err| IdentityError::WriteFailed(format!("backup copy failed: {err}")))?;

        object.insert(KEY_MACHINE_ID.into(), Value::String(bundle.machine_id.clone()));
        object.insert(
            KEY_MAC_MACHINE_ID.into(),
            Value::String(bundle.mac_machine_id.clone()),
        );
        object.insert(KEY_DEVICE_ID.into(), Value::String(bundle.device_id.clone()));
        object.insert(KEY_SQM_ID.into(), Value::String(bundle.sqm_id.clone()));

        let rendered = serde_json::to_string_pretty(&Value::Object(object))
            .map_err(|err| IdentityError::WriteFailed(err.to_string()))?;
        self.write_full(&rendered)?;
        debug!(path = %self.storage_path.display(), "device identity replaced");
        Ok(())
    }

    fn write_full(&self, rendered: &str) -> Result<(), IdentityError> {
        let temp = self.storage_path.with_extension("json.swx-tmp");
        fs::write(&temp, rendered).map_err(|err| IdentityError::WriteFailed(err.to_string()))?;
        fs::rename(&temp, &self.storage_path).map_err(|err| {
            let _ = fs::remove_file(&temp);
            IdentityError::WriteFailed(err.to_string())
        })?;
        Ok(())
    }

    fn backup_path(&self) -> PathBuf {
        let stamp = filename_timestamp(OffsetDateTime::now_utc());
        let mut name = self.storage_path.as_os_str().to_owned();
        name.push(format!(".backup-{stamp}"));
        PathBuf::from(name)
    }
}
