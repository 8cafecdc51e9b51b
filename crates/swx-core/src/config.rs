use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use swx_domain::{HostLayout, SwxLayout};

/// Default host product name; overridable with `SWX_HOST_NAME`.
pub const DEFAULT_HOST_PRODUCT: &str = "Cursor";

/// Raw 32-byte Ed25519 public key (base64) baked into release builds;
/// receipts from the activation server verify against it unless overridden.
pub const EMBEDDED_PUBLIC_KEY_B64: &str = "h1cSzLyOG6HxBNcqxYUOcheYPJlB0v9iBK4e8HjNHao=";

/// One-shot capture of the process environment so option resolution is
/// deterministic for the lifetime of a command.
#[derive(Debug, Clone)]
pub(crate) struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub(crate) fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    pub(crate) fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub(crate) fn flag_is_enabled(&self, key: &str) -> bool {
        matches!(self.vars.get(key).map(String::as_str), Some("1" | "true"))
    }

    #[cfg(test)]
    pub(crate) fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

/// Resolved configuration for one command invocation.
///
/// Precedence for license settings is env > stored config table > built-in
/// default; the stored-config middle layer is applied by the license
/// verifier because it needs an open store.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: HostLayout,
    pub app: SwxLayout,
    pub license: LicenseConfig,
    /// Relaunch the host automatically after a successful switch.
    pub auto_relaunch: bool,
}

#[derive(Debug, Clone)]
pub struct LicenseConfig {
    /// Activation server base URL; empty until configured.
    pub server_url: Option<String>,
    pub public_key_b64: String,
    pub app_version: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_snapshot(&EnvSnapshot::capture())
    }

    pub(crate) fn from_snapshot(snapshot: &EnvSnapshot) -> Self {
        let product = snapshot
            .var("SWX_HOST_NAME")
            .unwrap_or(DEFAULT_HOST_PRODUCT)
            .to_string();
        let mut host = HostLayout::discover(&product);
        match (
            snapshot.var("SWX_HOST_DATA_DIR"),
            snapshot.var("SWX_HOST_INSTALL_DIR"),
        ) {
            (None, None) => {}
            (data, install) => {
                host = HostLayout::new(
                    data.map_or_else(|| host.data_dir().to_path_buf(), PathBuf::from),
                    install.map_or_else(|| host.install_dir().to_path_buf(), PathBuf::from),
                    host.image_name(),
                );
            }
        }

        let app = SwxLayout::new(
            snapshot
                .var("SWX_DATA_DIR")
                .map_or_else(SwxLayout::default_dir, PathBuf::from),
        );

        Self {
            host,
            app,
            license: LicenseConfig {
                server_url: snapshot
                    .var("SWX_LICENSE_SERVER_URL")
                    .filter(|url| !url.trim().is_empty())
                    .map(ToOwned::to_owned),
                public_key_b64: snapshot
                    .var("SWX_LICENSE_PUBLIC_KEY_B64")
                    .unwrap_or(EMBEDDED_PUBLIC_KEY_B64)
                    .to_string(),
                app_version: snapshot
                    .var("SWX_APP_VERSION")
                    .unwrap_or(crate::SWX_VERSION)
                    .to_string(),
            },
            auto_relaunch: snapshot.flag_is_enabled("SWX_AUTO_RELAUNCH"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_both_host_roots() {
        let snapshot = EnvSnapshot::testing(&[
            ("SWX_HOST_DATA_DIR", "/tmp/host-data"),
            ("SWX_HOST_INSTALL_DIR", "/tmp/host-install"),
            ("SWX_DATA_DIR", "/tmp/swx"),
        ]);
        let config = Config::from_snapshot(&snapshot);
        assert_eq!(config.host.data_dir(), std::path::Path::new("/tmp/host-data"));
        assert_eq!(
            config.host.install_dir(),
            std::path::Path::new("/tmp/host-install")
        );
        assert_eq!(config.app.profiles_db(), PathBuf::from("/tmp/swx/profiles.db"));
    }

    #[test]
    fn server_url_defaults_to_unconfigured() {
        let config = Config::from_snapshot(&EnvSnapshot::testing(&[]));
        assert!(config.license.server_url.is_none());
        assert_eq!(config.license.public_key_b64, EMBEDDED_PUBLIC_KEY_B64);
    }

    #[test]
    fn blank_server_url_env_is_ignored() {
        let snapshot = EnvSnapshot::testing(&[("SWX_LICENSE_SERVER_URL", "  ")]);
        assert!(Config::from_snapshot(&snapshot).license.server_url.is_none());
    }

    #[test]
    fn auto_relaunch_reads_the_flag() {
        let snapshot = EnvSnapshot::testing(&[("SWX_AUTO_RELAUNCH", "1")]);
        assert!(Config::from_snapshot(&snapshot).auto_relaunch);
    }
}
