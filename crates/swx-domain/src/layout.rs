use std::path::{Path, PathBuf};

/// Session-database keys holding the host's cached credential triple, in
/// the order (email, access token, refresh token).
pub const SESSION_AUTH_KEYS: [&str; 3] = [
    "cursorAuth/cachedEmail",
    "cursorAuth/accessToken",
    "cursorAuth/refreshToken",
];

/// Every auth-related session-database key, cleared wholesale on factory
/// reset and logout.
pub const AUTH_CLEAR_KEYS: [&str; 6] = [
    "cursorAuth/cachedEmail",
    "cursorAuth/accessToken",
    "cursorAuth/refreshToken",
    "cursorAuth/cachedSignUpType",
    "cursorAuth/stripeMembershipType",
    "cursorAuth/stripeSubscriptionStatus",
];

/// Locations of everything the engine touches inside the host
/// application's data tree and install tree. Both roots are injectable so
/// tests (and non-standard installs) can point the engine anywhere.
#[derive(Debug, Clone)]
pub struct HostLayout {
    data_dir: PathBuf,
    install_dir: PathBuf,
    image_name: String,
}

impl HostLayout {
    #[must_use]
    pub fn new(
        data_dir: impl Into<PathBuf>,
        install_dir: impl Into<PathBuf>,
        image_name: impl Into<String>,
    ) -> Self {
        Self {
            data_dir: data_dir.into(),
            install_dir: install_dir.into(),
            image_name: image_name.into(),
        }
    }

    /// Platform-default layout for a host product name.
    #[must_use]
    pub fn discover(product: &str) -> Self {
        let home = dirs_next::home_dir().unwrap_or_else(|| PathBuf::from("."));
        #[cfg(target_os = "macos")]
        {
            Self::new(
                home.join("Library").join("Application Support").join(product),
                PathBuf::from("/Applications").join(format!("{product}.app")),
                product,
            )
        }
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var_os("APPDATA")
                .map_or_else(|| home.join("AppData").join("Roaming"), PathBuf::from);
            let local = std::env::var_os("LOCALAPPDATA")
                .map_or_else(|| home.join("AppData").join("Local"), PathBuf::from);
            Self::new(
                appdata.join(product),
                local.join("Programs").join(product),
                format!("{product}.exe"),
            )
        }
        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        {
            let config = dirs_next::config_dir().unwrap_or_else(|| home.join(".config"));
            Self::new(
                config.join(product),
                PathBuf::from("/usr/share").join(product.to_lowercase()),
                product.to_lowercase(),
            )
        }
    }

    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    #[must_use]
    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    /// Exact process image name used for running checks and kills.
    #[must_use]
    pub fn image_name(&self) -> &str {
        &self.image_name
    }

    #[must_use]
    pub fn executable(&self) -> PathBuf {
        #[cfg(target_os = "macos")]
        {
            let stem = self.image_name.trim_end_matches(".app");
            self.install_dir.join("Contents").join("MacOS").join(stem)
        }
        #[cfg(not(target_os = "macos"))]
        {
            self.install_dir.join(&self.image_name)
        }
    }

    /// The device-identity configuration file holding the telemetry ids.
    #[must_use]
    pub fn storage_json(&self) -> PathBuf {
        self.global_storage().join("storage.json")
    }

    /// The host's embedded key-value session database.
    #[must_use]
    pub fn session_db(&self) -> PathBuf {
        self.global_storage().join("state.vscdb")
    }

    #[must_use]
    pub fn global_storage(&self) -> PathBuf {
        self.data_dir.join("User").join("globalStorage")
    }

    #[must_use]
    pub fn workspace_storage(&self) -> PathBuf {
        self.data_dir.join("User").join("workspaceStorage")
    }

    #[must_use]
    pub fn history_dir(&self) -> PathBuf {
        self.data_dir.join("User").join("History")
    }

    #[must_use]
    pub fn user_file(&self, name: &str) -> PathBuf {
        self.data_dir.join("User").join(name)
    }

    #[must_use]
    pub fn data_file(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }

    /// Auth artifacts outside the session database, deleted on resets.
    #[must_use]
    pub fn auth_files(&self) -> Vec<PathBuf> {
        [
            "Cookies",
            "Cookies-journal",
            "Network Persistent State",
            "TransportSecurity",
        ]
        .iter()
        .map(|name| self.data_dir.join(name))
        .collect()
    }

    /// Browser-engine cache directories wiped on factory reset.
    #[must_use]
    pub fn cache_dirs(&self) -> Vec<PathBuf> {
        [
            "Cache",
            "Code Cache",
            "GPUCache",
            "DawnCache",
            "DawnGraphiteCache",
            "DawnWebGPUCache",
            "Service Worker",
        ]
        .iter()
        .map(|name| self.data_dir.join(name))
        .collect()
    }

    /// Program files searched for fingerprint-acquisition code, as
    /// `(label, candidate paths)`. The vendor has moved the entry bundle
    /// between releases, so the first existing candidate wins.
    #[must_use]
    pub fn patch_targets(&self) -> Vec<(String, Vec<PathBuf>)> {
        let out = self.resources_out_dir();
        let mut targets = vec![
            (
                "main.js".to_string(),
                vec![
                    out.join("main.js"),
                    out.join("vs").join("code").join("electron-main").join("main.js"),
                ],
            ),
            (
                "cliProcessMain.js".to_string(),
                vec![out
                    .join("vs")
                    .join("server")
                    .join("node")
                    .join("cliProcessMain.js")],
            ),
        ];
        if cfg!(not(target_os = "macos")) {
            targets.push((
                "workbench.desktop.main.js".to_string(),
                vec![out
                    .join("vs")
                    .join("workbench")
                    .join("workbench.desktop.main.js")],
            ));
        }
        targets
    }

    fn resources_out_dir(&self) -> PathBuf {
        #[cfg(target_os = "macos")]
        {
            self.install_dir
                .join("Contents")
                .join("Resources")
                .join("app")
                .join("out")
        }
        #[cfg(not(target_os = "macos"))]
        {
            self.install_dir.join("resources").join("app").join("out")
        }
    }
}

/// Locations of swx's own state: the profile database and the snapshot
/// trees it manages.
#[derive(Debug, Clone)]
pub struct SwxLayout {
    data_dir: PathBuf,
}

impl SwxLayout {
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Default app data directory: `~/.swx`.
    #[must_use]
    pub fn default_dir() -> PathBuf {
        dirs_next::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".swx")
    }

    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    #[must_use]
    pub fn profiles_db(&self) -> PathBuf {
        self.data_dir.join("profiles.db")
    }

    #[must_use]
    pub fn backups_root(&self) -> PathBuf {
        self.data_dir.join("backups")
    }

    /// Pre-mutation copies of host program files.
    #[must_use]
    pub fn patch_backups_root(&self) -> PathBuf {
        self.data_dir.join("patch-backups")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> HostLayout {
        HostLayout::new("/data", "/install", "Host")
    }

    #[test]
    fn storage_and_session_paths_live_under_global_storage() {
        let layout = layout();
        assert!(layout.storage_json().ends_with("User/globalStorage/storage.json"));
        assert!(layout.session_db().ends_with("User/globalStorage/state.vscdb"));
    }

    #[test]
    fn patch_targets_name_the_entry_bundles() {
        let labels: Vec<String> = layout()
            .patch_targets()
            .into_iter()
            .map(|(label, _)| label)
            .collect();
        assert!(labels.contains(&"main.js".to_string()));
        assert!(labels.contains(&"cliProcessMain.js".to_string()));
    }

    #[test]
    fn auth_files_are_rooted_in_the_data_dir() {
        for path in layout().auth_files() {
            assert!(path.starts_with("/data"));
        }
    }
}
