//! Snapshot/restore engine for the host's session-state tree.
//!
//! A snapshot is a plain directory of copied members plus a
//! `metadata.json` describing what was captured. Temporary snapshots are
//! workflow-internal: never listed, deleted once consumed.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rand::RngCore;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, warn};

use swx_domain::{filename_timestamp, HostLayout, Snapshot, SnapshotKind, SnapshotMember};

use crate::fsutil;

const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("snapshot not found at {0}")]
    NotFound(PathBuf),
}

/// Result of a restore pass. Restore never rolls back: members already
/// restored stay restored, and a mid-pass failure is surfaced as completed
/// vs intended counts plus the cause.
#[derive(Debug, Clone)]
pub struct RestoreReport {
    pub restored: Vec<String>,
    pub intended: usize,
    pub error: Option<String>,
}

impl RestoreReport {
    #[must_use]
    pub fn complete(&self) -> bool {
        self.error.is_none() && self.restored.len() == self.intended
    }
}

pub struct ArchiveBackupEngine {
    root: PathBuf,
    host: HostLayout,
}

impl ArchiveBackupEngine {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, host: HostLayout) -> Self {
        Self {
            root: root.into(),
            host,
        }
    }

    /// Fixed, ordered member table for a snapshot kind: `(name, live path)`.
    ///
    /// The identity-configuration file is deliberately not a member: it is
    /// owned by the device-identity store, and restoring it here would
    /// clobber an identity installed earlier in the same workflow.
    fn members_for(&self, kind: SnapshotKind) -> Vec<(String, PathBuf)> {
        let session: Vec<(String, PathBuf)> = vec![
            ("state.vscdb".into(), self.host.session_db()),
            ("workspaceStorage".into(), self.host.workspace_storage()),
            ("History".into(), self.host.history_dir()),
            ("Cookies".into(), self.host.data_file("Cookies")),
            ("Local Storage".into(), self.host.data_file("Local Storage")),
            (
                "Session Storage".into(),
                self.host.data_file("Session Storage"),
            ),
        ];
        let settings: Vec<(String, PathBuf)> = vec![
            ("settings.json".into(), self.host.user_file("settings.json")),
            (
                "keybindings.json".into(),
                self.host.user_file("keybindings.json"),
            ),
            ("snippets".into(), self.host.user_file("snippets")),
            ("profiles.json".into(), self.host.user_file("profiles.json")),
            (
                "extensions.json".into(),
                self.host.user_file("extensions.json"),
            ),
        ];
        match kind {
            SnapshotKind::Session => session,
            SnapshotKind::Settings => settings,
            SnapshotKind::Complete => session.into_iter().chain(settings).collect(),
        }
    }

    /// Copy every present member of `kind` into a fresh timestamped
    /// directory. Absent members are skipped, not errors.
    pub fn snapshot(
        &self,
        kind: SnapshotKind,
        owner_email: Option<&str>,
        temporary: bool,
    ) -> Result<Snapshot> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("failed to create {}", self.root.display()))?;
        let path = self.fresh_snapshot_dir(kind, owner_email)?;

        let mut members = Vec::new();
        for (name, source) in self.members_for(kind) {
            if !source.exists() {
                continue;
            }
            let target = path.join(&name);
            let success = match fsutil::copy_path(&source, &target) {
                Ok(()) => true,
                Err(err) => {
                    warn!(member = %name, %err, "failed to capture snapshot member");
                    false
                }
            };
            members.push(SnapshotMember {
                name,
                source_path: source,
                success,
            });
        }

        let snapshot = Snapshot {
            path: path.clone(),
            kind,
            owner_email: owner_email.map(ToOwned::to_owned),
            timestamp: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default(),
            temporary,
            members,
        };
        let metadata = serde_json::to_string_pretty(&snapshot)
            .context("failed to encode snapshot metadata")?;
        fs::write(path.join(METADATA_FILE), metadata)
            .with_context(|| format!("failed to write metadata in {}", path.display()))?;
        debug!(path = %path.display(), kind = kind.as_str(), temporary, "snapshot captured");
        Ok(snapshot)
    }

    /// Install every member present in the snapshot over the live tree.
    ///
    /// Live files are preserved as `.before-restore` siblings; live
    /// directories are deleted and replaced whole. Members absent from the
    /// snapshot leave the live side untouched.
    pub fn restore(&self, snapshot: &Snapshot) -> Result<RestoreReport> {
        if !snapshot.path.is_dir() {
            return Err(BackupError::NotFound(snapshot.path.clone()).into());
        }
        let live_by_name = self.members_for(SnapshotKind::Complete);
        let captured: Vec<&SnapshotMember> = snapshot
            .members
            .iter()
            .filter(|member| member.success && snapshot.path.join(&member.name).exists())
            .collect();

        let mut report = RestoreReport {
            restored: Vec::new(),
            intended: captured.len(),
            error: None,
        };
        for member in captured {
            let Some((_, live)) = live_by_name.iter().find(|(name, _)| *name == member.name)
            else {
                continue;
            };
            let source = snapshot.path.join(&member.name);
            let outcome = (|| -> Result<()> {
                if live.exists() {
                    if live.is_dir() {
                        fsutil::remove_path(live)?;
                    } else {
                        fsutil::preserve_before_restore(live)?;
                    }
                }
                fsutil::copy_path(&source, live)
            })();
            match outcome {
                Ok(()) => report.restored.push(member.name.clone()),
                Err(err) => {
                    warn!(member = %member.name, %err, "restore stopped mid-pass");
                    report.error = Some(format!("{}: {err:#}", member.name));
                    break;
                }
            }
        }
        Ok(report)
    }

    /// Every non-temporary snapshot under the backup root, newest first.
    pub fn list(&self) -> Result<Vec<Snapshot>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to list {}", self.root.display()))
            }
        };
        let mut snapshots = Vec::new();
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            match self.load(&entry.path()) {
                Ok(snapshot) if !snapshot.temporary => snapshots.push(snapshot),
                Ok(_) => {}
                Err(err) => warn!(path = %entry.path().display(), %err, "skipping unreadable snapshot"),
            }
        }
        // RFC 3339 sorts lexicographically.
        snapshots.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(snapshots)
    }

    /// Read back a snapshot's metadata from its directory.
    pub fn load(&self, path: &Path) -> Result<Snapshot> {
        let metadata = fs::read_to_string(path.join(METADATA_FILE))
            .with_context(|| format!("failed to read metadata in {}", path.display()))?;
        let mut snapshot: Snapshot =
            serde_json::from_str(&metadata).context("failed to parse snapshot metadata")?;
        snapshot.path = path.to_path_buf();
        Ok(snapshot)
    }

    pub fn delete(&self, snapshot: &Snapshot) -> Result<()> {
        fsutil::remove_path(&snapshot.path)
    }

    fn fresh_snapshot_dir(&self, kind: SnapshotKind, owner_email: Option<&str>) -> Result<PathBuf> {
        let stamp = filename_timestamp(OffsetDateTime::now_utc());
        let mut salt = [0u8; 2];
        rand::thread_rng().fill_bytes(&mut salt);
        let name = match owner_email {
            Some(owner) => format!("{}_{owner}_{stamp}-{}", kind.as_str(), hex::encode(salt)),
            None => format!("{}_{stamp}-{}", kind.as_str(), hex::encode(salt)),
        };
        let path = self.root.join(name);
        fs::create_dir_all(&path)
            .with_context(|| format!("failed to create snapshot dir {}", path.display()))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn engine(tmp: &Path) -> ArchiveBackupEngine {
        let host = HostLayout::new(tmp.join("host-data"), tmp.join("host-install"), "Host");
        ArchiveBackupEngine::new(tmp.join("backups"), host)
    }

    fn seed_host(tmp: &Path) {
        let data = tmp.join("host-data");
        fs::create_dir_all(data.join("User/globalStorage")).unwrap();
        fs::create_dir_all(data.join("User/workspaceStorage/ws1")).unwrap();
        fs::write(data.join("User/globalStorage/state.vscdb"), b"db-bytes").unwrap();
        fs::write(data.join("User/globalStorage/storage.json"), b"{}").unwrap();
        fs::write(data.join("User/workspaceStorage/ws1/state.json"), b"ws").unwrap();
        fs::write(data.join("Cookies"), b"cookie-bytes").unwrap();
        fs::write(data.join("User/settings.json"), b"{\"a\":1}").unwrap();
    }

    #[test]
    fn snapshot_skips_absent_members_silently() -> Result<()> {
        let tmp = tempdir()?;
        seed_host(tmp.path());
        let snapshot = engine(tmp.path()).snapshot(SnapshotKind::Complete, None, false)?;
        assert!(snapshot.member("state.vscdb").is_some());
        assert!(snapshot.member("History").is_none());
        // The identity configuration is never a snapshot member.
        assert!(snapshot.member("storage.json").is_none());
        Ok(())
    }

    #[test]
    fn snapshot_restore_round_trip_is_byte_identical() -> Result<()> {
        let tmp = tempdir()?;
        seed_host(tmp.path());
        let engine = engine(tmp.path());
        let snapshot = engine.snapshot(SnapshotKind::Complete, Some("a@b.c"), false)?;

        let report = engine.restore(&snapshot)?;
        assert!(report.complete(), "error: {:?}", report.error);
        let data = tmp.path().join("host-data");
        assert_eq!(
            fs::read(data.join("User/globalStorage/state.vscdb"))?,
            b"db-bytes"
        );
        assert_eq!(
            fs::read(data.join("User/workspaceStorage/ws1/state.json"))?,
            b"ws"
        );
        assert_eq!(fs::read(data.join("Cookies"))?, b"cookie-bytes");
        Ok(())
    }

    #[test]
    fn restore_preserves_live_files_and_replaces_directories() -> Result<()> {
        let tmp = tempdir()?;
        seed_host(tmp.path());
        let engine = engine(tmp.path());
        let snapshot = engine.snapshot(SnapshotKind::Complete, None, true)?;

        let data = tmp.path().join("host-data");
        fs::write(data.join("Cookies"), b"mutated-after-snapshot")?;
        fs::write(
            data.join("User/workspaceStorage/ws2-added-later"),
            b"extra",
        )
        .ok();
        fs::create_dir_all(data.join("User/workspaceStorage/ws2"))?;

        let report = engine.restore(&snapshot)?;
        assert!(report.complete());
        assert_eq!(fs::read(data.join("Cookies"))?, b"cookie-bytes");
        assert_eq!(
            fs::read(data.join("Cookies.before-restore"))?,
            b"mutated-after-snapshot"
        );
        // Directory members are replaced whole; post-snapshot additions go.
        assert!(!data.join("User/workspaceStorage/ws2").exists());
        Ok(())
    }

    #[test]
    fn restore_leaves_members_absent_from_the_snapshot_untouched() -> Result<()> {
        let tmp = tempdir()?;
        seed_host(tmp.path());
        let engine = engine(tmp.path());
        let snapshot = engine.snapshot(SnapshotKind::Session, None, false)?;

        let data = tmp.path().join("host-data");
        fs::write(data.join("User/settings.json"), b"{\"a\":2}")?;
        engine.restore(&snapshot)?;
        // settings.json is not a session member.
        assert_eq!(fs::read(data.join("User/settings.json"))?, b"{\"a\":2}");
        Ok(())
    }

    #[test]
    fn list_excludes_temporary_and_sorts_newest_first() -> Result<()> {
        let tmp = tempdir()?;
        seed_host(tmp.path());
        let engine = engine(tmp.path());

        let mut old = engine.snapshot(SnapshotKind::Session, None, false)?;
        let _temp = engine.snapshot(SnapshotKind::Complete, None, true)?;
        let newer = engine.snapshot(SnapshotKind::Settings, None, false)?;

        // Force a strict ordering between the two persistent snapshots.
        old.timestamp = "2020-01-01T00:00:00Z".into();
        fs::write(
            old.path.join(METADATA_FILE),
            serde_json::to_string_pretty(&old)?,
        )?;

        let listed = engine.list()?;
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].path, newer.path);
        assert_eq!(listed[1].path, old.path);
        Ok(())
    }

    #[test]
    fn restore_of_a_deleted_snapshot_reports_not_found() -> Result<()> {
        let tmp = tempdir()?;
        seed_host(tmp.path());
        let engine = engine(tmp.path());
        let snapshot = engine.snapshot(SnapshotKind::Session, None, true)?;
        engine.delete(&snapshot)?;
        let err = engine.restore(&snapshot).expect_err("deleted snapshot");
        assert!(matches!(
            err.downcast_ref::<BackupError>(),
            Some(BackupError::NotFound(_))
        ));
        Ok(())
    }
}
