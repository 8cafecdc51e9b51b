use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Which slice of the host data tree a snapshot captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKind {
    /// Session state plus settings: everything worth carrying across an
    /// identity switch.
    Complete,
    /// Session database, per-workspace caches, cookies, storage trees.
    Session,
    /// Editor settings, keybindings, snippets.
    Settings,
}

impl SnapshotKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SnapshotKind::Complete => "complete",
            SnapshotKind::Session => "session",
            SnapshotKind::Settings => "settings",
        }
    }
}

/// One captured item inside a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMember {
    pub name: String,
    pub source_path: PathBuf,
    pub success: bool,
}

/// A point-in-time copy of host state, described by the `metadata.json`
/// record written into its directory.
///
/// Temporary snapshots are workflow-internal: excluded from listings and
/// deleted once consumed by the restore step of the same workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub path: PathBuf,
    pub kind: SnapshotKind,
    pub owner_email: Option<String>,
    pub timestamp: String,
    pub temporary: bool,
    pub members: Vec<SnapshotMember>,
}

impl Snapshot {
    #[must_use]
    pub fn member(&self, name: &str) -> Option<&SnapshotMember> {
        self.members.iter().find(|member| member.name == name)
    }
}
