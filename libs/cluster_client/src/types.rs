use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotId(pub Uuid);

impl SnapshotId {
    pub fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl std::fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A tablet UUID as yb-admin prints it: 32 lowercase hex characters, no dashes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TabletId(String);

impl TabletId {
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let is_hex32 = trimmed.len() >= 32 && trimmed.chars().all(|c| c.is_ascii_hexdigit() || c == '-');
        is_hex32.then(|| Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabletLeader {
    pub tablet_id: TabletId,
    pub host: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotState {
    Creating,
    Complete,
    Failed,
    Restoring,
    Restored,
}

impl SnapshotState {
    pub fn terminal_label(self) -> &'static str {
        match self {
            SnapshotState::Creating | SnapshotState::Complete => "COMPLETE",
            SnapshotState::Restoring | SnapshotState::Restored => "RESTORED",
            SnapshotState::Failed => "FAILED",
        }
    }
}

/// Old-id -> new-id mappings produced by `import_snapshot`, plus the
/// new keyspace/table names it discovered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportedIds {
    pub tables: HashMap<String, String>,
    pub tablets: HashMap<String, String>,
    pub snapshot: (String, String),
}
