//! The versioned, JSON-serialisable record describing one backup: its
//! metadata, storage layout, per-tablet file inventory, and pointer to its
//! predecessor in the backup chain.
//!
//! Mutated exclusively by the diff planner during `create`/`create_diff`,
//! then uploaded once. A later differential backup may still rewrite
//! *predecessor* manifests in place as part of chain amortisation - that is
//! the only post-upload mutation this format allows.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MANIFEST_VERSION: &str = "1.0";
pub const MANIFEST_FILENAME: &str = "MANIFEST";
pub const DIRECTORY_SENTINEL: &str = "DIRECTORY";

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("tablet {tablet} mixes a DIRECTORY sentinel with per-file entries")]
    DirectoryExclusivityViolated { tablet: String },
    #[error("manifest has no entry for leader tablet {0}")]
    MissingTabletMetadata(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Copy,
    Move,
    Noop,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub filename: String,
    pub generation: u32,
    pub src_location: String,
    pub action: Action,
}

/// One tablet's file inventory: either a per-file plan, or the `DIRECTORY`
/// sentinel meaning "the whole snapshot directory was uploaded wholesale".
/// Modelled as an enum so the two shapes can't be mixed in memory, even
/// though the wire format still special-cases the literal `"DIRECTORY"` key
/// to match the schema exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TabletEntry {
    #[default]
    Empty,
    Directory,
    Files(HashMap<String, FileEntry>),
}

impl TabletEntry {
    pub fn is_directory(&self) -> bool {
        matches!(self, TabletEntry::Directory)
    }

    pub fn files(&self) -> Option<&HashMap<String, FileEntry>> {
        match self {
            TabletEntry::Files(files) => Some(files),
            _ => None,
        }
    }

    pub fn files_mut(&mut self) -> &mut HashMap<String, FileEntry> {
        if !matches!(self, TabletEntry::Files(_)) {
            *self = TabletEntry::Files(HashMap::new());
        }
        match self {
            TabletEntry::Files(files) => files,
            _ => unreachable!(),
        }
    }
}

impl Serialize for TabletEntry {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        match self {
            TabletEntry::Empty => serializer.collect_map(std::iter::empty::<(String, FileEntry)>()),
            TabletEntry::Directory => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(DIRECTORY_SENTINEL, &true)?;
                map.end()
            }
            TabletEntry::Files(files) => {
                let mut map = serializer.serialize_map(Some(files.len()))?;
                for (filename, entry) in files {
                    map.serialize_entry(filename, entry)?;
                }
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for TabletEntry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw: serde_json::Map<String, serde_json::Value> = Deserialize::deserialize(deserializer)?;
        if raw.is_empty() {
            return Ok(TabletEntry::Empty);
        }
        if raw.contains_key(DIRECTORY_SENTINEL) {
            if raw.len() > 1 {
                // The map-level `Deserialize` for `HashMap<String, TabletEntry>`
                // doesn't pass the tablet key down to its values, so the
                // violating tablet's id isn't visible from here.
                return Err(serde::de::Error::custom(
                    ManifestError::DirectoryExclusivityViolated { tablet: "<unknown>".to_string() },
                ));
            }
            return Ok(TabletEntry::Directory);
        }
        let mut files = HashMap::new();
        for (filename, value) in raw {
            let entry: FileEntry = serde_json::from_value(value).map_err(serde::de::Error::custom)?;
            files.insert(filename, entry);
        }
        Ok(TabletEntry::Files(files))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub manifest_version: String,
    pub manifest_id: String,
    pub manifest_name: String,
    #[serde(default)]
    pub manifest_savepoint_number: u32,
    pub manifest_type: String,
    #[serde(default)]
    pub manifest_universe_name: String,
    #[serde(default)]
    pub manifest_universe_id: String,
    #[serde(default)]
    pub manifest_create_date: String,
    pub manifest_location: String,
    #[serde(default)]
    pub manifest_previous: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub r#type: String,
    #[serde(default)]
    pub database_tables: Vec<String>,
    #[serde(default)]
    pub database_objects: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageInfo {
    pub location: String,
    pub location_type: String,
    #[serde(default)]
    pub keyspace: String,
    #[serde(default)]
    pub table: String,
    #[serde(default)]
    pub table_id: HashMap<String, String>,
    #[serde(default)]
    pub tablet_ids: HashMap<String, TabletEntry>,
    #[serde(default)]
    pub files: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub snapshot_id: String,
    #[serde(default)]
    pub tablet_leaders: HashMap<String, String>,
    #[serde(default)]
    pub create_date: String,
    #[serde(default)]
    pub start_time: String,
    #[serde(default)]
    pub end_time: String,
    #[serde(default)]
    pub local_directories: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub metadata: ManifestMetadata,
    pub database: DatabaseInfo,
    pub storage: StorageInfo,
    pub backup: BackupInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManifestEnvelope {
    manifest: Manifest,
}

impl Manifest {
    pub fn new_full(location: String, location_type: String, keyspace: String) -> Self {
        Self::new(location, location_type, keyspace, "full", String::new())
    }

    pub fn new_diff(location: String, location_type: String, keyspace: String, previous: String) -> Self {
        Self::new(location, location_type, keyspace, "diff", previous)
    }

    fn new(location: String, location_type: String, keyspace: String, manifest_type: &str, previous: String) -> Self {
        let id = Uuid::new_v4();
        Manifest {
            metadata: ManifestMetadata {
                manifest_version: MANIFEST_VERSION.to_string(),
                manifest_id: id.to_string(),
                manifest_name: format!("MANIFEST-{MANIFEST_VERSION}-{id}"),
                manifest_type: manifest_type.to_string(),
                manifest_create_date: Utc::now().to_rfc3339(),
                manifest_location: location.clone(),
                manifest_previous: previous,
                ..Default::default()
            },
            database: DatabaseInfo::default(),
            storage: StorageInfo {
                location,
                location_type,
                keyspace,
                ..Default::default()
            },
            backup: BackupInfo::default(),
        }
    }

    pub fn to_json(&self) -> Result<String, ManifestError> {
        let envelope = ManifestEnvelope { manifest: self.clone() };
        Ok(serde_json::to_string_pretty(&envelope)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, ManifestError> {
        let envelope: ManifestEnvelope = serde_json::from_str(raw)?;
        Ok(envelope.manifest)
    }

    /// Extracts `storage.tablet_ids` and `metadata.manifest_previous` from a
    /// raw JSON value and applies them to this manifest, leaving every other
    /// field untouched.
    pub fn update_from(&mut self, json: &serde_json::Value) -> Result<(), ManifestError> {
        if let Some(previous) = json.pointer("/manifest/metadata/manifest_previous").and_then(|v| v.as_str()) {
            self.metadata.manifest_previous = previous.to_string();
        }
        if let Some(tablet_ids) = json.pointer("/manifest/storage/tablet_ids") {
            let parsed: HashMap<String, TabletEntry> = serde_json::from_value(tablet_ids.clone())?;
            self.storage.tablet_ids = parsed;
        }
        Ok(())
    }

    /// Checks that every leader tablet has an entry in this manifest. The
    /// other invariant this format carries - a tablet never mixes the
    /// `DIRECTORY` sentinel with per-file entries - can't be broken by a
    /// `Manifest` that already exists in memory, since [`TabletEntry`]'s
    /// `Directory` and `Files` variants are mutually exclusive by
    /// construction; a wire-format payload that tries to express both is
    /// rejected during deserialization instead, before it ever becomes a
    /// `TabletEntry`.
    pub fn validate(&self, leader_tablets: &[String]) -> Result<(), ManifestError> {
        for tablet in leader_tablets {
            if !self.storage.tablet_ids.contains_key(tablet) {
                return Err(ManifestError::MissingTabletMetadata(tablet.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_full_has_expected_manifest_name_shape() {
        let m = Manifest::new_full("s3://bucket/keyspace-foo".into(), "s3".into(), "foo".into());
        assert!(m.metadata.manifest_name.starts_with("MANIFEST-1.0-"));
        assert_eq!(m.metadata.manifest_type, "full");
        assert_eq!(m.metadata.manifest_previous, "");
    }

    #[test]
    fn round_trips_through_json() {
        let mut m = Manifest::new_diff("s3://b/k".into(), "s3".into(), "foo".into(), "s3://b/k-prev".into());
        m.storage.tablet_ids.insert(
            "a".repeat(32),
            TabletEntry::Files(HashMap::from([(
                "000001.sst".to_string(),
                FileEntry { filename: "000001.sst".into(), generation: 1, src_location: "s3://b/k/tablet-a/000001.sst".into(), action: Action::Copy },
            )])),
        );
        let json = m.to_json().unwrap();
        let back = Manifest::from_json(&json).unwrap();
        assert_eq!(back.metadata.manifest_id, m.metadata.manifest_id);
        assert_eq!(back.storage.tablet_ids.len(), 1);
    }

    #[test]
    fn directory_sentinel_round_trips() {
        let mut m = Manifest::new_full("s3://b/k".into(), "s3".into(), "foo".into());
        m.storage.tablet_ids.insert("a".repeat(32), TabletEntry::Directory);
        let json = m.to_json().unwrap();
        let back = Manifest::from_json(&json).unwrap();
        assert!(back.storage.tablet_ids.get(&"a".repeat(32)).unwrap().is_directory());
    }

    #[test]
    fn unknown_extra_field_does_not_break_parsing() {
        let raw = r#"{"manifest":{"metadata":{"manifest_version":"1.0","manifest_id":"x","manifest_name":"MANIFEST-1.0-x","manifest_type":"full","manifest_location":"s3://b/k"},"database":{},"storage":{"location":"s3://b/k","location_type":"s3"},"backup":{},"future_field":"ignored"}}"#;
        let m = Manifest::from_json(raw).unwrap();
        assert_eq!(m.metadata.manifest_id, "x");
    }

    #[test]
    fn update_from_extracts_tablet_ids_and_previous_only() {
        let mut m = Manifest::new_full("s3://b/k".into(), "s3".into(), "foo".into());
        let incoming = serde_json::json!({
            "manifest": {
                "metadata": {"manifest_previous": "s3://b/k-ancestor"},
                "storage": {"tablet_ids": {("a".repeat(32)): {"DIRECTORY": true}}},
            }
        });
        m.update_from(&incoming).unwrap();
        assert_eq!(m.metadata.manifest_previous, "s3://b/k-ancestor");
        assert!(m.storage.tablet_ids.get(&"a".repeat(32)).unwrap().is_directory());
    }

    #[test]
    fn validate_rejects_missing_leader_tablet() {
        let m = Manifest::new_full("s3://b/k".into(), "s3".into(), "foo".into());
        let err = m.validate(&["a".repeat(32)]).unwrap_err();
        assert!(matches!(err, ManifestError::MissingTabletMetadata(_)));
    }

    #[test]
    fn directory_sentinel_mixed_with_file_entries_is_rejected_on_parse() {
        let raw = serde_json::json!({
            "manifest": {
                "metadata": {"manifest_version": "1.0", "manifest_id": "x", "manifest_name": "MANIFEST-1.0-x", "manifest_type": "full", "manifest_location": "s3://b/k"},
                "database": {},
                "storage": {
                    "location": "s3://b/k",
                    "location_type": "s3",
                    "tablet_ids": {
                        ("a".repeat(32)): {
                            "DIRECTORY": true,
                            "000001.sst": {"filename": "000001.sst", "generation": 1, "src_location": "s3://b/k/tablet-a/000001.sst", "action": "COPY"},
                        }
                    }
                },
                "backup": {},
            }
        })
        .to_string();

        let err = Manifest::from_json(&raw).unwrap_err();
        assert!(matches!(err, ManifestError::Json(_)));
        assert!(err.to_string().contains("mixes a DIRECTORY sentinel"));
    }

    #[test]
    fn update_from_rejects_directory_mixed_with_file_entries() {
        let mut m = Manifest::new_full("s3://b/k".into(), "s3".into(), "foo".into());
        let incoming = serde_json::json!({
            "manifest": {
                "storage": {
                    "tablet_ids": {
                        ("a".repeat(32)): {
                            "DIRECTORY": true,
                            "000001.sst": {"filename": "000001.sst", "generation": 1, "src_location": "s3://b/k/tablet-a/000001.sst", "action": "COPY"},
                        }
                    }
                },
            }
        });
        let err = m.update_from(&incoming).unwrap_err();
        assert!(matches!(err, ManifestError::Json(_)));
    }
}
