//! The differential backup engine: manifest model, checksum command
//! construction, and the file-level diff planner. Everything else in the
//! workspace is glue connecting this engine's decisions to external tools.

pub mod checksum;
pub mod diff;
pub mod manifest;

pub use checksum::{cat_file, checksum_dir, checksum_file, compare, ChecksumEntry, ChecksumError, ChecksumFile};
pub use diff::{plan_diff, CurrentTabletFiles, DiffPlan, FileKey};
pub use manifest::{
    Action, BackupInfo, DatabaseInfo, FileEntry, Manifest, ManifestError, ManifestMetadata, StorageInfo, TabletEntry,
    DIRECTORY_SENTINEL, MANIFEST_FILENAME, MANIFEST_VERSION,
};
