//! Top-level error type: the taxonomy every collaborator crate's error rolls
//! up into, plus the handful of failures only the orchestrator itself can
//! raise (argument validation, chain-integrity refusals).

use backup_core::ManifestError;
use cluster_client::AdminError;
use remote_exec::ExecutorError;
use remote_storage::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("invalid arguments: {0}")]
    InvalidArgument(String),

    #[error("missing credentials for {backend} backend: {detail}")]
    AuthConfigMissing { backend: String, detail: String },

    #[error("checksum mismatch for {path}: {detail}")]
    ChecksumMismatch { path: String, detail: String },

    #[error("refusing to delete {location}: a live manifest still chains to it via manifest_previous (use --force)")]
    ChainIntegrity { location: String },

    #[error(transparent)]
    Admin(#[from] AdminError),

    #[error(transparent)]
    Exec(#[from] ExecutorError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Checksum(#[from] backup_core::ChecksumError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
