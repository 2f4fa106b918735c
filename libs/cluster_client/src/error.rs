#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("couldn't parse yb-admin output, expected {expected}: {output}")]
    AdminParseError { expected: String, output: String },

    #[error("snapshot {snapshot_id} failed")]
    SnapshotFailed { snapshot_id: String },

    #[error("timed out waiting for snapshot {snapshot_id} after {timeout_secs}s")]
    SnapshotTimeout { snapshot_id: String, timeout_secs: u64 },

    /// The admin tool is too old to emit the detail we asked for; the caller
    /// should retry the same call with `want_details = false`.
    #[error("control plane does not support requested detail: {0}")]
    CompatibilityException(String),

    #[error("colocated table ids have different OIDs: old {old_id}, new {new_id}")]
    ColocatedOidMismatch { old_id: String, new_id: String },

    #[error(transparent)]
    Exec(#[from] remote_exec::ExecutorError),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}
