//! Talks to a running cluster's control plane and tablet servers: creating
//! and polling snapshots, discovering where a table's tablets live, and
//! locating the on-disk snapshot directories the orchestrator needs to copy.
//!
//! Every call here shells out to an external admin binary or curls a status
//! endpoint and regex-parses the result, rather than speaking the cluster's
//! native RPC protocol - the same posture the teacher's scrubber code takes
//! toward pageserver-internal formats it doesn't own a client library for.

mod admin;
mod error;
mod regexes;
mod types;

pub use admin::{AdminClient, SnapshotDetails, SnapshotTarget, TableRef, CREATE_SNAPSHOT_TIMEOUT_SEC, RESTORE_SNAPSHOT_TIMEOUT_SEC};
pub use error::AdminError;
pub use types::{ImportedIds, SnapshotId, SnapshotState, TabletId, TabletLeader};
