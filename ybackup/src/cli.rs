//! Command-line surface, mirroring the flag table the orchestrator is
//! contractually bound to (masters, keyspace/table selectors, storage
//! destination, concurrency/retention knobs, remote-exec configuration).
//!
//! Grounded in the teacher's `LocalProxyCliArgs`: one flat `#[derive(Parser)]`
//! struct, `#[arg(long, default_value_t = ...)]` throughout, a
//! `value_parser` range check instead of validating ranges by hand later.

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "ybackup",
    version,
    about = "Differential snapshot backup and restore for a tablet-sharded database"
)]
pub struct Cli {
    /// Control-plane master addresses, comma-separated.
    #[arg(long, required = true, value_delimiter = ',')]
    pub masters: Vec<String>,

    /// Logical namespace(s) to back up or restore. May repeat.
    #[arg(long = "keyspace")]
    pub keyspace: Vec<String>,

    /// YCQL table name(s). May repeat.
    #[arg(long = "table")]
    pub table: Vec<String>,

    /// Optional table UUIDs, positionally paired with `--table`.
    #[arg(long = "table_uuid")]
    pub table_uuid: Vec<String>,

    /// Storage root URI for this backup.
    #[arg(long, required = true)]
    pub backup_location: String,

    #[arg(long, value_enum, default_value_t = StorageType::S3)]
    pub storage_type: StorageType,

    #[arg(long, default_value_t = 8, value_parser = clap::value_parser!(u32).range(1..=100))]
    pub parallelism: u32,

    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..=100))]
    pub restore_points: u32,

    /// Predecessor backup root, required for `create_diff`.
    #[arg(long)]
    pub prev_manifest_source: Option<String>,

    /// Reuse an already-created cluster-side snapshot instead of creating one.
    #[arg(long)]
    pub snapshot_id: Option<String>,

    #[arg(long, default_value_t = false)]
    pub disable_checksums: bool,

    /// Use `--backup_location` verbatim instead of appending a generated
    /// `keyspace-<name>` / `table-<ks>.<tbl>-<uuids>` suffix.
    #[arg(long, default_value_t = false)]
    pub no_auto_name: bool,

    /// Leave the cluster-side snapshot in place instead of deleting it once
    /// the backup/restore finishes.
    #[arg(long, default_value_t = false)]
    pub no_snapshot_deleting: bool,

    /// Unix-microsecond timestamp for point-in-time restore.
    #[arg(long)]
    pub restore_time: Option<i64>,

    #[arg(long, default_value = "yugabyte")]
    pub ssh_user: String,

    /// User the remote command actually runs as, via `sudo -u` if it differs
    /// from `ssh_user`.
    #[arg(long, default_value = "yugabyte")]
    pub remote_user: String,

    #[arg(long)]
    pub ssh_key_path: Option<String>,

    /// JSON object `{"namespace", "pod", "container"}` selecting the tserver
    /// pod to exec into, when the cluster runs under Kubernetes instead of SSH.
    #[arg(long)]
    pub k8s_config: Option<String>,

    #[arg(long, default_value = "yb-admin")]
    pub admin_binary: String,

    /// Append-only JSON-lines log of invocations.
    #[arg(long)]
    pub history_file: Option<Utf8PathBuf>,

    /// Local path to a universe encryption key file to upload alongside
    /// `create`/`create_diff`; deleted locally once uploaded.
    #[arg(long)]
    pub backup_keys_source: Option<String>,

    /// Local path to write the universe encryption key file `restore_keys`
    /// downloads.
    #[arg(long)]
    pub restore_keys_destination: Option<String>,

    /// Required to `delete` a backup that a live manifest still chains to.
    #[arg(long, default_value_t = false)]
    pub force: bool,

    /// Emit logs as JSON lines instead of human-readable text.
    #[arg(long, default_value_t = false)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Create,
    CreateDiff,
    Restore,
    RestoreKeys,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lower")]
pub enum StorageType {
    S3,
    Gcs,
    Az,
    Nfs,
}
