mod create;
mod delete;
mod restore;
mod restore_keys;

pub use create::run_create;
pub use delete::run_delete;
pub use restore::run_restore;
pub use restore_keys::run_restore_keys;

use std::sync::Arc;

use cluster_client::AdminClient;
use remote_exec::RemoteExecutor;
use remote_storage::GenericObjectStore;

use crate::concurrency::TaskPool;
use crate::config::Config;

/// Bundles the collaborators every command needs: one executor, one storage
/// adapter, one admin client, all built once from [`Config`] in `main`.
pub struct RunContext {
    pub config: Config,
    pub executor: Arc<RemoteExecutor>,
    pub store: Arc<GenericObjectStore>,
    pub admin: Arc<AdminClient>,
    pub pool: TaskPool,
}

impl RunContext {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let executor = Arc::new(config.new_remote_executor());
        let store = Arc::new(GenericObjectStore::from_config(&config.storage_config)?);
        let admin = Arc::new(AdminClient::new(config.new_remote_executor(), config.admin_binary.clone(), config.masters.clone()));
        let pool = TaskPool::new(config.parallelism);
        Ok(Self { config, executor, store, admin, pool })
    }
}

/// Builds the logical backup root: `<backup_location>/keyspace-<name>` (or
/// `table-<ks>.<tables>-<uuids>` for a table-level YCQL backup), unless
/// `no_auto_name` says to use `--backup_location` verbatim.
pub fn snapshot_filepath(config: &Config) -> String {
    if config.no_auto_name {
        return config.backup_location.clone();
    }
    if !config.table.is_empty() {
        let keyspace = config.keyspace.first().cloned().unwrap_or_default();
        let tables = config.table.join(",");
        let uuids = config.table_uuid.join(",");
        format!("{}/table-{keyspace}.{tables}-{uuids}", config.backup_location)
    } else {
        format!("{}/keyspace-{}", config.backup_location, config.keyspace.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;

    fn config_for(args: &[&str]) -> Config {
        let cli = Cli::parse_from(args);
        Config::from_cli(&cli).unwrap()
    }

    #[test]
    fn keyspace_backup_uses_keyspace_prefix() {
        let config = config_for(&[
            "ybackup",
            "--masters",
            "10.0.0.1:7100",
            "--keyspace",
            "foo",
            "--backup_location",
            "s3://bucket/path",
            "create",
        ]);
        assert_eq!(snapshot_filepath(&config), "s3://bucket/path/keyspace-foo");
    }

    #[test]
    fn table_backup_uses_table_prefix() {
        let config = config_for(&[
            "ybackup",
            "--masters",
            "10.0.0.1:7100",
            "--keyspace",
            "foo",
            "--table",
            "bar",
            "--table_uuid",
            "uuid1",
            "--backup_location",
            "s3://bucket/path",
            "create",
        ]);
        assert_eq!(snapshot_filepath(&config), "s3://bucket/path/table-foo.bar-uuid1");
    }

    #[test]
    fn no_auto_name_uses_backup_location_verbatim() {
        let config = config_for(&[
            "ybackup",
            "--masters",
            "10.0.0.1:7100",
            "--keyspace",
            "foo",
            "--backup_location",
            "s3://bucket/path",
            "--no_auto_name",
            "create",
        ]);
        assert_eq!(snapshot_filepath(&config), "s3://bucket/path");
    }
}
