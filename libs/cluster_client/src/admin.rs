use std::time::Duration;

use remote_exec::{Command, RemoteExecutor};
use tracing::{info, warn};

use crate::regexes::{IMPORTED_TABLE_RE, LEADING_UUID_RE, NEW_OLD_UUID_RE, STARTED_SNAPSHOT_CREATION_RE, UUID_ONLY_RE};

use crate::error::AdminError;
use crate::types::{ImportedIds, SnapshotId, SnapshotState, TabletId, TabletLeader};

pub const CREATE_SNAPSHOT_TIMEOUT_SEC: u64 = 3600;
pub const RESTORE_SNAPSHOT_TIMEOUT_SEC: u64 = 86400;
const POLL_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_TS_WEB_PORT: u16 = 9000;
const FS_DATA_DIRS_ARG_PREFIX: &str = "--fs_data_dirs=";

/// Identifies a table either by UUID or by (keyspace, table name), the same
/// two ways `list_tablets`/`create_snapshot` accept a table on the yb-admin
/// command line.
#[derive(Debug, Clone)]
pub enum TableRef {
    Uuid(String),
    Named { keyspace: String, table: String },
}

#[derive(Debug, Clone, Default)]
pub struct SnapshotDetails {
    pub keyspaces: Vec<String>,
    pub tables: Vec<String>,
    pub table_uuids: Vec<String>,
}

/// What `create_snapshot` should snapshot: explicit tables, or an entire
/// keyspace/database - the same three-way choice
/// `YBBackup.create_snapshot` makes between `create_snapshot`,
/// `create_keyspace_snapshot` and `create_database_snapshot`.
#[derive(Debug, Clone)]
pub enum SnapshotTarget {
    Tables(Vec<TableRef>),
    Keyspace(String),
    Database(String),
}

/// Thin wrapper around a [`RemoteExecutor`] pointed at a yb-admin binary and
/// a control-plane master list. Every method shells out and regex-parses
/// stdout rather than speaking the control-plane's wire protocol directly.
pub struct AdminClient {
    executor: RemoteExecutor,
    admin_binary: String,
    masters: Vec<String>,
    web_port: u16,
}

impl AdminClient {
    pub fn new(executor: RemoteExecutor, admin_binary: impl Into<String>, masters: Vec<String>) -> Self {
        Self {
            executor,
            admin_binary: admin_binary.into(),
            masters,
            web_port: DEFAULT_TS_WEB_PORT,
        }
    }

    pub fn with_web_port(mut self, web_port: u16) -> Self {
        self.web_port = web_port;
        self
    }

    fn master_addresses(&self) -> String {
        self.masters.join(",")
    }

    async fn run_yb_admin(&self, args: &[String], host: Option<&str>) -> Result<String, AdminError> {
        let cmd = Command::new(&self.admin_binary)
            .arg("-master_addresses")
            .arg(self.master_addresses())
            .args(args.to_vec());
        let out = match host {
            Some(host) => self.executor.run_remote(&cmd, host).await?,
            None => self.executor.run_local(&cmd).await?,
        };
        Ok(out)
    }

    pub async fn create_snapshot(&self, target: &SnapshotTarget) -> Result<SnapshotId, AdminError> {
        let mut args = Vec::new();
        match target {
            SnapshotTarget::Tables(table_refs) => {
                args.push("create_snapshot".to_string());
                for table_ref in table_refs {
                    args.extend(table_ref_args(table_ref));
                }
            }
            SnapshotTarget::Keyspace(keyspace) => {
                args.push("create_keyspace_snapshot".to_string());
                args.push(keyspace.clone());
            }
            SnapshotTarget::Database(database) => {
                args.push("create_database_snapshot".to_string());
                args.push(database.clone());
            }
        }
        let output = self.run_yb_admin(&args, None).await?;
        let matched = STARTED_SNAPSHOT_CREATION_RE
            .captures(&output)
            .ok_or_else(|| AdminError::AdminParseError {
                expected: "'Started snapshot creation: <id>'".to_string(),
                output: output.clone(),
            })?;
        let snapshot_id = matched.name("uuid").unwrap().as_str().trim();
        if !UUID_ONLY_RE.is_match(snapshot_id) {
            return Err(AdminError::AdminParseError {
                expected: "a valid snapshot uuid".to_string(),
                output,
            });
        }
        let uuid = uuid::Uuid::parse_str(snapshot_id)
            .map_err(|_| AdminError::AdminParseError { expected: "a parseable uuid".to_string(), output: snapshot_id.to_string() })?;
        Ok(SnapshotId::new(uuid))
    }

    /// Polls `list_snapshots` every 5s until `snapshot_id` reaches
    /// `terminal_state.terminal_label()` or `FAILED`, or `timeout` elapses.
    /// When `want_details`, also parses the per-line `NAMESPACE`/`TABLE` JSON
    /// and returns it - if the admin tool is too old to emit it, returns
    /// [`AdminError::CompatibilityException`] so the caller can retry with
    /// `want_details = false`.
    pub async fn wait_for_snapshot(
        &self,
        snapshot_id: &SnapshotId,
        terminal_state: SnapshotState,
        timeout: Duration,
        want_details: bool,
    ) -> Result<Option<SnapshotDetails>, AdminError> {
        let complete_label = terminal_state.terminal_label();
        let snapshot_id_str = snapshot_id.to_string();
        let mut args = vec!["list_snapshots".to_string()];
        if want_details {
            args.push("SHOW_DETAILS".to_string());
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let output = self.run_yb_admin(&args, None).await?;
            if let Some(details) = parse_list_snapshots(&output, &snapshot_id_str, complete_label, want_details)? {
                if want_details && details.tables.is_empty() {
                    return Err(AdminError::CompatibilityException(
                        "created snapshot does not have tables".to_string(),
                    ));
                }
                info!(%snapshot_id, "snapshot reached terminal state");
                return Ok(if want_details { Some(details) } else { None });
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AdminError::SnapshotTimeout {
                    snapshot_id: snapshot_id_str,
                    timeout_secs: timeout.as_secs(),
                });
            }
            warn!(%snapshot_id, "still waiting for snapshot to complete");
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn find_tablet_leaders(&self, table_ref: &TableRef) -> Result<Vec<TabletLeader>, AdminError> {
        let args = match table_ref {
            TableRef::Uuid(id) => vec!["list_tablets".to_string(), format!("tableid.{id}"), "0".to_string()],
            TableRef::Named { keyspace, table } => {
                vec!["list_tablets".to_string(), keyspace.clone(), table.clone(), "0".to_string()]
            }
        };
        let output = self.run_yb_admin(&args, None).await?;
        Ok(parse_tablet_leaders(&output))
    }

    pub async fn find_data_dirs(&self, tserver_host: &str) -> Result<Vec<String>, AdminError> {
        let url = format!("http://{}:{}/varz", tserver_host, self.web_port);
        let body = reqwest::get(&url).await?.text().await?;
        let mut data_dirs = Vec::new();
        for line in body.lines() {
            if let Some(rest) = line.strip_prefix(FS_DATA_DIRS_ARG_PREFIX) {
                data_dirs.extend(rest.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string));
                break;
            }
        }
        if data_dirs.is_empty() {
            return Err(AdminError::AdminParseError {
                expected: FS_DATA_DIRS_ARG_PREFIX.to_string(),
                output: body,
            });
        }
        Ok(data_dirs)
    }

    pub async fn find_snapshot_directories(
        &self,
        data_dir: &str,
        snapshot_id: &SnapshotId,
        tserver_host: &str,
    ) -> Result<Vec<String>, AdminError> {
        let cmd = Command::new("find")
            .arg(data_dir)
            .args(["!", "-readable", "-prune", "-o"])
            .arg("-name")
            .arg(snapshot_id.to_string())
            .arg("-and")
            .arg("-wholename")
            .arg("*/yb-data/tserver/data/rocksdb/table-*/tablet-*.snapshots/*")
            .arg("-print");
        let output = self.executor.run_remote(&cmd, tserver_host).await?;
        Ok(lines_non_empty(&output))
    }

    pub async fn find_snapshot_files(
        &self,
        data_dir: &str,
        snapshot_id: &SnapshotId,
        tserver_host: &str,
    ) -> Result<Vec<String>, AdminError> {
        let cmd = Command::new("find")
            .arg(data_dir)
            .arg("-mindepth")
            .arg("8")
            .arg("-maxdepth")
            .arg("9")
            .arg("-name")
            .arg("*")
            .arg("-and")
            .arg("-wholename")
            .arg(format!(
                "*/yb-data/tserver/data/rocksdb/table-*/tablet-*.snapshots/{}*",
                snapshot_id
            ))
            .arg("-type")
            .arg("f");
        let output = self.executor.run_remote(&cmd, tserver_host).await?;
        Ok(lines_non_empty(&output))
    }

    /// Imports snapshot metadata from `metadata_file_path`, returning the
    /// old-id -> new-id maps. Colocated table ids are verified by comparing
    /// only the trailing 4 characters (the postgres OID suffix) - a
    /// deliberately narrow check, kept exactly as the control plane's own
    /// tooling does it.
    pub async fn import_snapshot(
        &self,
        metadata_file_path: &str,
        keyspace: Option<&str>,
        tables: &[String],
        host: &str,
    ) -> Result<ImportedIds, AdminError> {
        let mut args = vec!["import_snapshot".to_string(), metadata_file_path.to_string()];
        if let Some(keyspace) = keyspace {
            args.push(keyspace.to_string());
        }
        if !tables.is_empty() {
            args.push(tables.join(" "));
        }
        let output = self.run_yb_admin(&args, Some(host)).await?;

        let mut imported = ImportedIds::default();
        for line in output.lines() {
            if let Some(captures) = IMPORTED_TABLE_RE.captures(line) {
                info!(
                    keyspace = %captures.get(1).unwrap().as_str(),
                    table = %captures.get(2).unwrap().as_str(),
                    "imported table"
                );
                continue;
            }
            if NEW_OLD_UUID_RE.is_match(line) {
                let (entity, old_id, new_id) = split_tab_triple(line)?;
                record_mapping(&mut imported, &entity, old_id, new_id)?;
                continue;
            }
        }
        Ok(imported)
    }

    pub async fn restore_snapshot(&self, snapshot_id: &SnapshotId, host: &str) -> Result<(), AdminError> {
        let args = vec!["restore_snapshot".to_string(), snapshot_id.to_string()];
        self.run_yb_admin(&args, Some(host)).await?;
        Ok(())
    }

    /// Dumps the snapshot's metadata (`SnapshotInfoPB`) to `metadata_path` on
    /// the control plane host, for the orchestrator to then upload.
    pub async fn export_snapshot(&self, snapshot_id: &SnapshotId, metadata_path: &str) -> Result<(), AdminError> {
        let args = vec!["export_snapshot".to_string(), snapshot_id.to_string(), metadata_path.to_string()];
        self.run_yb_admin(&args, None).await?;
        Ok(())
    }

    /// Deletes the cluster-side snapshot once its data is durably uploaded,
    /// unless `--no_snapshot_deleting` kept it around.
    pub async fn delete_snapshot(&self, snapshot_id: &SnapshotId) -> Result<(), AdminError> {
        let args = vec!["delete_snapshot".to_string(), snapshot_id.to_string()];
        self.run_yb_admin(&args, None).await?;
        Ok(())
    }
}

fn table_ref_args(table_ref: &TableRef) -> Vec<String> {
    match table_ref {
        TableRef::Uuid(id) => vec![format!("tableid.{id}")],
        TableRef::Named { keyspace, table } => vec![keyspace.clone(), table.clone()],
    }
}

fn parse_tablet_leaders(output: &str) -> Vec<TabletLeader> {
    let mut leaders = Vec::new();
    for line in output.lines() {
        if !LEADING_UUID_RE.is_match(line) {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 3 {
            continue;
        }
        let Some(tablet_id) = TabletId::parse(fields[0]) else { continue };
        let Some((host, _port)) = fields[2].split_once(':') else { continue };
        leaders.push(TabletLeader { tablet_id, host: host.to_string() });
    }
    leaders
}

fn lines_non_empty(output: &str) -> Vec<String> {
    output.lines().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

fn parse_list_snapshots(
    output: &str,
    snapshot_id: &str,
    complete_label: &str,
    want_details: bool,
) -> Result<Option<SnapshotDetails>, AdminError> {
    let mut details = SnapshotDetails::default();
    let mut keyspaces_by_id = std::collections::HashMap::new();
    let mut found = false;
    let mut in_detail_block = false;

    for line in output.lines() {
        if !found {
            if let Some(rest) = line.strip_prefix(snapshot_id) {
                let state = rest.trim();
                if state == complete_label {
                    found = true;
                    in_detail_block = want_details;
                    if !want_details {
                        break;
                    }
                    continue;
                } else if state == "FAILED" {
                    return Err(AdminError::SnapshotFailed { snapshot_id: snapshot_id.to_string() });
                }
            }
        } else if in_detail_block {
            if !line.starts_with(' ') {
                break;
            }
            let parsed: serde_json::Value = serde_json::from_str(line.trim()).map_err(|_| AdminError::AdminParseError {
                expected: "per-line snapshot detail JSON".to_string(),
                output: line.to_string(),
            })?;
            let object_type = parsed["type"].as_str().unwrap_or_default();
            let object_id = parsed["id"].as_str().unwrap_or_default().to_string();
            match object_type {
                "NAMESPACE" => {
                    keyspaces_by_id.entry(object_id.clone()).or_insert_with(|| {
                        let is_ysql = parsed["data"]["database_type"].as_str() == Some("YQL_DATABASE_PGSQL");
                        let name = parsed["data"]["name"].as_str().unwrap_or_default();
                        if is_ysql {
                            format!("ysql.{name}")
                        } else {
                            name.to_string()
                        }
                    });
                }
                "TABLE" => {
                    let namespace_id = parsed["data"]["namespace_id"].as_str().unwrap_or_default();
                    if let Some(keyspace) = keyspaces_by_id.get(namespace_id) {
                        details.keyspaces.push(keyspace.clone());
                    }
                    details.tables.push(parsed["data"]["name"].as_str().unwrap_or_default().to_string());
                    details.table_uuids.push(object_id);
                }
                _ => {}
            }
        }
    }

    Ok(found.then_some(details))
}

fn split_tab_triple(line: &str) -> Result<(String, String, String), AdminError> {
    let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
    if fields.len() != 3 {
        return Err(AdminError::AdminParseError {
            expected: "entity<TAB>old_id<TAB>new_id".to_string(),
            output: line.to_string(),
        });
    }
    Ok((fields[0].to_string(), fields[1].to_string(), fields[2].to_string()))
}

fn record_mapping(imported: &mut ImportedIds, entity: &str, old_id: String, new_id: String) -> Result<(), AdminError> {
    if entity == "ParentColocatedTable" || entity == "ColocatedTable" {
        verify_colocated_table_ids(&old_id, &new_id)?;
    }
    if entity == "Table" || entity == "ParentColocatedTable" || entity == "ColocatedTable" {
        imported.tables.insert(new_id, old_id);
    } else if entity.starts_with("Tablet") {
        imported.tablets.insert(new_id, old_id);
    } else if entity == "Snapshot" {
        imported.snapshot = (old_id, new_id);
    }
    Ok(())
}

/// Compares only the trailing 4 characters of each id - the postgres OID
/// suffix. Preserved exactly as the control-plane tooling checks it, even
/// though it ignores the rest of the id.
pub fn verify_colocated_table_ids(old_id: &str, new_id: &str) -> Result<(), AdminError> {
    let old_oid = oid_suffix(old_id);
    let new_oid = oid_suffix(new_id);
    if old_oid != new_oid {
        return Err(AdminError::ColocatedOidMismatch { old_id: old_id.to_string(), new_id: new_id.to_string() });
    }
    Ok(())
}

fn oid_suffix(table_id: &str) -> &str {
    let len = table_id.len();
    &table_id[len.saturating_sub(4)..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use remote_exec::ExecutionMode;

    fn executor() -> RemoteExecutor {
        RemoteExecutor::new(ExecutionMode::Direct, 1, Duration::from_secs(5))
    }

    fn client() -> AdminClient {
        AdminClient::new(executor(), "yb-admin", vec!["10.0.0.1:7100".to_string()])
    }

    #[test]
    fn oid_suffix_takes_last_four_chars() {
        assert_eq!(oid_suffix("0000400300004000800000000000407f"), "407f");
    }

    #[test]
    fn colocated_ids_same_suffix_different_prefix_ok() {
        assert!(verify_colocated_table_ids("aaaaaaaaaaaa407f", "bbbbbbbbbbbb407f").is_ok());
    }

    #[test]
    fn colocated_ids_different_suffix_equal_prefix_rejected() {
        assert!(verify_colocated_table_ids("aaaaaaaaaaaa407f", "aaaaaaaaaaaa1234").is_err());
    }

    #[test]
    fn parses_started_snapshot_creation_line() {
        let output = "Metadata for table exists\nStarted snapshot creation: 0436035d-c4c5-40c6-b45b-19538849b0d9\n";
        let m = STARTED_SNAPSHOT_CREATION_RE.captures(output).unwrap();
        assert_eq!(m.name("uuid").unwrap().as_str().trim(), "0436035d-c4c5-40c6-b45b-19538849b0d9");
    }

    #[test]
    fn parse_list_snapshots_without_details_finds_complete() {
        let output = "Snapshot UUID                         State\n0436035d-c4c5-40c6-b45b-19538849b0d9  COMPLETE\n";
        let result = parse_list_snapshots(output, "0436035d-c4c5-40c6-b45b-19538849b0d9", "COMPLETE", false).unwrap();
        assert!(result.is_some());
    }

    #[test]
    fn parse_list_snapshots_raises_on_failed_state() {
        let output = "0436035d-c4c5-40c6-b45b-19538849b0d9  FAILED\n";
        let err = parse_list_snapshots(output, "0436035d-c4c5-40c6-b45b-19538849b0d9", "COMPLETE", false).unwrap_err();
        assert!(matches!(err, AdminError::SnapshotFailed { .. }));
    }

    #[test]
    fn parse_list_snapshots_with_details_extracts_tables() {
        let output = concat!(
            "0436035d-c4c5-40c6-b45b-19538849b0d9  COMPLETE\n",
            "  {\"type\":\"NAMESPACE\",\"id\":\"e4c5591446db417f83a52c679de03118\",\"data\":{\"name\":\"a\",\"database_type\":\"YQL_DATABASE_PGSQL\"}}\n",
            "  {\"type\":\"TABLE\",\"id\":\"d9603c2cab0b48ec807936496ac0e70e\",\"data\":{\"name\":\"t2\",\"namespace_id\":\"e4c5591446db417f83a52c679de03118\"}}\n",
        );
        let details = parse_list_snapshots(output, "0436035d-c4c5-40c6-b45b-19538849b0d9", "COMPLETE", true)
            .unwrap()
            .unwrap();
        assert_eq!(details.tables, vec!["t2"]);
        assert_eq!(details.keyspaces, vec!["ysql.a"]);
        assert_eq!(details.table_uuids, vec!["d9603c2cab0b48ec807936496ac0e70e"]);
    }

    #[test]
    fn parse_tablet_leaders_splits_host_from_host_port() {
        let output = "cb3c3c1ff6cb4e1989ed95f2b531d8cf\tLEADER\t127.0.0.1:9100\n";
        let leaders = parse_tablet_leaders(output);
        assert_eq!(leaders.len(), 1);
        assert_eq!(leaders[0].host, "127.0.0.1");
        assert_eq!(leaders[0].tablet_id.as_str(), "cb3c3c1ff6cb4e1989ed95f2b531d8cf");
    }

    #[test]
    fn parse_tablet_leaders_ignores_header_line() {
        let output = "Tablet UUID\t\tLeader\nnot-a-uuid-header\tsomething\telse\n";
        assert!(parse_tablet_leaders(output).is_empty());
    }

    #[test]
    fn admin_client_constructs() {
        let _ = client();
    }
}
