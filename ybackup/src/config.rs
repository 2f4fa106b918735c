//! Validated runtime configuration built from [`Cli`] post-validation -
//! mirrors the teacher's split between raw `ArgMatches`/CLI struct and a
//! validated `PageServerConf` used everywhere else in the program.

use std::time::Duration;

use remote_exec::{ExecutionMode, RemoteExecutor, DEFAULT_CLOUD_RETRIES, DEFAULT_SSH_RETRIES};
use remote_storage::{AzureConfig, GcsConfig, NfsConfig, ObjectStoreConfig, RemotePath, S3Config};

use crate::cli::{Cli, StorageType};
use crate::error::OrchestratorError;

pub struct Config {
    pub masters: Vec<String>,
    pub keyspace: Vec<String>,
    pub table: Vec<String>,
    pub table_uuid: Vec<String>,
    pub backup_location: String,
    pub storage_config: ObjectStoreConfig,
    pub storage_root: RemotePath,
    pub parallelism: u32,
    pub restore_points: u32,
    pub prev_manifest_source: Option<String>,
    pub snapshot_id: Option<String>,
    pub disable_checksums: bool,
    pub no_auto_name: bool,
    pub no_snapshot_deleting: bool,
    pub restore_time: Option<i64>,
    pub admin_binary: String,
    pub history_file: Option<camino::Utf8PathBuf>,
    pub backup_keys_source: Option<String>,
    pub restore_keys_destination: Option<String>,
    pub force: bool,
    pub execution_mode: ExecutionMode,
    pub is_ysql: bool,
}

impl Config {
    pub fn from_cli(cli: &Cli) -> Result<Self, OrchestratorError> {
        if cli.keyspace.is_empty() {
            return Err(OrchestratorError::InvalidArgument("--keyspace is required".to_string()));
        }
        let is_ysql = cli.keyspace.iter().any(|k| k.starts_with("ysql."));
        if is_ysql && cli.keyspace.len() > 1 {
            return Err(OrchestratorError::InvalidArgument(
                "only a single YSQL database may be backed up at a time".to_string(),
            ));
        }
        if is_ysql && !cli.table.is_empty() {
            return Err(OrchestratorError::InvalidArgument(
                "table-level backups are not supported for YSQL databases".to_string(),
            ));
        }
        if matches!(cli.command, crate::cli::Command::CreateDiff) && cli.prev_manifest_source.is_none() {
            return Err(OrchestratorError::InvalidArgument(
                "create_diff requires --prev_manifest_source".to_string(),
            ));
        }

        let (storage_config, storage_root) = parse_storage_location(cli.storage_type, &cli.backup_location)?;
        let execution_mode = build_execution_mode(cli)?;

        Ok(Config {
            masters: cli.masters.clone(),
            keyspace: cli.keyspace.clone(),
            table: cli.table.clone(),
            table_uuid: cli.table_uuid.clone(),
            backup_location: cli.backup_location.clone(),
            storage_config,
            storage_root,
            parallelism: cli.parallelism,
            restore_points: cli.restore_points,
            prev_manifest_source: cli.prev_manifest_source.clone(),
            snapshot_id: cli.snapshot_id.clone(),
            disable_checksums: cli.disable_checksums,
            no_auto_name: cli.no_auto_name,
            no_snapshot_deleting: cli.no_snapshot_deleting,
            restore_time: cli.restore_time,
            admin_binary: cli.admin_binary.clone(),
            history_file: cli.history_file.clone(),
            backup_keys_source: cli.backup_keys_source.clone(),
            restore_keys_destination: cli.restore_keys_destination.clone(),
            force: cli.force,
            execution_mode,
            is_ysql,
        })
    }

    pub fn new_remote_executor(&self) -> RemoteExecutor {
        let retries = match &self.execution_mode {
            ExecutionMode::Direct => DEFAULT_CLOUD_RETRIES,
            _ => DEFAULT_SSH_RETRIES,
        };
        RemoteExecutor::new(self.execution_mode.clone(), retries, Duration::from_secs(300))
    }
}

fn build_execution_mode(cli: &Cli) -> Result<ExecutionMode, OrchestratorError> {
    if let Some(k8s_config) = &cli.k8s_config {
        let parsed: K8sConfig = serde_json::from_str(k8s_config)
            .map_err(|e| OrchestratorError::InvalidArgument(format!("--k8s_config is not valid JSON: {e}")))?;
        return Ok(ExecutionMode::K8sExec {
            namespace: parsed.namespace,
            pod: parsed.pod,
            container: parsed.container,
            kubectl_binary: parsed.kubectl_binary.unwrap_or_else(|| "kubectl".to_string()),
        });
    }
    let mut ssh_args = vec!["-o".to_string(), "StrictHostKeyChecking=no".to_string()];
    if let Some(key_path) = &cli.ssh_key_path {
        ssh_args.push("-i".to_string());
        ssh_args.push(key_path.clone());
    }
    Ok(ExecutionMode::Ssh {
        user: cli.ssh_user.clone(),
        remote_user: (cli.ssh_user != cli.remote_user).then(|| cli.remote_user.clone()),
        ssh_binary: "ssh".to_string(),
        ssh_args,
    })
}

#[derive(serde::Deserialize)]
struct K8sConfig {
    namespace: String,
    pod: String,
    container: String,
    kubectl_binary: Option<String>,
}

/// Splits `--storage_type`/`--backup_location` into the adapter config and
/// the root [`RemotePath`] every upload/download is relative to, the same
/// split the teacher's `RemoteStorageConfig::from_toml` draws between "which
/// backend" and "which bucket/prefix".
fn parse_storage_location(storage_type: StorageType, location: &str) -> Result<(ObjectStoreConfig, RemotePath), OrchestratorError> {
    match storage_type {
        StorageType::S3 => {
            let (bucket, prefix) = split_bucket_uri(location, "s3://")?;
            Ok((
                ObjectStoreConfig::S3(S3Config {
                    bucket_name: bucket,
                    bucket_region: std::env::var("AWS_DEFAULT_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
                    prefix_in_bucket: None,
                    endpoint: std::env::var("AWS_HOST_BASE").ok(),
                    sse: false,
                }),
                RemotePath::new(prefix),
            ))
        }
        StorageType::Gcs => {
            let (bucket, prefix) = split_bucket_uri(location, "gs://")?;
            Ok((
                ObjectStoreConfig::Gcs(GcsConfig {
                    bucket_name: bucket,
                    credentials_json_path: std::env::var("GCS_CREDENTIALS_JSON").ok(),
                }),
                RemotePath::new(prefix),
            ))
        }
        StorageType::Az => {
            let (container, prefix) = split_bucket_uri(location, "az://")?;
            Ok((
                ObjectStoreConfig::Azure(AzureConfig {
                    container_name: container,
                    storage_account: std::env::var("AZURE_STORAGE_ACCOUNT").ok(),
                    sas_env_var: "AZURE_STORAGE_SAS_TOKEN".to_string(),
                }),
                RemotePath::new(prefix),
            ))
        }
        StorageType::Nfs => Ok((ObjectStoreConfig::Nfs(NfsConfig { mount_path: location.to_string() }), RemotePath::new(""))),
    }
}

fn split_bucket_uri(location: &str, scheme: &str) -> Result<(String, String), OrchestratorError> {
    let rest = location.strip_prefix(scheme).ok_or_else(|| {
        OrchestratorError::InvalidArgument(format!("--backup_location {location:?} must start with {scheme:?}"))
    })?;
    match rest.split_once('/') {
        Some((bucket, prefix)) => Ok((bucket.to_string(), prefix.to_string())),
        None => Ok((rest.to_string(), String::new())),
    }
}
