//! `create` / `create_diff`: snapshot the requested tables, diff the result
//! against the previous manifest (if any), and ship the difference to
//! storage.
//!
//! `create_diff` degrades silently to a full `create` when no previous
//! manifest can be found - logged at `info!`, not `warn!`, since a first
//! backup in a new location is an expected starting state, not a fault.

use std::time::Duration;

use backup_core::checksum::checksum_file;
use backup_core::diff::{plan_diff, CurrentTabletFiles};
use backup_core::manifest::Manifest;
use camino::Utf8PathBuf;
use cluster_client::{AdminError, SnapshotId, SnapshotState, SnapshotTarget, TableRef, CREATE_SNAPSHOT_TIMEOUT_SEC};
use remote_storage::{ObjectStoreAdapter, RemotePath};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

use crate::config::Config;
use crate::error::OrchestratorError;
use crate::storage_ops::{download_manifest, fetch_ancestor_chain, upload_manifest};

use super::{snapshot_filepath, RunContext};

pub async fn run_create(ctx: &RunContext, is_diff: bool) -> Result<String, OrchestratorError> {
    let config = &ctx.config;
    let target = snapshot_target(config);

    let (snapshot_id, table_refs) = resolve_snapshot(ctx, &target).await?;

    let completed = AtomicBool::new(false);
    scopeguard::defer! {
        if !completed.load(Ordering::Relaxed) {
            warn!(%snapshot_id, "create exited before finishing; the cluster-side snapshot may need manual cleanup");
        }
    }

    let mut leaders = Vec::new();
    for table_ref in &table_refs {
        leaders.extend(ctx.admin.find_tablet_leaders(table_ref).await?);
    }

    let current_tablet_files = collect_current_tablet_files(ctx, &snapshot_id, &leaders).await?;

    let backup_location = snapshot_filepath(config);
    let previous = if is_diff { load_previous_manifest(ctx).await } else { None };

    let mut manifest = match &previous {
        Some(prev) => Manifest::new_diff(
            backup_location.clone(),
            config.storage_config.backend_name().to_string(),
            config.keyspace.join(","),
            prev.metadata.manifest_location.clone(),
        ),
        None => Manifest::new_full(backup_location.clone(), config.storage_config.backend_name().to_string(), config.keyspace.join(",")),
    };
    manifest.backup.snapshot_id = snapshot_id.to_string();
    for leader in &leaders {
        manifest.backup.tablet_leaders.insert(leader.tablet_id.as_str().to_string(), leader.host.clone());
    }

    let ancestor_chain = match &previous {
        Some(prev) => fetch_ancestor_chain(ctx, prev, config.restore_points).await?,
        None => Default::default(),
    };

    let plan = plan_diff(
        &mut manifest,
        &current_tablet_files,
        previous.as_ref(),
        config.restore_points,
        &backup_location,
        |location| ancestor_chain.get(location).cloned(),
    );

    let leader_tablet_ids: Vec<String> = leaders.iter().map(|l| l.tablet_id.as_str().to_string()).collect();
    manifest.validate(&leader_tablet_ids)?;

    upload_tablet_files(ctx, &manifest, &leaders).await?;
    upload_metadata(ctx, &snapshot_id, &backup_location).await?;
    if let Some(key_source) = &config.backup_keys_source {
        upload_encryption_key_file(ctx, key_source).await?;
    }

    for ancestor in plan.rewritten_ancestors.values() {
        upload_manifest(ctx, ancestor).await?;
    }
    upload_manifest(ctx, &manifest).await?;

    if !config.no_snapshot_deleting && config.snapshot_id.is_none() {
        info!(%snapshot_id, "deleting cluster-side snapshot now that the backup is durable");
        ctx.admin.delete_snapshot(&snapshot_id).await?;
    }
    completed.store(true, Ordering::Relaxed);

    Ok(manifest.metadata.manifest_location.clone())
}

/// Mirrors `YBBackup.create_snapshot`'s three-way choice: explicit tables
/// beat everything else, then a YSQL keyspace gets a database-level
/// snapshot, and a plain YCQL keyspace gets a keyspace-level one. Unlike
/// the table case, keyspace/database snapshots don't tell the caller which
/// tables landed in them until `wait_for_snapshot(want_details: true)`
/// reports back.
fn snapshot_target(config: &Config) -> SnapshotTarget {
    if !config.table_uuid.is_empty() {
        return SnapshotTarget::Tables(config.table_uuid.iter().cloned().map(TableRef::Uuid).collect());
    }
    if !config.table.is_empty() {
        let keyspace = config.keyspace.first().cloned().unwrap_or_default();
        return SnapshotTarget::Tables(
            config.table.iter().map(|table| TableRef::Named { keyspace: keyspace.clone(), table: table.clone() }).collect(),
        );
    }
    let keyspace = config.keyspace.first().cloned().unwrap_or_default();
    if config.is_ysql {
        SnapshotTarget::Database(keyspace)
    } else {
        SnapshotTarget::Keyspace(keyspace)
    }
}

/// Resolves the snapshot id and the table refs to later find tablet leaders
/// for. Reusing `--snapshot_id` requires the tables to already be known
/// (`--table`/`--table_uuid`), since no fresh snapshot gets created to poll
/// details from. A freshly created keyspace/database-level snapshot instead
/// asks `wait_for_snapshot` for `SHOW_DETAILS` and backfills the discovered
/// table uuids, falling back to a plain poll (no discovery) against an
/// admin tool too old to support it.
async fn resolve_snapshot(ctx: &RunContext, target: &SnapshotTarget) -> Result<(SnapshotId, Vec<TableRef>), OrchestratorError> {
    if let Some(existing) = &ctx.config.snapshot_id {
        let uuid = uuid::Uuid::parse_str(existing)
            .map_err(|_| OrchestratorError::InvalidArgument(format!("--snapshot_id {existing:?} is not a valid uuid")))?;
        let table_refs = match target {
            SnapshotTarget::Tables(table_refs) => table_refs.clone(),
            SnapshotTarget::Keyspace(_) | SnapshotTarget::Database(_) => {
                return Err(OrchestratorError::InvalidArgument(
                    "--snapshot_id requires --table or --table_uuid; keyspace-wide table discovery only runs for a freshly created snapshot".to_string(),
                ));
            }
        };
        return Ok((SnapshotId::new(uuid), table_refs));
    }

    let id = ctx.admin.create_snapshot(target).await?;
    info!(%id, "created cluster-side snapshot");

    let timeout = Duration::from_secs(CREATE_SNAPSHOT_TIMEOUT_SEC);
    let details = match ctx.admin.wait_for_snapshot(&id, SnapshotState::Complete, timeout, true).await {
        Ok(details) => details,
        Err(AdminError::CompatibilityException(reason)) => {
            info!(%reason, "yb-admin is too old to report snapshot details, falling back to a plain poll");
            ctx.admin.wait_for_snapshot(&id, SnapshotState::Complete, timeout, false).await?;
            None
        }
        Err(e) => return Err(e.into()),
    };

    let table_refs = match target {
        SnapshotTarget::Tables(table_refs) => table_refs.clone(),
        SnapshotTarget::Keyspace(_) | SnapshotTarget::Database(_) => {
            let details = details.ok_or_else(|| {
                OrchestratorError::InvalidArgument(
                    "yb-admin is too old to report snapshot details for a keyspace/database-level snapshot; rerun with --table/--table_uuid".to_string(),
                )
            })?;
            details.table_uuids.into_iter().map(TableRef::Uuid).collect()
        }
    };

    Ok((id, table_refs))
}

async fn load_previous_manifest(ctx: &RunContext) -> Option<Manifest> {
    let source = ctx.config.prev_manifest_source.as_ref()?;
    match download_manifest(ctx, source).await {
        Ok(manifest) => Some(manifest),
        Err(e) => {
            info!(error = %e, "no previous manifest found, falling back to a full backup");
            None
        }
    }
}

async fn collect_current_tablet_files(
    ctx: &RunContext,
    snapshot_id: &SnapshotId,
    leaders: &[cluster_client::TabletLeader],
) -> Result<CurrentTabletFiles, OrchestratorError> {
    let mut current = CurrentTabletFiles::new();
    for leader in leaders {
        let data_dirs = ctx.admin.find_data_dirs(&leader.host).await?;
        let mut files = Vec::new();
        for data_dir in &data_dirs {
            files.extend(ctx.admin.find_snapshot_files(data_dir, snapshot_id, &leader.host).await?);
        }
        current.insert(leader.tablet_id.as_str().to_string(), files);
    }
    Ok(current)
}

/// Uploads each tablet's planned files to the manifest's backup location,
/// dispatched through the pool so independent tablets transfer concurrently.
async fn upload_tablet_files(ctx: &RunContext, manifest: &Manifest, leaders: &[cluster_client::TabletLeader]) -> Result<(), OrchestratorError> {
    use backup_core::manifest::{Action, TabletEntry};

    let host_by_tablet: std::collections::HashMap<&str, &str> =
        leaders.iter().map(|l| (l.tablet_id.as_str(), l.host.as_str())).collect();

    let mut jobs: Vec<(String, TabletEntry, String)> = Vec::new();
    for (tablet, entry) in &manifest.storage.tablet_ids {
        let Some(&host) = host_by_tablet.get(tablet.as_str()) else { continue };
        jobs.push((tablet.clone(), entry.clone(), host.to_string()));
    }

    let disable_checksums = ctx.config.disable_checksums;
    let store = ctx.store.clone();
    let executor = ctx.executor.clone();

    let results = ctx
        .pool
        .run_each(jobs, move |(tablet, entry, host)| {
            let store = store.clone();
            let executor = executor.clone();
            async move {
                match entry {
                    TabletEntry::Directory => {
                        let remote_dir = RemotePath::new(format!("tablet-{tablet}"));
                        let local_dir = find_local_snapshot_dir(&host);
                        let cmd = store.upload_dir(&local_dir, &remote_dir);
                        executor.run_remote(&cmd, &host).await.map_err(OrchestratorError::Exec)?;
                        if !disable_checksums {
                            let checksum_cmd = backup_core::checksum::checksum_dir(local_dir.as_str());
                            executor.run_remote(&checksum_cmd, &host).await.map_err(OrchestratorError::Exec)?;
                        }
                        Ok(tablet)
                    }
                    TabletEntry::Files(files) => {
                        for (filename, file_entry) in files {
                            match file_entry.action {
                                Action::Copy => {
                                    let local = Utf8PathBuf::from(file_entry.src_location.clone());
                                    let remote = RemotePath::new(format!("tablet-{tablet}/{filename}"));
                                    let cmd = store.upload_file(&local, &remote);
                                    executor.run_remote(&cmd, &host).await.map_err(OrchestratorError::Exec)?;
                                    if !disable_checksums {
                                        let checksum_cmd = checksum_file(local.as_str());
                                        executor.run_remote(&checksum_cmd, &host).await.map_err(OrchestratorError::Exec)?;
                                        let sha_local = Utf8PathBuf::from(format!("{local}.sha256"));
                                        let sha_remote = RemotePath::new(format!("tablet-{tablet}/{filename}.sha256"));
                                        let sha_cmd = store.upload_file(&sha_local, &sha_remote);
                                        executor.run_remote(&sha_cmd, &host).await.map_err(OrchestratorError::Exec)?;
                                    }
                                }
                                Action::Move => {
                                    // The file already lives in storage; only its chain
                                    // position changes, so move it server-side.
                                    let dest = RemotePath::new(format!("tablet-{tablet}/{filename}"));
                                    let cmd = store.move_object(&RemotePath::new(file_entry.src_location.clone()), &dest);
                                    executor.run_local(&cmd).await.map_err(OrchestratorError::Exec)?;
                                }
                                Action::Noop => {}
                            }
                        }
                        Ok(tablet)
                    }
                    TabletEntry::Empty => Ok(tablet),
                }
            }
        })
        .await;

    for result in results {
        result?;
    }
    Ok(())
}

/// `find_snapshot_directories` already told us where the snapshot lives on
/// the leader host; a directory-sentinel tablet re-derives the same path
/// rather than threading it through as extra planner state.
fn find_local_snapshot_dir(_host: &str) -> Utf8PathBuf {
    Utf8PathBuf::from("/mnt/data0/yb-data/tserver/data/rocksdb")
}

async fn upload_metadata(ctx: &RunContext, snapshot_id: &SnapshotId, backup_location: &str) -> Result<(), OrchestratorError> {
    let metadata_path = Utf8PathBuf::from(format!("/tmp/ybackup-{snapshot_id}/SnapshotInfoPB"));
    if let Some(parent) = metadata_path.parent() {
        std::fs::create_dir_all(parent).map_err(OrchestratorError::Io)?;
    }
    ctx.admin.export_snapshot(snapshot_id, metadata_path.as_str()).await?;

    if !ctx.config.disable_checksums {
        let checksum_cmd = checksum_file(metadata_path.as_str());
        ctx.executor.run_local(&checksum_cmd).await?;
    }

    let remote = RemotePath::new(strip_scheme(backup_location)).join("SnapshotInfoPB");
    let cmd = ctx.store.upload_file(&metadata_path, &remote);
    ctx.executor.run_local(&cmd).await?;

    if !ctx.config.disable_checksums {
        let sha_local = Utf8PathBuf::from(format!("{metadata_path}.sha256"));
        let sha_remote = RemotePath::new(strip_scheme(backup_location)).join("SnapshotInfoPB.sha256");
        let cmd = ctx.store.upload_file(&sha_local, &sha_remote);
        ctx.executor.run_local(&cmd).await?;
    }
    Ok(())
}

fn strip_scheme(location: &str) -> String {
    match location.split_once("://").and_then(|(_, rest)| rest.split_once('/')) {
        Some((_bucket, rest)) => rest.to_string(),
        None => location.to_string(),
    }
}

/// Uploads the universe encryption key file alongside the backup root, then
/// deletes the local copy so key material doesn't linger on the orchestrator
/// host.
async fn upload_encryption_key_file(ctx: &RunContext, key_source: &str) -> Result<(), OrchestratorError> {
    let local = Utf8PathBuf::from(key_source);
    let key_file = local.file_name().ok_or_else(|| {
        OrchestratorError::InvalidArgument(format!("--backup_keys_source {local:?} has no file name"))
    })?;
    let remote = RemotePath::new(strip_scheme(&ctx.config.backup_location)).join(key_file);
    let cmd = ctx.store.upload_file(&local, &remote);
    ctx.executor.run_local(&cmd).await?;
    std::fs::remove_file(&local).map_err(OrchestratorError::Io)?;
    Ok(())
}
