//! `restore`: re-materializes a backed-up manifest onto a (possibly
//! different) cluster - download metadata, `import_snapshot` to remap old
//! ids to new ones, copy each tablet's files into place, then
//! `restore_snapshot`.

use std::sync::atomic::{AtomicBool, Ordering};

use backup_core::checksum::{cat_file, checksum_file, compare, ChecksumFile};
use backup_core::manifest::{Manifest, TabletEntry};
use camino::Utf8PathBuf;
use cluster_client::{ImportedIds, SnapshotState, TableRef};
use remote_exec::RemoteExecutor;
use remote_storage::{GenericObjectStore, ObjectStoreAdapter, RemotePath};
use tracing::{info, warn};

use crate::error::OrchestratorError;
use crate::storage_ops::{download_and_verify_file, download_manifest};

use super::{snapshot_filepath, RunContext};

pub async fn run_restore(ctx: &RunContext) -> Result<String, OrchestratorError> {
    let config = &ctx.config;
    let backup_location = snapshot_filepath(config);
    let manifest = download_manifest(ctx, &backup_location).await?;

    let metadata_local = download_metadata(ctx, &backup_location).await?;
    let admin_host = config.masters.first().cloned().unwrap_or_default();
    let keyspace = config.keyspace.first().map(String::as_str);
    let imported = ctx
        .admin
        .import_snapshot(metadata_local.as_str(), keyspace, &config.table, &admin_host)
        .await?;

    restore_tablet_data(ctx, &manifest, &imported).await?;

    let new_snapshot_id = cluster_client::SnapshotId::new(
        uuid::Uuid::parse_str(&imported.snapshot.1)
            .map_err(|_| OrchestratorError::InvalidArgument(format!("import_snapshot returned a non-uuid id {:?}", imported.snapshot.1)))?,
    );
    let completed = AtomicBool::new(false);
    scopeguard::defer! {
        if !completed.load(Ordering::Relaxed) {
            warn!(%new_snapshot_id, "restore exited before finishing; the imported snapshot may need manual cleanup");
        }
    }

    ctx.admin.restore_snapshot(&new_snapshot_id, &admin_host).await?;
    ctx.admin
        .wait_for_snapshot(&new_snapshot_id, SnapshotState::Restored, std::time::Duration::from_secs(cluster_client::RESTORE_SNAPSHOT_TIMEOUT_SEC), false)
        .await?;

    if !config.no_snapshot_deleting {
        info!(%new_snapshot_id, "deleting cluster-side snapshot now that restore has completed");
        ctx.admin.delete_snapshot(&new_snapshot_id).await?;
    }
    completed.store(true, Ordering::Relaxed);

    Ok(new_snapshot_id.to_string())
}

async fn download_metadata(ctx: &RunContext, backup_location: &str) -> Result<Utf8PathBuf, OrchestratorError> {
    let remote = RemotePath::new(strip_scheme(backup_location)).join("SnapshotInfoPB");
    let local = Utf8PathBuf::from(format!("/tmp/ybackup-restore-{}/SnapshotInfoPB", uuid::Uuid::new_v4()));
    if let Some(parent) = local.parent() {
        std::fs::create_dir_all(parent).map_err(OrchestratorError::Io)?;
    }
    download_and_verify_file(ctx, &remote, &local).await?;
    Ok(local)
}

/// Copies every tablet's data onto its (possibly newly imported) leader host,
/// keyed by the manifest's original tablet ids via [`ImportedIds::tablets`]'s
/// new-id -> old-id map.
async fn restore_tablet_data(ctx: &RunContext, manifest: &Manifest, imported: &ImportedIds) -> Result<(), OrchestratorError> {
    let mut leaders_by_new_tablet = std::collections::HashMap::new();
    for table_ref in imported_table_refs(imported) {
        for leader in ctx.admin.find_tablet_leaders(&table_ref).await? {
            leaders_by_new_tablet.insert(leader.tablet_id.as_str().to_string(), leader.host.clone());
        }
    }

    let mut jobs = Vec::new();
    for (new_tablet, old_tablet) in &imported.tablets {
        let Some(host) = leaders_by_new_tablet.get(new_tablet) else { continue };
        let Some(entry) = manifest.storage.tablet_ids.get(old_tablet) else { continue };
        jobs.push((old_tablet.clone(), entry.clone(), host.clone()));
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
                        let local_dir = restore_data_dir();
                        let cmd = store.download_dir(&remote_dir, &local_dir);
                        executor.run_remote(&cmd, &host).await.map_err(OrchestratorError::Exec)?;
                    }
                    TabletEntry::Files(files) => {
                        for (filename, file_entry) in files {
                            let remote = RemotePath::new(strip_scheme(&file_entry.src_location));
                            let local = restore_data_dir().join(filename);
                            let cmd = store.download_file(&remote, &local);
                            executor.run_remote(&cmd, &host).await.map_err(OrchestratorError::Exec)?;
                            if !disable_checksums {
                                verify_downloaded_tablet_file(&store, &executor, &host, &remote, &local).await?;
                            }
                        }
                    }
                    TabletEntry::Empty => {}
                }
                Ok(tablet)
            }
        })
        .await;

    for result in results {
        result?;
    }
    Ok(())
}

/// Downloads `remote`'s `.sha256` sidecar next to `local` on `host`, hashes
/// the file `local` just downloaded there, and compares the two digests -
/// all without routing bytes back through the orchestrator's own disk, since
/// both files live on `host`. Mirrors `create`'s upload side, which computes
/// and uploads the checksum from the same host that holds the data.
async fn verify_downloaded_tablet_file(
    store: &GenericObjectStore,
    executor: &RemoteExecutor,
    host: &str,
    remote: &RemotePath,
    local: &Utf8PathBuf,
) -> Result<(), OrchestratorError> {
    let expected_remote = RemotePath::new(format!("{}.sha256", remote.as_str()));
    let expected_local = Utf8PathBuf::from(format!("{local}.expected.sha256"));
    let cmd = store.download_file(&expected_remote, &expected_local);
    executor.run_remote(&cmd, host).await.map_err(OrchestratorError::Exec)?;
    let expected_raw = executor.run_remote(&cat_file(expected_local.as_str()), host).await.map_err(OrchestratorError::Exec)?;

    executor.run_remote(&checksum_file(local.as_str()), host).await.map_err(OrchestratorError::Exec)?;
    let computed_local = Utf8PathBuf::from(format!("{local}.sha256"));
    let computed_raw = executor.run_remote(&cat_file(computed_local.as_str()), host).await.map_err(OrchestratorError::Exec)?;

    let expected = ChecksumFile::parse(&expected_raw).map_err(OrchestratorError::Checksum)?;
    let computed = ChecksumFile::parse(&computed_raw).map_err(OrchestratorError::Checksum)?;
    compare(&computed, &expected)
        .map_err(|e| OrchestratorError::ChecksumMismatch { path: local.to_string(), detail: e.to_string() })
}

fn imported_table_refs(imported: &ImportedIds) -> Vec<TableRef> {
    imported.tables.keys().map(|id| TableRef::Uuid(id.clone())).collect()
}

fn restore_data_dir() -> Utf8PathBuf {
    Utf8PathBuf::from("/mnt/data0/yb-data/tserver/data/rocksdb")
}

fn strip_scheme(location: &str) -> String {
    match location.split_once("://").and_then(|(_, rest)| rest.split_once('/')) {
        Some((_bucket, rest)) => rest.to_string(),
        None => location.to_string(),
    }
}
