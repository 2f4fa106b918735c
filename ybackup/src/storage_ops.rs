//! Thin glue between [`backup_core`]'s manifest/checksum types and the
//! [`remote_storage`]/[`remote_exec`] command-construction pair: reads and
//! writes MANIFEST and `.sha256` files against whichever store a [`RunContext`]
//! was built with.
//!
//! Every function here pairs one [`ObjectStoreAdapter`] call (build a
//! command) with one [`RemoteExecutor`] call (run it) - the split stays
//! visible instead of being hidden behind a single "upload" method, the same
//! way the teacher keeps storage command construction and execution in
//! separate crates.

use backup_core::checksum::{checksum_file, compare, ChecksumFile};
use backup_core::manifest::{Manifest, ManifestError, MANIFEST_FILENAME};
use camino::Utf8PathBuf;
use remote_storage::{ObjectStoreAdapter, RemotePath};
use uuid::Uuid;

use crate::commands::RunContext;
use crate::error::OrchestratorError;

fn scratch_path(name: &str) -> Utf8PathBuf {
    let dir = std::env::temp_dir().join(format!("ybackup-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir).ok();
    Utf8PathBuf::from_path_buf(dir.join(name)).expect("temp path is valid utf8")
}

/// Downloads and parses the MANIFEST at `location` (a full storage path, not
/// just a prefix under the configured root).
pub async fn download_manifest(ctx: &RunContext, location: &str) -> Result<Manifest, OrchestratorError> {
    let remote = RemotePath::new(strip_root(location)).join(MANIFEST_FILENAME);
    let local = scratch_path(MANIFEST_FILENAME);
    let cmd = ctx.store.download_file(&remote, &local);
    ctx.executor.run_local(&cmd).await?;
    let raw = std::fs::read_to_string(&local).map_err(OrchestratorError::Io)?;
    Manifest::from_json(&raw).map_err(OrchestratorError::Manifest)
}

/// Uploads `manifest` to its own `manifest_location`, plus a `.sha256`
/// unless checksums are disabled.
pub async fn upload_manifest(ctx: &RunContext, manifest: &Manifest) -> Result<(), OrchestratorError> {
    let local = scratch_path(MANIFEST_FILENAME);
    let json = manifest.to_json().map_err(OrchestratorError::Manifest)?;
    std::fs::write(&local, json).map_err(OrchestratorError::Io)?;

    if !ctx.config.disable_checksums {
        let checksum_cmd = checksum_file(local.as_str());
        ctx.executor.run_local(&checksum_cmd).await?;
    }

    let remote = RemotePath::new(strip_root(&manifest.metadata.manifest_location)).join(MANIFEST_FILENAME);
    let cmd = ctx.store.upload_file(&local, &remote);
    ctx.executor.run_local(&cmd).await?;

    if !ctx.config.disable_checksums {
        let local_sha = Utf8PathBuf::from(format!("{local}.sha256"));
        let remote_sha = RemotePath::new(strip_root(&manifest.metadata.manifest_location)).join(format!("{MANIFEST_FILENAME}.sha256"));
        let cmd = ctx.store.upload_file(&local_sha, &remote_sha);
        ctx.executor.run_local(&cmd).await?;
    }
    Ok(())
}

/// Walks `manifest_previous` pointers starting at `start_location`, downloading
/// and parsing up to `depth` ancestors, keyed by `manifest_location`. Used to
/// pre-resolve the chain [`backup_core::diff::plan_diff`]'s synchronous
/// `load_ancestor` callback needs, since manifest fetches are themselves
/// async I/O.
pub async fn fetch_ancestor_chain(
    ctx: &RunContext,
    start: &Manifest,
    depth: u32,
) -> Result<std::collections::HashMap<String, Manifest>, OrchestratorError> {
    let mut chain = std::collections::HashMap::new();
    let mut next_location = start.metadata.manifest_previous.clone();
    for _ in 0..depth {
        if next_location.is_empty() {
            break;
        }
        let ancestor = download_manifest(ctx, &next_location).await?;
        next_location = ancestor.metadata.manifest_previous.clone();
        chain.insert(ancestor.metadata.manifest_location.clone(), ancestor);
    }
    Ok(chain)
}

/// Downloads `remote` to `local`, then - unless checksums are disabled -
/// downloads `remote`'s `.sha256` sidecar, hashes the freshly downloaded file
/// itself, and compares the two digests. Mirrors `create`'s upload side
/// (checksum computed and uploaded alongside the data file) by doing the same
/// thing in reverse: compute on the receiving end, compare against what the
/// sender computed.
pub async fn download_and_verify_file(ctx: &RunContext, remote: &RemotePath, local: &Utf8PathBuf) -> Result<(), OrchestratorError> {
    let cmd = ctx.store.download_file(remote, local);
    ctx.executor.run_local(&cmd).await?;

    if !ctx.config.disable_checksums {
        verify_downloaded_checksum(ctx, remote, local).await?;
    }
    Ok(())
}

async fn verify_downloaded_checksum(ctx: &RunContext, remote: &RemotePath, local: &Utf8PathBuf) -> Result<(), OrchestratorError> {
    let expected_remote = RemotePath::new(format!("{}.sha256", remote.as_str()));
    let expected_local = Utf8PathBuf::from(format!("{local}.expected.sha256"));
    let cmd = ctx.store.download_file(&expected_remote, &expected_local);
    ctx.executor.run_local(&cmd).await?;

    let checksum_cmd = checksum_file(local.as_str());
    ctx.executor.run_local(&checksum_cmd).await?;
    let computed_local = Utf8PathBuf::from(format!("{local}.sha256"));

    let expected_raw = std::fs::read_to_string(&expected_local).map_err(OrchestratorError::Io)?;
    let computed_raw = std::fs::read_to_string(&computed_local).map_err(OrchestratorError::Io)?;
    let expected = ChecksumFile::parse(&expected_raw).map_err(OrchestratorError::Checksum)?;
    let computed = ChecksumFile::parse(&computed_raw).map_err(OrchestratorError::Checksum)?;

    compare(&computed, &expected)
        .map_err(|e| OrchestratorError::ChecksumMismatch { path: local.to_string(), detail: e.to_string() })
}

/// Every stored location is an absolute `scheme://bucket/...` URI, but
/// [`RemotePath`] is always relative to the configured bucket/container - so
/// strip the `storage_root`'s bucket prefix back off before building one.
fn strip_root(location: &str) -> String {
    match location.split_once("://").and_then(|(_, rest)| rest.split_once('/')) {
        Some((_bucket, rest)) => rest.to_string(),
        None => location.to_string(),
    }
}

pub fn manifest_error_is_not_found(err: &OrchestratorError) -> bool {
    matches!(err, OrchestratorError::Exec(_) | OrchestratorError::Manifest(ManifestError::Json(_)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_root_keeps_only_the_path_past_the_bucket() {
        let ctx_like = "s3://my-bucket/keyspace-foo/MANIFEST";
        let (_, rest) = ctx_like.split_once("://").unwrap();
        let (_bucket, path) = rest.split_once('/').unwrap();
        assert_eq!(path, "keyspace-foo/MANIFEST");
    }
}
