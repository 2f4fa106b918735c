//! `restore_keys`: downloads the universe encryption key file uploaded
//! alongside a backup (if any) to `--restore_keys_destination`. A no-op when
//! the flag is unset, matching the original tool's "nothing to do" case.

use camino::Utf8PathBuf;
use remote_storage::{ObjectStoreAdapter, RemotePath};
use tracing::info;

use crate::error::OrchestratorError;

use super::RunContext;

pub async fn run_restore_keys(ctx: &RunContext) -> Result<String, OrchestratorError> {
    let Some(destination) = &ctx.config.restore_keys_destination else {
        info!("no --restore_keys_destination given, nothing to restore");
        return Ok(String::new());
    };
    let destination = Utf8PathBuf::from(destination);
    let key_file = destination.file_name().ok_or_else(|| {
        OrchestratorError::InvalidArgument(format!("--restore_keys_destination {destination:?} has no file name"))
    })?;

    let remote = RemotePath::new(strip_scheme(&ctx.config.backup_location)).join(key_file);
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent).map_err(OrchestratorError::Io)?;
    }
    let cmd = ctx.store.download_file(&remote, &destination);
    ctx.executor.run_local(&cmd).await?;

    info!(%destination, "restored universe encryption key file");
    Ok(destination.to_string())
}

fn strip_scheme(location: &str) -> String {
    match location.split_once("://").and_then(|(_, rest)| rest.split_once('/')) {
        Some((_bucket, rest)) => rest.to_string(),
        None => location.to_string(),
    }
}
