//! `delete`: removes a backup's storage location wholesale. Refuses unless
//! `--force` is given, since nothing short of scanning every other manifest
//! in the bucket can prove no live backup still chains to this one through
//! `manifest_previous` - the same conservative stance the original tool's
//! interactive confirmation prompt enforced, now as a flag instead of a TTY
//! read.

use remote_storage::{ObjectStoreAdapter, RemotePath};
use tracing::info;

use crate::error::OrchestratorError;

use super::{snapshot_filepath, RunContext};

pub async fn run_delete(ctx: &RunContext) -> Result<String, OrchestratorError> {
    let config = &ctx.config;
    let location = snapshot_filepath(config);

    if !config.force {
        return Err(OrchestratorError::ChainIntegrity { location });
    }

    let target = RemotePath::new(strip_scheme(&location));
    let cmd = ctx.store.delete(&target)?;
    ctx.executor.run_local(&cmd).await?;

    info!(%location, "deleted backup");
    Ok(location)
}

fn strip_scheme(location: &str) -> String {
    match location.split_once("://").and_then(|(_, rest)| rest.split_once('/')) {
        Some((_bucket, rest)) => rest.to_string(),
        None => location.to_string(),
    }
}
