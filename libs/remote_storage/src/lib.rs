//! A set of generic storage abstractions for the backup tool to use when
//! moving snapshot files between object stores and the local NFS staging
//! area.
//!
//! Unlike a typical storage client, [`ObjectStoreAdapter`] does not perform
//! any I/O itself: every capability *constructs* a [`remote_exec::Command`]
//! for the relevant CLI tool (`s3cmd`, `gsutil`, `azcopy`, `rsync`/`mv`/`rm`)
//! and leaves execution to a [`remote_exec::RemoteExecutor`]. This mirrors
//! the teacher's `GenericRemoteStorage` enum dispatch over backend variants,
//! generalized from "perform the operation" to "build the operation".

mod azure;
mod gcs;
mod local_fs;
mod s3;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use remote_exec::Command;

pub use azure::{AzureAdapter, AzureConfig};
pub use gcs::{GcsAdapter, GcsConfig};
pub use local_fs::{NfsAdapter, NfsConfig};
pub use s3::{S3Adapter, S3Config};

/// Path on the remote storage, relative to some backup root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RemotePath(String);

impl RemotePath {
    pub fn new(relative_path: impl Into<String>) -> Self {
        Self(relative_path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn join(&self, segment: impl AsRef<str>) -> Self {
        Self(format!("{}/{}", self.0.trim_end_matches('/'), segment.as_ref()))
    }

    pub fn object_name(&self) -> Option<&str> {
        self.0.rsplit('/').next().filter(|s| !s.is_empty())
    }
}

impl std::fmt::Display for RemotePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("refusing to operate on empty or root destination {0:?}")]
    InvalidDestination(String),
}

/// One of the five capabilities every backend must expose, per spec.md §4.1.
pub trait ObjectStoreAdapter {
    fn upload_file(&self, src: &Utf8PathBuf, dest: &RemotePath) -> Command;
    fn download_file(&self, src: &RemotePath, dest: &Utf8PathBuf) -> Command;
    fn upload_dir(&self, src: &Utf8PathBuf, dest: &RemotePath) -> Command;
    fn download_dir(&self, src: &RemotePath, dest: &Utf8PathBuf) -> Command;
    fn move_object(&self, src: &RemotePath, dest: &RemotePath) -> Command;
    fn delete(&self, target: &RemotePath) -> Result<Command, StoreError>;
}

/// Guard shared by every backend's `delete`: never hand back a command that
/// would wipe an empty path or the storage root.
fn guard_delete_target(target: &RemotePath) -> Result<(), StoreError> {
    let trimmed = target.as_str().trim_matches('/');
    if trimmed.is_empty() {
        return Err(StoreError::InvalidDestination(target.as_str().to_string()));
    }
    Ok(())
}

/// External backup storage configuration, enough to build an
/// [`ObjectStoreAdapter`] for that storage. Serializes the same way the
/// teacher's `RemoteStorageKind` does: an untagged enum distinguished by
/// which fields are present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ObjectStoreConfig {
    S3(S3Config),
    Gcs(GcsConfig),
    Azure(AzureConfig),
    Nfs(NfsConfig),
}

impl ObjectStoreConfig {
    pub fn from_toml(toml: &toml_edit::Item) -> anyhow::Result<ObjectStoreConfig> {
        let document: toml_edit::DocumentMut = match toml {
            toml_edit::Item::Table(toml) => toml.clone().into(),
            toml_edit::Item::Value(toml_edit::Value::InlineTable(toml)) => {
                toml.clone().into_table().into()
            }
            _ => anyhow::bail!("toml not a table or inline table"),
        };
        Ok(toml_edit::de::from_document(document)?)
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            ObjectStoreConfig::S3(_) => "s3",
            ObjectStoreConfig::Gcs(_) => "gcs",
            ObjectStoreConfig::Azure(_) => "az",
            ObjectStoreConfig::Nfs(_) => "nfs",
        }
    }
}

/// Every storage backend, currently supported. Serves as a simple way to
/// pass around an [`ObjectStoreAdapter`] without dealing with generics -
/// same role as the teacher's `GenericRemoteStorage` enum.
pub enum GenericObjectStore {
    S3(S3Adapter),
    Gcs(GcsAdapter),
    Azure(AzureAdapter),
    Nfs(NfsAdapter),
}

impl GenericObjectStore {
    pub fn from_config(config: &ObjectStoreConfig) -> anyhow::Result<Self> {
        Ok(match config {
            ObjectStoreConfig::S3(c) => {
                tracing::info!(bucket = %c.bucket_name, region = %c.bucket_region, "using S3 bucket as backup storage");
                Self::S3(S3Adapter::new(c.clone()))
            }
            ObjectStoreConfig::Gcs(c) => {
                tracing::info!(bucket = %c.bucket_name, "using GCS bucket as backup storage");
                Self::Gcs(GcsAdapter::new(c.clone()))
            }
            ObjectStoreConfig::Azure(c) => {
                tracing::info!(container = %c.container_name, "using Azure container as backup storage");
                Self::Azure(AzureAdapter::new(c.clone())?)
            }
            ObjectStoreConfig::Nfs(c) => {
                tracing::info!(mount = %c.mount_path, "using NFS mount as backup storage");
                Self::Nfs(NfsAdapter::new(c.clone()))
            }
        })
    }
}

impl ObjectStoreAdapter for GenericObjectStore {
    fn upload_file(&self, src: &Utf8PathBuf, dest: &RemotePath) -> Command {
        match self {
            Self::S3(a) => a.upload_file(src, dest),
            Self::Gcs(a) => a.upload_file(src, dest),
            Self::Azure(a) => a.upload_file(src, dest),
            Self::Nfs(a) => a.upload_file(src, dest),
        }
    }

    fn download_file(&self, src: &RemotePath, dest: &Utf8PathBuf) -> Command {
        match self {
            Self::S3(a) => a.download_file(src, dest),
            Self::Gcs(a) => a.download_file(src, dest),
            Self::Azure(a) => a.download_file(src, dest),
            Self::Nfs(a) => a.download_file(src, dest),
        }
    }

    fn upload_dir(&self, src: &Utf8PathBuf, dest: &RemotePath) -> Command {
        match self {
            Self::S3(a) => a.upload_dir(src, dest),
            Self::Gcs(a) => a.upload_dir(src, dest),
            Self::Azure(a) => a.upload_dir(src, dest),
            Self::Nfs(a) => a.upload_dir(src, dest),
        }
    }

    fn download_dir(&self, src: &RemotePath, dest: &Utf8PathBuf) -> Command {
        match self {
            Self::S3(a) => a.download_dir(src, dest),
            Self::Gcs(a) => a.download_dir(src, dest),
            Self::Azure(a) => a.download_dir(src, dest),
            Self::Nfs(a) => a.download_dir(src, dest),
        }
    }

    fn move_object(&self, src: &RemotePath, dest: &RemotePath) -> Command {
        match self {
            Self::S3(a) => a.move_object(src, dest),
            Self::Gcs(a) => a.move_object(src, dest),
            Self::Azure(a) => a.move_object(src, dest),
            Self::Nfs(a) => a.move_object(src, dest),
        }
    }

    fn delete(&self, target: &RemotePath) -> Result<Command, StoreError> {
        match self {
            Self::S3(a) => a.delete(target),
            Self::Gcs(a) => a.delete(target),
            Self::Azure(a) => a.delete(target),
            Self::Nfs(a) => a.delete(target),
        }
    }
}
