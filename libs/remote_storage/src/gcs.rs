use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use remote_exec::Command;

use crate::{guard_delete_target, ObjectStoreAdapter, RemotePath, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcsConfig {
    pub bucket_name: String,
    pub credentials_json_path: Option<String>,
}

pub struct GcsAdapter {
    config: GcsConfig,
}

impl GcsAdapter {
    pub fn new(config: GcsConfig) -> Self {
        Self { config }
    }

    fn uri(&self, path: &RemotePath) -> String {
        format!("gs://{}/{}", self.config.bucket_name, path.as_str())
    }
}

impl ObjectStoreAdapter for GcsAdapter {
    fn upload_file(&self, src: &Utf8PathBuf, dest: &RemotePath) -> Command {
        Command::new("gsutil").arg("cp").arg(src.as_str()).arg(self.uri(dest))
    }

    fn download_file(&self, src: &RemotePath, dest: &Utf8PathBuf) -> Command {
        Command::new("gsutil").arg("cp").arg(self.uri(src)).arg(dest.as_str())
    }

    fn upload_dir(&self, src: &Utf8PathBuf, dest: &RemotePath) -> Command {
        Command::new("gsutil").arg("-m").arg("rsync").arg("-r").arg(src.as_str()).arg(self.uri(dest))
    }

    fn download_dir(&self, src: &RemotePath, dest: &Utf8PathBuf) -> Command {
        Command::new("gsutil").arg("-m").arg("rsync").arg("-r").arg(self.uri(src)).arg(dest.as_str())
    }

    fn move_object(&self, src: &RemotePath, dest: &RemotePath) -> Command {
        Command::new("gsutil").arg("mv").arg(self.uri(src)).arg(self.uri(dest))
    }

    fn delete(&self, target: &RemotePath) -> Result<Command, StoreError> {
        guard_delete_target(target)?;
        Ok(Command::new("gsutil").arg("rm").arg("-r").arg(self.uri(target)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_dir_uses_m_rsync() {
        let adapter = GcsAdapter::new(GcsConfig {
            bucket_name: "yb-backups".into(),
            credentials_json_path: None,
        });
        let cmd = adapter.upload_dir(&Utf8PathBuf::from("/data/tablet-1"), &RemotePath::new("keyspace-foo/tablet-1"));
        assert_eq!(cmd.program, "gsutil");
        assert_eq!(cmd.args[0], "-m");
        assert_eq!(cmd.args[1], "rsync");
    }
}
