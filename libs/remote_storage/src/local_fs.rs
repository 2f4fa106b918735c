use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use remote_exec::Command;

use crate::{guard_delete_target, ObjectStoreAdapter, RemotePath, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NfsConfig {
    pub mount_path: String,
}

pub struct NfsAdapter {
    config: NfsConfig,
}

impl NfsAdapter {
    pub fn new(config: NfsConfig) -> Self {
        Self { config }
    }

    fn path(&self, remote: &RemotePath) -> String {
        format!("{}/{}", self.config.mount_path.trim_end_matches('/'), remote.as_str())
    }

    fn parent(&self, remote: &RemotePath) -> String {
        let full = self.path(remote);
        match full.rsplit_once('/') {
            Some((parent, _)) if !parent.is_empty() => parent.to_string(),
            _ => self.config.mount_path.clone(),
        }
    }
}

impl ObjectStoreAdapter for NfsAdapter {
    fn upload_file(&self, src: &Utf8PathBuf, dest: &RemotePath) -> Command {
        Command::new("sh")
            .arg("-c")
            .arg(format!("mkdir -p {} && rsync {} {}", shell_arg(&self.parent(dest)), shell_arg(src.as_str()), shell_arg(&self.path(dest))))
    }

    fn download_file(&self, src: &RemotePath, dest: &Utf8PathBuf) -> Command {
        Command::new("rsync").arg(self.path(src)).arg(dest.as_str())
    }

    fn upload_dir(&self, src: &Utf8PathBuf, dest: &RemotePath) -> Command {
        Command::new("sh")
            .arg("-c")
            .arg(format!(
                "mkdir -p {} && rsync -a {}/ {}/",
                shell_arg(&self.path(dest)),
                shell_arg(src.as_str()),
                shell_arg(&self.path(dest)),
            ))
    }

    fn download_dir(&self, src: &RemotePath, dest: &Utf8PathBuf) -> Command {
        Command::new("rsync").arg("-a").arg(format!("{}/", self.path(src))).arg(format!("{}/", dest))
    }

    fn move_object(&self, src: &RemotePath, dest: &RemotePath) -> Command {
        Command::new("sh")
            .arg("-c")
            .arg(format!(
                "mkdir -p {} && mv {} {}",
                shell_arg(&self.parent(dest)),
                shell_arg(&self.path(src)),
                shell_arg(&self.path(dest)),
            ))
    }

    fn delete(&self, target: &RemotePath) -> Result<Command, StoreError> {
        guard_delete_target(target)?;
        Ok(Command::new("rm").arg("-rf").arg(self.path(target)))
    }
}

fn shell_arg(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> NfsAdapter {
        NfsAdapter::new(NfsConfig { mount_path: "/mnt/backups".into() })
    }

    #[test]
    fn upload_dir_creates_parent_then_rsyncs() {
        let cmd = adapter().upload_dir(&Utf8PathBuf::from("/data/tablet-1"), &RemotePath::new("keyspace-foo/tablet-1"));
        assert_eq!(cmd.program, "sh");
        assert!(cmd.args[1].contains("mkdir -p"));
        assert!(cmd.args[1].contains("rsync -a"));
    }

    #[test]
    fn delete_rejects_root() {
        assert!(adapter().delete(&RemotePath::new("")).is_err());
    }

    #[test]
    fn path_joins_mount_and_remote() {
        assert_eq!(adapter().path(&RemotePath::new("keyspace-foo/MANIFEST")), "/mnt/backups/keyspace-foo/MANIFEST");
    }
}
