use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use remote_exec::Command;

use crate::{guard_delete_target, ObjectStoreAdapter, RemotePath, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket_name: String,
    pub bucket_region: String,
    pub prefix_in_bucket: Option<String>,
    pub endpoint: Option<String>,
    #[serde(default)]
    pub sse: bool,
}

pub struct S3Adapter {
    config: S3Config,
}

impl S3Adapter {
    pub fn new(config: S3Config) -> Self {
        Self { config }
    }

    fn uri(&self, path: &RemotePath) -> String {
        match &self.config.prefix_in_bucket {
            Some(prefix) => format!("s3://{}/{}/{}", self.config.bucket_name, prefix, path.as_str()),
            None => format!("s3://{}/{}", self.config.bucket_name, path.as_str()),
        }
    }

    fn base(&self, subcommand: &str) -> Command {
        let mut cmd = Command::new("s3cmd").arg(subcommand);
        if let Some(endpoint) = &self.config.endpoint {
            cmd = cmd.arg(format!("--host={endpoint}"));
        }
        cmd = cmd.arg(format!("--region={}", self.config.bucket_region));
        if self.config.sse {
            cmd = cmd.arg("--server-side-encryption");
        }
        cmd
    }
}

impl ObjectStoreAdapter for S3Adapter {
    fn upload_file(&self, src: &Utf8PathBuf, dest: &RemotePath) -> Command {
        self.base("put").arg(src.as_str()).arg(self.uri(dest))
    }

    fn download_file(&self, src: &RemotePath, dest: &Utf8PathBuf) -> Command {
        self.base("get").arg(self.uri(src)).arg(dest.as_str()).arg("--force")
    }

    fn upload_dir(&self, src: &Utf8PathBuf, dest: &RemotePath) -> Command {
        self.base("sync").arg(format!("{}/", src)).arg(format!("{}/", self.uri(dest)))
    }

    fn download_dir(&self, src: &RemotePath, dest: &Utf8PathBuf) -> Command {
        self.base("sync").arg(format!("{}/", self.uri(src))).arg(format!("{}/", dest))
    }

    fn move_object(&self, src: &RemotePath, dest: &RemotePath) -> Command {
        self.base("mv").arg(self.uri(src)).arg(self.uri(dest))
    }

    fn delete(&self, target: &RemotePath) -> Result<Command, StoreError> {
        guard_delete_target(target)?;
        Ok(self.base("del").arg("-r").arg(self.uri(target)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> S3Adapter {
        S3Adapter::new(S3Config {
            bucket_name: "yb-backups".into(),
            bucket_region: "us-east-1".into(),
            prefix_in_bucket: None,
            endpoint: None,
            sse: false,
        })
    }

    #[test]
    fn upload_file_builds_s3cmd_put() {
        let cmd = adapter().upload_file(&Utf8PathBuf::from("/tmp/MANIFEST"), &RemotePath::new("keyspace-foo/MANIFEST"));
        assert_eq!(cmd.program, "s3cmd");
        assert!(cmd.args.contains(&"put".to_string()));
        assert!(cmd.args.contains(&"/tmp/MANIFEST".to_string()));
        assert!(cmd.args.contains(&"s3://yb-backups/keyspace-foo/MANIFEST".to_string()));
    }

    #[test]
    fn delete_rejects_root() {
        assert!(adapter().delete(&RemotePath::new("/")).is_err());
    }

    #[test]
    fn delete_builds_recursive_del() {
        let cmd = adapter().delete(&RemotePath::new("keyspace-foo")).unwrap();
        assert!(cmd.args.contains(&"del".to_string()));
        assert!(cmd.args.contains(&"-r".to_string()));
    }
}
