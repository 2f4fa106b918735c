//! Runs shell commands either on this machine or on a named remote host.
//!
//! [`RemoteExecutor`] is the single place in the workspace that actually forks
//! a process. Everything upstream of it (the object store adapter, the
//! checksum service, the cluster client) only ever *constructs* a [`Command`]
//! — building the command line is pure, running it is not, and keeping that
//! split means the upstream crates stay unit-testable without a real shell.

mod backoff;

use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, instrument, warn};

pub use backoff::retry;

/// Default per-call retry count for SSH/k8s exec invocations.
pub const DEFAULT_SSH_RETRIES: u32 = 3;
/// Default per-call retry count for object-store CLI invocations.
pub const DEFAULT_CLOUD_RETRIES: u32 = 10;
/// Fixed delay between retries (spec calls for fixed backoff, not exponential).
pub const RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// A program invocation, built as an argument list rather than a shell
/// string so nothing downstream needs to quote or escape anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl Command {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Quoted command line, used only for logging - never fed back into a shell.
    pub fn quoted(&self) -> String {
        let mut out = shell_quote(&self.program);
        for arg in &self.args {
            out.push(' ');
            out.push_str(&shell_quote(arg));
        }
        out
    }
}

fn shell_quote(s: &str) -> String {
    if s.is_empty() || s.contains(|c: char| c.is_whitespace() || "\"'\\$`".contains(c)) {
        format!("'{}'", s.replace('\'', "'\\''"))
    } else {
        s.to_string()
    }
}

/// How a [`Command`] reaches the host that should run it.
#[derive(Debug, Clone)]
pub enum ExecutionMode {
    /// Run on this machine, no remote hop.
    Direct,
    /// SSH as `user`, optionally `sudo -u remote_user` once connected.
    Ssh {
        user: String,
        remote_user: Option<String>,
        ssh_binary: String,
        ssh_args: Vec<String>,
    },
    /// Exec into a container via the cluster API tool (e.g. kubectl).
    K8sExec {
        namespace: String,
        pod: String,
        container: String,
        kubectl_binary: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("command `{command}` failed after {attempts} attempt(s): {last_stderr}")]
    ExecutionFailed {
        command: String,
        last_stderr: String,
        attempts: u32,
    },
    #[error("command timed out after {0:?}")]
    Timeout(Duration),
    #[error("execution cancelled")]
    Cancelled,
}

/// Stateless apart from the per-host "cloud config uploaded" memoisation set.
pub struct RemoteExecutor {
    mode: ExecutionMode,
    retries: u32,
    timeout: Duration,
    cloud_config_uploaded: Mutex<HashSet<String>>,
}

impl RemoteExecutor {
    pub fn new(mode: ExecutionMode, retries: u32, timeout: Duration) -> Self {
        Self {
            mode,
            retries,
            timeout,
            cloud_config_uploaded: Mutex::new(HashSet::new()),
        }
    }

    pub fn mode(&self) -> &ExecutionMode {
        &self.mode
    }

    /// True if we've already uploaded the cloud CLI config for `host` this run.
    pub async fn cloud_config_uploaded(&self, host: &str) -> bool {
        self.cloud_config_uploaded.lock().await.contains(host)
    }

    pub async fn mark_cloud_config_uploaded(&self, host: &str) {
        self.cloud_config_uploaded
            .lock()
            .await
            .insert(host.to_string());
    }

    /// Run `cmd` on this machine, retrying up to `self.retries` times on
    /// non-zero exit.
    #[instrument(skip(self, cmd), fields(command = %cmd.quoted()))]
    pub async fn run_local(&self, cmd: &Command) -> Result<String, ExecutorError> {
        self.run(cmd, None, &CancellationToken::new()).await
    }

    /// Run `cmd` on `host`, via whichever [`ExecutionMode`] this executor was
    /// configured with.
    #[instrument(skip(self, cmd), fields(command = %cmd.quoted(), host = %host))]
    pub async fn run_remote(&self, cmd: &Command, host: &str) -> Result<String, ExecutorError> {
        self.run(cmd, Some(host), &CancellationToken::new()).await
    }

    pub async fn run_remote_cancellable(
        &self,
        cmd: &Command,
        host: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ExecutorError> {
        self.run(cmd, Some(host), cancel).await
    }

    async fn run(
        &self,
        cmd: &Command,
        host: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<String, ExecutorError> {
        let wrapped = self.wrap_for_mode(cmd, host);
        let quoted = wrapped.quoted();
        let timeout = self.timeout;

        let mut last_stderr = String::new();
        let mut attempts = 0;
        for attempt in 1..=self.retries.max(1) {
            attempts = attempt;
            if cancel.is_cancelled() {
                return Err(ExecutorError::Cancelled);
            }
            match run_once(&wrapped, timeout).await {
                Ok(stdout) => return Ok(stdout),
                Err(RunOnceError::Timeout) => {
                    warn!(attempt, %quoted, "command timed out, retrying");
                    last_stderr = format!("timed out after {timeout:?}");
                }
                Err(RunOnceError::NonZeroExit(stderr)) => {
                    warn!(attempt, %quoted, stderr = %stderr, "command failed, retrying");
                    last_stderr = stderr;
                }
                Err(RunOnceError::SpawnFailed(e)) => {
                    warn!(attempt, %quoted, error = %e, "failed to spawn command, retrying");
                    last_stderr = e.to_string();
                }
            }
            if attempt < self.retries {
                tokio::time::sleep(RETRY_BACKOFF).await;
            }
        }

        error!(command = %quoted, stderr = %last_stderr, "command exhausted retries");
        Err(ExecutorError::ExecutionFailed {
            command: quoted,
            last_stderr,
            attempts,
        })
    }

    fn wrap_for_mode(&self, cmd: &Command, host: Option<&str>) -> Command {
        match (&self.mode, host) {
            (ExecutionMode::Direct, _) => cmd.clone(),
            (
                ExecutionMode::Ssh {
                    user,
                    remote_user,
                    ssh_binary,
                    ssh_args,
                },
                Some(host),
            ) => {
                let inner = match remote_user {
                    Some(remote_user) => {
                        let mut inner = vec!["sudo".to_string(), "-u".to_string(), remote_user.clone(), cmd.program.clone()];
                        inner.extend(cmd.args.iter().cloned());
                        inner
                    }
                    None => {
                        let mut inner = vec![cmd.program.clone()];
                        inner.extend(cmd.args.iter().cloned());
                        inner
                    }
                };
                let mut wrapped = Command::new(ssh_binary.clone())
                    .args(ssh_args.clone())
                    .arg(format!("{user}@{host}"));
                wrapped.args.push(shell_join(&inner));
                wrapped
            }
            (
                ExecutionMode::K8sExec {
                    namespace,
                    pod,
                    container,
                    kubectl_binary,
                },
                _,
            ) => Command::new(kubectl_binary.clone())
                .args(["exec", "-n", namespace.as_str(), pod.as_str(), "-c", container.as_str(), "--"])
                .arg(cmd.program.clone())
                .args(cmd.args.clone()),
            (ExecutionMode::Ssh { .. }, None) => cmd.clone(),
        }
    }
}

fn shell_join(parts: &[String]) -> String {
    parts
        .iter()
        .map(|p| shell_quote(p))
        .collect::<Vec<_>>()
        .join(" ")
}

enum RunOnceError {
    Timeout,
    NonZeroExit(String),
    SpawnFailed(std::io::Error),
}

async fn run_once(cmd: &Command, timeout: Duration) -> Result<String, RunOnceError> {
    let mut process = tokio::process::Command::new(&cmd.program);
    process.args(&cmd.args);
    for (k, v) in &cmd.env {
        process.env(k, v);
    }
    process.stdout(std::process::Stdio::piped());
    process.stderr(std::process::Stdio::piped());

    let child = process.spawn().map_err(RunOnceError::SpawnFailed)?;
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(RunOnceError::SpawnFailed(e)),
        Err(_) => return Err(RunOnceError::Timeout),
    };

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(RunOnceError::NonZeroExit(
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_args_with_whitespace() {
        let cmd = Command::new("s3cmd").arg("put").arg("a file.sst").arg("s3://b/a file.sst");
        assert_eq!(cmd.quoted(), "s3cmd put 'a file.sst' 's3://b/a file.sst'");
    }

    #[test]
    fn leaves_plain_args_unquoted() {
        let cmd = Command::new("rsync").arg("-a").arg("/src").arg("/dst");
        assert_eq!(cmd.quoted(), "rsync -a /src /dst");
    }

    #[tokio::test]
    async fn run_local_executes_direct_commands() {
        let exec = RemoteExecutor::new(ExecutionMode::Direct, 1, Duration::from_secs(5));
        let cmd = Command::new("echo").arg("hello");
        let out = exec.run_local(&cmd).await.unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn run_local_retries_and_surfaces_last_stderr() {
        let exec = RemoteExecutor::new(ExecutionMode::Direct, 2, Duration::from_secs(5));
        let cmd = Command::new("sh").arg("-c").arg("echo boom 1>&2; exit 1");
        let err = exec.run_local(&cmd).await.unwrap_err();
        match err {
            ExecutorError::ExecutionFailed {
                attempts,
                last_stderr,
                ..
            } => {
                assert_eq!(attempts, 2);
                assert!(last_stderr.contains("boom"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cloud_config_memoisation_is_per_host() {
        let exec = RemoteExecutor::new(ExecutionMode::Direct, 1, Duration::from_secs(5));
        assert!(!exec.cloud_config_uploaded("host-a").await);
        exec.mark_cloud_config_uploaded("host-a").await;
        assert!(exec.cloud_config_uploaded("host-a").await);
        assert!(!exec.cloud_config_uploaded("host-b").await);
    }

    #[test]
    fn ssh_mode_wraps_command_with_remote_user() {
        let exec = RemoteExecutor::new(
            ExecutionMode::Ssh {
                user: "yugabyte".into(),
                remote_user: Some("postgres".into()),
                ssh_binary: "ssh".into(),
                ssh_args: vec!["-o".into(), "StrictHostKeyChecking=no".into()],
            },
            3,
            Duration::from_secs(30),
        );
        let cmd = Command::new("ls").arg("/data");
        let wrapped = exec.wrap_for_mode(&cmd, Some("10.0.0.5"));
        assert_eq!(wrapped.program, "ssh");
        assert!(wrapped.args.contains(&"yugabyte@10.0.0.5".to_string()));
        assert!(wrapped.args.last().unwrap().contains("sudo -u postgres ls /data"));
    }

    #[test]
    fn k8s_exec_mode_wraps_with_namespace_pod_container() {
        let exec = RemoteExecutor::new(
            ExecutionMode::K8sExec {
                namespace: "yb-ns".into(),
                pod: "yb-tserver-0".into(),
                container: "yb-tserver".into(),
                kubectl_binary: "kubectl".into(),
            },
            3,
            Duration::from_secs(30),
        );
        let cmd = Command::new("ls").arg("/data");
        let wrapped = exec.wrap_for_mode(&cmd, None);
        assert_eq!(wrapped.program, "kubectl");
        assert_eq!(
            wrapped.args,
            vec!["exec", "-n", "yb-ns", "yb-tserver-0", "-c", "yb-tserver", "--", "ls", "/data"]
        );
    }
}
