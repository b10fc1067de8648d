//! Sandbox boundary.
//!
//! Provisioning a sandbox is someone else's job. This module only describes
//! what a trial needs from one: a working directory, the ability to run
//! commands and read files inside it, and a place to stage the bundle's own
//! `tests/` and `solution/` directories.

pub mod docker;
pub mod local;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::debug;

pub use docker::DockerSandbox;
pub use local::LocalSandbox;

/// A command to run inside a sandbox.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Shell command, run with `sh -c`.
    pub command: String,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
    /// Data written to the command's stdin.
    pub stdin: Option<String>,
    /// Wall-clock limit for the command.
    pub timeout: Duration,
}

impl ExecRequest {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            env: Vec::new(),
            stdin: None,
            timeout,
        }
    }

    /// Adds an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Sets the stdin payload.
    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }
}

/// Output of a sandboxed command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecOutput {
    /// Exit code, `None` when the process was killed by a signal or timed out.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Whether the command hit its timeout.
    pub timed_out: bool,
    pub duration: Duration,
}

impl ExecOutput {
    /// Output for a command killed at its deadline.
    pub fn timed_out(duration: Duration) -> Self {
        Self {
            exit_code: None,
            stdout: String::new(),
            stderr: format!("timed out after {}s", duration.as_secs()),
            timed_out: true,
            duration,
        }
    }

    /// True when the command exited with code 0.
    pub fn is_success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Exit code for display, `-1` when the process did not exit normally.
    pub fn code_or_default(&self) -> i32 {
        self.exit_code.unwrap_or(-1)
    }
}

/// An isolated environment a trial runs in.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Identifier for logs.
    fn id(&self) -> &str;

    /// Working directory, as seen from inside the sandbox.
    fn working_dir(&self) -> &Path;

    /// Runs a command in the working directory.
    ///
    /// A timeout is reported through [`ExecOutput::timed_out`], not as an error.
    async fn exec(&self, request: &ExecRequest) -> Result<ExecOutput, SandboxError>;

    /// Reads a file, returning `None` when it does not exist.
    async fn read_file(&self, path: &Path) -> Result<Option<Vec<u8>>, SandboxError>;

    /// Removes a file if it exists.
    async fn remove_file(&self, path: &Path) -> Result<(), SandboxError>;

    /// Where a bundle directory called `name` is staged inside the sandbox.
    fn staging_path(&self, name: &str) -> PathBuf;

    /// Copies a host directory to `dest` inside the sandbox, replacing
    /// whatever was there.
    async fn upload_dir(&self, src: &Path, dest: &Path) -> Result<(), SandboxError>;

    /// Resolves a path relative to the working directory.
    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.working_dir().join(path)
        }
    }
}

/// Error types for sandbox operations.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("Failed to start command: {0}")]
    Spawn(String),

    #[error("Docker error: {0}")]
    Docker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stages `<root>/<name>` into the sandbox and returns where it landed.
///
/// Returns `None` when the bundle has no such directory.
pub async fn stage_bundle_dir(
    sandbox: &dyn Sandbox,
    root: &Path,
    name: &str,
) -> Result<Option<PathBuf>, SandboxError> {
    let src = root.join(name);
    if !src.is_dir() {
        return Ok(None);
    }
    let dest = sandbox.staging_path(name);
    sandbox.upload_dir(&src, &dest).await?;
    debug!(
        sandbox = %sandbox.id(),
        src = %src.display(),
        dest = %dest.display(),
        "Staged bundle directory"
    );
    Ok(Some(dest))
}

/// How long to keep reading output after the command itself has exited.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Waits for a command spawned as a process group leader.
///
/// Completion is decided by the leader's exit, not by its pipes closing, so
/// a background child holding stdout open cannot stall the wait. Whatever is
/// left of the group afterwards is killed.
pub(crate) async fn wait_for_group(
    mut child: Child,
    timeout: Duration,
    start: Instant,
) -> Result<ExecOutput, SandboxError> {
    let pgid = child.id();
    let mut stdout = child.stdout.take().map(|pipe| tokio::spawn(read_all(pipe)));
    let mut stderr = child.stderr.take().map(|pipe| tokio::spawn(read_all(pipe)));

    let waited = tokio::time::timeout(timeout, child.wait()).await;
    if let Some(pgid) = pgid {
        kill_group(pgid).await;
    }

    let status = match waited {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => return Err(SandboxError::Io(e)),
        Err(_) => {
            child.kill().await.ok();
            for reader in [stdout.take(), stderr.take()].into_iter().flatten() {
                reader.abort();
            }
            return Ok(ExecOutput::timed_out(timeout));
        }
    };

    Ok(ExecOutput {
        exit_code: status.code(),
        stdout: drain(stdout).await,
        stderr: drain(stderr).await,
        timed_out: false,
        duration: start.elapsed(),
    })
}

async fn read_all<R: AsyncRead + Unpin>(mut pipe: R) -> Vec<u8> {
    let mut buf = Vec::new();
    // A read error just ends the capture.
    let _ = pipe.read_to_end(&mut buf).await;
    buf
}

async fn drain(reader: Option<JoinHandle<Vec<u8>>>) -> String {
    let Some(mut reader) = reader else {
        return String::new();
    };
    match tokio::time::timeout(DRAIN_GRACE, &mut reader).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).to_string(),
        _ => {
            reader.abort();
            String::new()
        }
    }
}

/// Sends SIGKILL to a whole process group. The group may already be gone.
async fn kill_group(pgid: u32) {
    if !cfg!(unix) {
        return;
    }
    let _ = Command::new("kill")
        .args(["-s", "KILL", "--", &format!("-{}", pgid)])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
}

/// Truncates a string on a char boundary for display.
pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) && end > 0 {
            end -= 1;
        }
        format!("{}... [truncated]", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_request_builder() {
        let req = ExecRequest::new("pytest", Duration::from_secs(5))
            .with_env("CTRF_REPORT", "ctrf.json")
            .with_stdin("hello");
        assert_eq!(
            req.env,
            vec![("CTRF_REPORT".to_string(), "ctrf.json".to_string())]
        );
        assert_eq!(req.stdin.as_deref(), Some("hello"));
    }

    #[test]
    fn test_exec_output_success() {
        let out = ExecOutput {
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
            timed_out: false,
            duration: Duration::from_millis(10),
        };
        assert!(out.is_success());
        assert!(!ExecOutput::timed_out(Duration::from_secs(3)).is_success());
        assert_eq!(ExecOutput::timed_out(Duration::from_secs(3)).code_or_default(), -1);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 5), "hello... [truncated]");
        assert_eq!(truncate("héllo", 2), "h... [truncated]");
    }
}
