//! Sandbox backed by an already running Docker container.
//!
//! The container is provisioned and torn down outside this crate; trials
//! only `docker exec` into it. Commands run under the container's `timeout`
//! so they die with their children even if the local `docker` client does
//! not. Bundle directories are staged at `/<name>` with `docker cp`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{truncate, wait_for_group, ExecOutput, ExecRequest, Sandbox, SandboxError};

/// Extra time the in-container `timeout` gives a command after SIGTERM.
const KILL_AFTER_SECS: u64 = 5;

static CONTAINER_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_.-]*$").expect("valid container name regex")
});

/// Sandbox that executes inside an existing container.
#[derive(Debug, Clone)]
pub struct DockerSandbox {
    container: String,
    working_dir: PathBuf,
}

impl DockerSandbox {
    /// Attaches to `container`, running commands in `working_dir`.
    pub fn attach(
        container: impl Into<String>,
        working_dir: impl Into<PathBuf>,
    ) -> Result<Self, SandboxError> {
        let container = container.into();
        if !CONTAINER_NAME.is_match(&container) {
            return Err(SandboxError::Docker(format!(
                "invalid container name '{}'",
                container
            )));
        }
        Ok(Self {
            container,
            working_dir: working_dir.into(),
        })
    }

    /// Builds the `docker exec` argument list for a request.
    pub fn exec_args(&self, request: &ExecRequest) -> Vec<String> {
        let mut args = vec!["exec".to_string()];
        if request.stdin.is_some() {
            args.push("-i".to_string());
        }
        args.push("-w".to_string());
        args.push(self.working_dir.to_string_lossy().to_string());
        for (key, value) in &request.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(self.container.clone());
        args.extend([
            "timeout".to_string(),
            format!("--kill-after={}s", KILL_AFTER_SECS),
            format!("{}s", timeout_secs(request.timeout)),
            "sh".to_string(),
            "-c".to_string(),
            request.command.clone(),
        ]);
        args
    }

    async fn docker(&self, args: &[String]) -> Result<std::process::Output, SandboxError> {
        Command::new("docker")
            .args(args)
            .output()
            .await
            .map_err(|e| SandboxError::Docker(format!("docker not available: {}", e)))
    }

    async fn docker_checked(&self, args: &[String]) -> Result<(), SandboxError> {
        let output = self.docker(args).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(SandboxError::Docker(truncate(
                &String::from_utf8_lossy(&output.stderr),
                500,
            )))
        }
    }
}

/// Whole seconds for the in-container `timeout`, never zero.
fn timeout_secs(timeout: Duration) -> u64 {
    let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
    secs.max(1)
}

#[async_trait]
impl Sandbox for DockerSandbox {
    fn id(&self) -> &str {
        &self.container
    }

    fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    async fn exec(&self, request: &ExecRequest) -> Result<ExecOutput, SandboxError> {
        let start = Instant::now();
        let args = self.exec_args(request);
        debug!(container = %self.container, command = %request.command, "docker exec");

        let mut cmd = Command::new("docker");
        cmd.args(&args)
            .stdin(if request.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| SandboxError::Spawn(format!("docker exec: {}", e)))?;

        if let Some(ref input) = request.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                let _ = stdin.write_all(input.as_bytes()).await;
                stdin.shutdown().await.ok();
            }
        }

        // The in-container deadline fires first; this one covers a hung client.
        let client_timeout = request.timeout + Duration::from_secs(KILL_AFTER_SECS + 5);
        let output = wait_for_group(child, client_timeout, start).await?;
        // `timeout` exits 124 when the command ran out of time.
        let expired = output.exit_code == Some(124) && start.elapsed() >= request.timeout;
        if output.timed_out || expired {
            return Ok(ExecOutput::timed_out(request.timeout));
        }
        Ok(output)
    }

    async fn read_file(&self, path: &Path) -> Result<Option<Vec<u8>>, SandboxError> {
        let target = self.resolve(path).to_string_lossy().to_string();
        let args = vec![
            "exec".to_string(),
            self.container.clone(),
            "cat".to_string(),
            target,
        ];
        let output = self.docker(&args).await?;
        if output.status.success() {
            Ok(Some(output.stdout))
        } else {
            debug!(
                container = %self.container,
                stderr = %truncate(&String::from_utf8_lossy(&output.stderr), 200),
                "File not readable"
            );
            Ok(None)
        }
    }

    async fn remove_file(&self, path: &Path) -> Result<(), SandboxError> {
        let target = self.resolve(path).to_string_lossy().to_string();
        let args = vec![
            "exec".to_string(),
            self.container.clone(),
            "rm".to_string(),
            "-f".to_string(),
            target,
        ];
        self.docker_checked(&args).await
    }

    fn staging_path(&self, name: &str) -> PathBuf {
        PathBuf::from("/").join(name)
    }

    async fn upload_dir(&self, src: &Path, dest: &Path) -> Result<(), SandboxError> {
        let dest = self.resolve(dest).to_string_lossy().to_string();
        let prepare = format!("rm -rf '{0}' && mkdir -p '{0}'", dest.replace('\'', "'\\''"));
        self.docker_checked(&[
            "exec".to_string(),
            self.container.clone(),
            "sh".to_string(),
            "-c".to_string(),
            prepare,
        ])
        .await?;

        // A trailing `/.` copies the directory's contents, not the directory.
        let source = format!("{}/.", src.display());
        self.docker_checked(&[
            "cp".to_string(),
            source,
            format!("{}:{}", self.container, dest),
        ])
        .await?;
        debug!(container = %self.container, dest = %dest, "Uploaded directory");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_attach_rejects_bad_names() {
        assert!(DockerSandbox::attach("trial-1", "/app").is_ok());
        assert!(DockerSandbox::attach("bad name; rm -rf /", "/app").is_err());
        assert!(DockerSandbox::attach("", "/app").is_err());
    }

    #[test]
    fn test_exec_args() {
        let sandbox = DockerSandbox::attach("trial-1", "/app").unwrap();
        let req = ExecRequest::new("pytest -q", Duration::from_secs(60))
            .with_env("CTRF_REPORT", "/app/ctrf.json");
        let args = sandbox.exec_args(&req);

        assert_eq!(
            args,
            vec![
                "exec",
                "-w",
                "/app",
                "-e",
                "CTRF_REPORT=/app/ctrf.json",
                "trial-1",
                "timeout",
                "--kill-after=5s",
                "60s",
                "sh",
                "-c",
                "pytest -q"
            ]
        );
    }

    #[test]
    fn test_timeout_secs_rounds_up() {
        assert_eq!(timeout_secs(Duration::from_secs(300)), 300);
        assert_eq!(timeout_secs(Duration::from_millis(1500)), 2);
        assert_eq!(timeout_secs(Duration::ZERO), 1);
    }

    #[test]
    fn test_staging_path_is_container_root() {
        let sandbox = DockerSandbox::attach("trial-1", "/app").unwrap();
        assert_eq!(sandbox.staging_path("tests"), PathBuf::from("/tests"));
    }

    #[test]
    fn test_exec_args_with_stdin() {
        let sandbox = DockerSandbox::attach("trial-1", "/app").unwrap();
        let req = ExecRequest::new("agent", Duration::from_secs(60)).with_stdin("prompt");
        let args = sandbox.exec_args(&req);
        assert_eq!(args[1], "-i");
    }

    #[test]
    fn test_resolve_relative_paths() {
        let sandbox = DockerSandbox::attach("trial-1", "/app").unwrap();
        assert_eq!(
            sandbox.resolve(Path::new("ctrf.json")),
            PathBuf::from("/app/ctrf.json")
        );
        assert_eq!(
            sandbox.resolve(Path::new("/logs/ctrf.json")),
            PathBuf::from("/logs/ctrf.json")
        );
    }
}
