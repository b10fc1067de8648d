//! Host-directory sandbox.
//!
//! Runs commands with `sh -c` directly on the host, rooted at a working
//! directory. Used for local task calibration and in tests. Bundle
//! directories are staged into a private temporary directory that lives as
//! long as the sandbox.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;
use uuid::Uuid;
use walkdir::WalkDir;

use super::{wait_for_group, ExecOutput, ExecRequest, Sandbox, SandboxError};

/// Sandbox backed by a directory on the host.
#[derive(Debug, Clone)]
pub struct LocalSandbox {
    id: String,
    working_dir: PathBuf,
    staging: Arc<TempDir>,
}

impl LocalSandbox {
    /// Creates a sandbox rooted at `working_dir`, creating it if needed.
    pub fn new(working_dir: impl Into<PathBuf>) -> Result<Self, SandboxError> {
        let working_dir = working_dir.into();
        std::fs::create_dir_all(&working_dir)?;
        Ok(Self {
            id: format!("local-{}", Uuid::new_v4()),
            working_dir,
            staging: Arc::new(TempDir::new()?),
        })
    }
}

/// Recursively copies `src` to `dest`, replacing `dest`.
fn copy_tree(src: &Path, dest: &Path) -> std::io::Result<()> {
    if dest.exists() {
        std::fs::remove_dir_all(dest)?;
    }
    for entry in WalkDir::new(src).follow_links(true) {
        let entry = entry.map_err(std::io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(std::io::Error::other)?;
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[async_trait]
impl Sandbox for LocalSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    async fn exec(&self, request: &ExecRequest) -> Result<ExecOutput, SandboxError> {
        let start = Instant::now();

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&request.command)
            .current_dir(&self.working_dir)
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

        for (key, value) in &request.env {
            cmd.env(key, value);
        }

        debug!(sandbox = %self.id, command = %request.command, "Executing");

        let mut child = cmd
            .spawn()
            .map_err(|e| SandboxError::Spawn(format!("{}: {}", request.command, e)))?;

        if let Some(ref input) = request.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                // A child that exits without reading stdin is not an error.
                let _ = stdin.write_all(input.as_bytes()).await;
                stdin.shutdown().await.ok();
            }
        }

        wait_for_group(child, request.timeout, start).await
    }

    async fn read_file(&self, path: &Path) -> Result<Option<Vec<u8>>, SandboxError> {
        match tokio::fs::read(self.resolve(path)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SandboxError::Io(e)),
        }
    }

    async fn remove_file(&self, path: &Path) -> Result<(), SandboxError> {
        match tokio::fs::remove_file(self.resolve(path)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SandboxError::Io(e)),
        }
    }

    fn staging_path(&self, name: &str) -> PathBuf {
        self.staging.path().join(name)
    }

    async fn upload_dir(&self, src: &Path, dest: &Path) -> Result<(), SandboxError> {
        let (src, dest) = (src.to_path_buf(), self.resolve(dest));
        tokio::task::spawn_blocking(move || copy_tree(&src, &dest))
            .await
            .map_err(|e| SandboxError::Spawn(format!("copy task failed: {}", e)))??;
        Ok(())
    }
}
