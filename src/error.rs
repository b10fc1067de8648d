//! Error types for swe-verify operations.
//!
//! The taxonomy mirrors how each failure is treated by a trial:
//! - Task loading errors are fatal before any trial starts
//! - Solution production and test execution errors are absorbed into the
//!   trial outcome and end up as a zero reward with an explanatory detail
//! - Persistence errors are the only ones that escape a running pipeline

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while resolving or parsing a task bundle.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Task '{0}' not found")]
    NotFound(String),

    #[error("Malformed task '{task}': {reason}")]
    Malformed { task: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TaskError {
    /// Shorthand for a [`TaskError::Malformed`].
    pub fn malformed(task: impl Into<String>, reason: impl Into<String>) -> Self {
        TaskError::Malformed {
            task: task.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by a solution producer. Never fatal to a trial.
#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("Solution script not found: {0}")]
    ScriptMissing(PathBuf),

    #[error("Solution exited with code {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },

    #[error("Solution timed out after {0:?}")]
    Timeout(Duration),

    #[error("Agent harness failed: {0}")]
    Harness(String),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] crate::sandbox::SandboxError),
}

/// Abnormal termination of the batch test run. Never fatal to a trial.
#[derive(Debug, Error)]
pub enum TestRunError {
    #[error("Test run timed out after {0:?}")]
    Timeout(Duration),

    #[error("Test run could not be started: {0}")]
    Spawn(String),

    #[error("Could not stage test files: {0}")]
    Stage(String),

    #[error("Test run exited with code {code} without a parseable report: {reason}")]
    NoReport { code: i32, reason: String },

    #[error("Test run was cancelled")]
    Cancelled,
}

/// Failure to durably write the reward artifacts.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Failed to create output directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize {what}: {source}")]
    Serialize {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}
