//! Result persistence.
//!
//! Every file is written to a temporary sibling and renamed into place, so a
//! reader never sees a partial record and re-running with the same record
//! leaves identical bytes behind.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::PersistenceError;
use crate::report::CtrfReport;
use crate::reward::RewardRecord;
use crate::runner::TrialOutcome;

pub const REWARD_TXT: &str = "reward.txt";
pub const REWARD_JSON: &str = "reward.json";
pub const CTRF_JSON: &str = "ctrf.json";
pub const TRIAL_JSON: &str = "trial.json";

/// Writes trial artifacts into an output directory.
#[derive(Debug, Clone)]
pub struct ResultWriter {
    output_dir: PathBuf,
}

impl ResultWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Writes `reward.txt` and `reward.json`.
    pub fn write_reward(&self, record: &RewardRecord) -> Result<(), PersistenceError> {
        self.ensure_dir()?;

        let json = to_pretty_json(record, "reward record")?;
        self.write_atomic(REWARD_JSON, json.as_bytes())?;
        self.write_atomic(REWARD_TXT, record.reward_txt().as_bytes())?;

        info!(
            task_id = %record.detail.task_id,
            reward = record.reward,
            passed = record.passed,
            output_dir = %self.output_dir.display(),
            "Reward persisted"
        );
        Ok(())
    }

    /// Writes the normalized CTRF report and the full trial outcome.
    pub fn write_outcome(&self, outcome: &TrialOutcome) -> Result<(), PersistenceError> {
        self.ensure_dir()?;

        let ctrf = to_pretty_json(&CtrfReport::from_outcome(outcome), "CTRF report")?;
        self.write_atomic(CTRF_JSON, ctrf.as_bytes())?;

        let trial = to_pretty_json(outcome, "trial outcome")?;
        self.write_atomic(TRIAL_JSON, trial.as_bytes())?;
        Ok(())
    }

    /// Reads back a previously written reward record.
    pub fn read_reward(&self) -> Result<Option<RewardRecord>, PersistenceError> {
        read_json(&self.output_dir.join(REWARD_JSON), "reward record")
    }

    /// Reads back a previously written trial outcome.
    pub fn read_outcome(&self) -> Result<Option<TrialOutcome>, PersistenceError> {
        read_json(&self.output_dir.join(TRIAL_JSON), "trial outcome")
    }

    fn ensure_dir(&self) -> Result<(), PersistenceError> {
        std::fs::create_dir_all(&self.output_dir).map_err(|source| PersistenceError::CreateDir {
            path: self.output_dir.clone(),
            source,
        })
    }

    fn write_atomic(&self, name: &str, contents: &[u8]) -> Result<(), PersistenceError> {
        let path = self.output_dir.join(name);
        let write_err = |source| PersistenceError::Write {
            path: path.clone(),
            source,
        };

        let mut tmp = NamedTempFile::new_in(&self.output_dir).map_err(write_err)?;
        tmp.write_all(contents).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&path).map_err(|e| write_err(e.error))?;

        debug!(path = %path.display(), bytes = contents.len(), "Wrote file");
        Ok(())
    }
}

fn to_pretty_json<T: Serialize>(value: &T, what: &'static str) -> Result<String, PersistenceError> {
    let mut json = serde_json::to_string_pretty(value)
        .map_err(|source| PersistenceError::Serialize { what, source })?;
    json.push('\n');
    Ok(json)
}

fn read_json<T: serde::de::DeserializeOwned>(
    path: &Path,
    what: &'static str,
) -> Result<Option<T>, PersistenceError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(PersistenceError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| PersistenceError::Serialize { what, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_reward_creates_both_files() {
        let dir = TempDir::new().unwrap();
        let writer = ResultWriter::new(dir.path().join("logs/verifier"));
        let record = RewardRecord::fallback("task", "trial-1", "no sandbox");

        writer.write_reward(&record).unwrap();

        let txt = std::fs::read_to_string(writer.output_dir().join(REWARD_TXT)).unwrap();
        assert_eq!(txt, "0.0\n");
        let back = writer.read_reward().unwrap().unwrap();
        assert_eq!(back.reward, 0.0);
        assert!(!back.passed);
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let writer = ResultWriter::new(dir.path());
        let record = RewardRecord::fallback("task", "trial-1", "no sandbox");

        writer.write_reward(&record).unwrap();
        let first = std::fs::read(dir.path().join(REWARD_JSON)).unwrap();
        writer.write_reward(&record).unwrap();
        let second = std::fs::read(dir.path().join(REWARD_JSON)).unwrap();

        assert_eq!(first, second);
        // No temp files left behind.
        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 2);
    }

    #[test]
    fn test_read_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let writer = ResultWriter::new(dir.path());
        assert!(writer.read_reward().unwrap().is_none());
        assert!(writer.read_outcome().unwrap().is_none());
    }

    #[test]
    fn test_unreadable_reward_is_read_error() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join(REWARD_JSON)).unwrap();
        let writer = ResultWriter::new(dir.path());

        let err = writer.read_reward().unwrap_err();
        assert!(matches!(err, PersistenceError::Read { .. }));
        assert!(err.to_string().starts_with("Failed to read"));
    }

    #[test]
    fn test_unwritable_dir_is_persistence_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let writer = ResultWriter::new(blocker.join("out"));

        let err = writer
            .write_reward(&RewardRecord::fallback("t", "trial", "x"))
            .unwrap_err();
        assert!(matches!(err, PersistenceError::CreateDir { .. }));
    }
}
