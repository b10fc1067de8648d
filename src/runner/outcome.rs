//! Trial outcomes: what the test run observed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::producer::SolutionReport;
use crate::task::TestSuite;

/// Message attached to cases failed because the run never reported them.
pub const NOT_REPORTED: &str = "not reported by test run";

/// How the batch test process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    /// Exited with code 0.
    Success,
    /// Exited non-zero but produced a parseable report.
    Failure,
    /// Crashed, timed out, was cancelled, or left no parseable report.
    Abnormal,
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitStatus::Success => write!(f, "success"),
            ExitStatus::Failure => write!(f, "failure"),
            ExitStatus::Abnormal => write!(f, "abnormal"),
        }
    }
}

/// Result of one declared test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub test_id: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TestCaseResult {
    pub fn pass(test_id: impl Into<String>) -> Self {
        Self {
            test_id: test_id.into(),
            passed: true,
            message: None,
        }
    }

    pub fn fail(test_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            test_id: test_id.into(),
            passed: false,
            message: Some(message.into()),
        }
    }
}

/// Everything observed during one trial. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialOutcome {
    pub trial_id: String,
    pub task_id: String,
    /// Per-case results in suite order.
    pub test_results: Vec<TestCaseResult>,
    pub exit_status: ExitStatus,
    /// Raw exit code of the test process, when it exited normally.
    pub exit_code: Option<i32>,
    /// Why the run was abnormal, if it was.
    pub abnormal_reason: Option<String>,
    /// How the candidate solution was produced.
    pub solution: SolutionReport,
    /// Whether the trial was cut short by cancellation.
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl TrialOutcome {
    /// Outcome of a test run that completed and reported results.
    pub fn completed(
        trial_id: impl Into<String>,
        task_id: impl Into<String>,
        test_results: Vec<TestCaseResult>,
        exit_code: Option<i32>,
        solution: SolutionReport,
        started_at: DateTime<Utc>,
    ) -> Self {
        let exit_status = if exit_code == Some(0) {
            ExitStatus::Success
        } else {
            ExitStatus::Failure
        };
        Self {
            trial_id: trial_id.into(),
            task_id: task_id.into(),
            test_results,
            exit_status,
            exit_code,
            abnormal_reason: None,
            solution,
            cancelled: false,
            started_at,
            completed_at: Utc::now(),
        }
    }

    /// Outcome of a test run that terminated abnormally.
    ///
    /// Every declared case is conservatively marked failed.
    pub fn abnormal(
        trial_id: impl Into<String>,
        task_id: impl Into<String>,
        suite: &TestSuite,
        exit_code: Option<i32>,
        reason: impl Into<String>,
        solution: SolutionReport,
        started_at: DateTime<Utc>,
    ) -> Self {
        let reason = reason.into();
        let test_results = suite
            .cases
            .iter()
            .map(|c| TestCaseResult::fail(&c.id, format!("abnormal termination: {}", reason)))
            .collect();
        Self {
            trial_id: trial_id.into(),
            task_id: task_id.into(),
            test_results,
            exit_status: ExitStatus::Abnormal,
            exit_code,
            abnormal_reason: Some(reason),
            solution,
            cancelled: false,
            started_at,
            completed_at: Utc::now(),
        }
    }

    /// Outcome of a trial cancelled before the test run finished.
    pub fn cancelled(
        trial_id: impl Into<String>,
        task_id: impl Into<String>,
        suite: &TestSuite,
        reason: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let mut outcome = Self::abnormal(
            trial_id,
            task_id,
            suite,
            None,
            reason,
            SolutionReport::interrupted(),
            started_at,
        );
        outcome.cancelled = true;
        outcome
    }

    /// True when every case passed. Says nothing about the exit status.
    pub fn all_passed(&self) -> bool {
        !self.test_results.is_empty() && self.test_results.iter().all(|r| r.passed)
    }

    pub fn passed_count(&self) -> usize {
        self.test_results.iter().filter(|r| r.passed).count()
    }

    pub fn failed_count(&self) -> usize {
        self.test_results.len() - self.passed_count()
    }

    /// Total duration of the trial in seconds.
    pub fn duration_secs(&self) -> f64 {
        (self.completed_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}
