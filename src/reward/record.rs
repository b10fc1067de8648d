// Reward records: the canonical, persisted summary of a trial
// Serialized as reward.json; reward.txt carries only the scalar

use serde::{Deserialize, Serialize};

use super::policy::PolicyKind;
use crate::runner::{ExitStatus, TestCaseResult};

/// Why a trial did not earn full reward.
///
/// Reward values are identical regardless of cause; the code only lets
/// aggregation tell agent failures apart from verification breakage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// Nothing went wrong.
    None,
    /// The test run completed and some tests failed.
    TestsFailed,
    /// The solution producer failed before testing.
    SolutionFailed,
    /// The test run crashed, timed out, or left no report.
    TestRunAbnormal,
    /// The trial was cancelled.
    Cancelled,
    /// The trial could not be set up at all.
    InfrastructureError,
}

impl FailureCause {
    /// True when the failure should not be attributed to the candidate.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            FailureCause::TestRunAbnormal
                | FailureCause::Cancelled
                | FailureCause::InfrastructureError
        )
    }
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureCause::None => "none",
            FailureCause::TestsFailed => "tests_failed",
            FailureCause::SolutionFailed => "solution_failed",
            FailureCause::TestRunAbnormal => "test_run_abnormal",
            FailureCause::Cancelled => "cancelled",
            FailureCause::InfrastructureError => "infrastructure_error",
        };
        write!(f, "{}", s)
    }
}

/// Structured detail stored under `tests` in reward.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardDetail {
    pub task_id: String,
    pub trial_id: String,
    pub policy: PolicyKind,
    pub tests_total: usize,
    pub tests_passed: usize,
    pub tests_failed: usize,
    pub exit_status: ExitStatus,
    pub cause: FailureCause,
    /// Anomalies noticed while scoring (clamping, bad weights).
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abnormal_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_digest: Option<String>,
    /// Per-test results in suite order.
    #[serde(default)]
    pub results: Vec<TestCaseResult>,
}

/// Canonical reward summary for one trial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardRecord {
    /// Reward in [0.0, 1.0].
    pub reward: f64,
    pub passed: bool,
    #[serde(rename = "tests")]
    pub detail: RewardDetail,
}

impl RewardRecord {
    /// Zero-reward record for a trial that never produced an outcome.
    pub fn fallback(
        task_id: impl Into<String>,
        trial_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            reward: 0.0,
            passed: false,
            detail: RewardDetail {
                task_id: task_id.into(),
                trial_id: trial_id.into(),
                policy: PolicyKind::default(),
                tests_total: 0,
                tests_passed: 0,
                tests_failed: 0,
                exit_status: ExitStatus::Abnormal,
                cause: FailureCause::InfrastructureError,
                flags: Vec::new(),
                abnormal_reason: Some(reason.into()),
                task_digest: None,
                results: Vec::new(),
            },
        }
    }

    /// Contents of reward.txt: one decimal line, always with a fraction.
    pub fn reward_txt(&self) -> String {
        let mut s = format!("{}", self.reward);
        if !s.contains('.') {
            s.push_str(".0");
        }
        s.push('\n');
        s
    }

    /// Score as a percentage, for display.
    pub fn percent(&self) -> f64 {
        self.reward * 100.0
    }
}
