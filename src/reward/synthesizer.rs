//! Reward synthesis: trial outcome in, reward record out.

use tracing::{debug, warn};

use super::policy::{PolicyKind, RewardPolicy};
use super::record::{FailureCause, RewardDetail, RewardRecord};
use crate::runner::{ExitStatus, TrialOutcome};
use crate::task::TaskBundle;

/// Applies a reward policy to trial outcomes.
///
/// Pure and deterministic: the same outcome always yields the same record.
pub struct RewardSynthesizer {
    policy: Box<dyn RewardPolicy>,
    task_digest: Option<String>,
}

impl RewardSynthesizer {
    pub fn new(policy: Box<dyn RewardPolicy>) -> Self {
        Self {
            policy,
            task_digest: None,
        }
    }

    /// Synthesizer using the bundle's configured policy.
    pub fn for_bundle(bundle: &TaskBundle) -> Self {
        Self {
            policy: bundle.reward_policy.build(&bundle.test_suite),
            task_digest: Some(bundle.digest.clone()),
        }
    }

    pub fn policy(&self) -> PolicyKind {
        self.policy.kind()
    }

    pub fn synthesize(&self, outcome: &TrialOutcome) -> RewardRecord {
        let score = self.policy.score(outcome);
        let mut flags = score.flags;
        let mut reward = clamp_reward(score.reward, &mut flags);

        if outcome.test_results.is_empty() && reward > 0.0 {
            flags.push("empty_outcome".to_string());
            reward = 0.0;
        }
        if outcome.exit_status == ExitStatus::Abnormal && reward > 0.0 {
            flags.push("abnormal_exit_forced_zero".to_string());
            reward = 0.0;
        }
        if !flags.is_empty() {
            warn!(task_id = %outcome.task_id, flags = ?flags, "Reward flagged");
        }

        let passed = reward >= 1.0;
        let cause = classify(outcome, passed);
        debug!(
            task_id = %outcome.task_id,
            policy = %self.policy.kind(),
            reward,
            cause = %cause,
            "Reward synthesized"
        );

        RewardRecord {
            reward,
            passed,
            detail: RewardDetail {
                task_id: outcome.task_id.clone(),
                trial_id: outcome.trial_id.clone(),
                policy: self.policy.kind(),
                tests_total: outcome.test_results.len(),
                tests_passed: outcome.passed_count(),
                tests_failed: outcome.failed_count(),
                exit_status: outcome.exit_status,
                cause,
                flags,
                abnormal_reason: outcome.abnormal_reason.clone(),
                task_digest: self.task_digest.clone(),
                results: outcome.test_results.clone(),
            },
        }
    }
}

fn clamp_reward(raw: f64, flags: &mut Vec<String>) -> f64 {
    if !raw.is_finite() {
        flags.push(format!("non_finite_reward:{}", raw));
        0.0
    } else if raw < 0.0 {
        flags.push(format!("reward_below_range:{}", raw));
        0.0
    } else if raw > 1.0 {
        flags.push(format!("reward_above_range:{}", raw));
        1.0
    } else {
        raw
    }
}

fn classify(outcome: &TrialOutcome, passed: bool) -> FailureCause {
    if outcome.cancelled {
        FailureCause::Cancelled
    } else if outcome.exit_status == ExitStatus::Abnormal {
        FailureCause::TestRunAbnormal
    } else if passed {
        FailureCause::None
    } else if !outcome.solution.succeeded {
        FailureCause::SolutionFailed
    } else {
        FailureCause::TestsFailed
    }
}
