//! Reward policies.
//!
//! A policy turns a trial outcome into a raw score. The synthesizer owns
//! range checking, so policies may return any value; it will be clamped and
//! flagged.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::runner::{ExitStatus, TrialOutcome};
use crate::task::TestSuite;

/// Policy selected by a task bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// 1.0 iff every test passed and the run exited successfully.
    #[default]
    AllOrNothing,
    /// Sum of passed weights over total weight.
    Weighted,
}

impl PolicyKind {
    /// Instantiates the policy for a suite.
    pub fn build(self, suite: &TestSuite) -> Box<dyn RewardPolicy> {
        match self {
            PolicyKind::AllOrNothing => Box::new(AllOrNothing),
            PolicyKind::Weighted => Box::new(WeightedCredit::from_suite(suite)),
        }
    }
}

impl std::fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyKind::AllOrNothing => write!(f, "all_or_nothing"),
            PolicyKind::Weighted => write!(f, "weighted"),
        }
    }
}

impl std::str::FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "all_or_nothing" | "binary" => Ok(PolicyKind::AllOrNothing),
            "weighted" | "partial" => Ok(PolicyKind::Weighted),
            other => Err(format!("Unknown reward policy: {}", other)),
        }
    }
}

/// Raw policy output.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyScore {
    pub reward: f64,
    /// Anomalies noticed while scoring.
    pub flags: Vec<String>,
}

impl PolicyScore {
    pub fn new(reward: f64) -> Self {
        Self {
            reward,
            flags: Vec::new(),
        }
    }

    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.push(flag.into());
        self
    }
}

/// Strategy that scores a trial outcome.
pub trait RewardPolicy: Send + Sync {
    fn kind(&self) -> PolicyKind;

    fn score(&self, outcome: &TrialOutcome) -> PolicyScore;
}

/// Full credit only for a clean sweep.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllOrNothing;

impl RewardPolicy for AllOrNothing {
    fn kind(&self) -> PolicyKind {
        PolicyKind::AllOrNothing
    }

    fn score(&self, outcome: &TrialOutcome) -> PolicyScore {
        if outcome.all_passed() && outcome.exit_status == ExitStatus::Success {
            PolicyScore::new(1.0)
        } else {
            PolicyScore::new(0.0)
        }
    }
}

/// Partial credit proportional to the weight of passed tests.
#[derive(Debug, Clone, Default)]
pub struct WeightedCredit {
    weights: HashMap<String, f64>,
}

impl WeightedCredit {
    pub fn new(weights: HashMap<String, f64>) -> Self {
        Self { weights }
    }

    pub fn from_suite(suite: &TestSuite) -> Self {
        Self::new(
            suite
                .cases
                .iter()
                .map(|c| (c.id.clone(), c.weight))
                .collect(),
        )
    }
}

impl RewardPolicy for WeightedCredit {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Weighted
    }

    fn score(&self, outcome: &TrialOutcome) -> PolicyScore {
        let mut flags = Vec::new();
        let mut total = 0.0;
        let mut earned = 0.0;

        for result in &outcome.test_results {
            let weight = match self.weights.get(&result.test_id) {
                Some(w) if w.is_finite() && *w >= 0.0 => *w,
                Some(_) => {
                    flags.push(format!("invalid_weight:{}", result.test_id));
                    0.0
                }
                None => {
                    flags.push(format!("unweighted_test:{}", result.test_id));
                    0.0
                }
            };
            total += weight;
            if result.passed {
                earned += weight;
            }
        }

        if total <= 0.0 {
            flags.push("zero_total_weight".to_string());
            return PolicyScore { reward: 0.0, flags };
        }

        PolicyScore {
            reward: earned / total,
            flags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{SolutionReport, TestCaseResult};
    use crate::task::TestCase;
    use chrono::Utc;
    use std::path::PathBuf;
    use std::time::Duration;

    fn outcome(results: Vec<TestCaseResult>, exit_code: i32) -> TrialOutcome {
        TrialOutcome::completed(
            "trial",
            "task",
            results,
            Some(exit_code),
            SolutionReport::none(),
            Utc::now(),
        )
    }

    fn quarter_suite() -> TestSuite {
        TestSuite {
            command: "pytest".to_string(),
            report_path: PathBuf::from("ctrf.json"),
            timeout: Duration::from_secs(60),
            cases: ["a", "b", "c", "d"]
                .iter()
                .map(|id| TestCase::new(*id).with_weight(0.25))
                .collect(),
        }
    }

    #[test]
    fn test_all_or_nothing() {
        let policy = AllOrNothing;
        let pass = outcome(vec![TestCaseResult::pass("a"), TestCaseResult::pass("b")], 0);
        assert_eq!(policy.score(&pass).reward, 1.0);

        let one_fail = outcome(vec![TestCaseResult::pass("a"), TestCaseResult::fail("b", "x")], 1);
        assert_eq!(policy.score(&one_fail).reward, 0.0);

        // All cases reported as passing, but the process still failed.
        let bad_exit = outcome(vec![TestCaseResult::pass("a")], 1);
        assert_eq!(policy.score(&bad_exit).reward, 0.0);
    }

    #[test]
    fn test_weighted_half_credit() {
        let policy = WeightedCredit::from_suite(&quarter_suite());
        let o = outcome(
            vec![
                TestCaseResult::pass("a"),
                TestCaseResult::pass("b"),
                TestCaseResult::fail("c", "x"),
                TestCaseResult::fail("d", "x"),
            ],
            1,
        );
        let score = policy.score(&o);
        assert!((score.reward - 0.5).abs() < f64::EPSILON);
        assert!(score.flags.is_empty());
    }

    #[test]
    fn test_weighted_normalizes_uneven_weights() {
        let mut weights = HashMap::new();
        weights.insert("a".to_string(), 3.0);
        weights.insert("b".to_string(), 1.0);
        let policy = WeightedCredit::new(weights);

        let o = outcome(vec![TestCaseResult::pass("a"), TestCaseResult::fail("b", "x")], 1);
        assert!((policy.score(&o).reward - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_zero_total_is_flagged() {
        let policy = WeightedCredit::new(HashMap::new());
        let o = outcome(vec![TestCaseResult::pass("a")], 0);
        let score = policy.score(&o);
        assert_eq!(score.reward, 0.0);
        assert!(score.flags.contains(&"zero_total_weight".to_string()));
        assert!(score.flags.contains(&"unweighted_test:a".to_string()));
    }

    #[test]
    fn test_policy_kind_parse_and_build() {
        assert_eq!("all-or-nothing".parse::<PolicyKind>().unwrap(), PolicyKind::AllOrNothing);
        assert_eq!("weighted".parse::<PolicyKind>().unwrap(), PolicyKind::Weighted);
        assert!("lottery".parse::<PolicyKind>().is_err());

        let built = PolicyKind::Weighted.build(&quarter_suite());
        assert_eq!(built.kind(), PolicyKind::Weighted);
        assert_eq!(PolicyKind::default().to_string(), "all_or_nothing");
    }
}
