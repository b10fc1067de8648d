//! Reward synthesis.
//!
//! Turns a [`TrialOutcome`](crate::runner::TrialOutcome) into a
//! [`RewardRecord`] using the policy the task bundle selects.

pub mod policy;
pub mod record;
pub mod synthesizer;

pub use policy::{AllOrNothing, PolicyKind, PolicyScore, RewardPolicy, WeightedCredit};
pub use record::{FailureCause, RewardDetail, RewardRecord};
pub use synthesizer::RewardSynthesizer;
