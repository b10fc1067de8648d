//! swe-verify: verification and reward synthesis for coding-agent benchmarks.
//!
//! A trial takes a task bundle, produces a candidate solution inside a
//! sandbox, runs the task's tests once, and turns the results into a reward
//! in `[0, 1]` that is persisted as `reward.txt` and `reward.json`.

pub mod cli;
pub mod error;
pub mod feedback;
pub mod persist;
pub mod pipeline;
pub mod report;
pub mod reward;
pub mod runner;
pub mod sandbox;
pub mod task;

// Re-export commonly used error types
pub use error::{PersistenceError, ProducerError, TaskError, TestRunError};
