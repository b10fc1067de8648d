//! Trial execution: produce a solution, then test it.
//!
//! # Architecture
//!
//! ```text
//! TaskBundle → SolutionProducer → Sandbox → TestRunner → TrialOutcome
//! ```
//!
//! The runner:
//! 1. Materializes a candidate solution with the configured producer
//! 2. Stages the bundle's `tests/` and runs the batch test command once,
//!    collecting a CTRF report
//! 3. Maps the report onto the declared test cases
//!
//! Producer and test-run failures are absorbed into the [`TrialOutcome`];
//! they never abort the trial.
//!
//! # Example
//!
//! ```ignore
//! use swe_verify::runner::{produce_solution, RunConfig, TestRunner};
//!
//! let config = RunConfig::new("/logs/verifier");
//! let producer = config.build_producer();
//! let solution = produce_solution(producer.as_ref(), &bundle, &sandbox).await;
//! let outcome = TestRunner::new()
//!     .run(&bundle, &sandbox, producer.as_ref(), "trial-1", solution, Utc::now())
//!     .await;
//! println!("{}/{} passed", outcome.passed_count(), outcome.test_results.len());
//! ```

pub mod agent;
pub mod config;
pub mod outcome;
pub mod producer;
pub mod test_runner;

pub use agent::AgentSolution;
pub use config::RunConfig;
pub use outcome::{ExitStatus, TestCaseResult, TrialOutcome, NOT_REPORTED};
pub use producer::{
    produce_solution, NoSolution, ProducerKind, ReferenceSolution, SolutionProducer,
    SolutionReport, SOLUTION_DIR_ENV,
};
pub use test_runner::{map_report, TestRunner, REPORT_ENV, TESTS_DIR_ENV};
