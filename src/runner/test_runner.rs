//! Batch test execution.
//!
//! The bundle's `tests/` directory is staged into the sandbox after the
//! solution is in place and its location exported as `TESTS_DIR`. The task's
//! test command then runs once per trial, writing a CTRF report to the path
//! given in `CTRF_REPORT`. The report is mapped onto the declared cases:
//! anything the run did not report counts as failed.

use std::collections::HashSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::outcome::{TestCaseResult, TrialOutcome, NOT_REPORTED};
use super::producer::{SolutionProducer, SolutionReport};
use crate::error::TestRunError;
use crate::report::{CtrfReport, CtrfStatus};
use crate::sandbox::{stage_bundle_dir, truncate, ExecOutput, ExecRequest, Sandbox};
use crate::task::{TaskBundle, TestSuite};

/// Environment variable carrying the report path to the test command.
pub const REPORT_ENV: &str = "CTRF_REPORT";

/// Environment variable carrying the staged `tests/` directory.
pub const TESTS_DIR_ENV: &str = "TESTS_DIR";

/// Bundle directory holding the test files.
const TESTS_DIR_NAME: &str = "tests";

/// Runs a task's test suite against a sandbox.
#[derive(Debug, Clone, Default)]
pub struct TestRunner {
    /// Re-run the producer right before testing, when it supports it.
    rerun_solution: bool,
}

impl TestRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rerun_solution(mut self, rerun: bool) -> Self {
        self.rerun_solution = rerun;
        self
    }

    /// Runs the suite and builds the trial outcome.
    ///
    /// Never fails: abnormal runs become an outcome with every case failed.
    pub async fn run(
        &self,
        bundle: &TaskBundle,
        sandbox: &dyn Sandbox,
        producer: &dyn SolutionProducer,
        trial_id: &str,
        solution: SolutionReport,
        started_at: DateTime<Utc>,
    ) -> TrialOutcome {
        if self.rerun_solution && producer.supports_rerun() {
            debug!(task_id = %bundle.id, "Re-running solution before tests");
            if let Err(e) = producer.produce(bundle, sandbox).await {
                warn!(task_id = %bundle.id, error = %e, "Solution re-run failed");
            }
        }

        let suite = &bundle.test_suite;
        match self.run_batch(bundle, sandbox).await {
            Ok((output, report)) => {
                let results = map_report(suite, &report);
                let outcome = TrialOutcome::completed(
                    trial_id,
                    &bundle.id,
                    results,
                    output.exit_code,
                    solution,
                    started_at,
                );
                info!(
                    task_id = %bundle.id,
                    trial_id = %trial_id,
                    passed = outcome.passed_count(),
                    failed = outcome.failed_count(),
                    exit_status = %outcome.exit_status,
                    "Test run completed"
                );
                outcome
            }
            Err(e) => {
                warn!(
                    task_id = %bundle.id,
                    trial_id = %trial_id,
                    error = %e,
                    "Test run abnormal"
                );
                let exit_code = match &e {
                    TestRunError::NoReport { code, .. } => Some(*code),
                    _ => None,
                };
                TrialOutcome::abnormal(
                    trial_id,
                    &bundle.id,
                    suite,
                    exit_code,
                    e.to_string(),
                    solution,
                    started_at,
                )
            }
        }
    }

    /// Stages the bundle's tests, executes the batch command and reads back
    /// its report.
    pub async fn run_batch(
        &self,
        bundle: &TaskBundle,
        sandbox: &dyn Sandbox,
    ) -> Result<(ExecOutput, CtrfReport), TestRunError> {
        let suite = &bundle.test_suite;
        let report_path: PathBuf = sandbox.resolve(&suite.report_path);

        let tests_dir = stage_bundle_dir(sandbox, &bundle.root, TESTS_DIR_NAME)
            .await
            .map_err(|e| TestRunError::Stage(e.to_string()))?;

        // A report left over from an earlier run must not be mistaken for this one.
        sandbox
            .remove_file(&report_path)
            .await
            .map_err(|e| TestRunError::Spawn(format!("could not clear stale report: {}", e)))?;

        let mut request = ExecRequest::new(&suite.command, suite.timeout)
            .with_env(REPORT_ENV, report_path.to_string_lossy());
        if let Some(dir) = &tests_dir {
            request = request.with_env(TESTS_DIR_ENV, dir.to_string_lossy());
        }
        let output = sandbox
            .exec(&request)
            .await
            .map_err(|e| TestRunError::Spawn(e.to_string()))?;

        if output.timed_out {
            return Err(TestRunError::Timeout(suite.timeout));
        }
        let code = output.code_or_default();

        let bytes = sandbox
            .read_file(&report_path)
            .await
            .map_err(|e| TestRunError::NoReport {
                code,
                reason: e.to_string(),
            })?
            .ok_or_else(|| TestRunError::NoReport {
                code,
                reason: format!(
                    "report {} missing (stderr: {})",
                    report_path.display(),
                    truncate(output.stderr.trim(), 300)
                ),
            })?;

        let report = CtrfReport::parse(&bytes).map_err(|e| TestRunError::NoReport {
            code,
            reason: format!("unparseable report: {}", e),
        })?;

        // Killed by a signal: results may be partial, so do not trust them.
        if output.exit_code.is_none() {
            return Err(TestRunError::NoReport {
                code,
                reason: "test process terminated by signal".to_string(),
            });
        }

        Ok((output, report))
    }
}

/// Maps a CTRF report onto the suite's declared cases, in suite order.
pub fn map_report(suite: &TestSuite, report: &CtrfReport) -> Vec<TestCaseResult> {
    let declared: HashSet<&str> = suite.cases.iter().map(|c| c.id.as_str()).collect();
    for entry in &report.results.tests {
        let short = entry.name.rsplit("::").next().unwrap_or(&entry.name);
        if !declared.contains(entry.name.as_str()) && !declared.contains(short) {
            debug!(test = %entry.name, "Ignoring undeclared test in report");
        }
    }

    suite
        .cases
        .iter()
        .map(|case| match report.find(&case.id) {
            Some(entry) if entry.status == CtrfStatus::Passed => TestCaseResult::pass(&case.id),
            Some(entry) => {
                let message = entry
                    .message
                    .clone()
                    .unwrap_or_else(|| status_name(entry.status).to_string());
                TestCaseResult::fail(&case.id, message)
            }
            None => TestCaseResult::fail(&case.id, NOT_REPORTED),
        })
        .collect()
}

fn status_name(status: CtrfStatus) -> &'static str {
    match status {
        CtrfStatus::Passed => "passed",
        CtrfStatus::Failed => "failed",
        CtrfStatus::Skipped => "skipped",
        CtrfStatus::Pending => "pending",
        CtrfStatus::Other => "other",
    }
}
