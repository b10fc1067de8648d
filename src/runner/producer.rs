//! Solution producers.
//!
//! A producer materializes the candidate artifact inside the sandbox before
//! verification. Producers may fail; a failed production still goes on to be
//! verified so that "no solution" scores as a zero reward instead of an error.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ProducerError;
use crate::sandbox::{stage_bundle_dir, truncate, ExecOutput, ExecRequest, Sandbox};
use crate::task::TaskBundle;

/// Environment variable carrying the staged `solution/` directory.
pub const SOLUTION_DIR_ENV: &str = "SOLUTION_DIR";

/// Which producer variant ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProducerKind {
    /// The task's reference script.
    #[default]
    Reference,
    /// An external agent harness.
    Agent,
    /// Nothing is produced; the sandbox is verified as-is.
    None,
}

impl std::fmt::Display for ProducerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProducerKind::Reference => write!(f, "reference"),
            ProducerKind::Agent => write!(f, "agent"),
            ProducerKind::None => write!(f, "none"),
        }
    }
}

impl std::str::FromStr for ProducerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reference" | "oracle" | "solution" => Ok(ProducerKind::Reference),
            "agent" => Ok(ProducerKind::Agent),
            "none" | "nop" => Ok(ProducerKind::None),
            other => Err(format!("Unknown producer: {}", other)),
        }
    }
}

/// Summary of how the candidate solution was produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolutionReport {
    pub producer: ProducerKind,
    pub succeeded: bool,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    pub duration_secs: f64,
}

impl SolutionReport {
    fn from_result(
        producer: ProducerKind,
        result: &Result<ExecOutput, ProducerError>,
        duration: Duration,
    ) -> Self {
        match result {
            Ok(output) => Self {
                producer,
                succeeded: true,
                exit_code: output.exit_code,
                error: None,
                duration_secs: duration.as_secs_f64(),
            },
            Err(e) => Self {
                producer,
                succeeded: false,
                exit_code: match e {
                    ProducerError::NonZeroExit { code, .. } => Some(*code),
                    _ => None,
                },
                error: Some(e.to_string()),
                duration_secs: duration.as_secs_f64(),
            },
        }
    }

    /// Report for a trial that never attempted a solution.
    pub fn none() -> Self {
        Self {
            producer: ProducerKind::None,
            succeeded: true,
            exit_code: None,
            error: None,
            duration_secs: 0.0,
        }
    }

    /// Report for a production cut short by cancellation.
    pub fn interrupted() -> Self {
        Self {
            producer: ProducerKind::None,
            succeeded: false,
            exit_code: None,
            error: Some("interrupted".to_string()),
            duration_secs: 0.0,
        }
    }
}

/// Produces a candidate solution inside a sandbox.
#[async_trait]
pub trait SolutionProducer: Send + Sync {
    fn kind(&self) -> ProducerKind;

    /// Runs the producer to completion or until its own budget runs out.
    async fn produce(
        &self,
        bundle: &TaskBundle,
        sandbox: &dyn Sandbox,
    ) -> Result<ExecOutput, ProducerError>;

    /// Whether invoking the producer a second time is cheap and idempotent.
    fn supports_rerun(&self) -> bool {
        false
    }
}

/// Runs a producer, absorbing any failure into the returned report.
pub async fn produce_solution(
    producer: &dyn SolutionProducer,
    bundle: &TaskBundle,
    sandbox: &dyn Sandbox,
) -> SolutionReport {
    let start = Instant::now();
    info!(task_id = %bundle.id, producer = %producer.kind(), "Producing solution");

    let result = producer.produce(bundle, sandbox).await;
    let report = SolutionReport::from_result(producer.kind(), &result, start.elapsed());

    match &result {
        Ok(_) => info!(
            task_id = %bundle.id,
            duration_secs = report.duration_secs,
            "Solution produced"
        ),
        Err(e) => warn!(
            task_id = %bundle.id,
            error = %e,
            "Solution production failed (continuing to verification)"
        ),
    }
    report
}

/// Runs the reference script shipped with the task.
///
/// The bundle's `solution/` directory is staged first so the script can reach
/// its sibling files through `SOLUTION_DIR`.
#[derive(Debug, Clone)]
pub struct ReferenceSolution {
    timeout: Duration,
}

impl ReferenceSolution {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl SolutionProducer for ReferenceSolution {
    fn kind(&self) -> ProducerKind {
        ProducerKind::Reference
    }

    async fn produce(
        &self,
        bundle: &TaskBundle,
        sandbox: &dyn Sandbox,
    ) -> Result<ExecOutput, ProducerError> {
        let script_path = bundle
            .solution_script
            .clone()
            .ok_or_else(|| ProducerError::ScriptMissing(bundle.root.join("solution")))?;
        let script = tokio::fs::read_to_string(&script_path)
            .await
            .map_err(|_| ProducerError::ScriptMissing(script_path.clone()))?;

        let staged = stage_bundle_dir(sandbox, &bundle.root, "solution").await?;

        // The script lives on the host; stream it into the sandbox.
        let mut request = ExecRequest::new("bash -s", self.timeout)
            .with_env("TASK_ID", &bundle.id)
            .with_stdin(script);
        if let Some(dir) = staged {
            request = request.with_env(SOLUTION_DIR_ENV, dir.to_string_lossy());
        }
        let output = sandbox.exec(&request).await?;

        check_exit(output, self.timeout)
    }

    fn supports_rerun(&self) -> bool {
        true
    }
}

/// Leaves the sandbox untouched.
#[derive(Debug, Clone, Default)]
pub struct NoSolution;

#[async_trait]
impl SolutionProducer for NoSolution {
    fn kind(&self) -> ProducerKind {
        ProducerKind::None
    }

    async fn produce(
        &self,
        _bundle: &TaskBundle,
        _sandbox: &dyn Sandbox,
    ) -> Result<ExecOutput, ProducerError> {
        Ok(ExecOutput {
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
            timed_out: false,
            duration: Duration::ZERO,
        })
    }
}

/// Maps a finished command to a producer result.
pub(crate) fn check_exit(
    output: ExecOutput,
    timeout: Duration,
) -> Result<ExecOutput, ProducerError> {
    if output.timed_out {
        return Err(ProducerError::Timeout(timeout));
    }
    if !output.is_success() {
        return Err(ProducerError::NonZeroExit {
            code: output.code_or_default(),
            stderr: truncate(output.stderr.trim(), 500),
        });
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::LocalSandbox;
    use crate::task::load_task_dir;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn task_with_solution(root: &Path, solve: Option<&str>) -> TaskBundle {
        let dir = root.join("task");
        fs::create_dir_all(dir.join("solution")).unwrap();
        fs::write(
            dir.join("task.yaml"),
            "id: demo\ntests:\n  command: \"true\"\n  cases:\n    - id: a\n",
        )
        .unwrap();
        fs::write(dir.join("instruction.md"), "write output.txt").unwrap();
        if let Some(script) = solve {
            fs::write(dir.join("solution/solve.sh"), script).unwrap();
        }
        load_task_dir(&dir).unwrap()
    }

    #[test]
    fn test_producer_kind_from_str() {
        assert_eq!("reference".parse::<ProducerKind>().unwrap(), ProducerKind::Reference);
        assert_eq!("oracle".parse::<ProducerKind>().unwrap(), ProducerKind::Reference);
        assert_eq!("agent".parse::<ProducerKind>().unwrap(), ProducerKind::Agent);
        assert_eq!("none".parse::<ProducerKind>().unwrap(), ProducerKind::None);
        assert!("wizard".parse::<ProducerKind>().is_err());
    }

    #[tokio::test]
    async fn test_reference_solution_runs_script() {
        let tasks = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let bundle = task_with_solution(tasks.path(), Some("echo \"$TASK_ID\" > output.txt\n"));
        let sandbox = LocalSandbox::new(work.path()).unwrap();

        let report =
            produce_solution(&ReferenceSolution::new(Duration::from_secs(10)), &bundle, &sandbox)
                .await;

        assert!(report.succeeded);
        assert_eq!(report.producer, ProducerKind::Reference);
        let written = fs::read_to_string(work.path().join("output.txt")).unwrap();
        assert_eq!(written.trim(), "demo");
    }

    #[tokio::test]
    async fn test_reference_solution_reads_sibling_files() {
        let tasks = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let bundle = task_with_solution(
            tasks.path(),
            Some("cp \"$SOLUTION_DIR/scraper.py\" scraper.py\n"),
        );
        fs::write(bundle.root.join("solution/scraper.py"), "print('hi')\n").unwrap();
        let sandbox = LocalSandbox::new(work.path()).unwrap();

        let report =
            produce_solution(&ReferenceSolution::new(Duration::from_secs(10)), &bundle, &sandbox)
                .await;

        assert!(report.succeeded, "{:?}", report.error);
        let copied = fs::read_to_string(work.path().join("scraper.py")).unwrap();
        assert_eq!(copied, "print('hi')\n");
    }

    #[tokio::test]
    async fn test_missing_script_is_absorbed() {
        let tasks = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let bundle = task_with_solution(tasks.path(), None);
        let sandbox = LocalSandbox::new(work.path()).unwrap();

        let report =
            produce_solution(&ReferenceSolution::new(Duration::from_secs(10)), &bundle, &sandbox)
                .await;

        assert!(!report.succeeded);
        assert!(report.error.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_failing_script_reports_exit_code() {
        let tasks = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let bundle = task_with_solution(tasks.path(), Some("echo broken >&2\nexit 4\n"));
        let sandbox = LocalSandbox::new(work.path()).unwrap();

        let report =
            produce_solution(&ReferenceSolution::new(Duration::from_secs(10)), &bundle, &sandbox)
                .await;

        assert!(!report.succeeded);
        assert_eq!(report.exit_code, Some(4));
        assert!(report.error.unwrap().contains("broken"));
    }

    #[tokio::test]
    async fn test_no_solution_leaves_sandbox_untouched() {
        let tasks = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let bundle = task_with_solution(tasks.path(), Some("touch output.txt\n"));
        let sandbox = LocalSandbox::new(work.path()).unwrap();

        let report = produce_solution(&NoSolution, &bundle, &sandbox).await;

        assert!(report.succeeded);
        assert_eq!(report.producer, ProducerKind::None);
        assert!(!work.path().join("output.txt").exists());
    }
}
