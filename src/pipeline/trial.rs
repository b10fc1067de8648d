//! The per-trial pipeline.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::PersistenceError;
use crate::feedback::{forward, FeedbackEvent, FeedbackSink};
use crate::persist::ResultWriter;
use crate::reward::{RewardRecord, RewardSynthesizer};
use crate::runner::{
    produce_solution, RunConfig, SolutionProducer, SolutionReport, TestRunner, TrialOutcome,
};
use crate::sandbox::Sandbox;
use crate::task::TaskBundle;

/// What a trial left behind once its reward was persisted.
#[derive(Debug, Clone)]
pub struct PipelineCompletion {
    pub record: RewardRecord,
    pub outcome: TrialOutcome,
    pub output_dir: PathBuf,
}

/// Runs one trial from solution production through persistence.
pub struct TrialPipeline {
    bundle: Arc<TaskBundle>,
    sandbox: Arc<dyn Sandbox>,
    producer: Box<dyn SolutionProducer>,
    test_runner: TestRunner,
    synthesizer: RewardSynthesizer,
    writer: ResultWriter,
    feedback: Option<Box<dyn FeedbackSink>>,
    trial_timeout: Option<Duration>,
}

impl TrialPipeline {
    pub fn new(bundle: Arc<TaskBundle>, sandbox: Arc<dyn Sandbox>, config: &RunConfig) -> Self {
        let synthesizer = RewardSynthesizer::for_bundle(&bundle);
        Self {
            producer: config.build_producer(),
            test_runner: TestRunner::new().with_rerun_solution(config.rerun_solution),
            synthesizer,
            writer: ResultWriter::new(config.output_dir.clone()),
            feedback: None,
            trial_timeout: config.trial_timeout,
            bundle,
            sandbox,
        }
    }

    /// Replaces the configured producer.
    pub fn with_producer(mut self, producer: Box<dyn SolutionProducer>) -> Self {
        self.producer = producer;
        self
    }

    /// Forwards the reward to a sink after persistence.
    pub fn with_feedback(mut self, sink: Box<dyn FeedbackSink>) -> Self {
        self.feedback = Some(sink);
        self
    }

    pub fn with_trial_timeout(mut self, timeout: Duration) -> Self {
        self.trial_timeout = Some(timeout);
        self
    }

    /// Runs the trial to completion.
    pub async fn run(&self) -> Result<PipelineCompletion, PersistenceError> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Runs the trial, aborting production and testing when `cancel` resolves.
    ///
    /// A cancelled trial is still scored and persisted, with reward 0.0. The
    /// only error is failing to write the reward files.
    pub async fn run_until<F>(&self, cancel: F) -> Result<PipelineCompletion, PersistenceError>
    where
        F: Future<Output = ()>,
    {
        let trial_id = format!("trial-{}", Uuid::new_v4());
        let started_at = Utc::now();
        let task_id = self.bundle.id.as_str();
        let suite = &self.bundle.test_suite;

        info!(
            task_id = %task_id,
            trial_id = %trial_id,
            sandbox = %self.sandbox.id(),
            producer = %self.producer.kind(),
            "Starting trial"
        );

        let deadline = async {
            match self.trial_timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        let work = AssertUnwindSafe(self.execute(&trial_id, started_at)).catch_unwind();

        let outcome = tokio::select! {
            result = work => match result {
                Ok(outcome) => outcome,
                Err(panic) => {
                    let reason = panic_message(panic.as_ref());
                    error!(
                        task_id = %task_id,
                        trial_id = %trial_id,
                        reason = %reason,
                        "Trial panicked"
                    );
                    TrialOutcome::abnormal(
                        &trial_id,
                        task_id,
                        suite,
                        None,
                        format!("trial panicked: {}", reason),
                        SolutionReport::interrupted(),
                        started_at,
                    )
                }
            },
            _ = cancel => {
                warn!(task_id = %task_id, trial_id = %trial_id, "Trial cancelled");
                TrialOutcome::cancelled(&trial_id, task_id, suite, "cancelled", started_at)
            }
            _ = deadline => {
                let limit = self.trial_timeout.unwrap_or_default();
                warn!(
                    task_id = %task_id,
                    trial_id = %trial_id,
                    limit_secs = limit.as_secs(),
                    "Trial deadline exceeded"
                );
                TrialOutcome::cancelled(
                    &trial_id,
                    task_id,
                    suite,
                    format!("trial timed out after {}s", limit.as_secs()),
                    started_at,
                )
            }
        };

        self.finish(outcome).await
    }

    async fn execute(&self, trial_id: &str, started_at: DateTime<Utc>) -> TrialOutcome {
        let sandbox = self.sandbox.as_ref();
        let solution = produce_solution(self.producer.as_ref(), &self.bundle, sandbox).await;
        self.test_runner
            .run(
                &self.bundle,
                sandbox,
                self.producer.as_ref(),
                trial_id,
                solution,
                started_at,
            )
            .await
    }

    async fn finish(&self, outcome: TrialOutcome) -> Result<PipelineCompletion, PersistenceError> {
        let record = self.synthesizer.synthesize(&outcome);

        self.writer.write_reward(&record)?;
        if let Err(e) = self.writer.write_outcome(&outcome) {
            warn!(
                task_id = %outcome.task_id,
                error = %e,
                "Failed to write trial details"
            );
        }

        if let Some(ref sink) = self.feedback {
            let event = FeedbackEvent::from_record(&outcome.trial_id, &record);
            forward(sink.as_ref(), &[event]).await;
        }

        info!(
            task_id = %outcome.task_id,
            trial_id = %outcome.trial_id,
            reward = record.reward,
            passed = record.passed,
            cause = %record.detail.cause,
            duration_secs = outcome.duration_secs(),
            "Trial complete"
        );

        Ok(PipelineCompletion {
            record,
            outcome,
            output_dir: self.writer.output_dir().to_path_buf(),
        })
    }
}

/// Persists a zero reward for a trial that could not be set up.
pub fn persist_setup_failure(
    output_dir: impl Into<PathBuf>,
    task_id: &str,
    reason: &str,
) -> Result<RewardRecord, PersistenceError> {
    let trial_id = format!("trial-{}", Uuid::new_v4());
    let record = RewardRecord::fallback(task_id, trial_id, reason);
    ResultWriter::new(output_dir).write_reward(&record)?;
    Ok(record)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProducerError;
    use crate::reward::FailureCause;
    use crate::runner::{ExitStatus, ProducerKind};
    use crate::sandbox::{ExecOutput, LocalSandbox};
    use crate::task::load_task_dir;
    use async_trait::async_trait;
    use std::fs;
    use tempfile::TempDir;

    const PASSING_TESTS: &str = r#"echo '{"results":{"tests":[{"name":"test_a","status":"passed"}]}}' > "$CTRF_REPORT""#;

    fn bundle(root: &std::path::Path, command: &str) -> Arc<TaskBundle> {
        let dir = root.join("task");
        fs::create_dir_all(&dir).unwrap();
        let yaml = format!(
            "id: pipe\ntests:\n  command: {}\n  cases:\n    - id: test_a\n",
            serde_json::to_string(command).unwrap()
        );
        fs::write(dir.join("task.yaml"), yaml).unwrap();
        fs::write(dir.join("instruction.md"), "do it").unwrap();
        Arc::new(load_task_dir(&dir).unwrap())
    }

    struct Stuck;

    #[async_trait]
    impl SolutionProducer for Stuck {
        fn kind(&self) -> ProducerKind {
            ProducerKind::Agent
        }

        async fn produce(
            &self,
            _bundle: &TaskBundle,
            _sandbox: &dyn Sandbox,
        ) -> Result<ExecOutput, ProducerError> {
            std::future::pending().await
        }
    }

    struct Panicking;

    #[async_trait]
    impl SolutionProducer for Panicking {
        fn kind(&self) -> ProducerKind {
            ProducerKind::Agent
        }

        async fn produce(
            &self,
            _bundle: &TaskBundle,
            _sandbox: &dyn Sandbox,
        ) -> Result<ExecOutput, ProducerError> {
            panic!("agent adapter bug")
        }
    }

    fn dirs() -> (TempDir, TempDir, TempDir) {
        (
            TempDir::new().unwrap(),
            TempDir::new().unwrap(),
            TempDir::new().unwrap(),
        )
    }

    fn pipeline(tasks: &TempDir, work: &TempDir, out: &TempDir, command: &str) -> TrialPipeline {
        let sandbox: Arc<dyn Sandbox> = Arc::new(LocalSandbox::new(work.path()).unwrap());
        let config = RunConfig::new(out.path()).with_producer(ProducerKind::None);
        TrialPipeline::new(bundle(tasks.path(), command), sandbox, &config)
    }

    #[tokio::test]
    async fn test_run_persists_reward() {
        let (tasks, work, out) = dirs();
        let completion = pipeline(&tasks, &work, &out, PASSING_TESTS)
            .run()
            .await
            .unwrap();

        assert_eq!(completion.record.reward, 1.0);
        assert!(out.path().join("reward.txt").exists());
        assert!(out.path().join("trial.json").exists());
        assert!(out.path().join("ctrf.json").exists());
    }

    #[tokio::test]
    async fn test_cancel_still_persists() {
        let (tasks, work, out) = dirs();
        let pipe = pipeline(&tasks, &work, &out, PASSING_TESTS).with_producer(Box::new(Stuck));

        let completion = pipe
            .run_until(tokio::time::sleep(Duration::from_millis(50)))
            .await
            .unwrap();

        assert_eq!(completion.record.reward, 0.0);
        assert_eq!(completion.record.detail.cause, FailureCause::Cancelled);
        assert!(completion.outcome.cancelled);
        let txt = fs::read_to_string(out.path().join("reward.txt")).unwrap();
        assert_eq!(txt, "0.0\n");
    }

    #[tokio::test]
    async fn test_trial_timeout_still_persists() {
        let (tasks, work, out) = dirs();
        let pipe = pipeline(&tasks, &work, &out, PASSING_TESTS)
            .with_producer(Box::new(Stuck))
            .with_trial_timeout(Duration::from_millis(50));

        let completion = pipe.run().await.unwrap();

        assert_eq!(completion.outcome.exit_status, ExitStatus::Abnormal);
        assert!(completion
            .record
            .detail
            .abnormal_reason
            .unwrap()
            .contains("timed out"));
    }

    #[tokio::test]
    async fn test_panic_becomes_abnormal_outcome() {
        let (tasks, work, out) = dirs();
        let pipe =
            pipeline(&tasks, &work, &out, PASSING_TESTS).with_producer(Box::new(Panicking));

        let completion = pipe.run().await.unwrap();

        assert_eq!(completion.record.reward, 0.0);
        assert_eq!(completion.record.detail.cause, FailureCause::TestRunAbnormal);
        assert!(completion
            .outcome
            .abnormal_reason
            .unwrap()
            .contains("agent adapter bug"));
    }

    #[test]
    fn test_persist_setup_failure() {
        let out = TempDir::new().unwrap();
        let record = persist_setup_failure(out.path(), "pipe", "docker not available").unwrap();

        assert_eq!(record.detail.cause, FailureCause::InfrastructureError);
        assert_eq!(
            fs::read_to_string(out.path().join("reward.txt")).unwrap(),
            "0.0\n"
        );
    }
}
