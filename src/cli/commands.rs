//! CLI command definitions for swe-verify.
//!
//! Exit codes: 0 once a reward has been persisted (whatever its value),
//! 1 when persistence itself failed, 2 when the task could not be loaded.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::feedback::{default_sink, forward, FeedbackEvent};
use crate::persist::ResultWriter;
use crate::pipeline::{persist_setup_failure, TrialPipeline};
use crate::report::CtrfReport;
use crate::reward::{RewardRecord, RewardSynthesizer};
use crate::runner::{map_report, ProducerKind, RunConfig, SolutionReport, TrialOutcome};
use crate::sandbox::{DockerSandbox, LocalSandbox, Sandbox};
use crate::task::{TaskBundle, TaskLoader};

/// Default directory task names are resolved under.
const DEFAULT_TASKS_DIR: &str = "./tasks";

/// Default directory reward artifacts are written to.
const DEFAULT_OUTPUT_DIR: &str = "./logs/verifier";

/// Exit code when a task cannot be loaded.
const EXIT_TASK_LOAD: u8 = 2;

/// Verification and reward synthesis for coding-agent benchmark tasks.
#[derive(Parser)]
#[command(name = "swe-verify")]
#[command(about = "Verify a candidate solution against a task's tests and persist its reward")]
#[command(version)]
#[command(
    long_about = "swe-verify runs a task's test suite against a sandbox, turns the results into a reward in [0, 1], and writes reward.txt / reward.json.\n\nExample usage:\n  swe-verify run web-scraper-task --producer reference --workdir /tmp/trial --output /tmp/trial/logs"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run a full trial: produce a solution, test it, persist the reward.
    Run(RunArgs),

    /// Score an existing CTRF report without running anything.
    Score(ScoreArgs),

    /// Load and validate task bundles.
    Inspect(InspectArgs),

    /// Forward a persisted reward to the feedback endpoint.
    Feedback(FeedbackArgs),
}

/// Arguments for `swe-verify run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Task name (resolved under --tasks-dir) or path to a task directory.
    pub task: String,

    /// Directory containing task bundles.
    #[arg(long, env = "SWE_VERIFY_TASKS_DIR", default_value = DEFAULT_TASKS_DIR)]
    pub tasks_dir: PathBuf,

    /// Directory reward.txt and reward.json are written to.
    #[arg(short = 'o', long, default_value = DEFAULT_OUTPUT_DIR)]
    pub output: PathBuf,

    /// How the candidate solution is produced (reference, agent, none).
    #[arg(short = 'p', long, default_value = "reference")]
    pub producer: ProducerKind,

    /// Agent command for --producer agent.
    #[arg(long, default_value = "agent")]
    pub agent_cmd: String,

    /// Extra argument passed to the agent (repeatable).
    #[arg(long = "agent-arg")]
    pub agent_args: Vec<String>,

    /// Agent timeout in seconds.
    #[arg(long, default_value = "1800")]
    pub agent_timeout: u64,

    /// Reference solution timeout in seconds.
    #[arg(long, default_value = "600")]
    pub solution_timeout: u64,

    /// Model name passed to the agent as MODEL_NAME.
    #[arg(short = 'm', long)]
    pub model: Option<String>,

    /// Sandbox working directory (host path, or path inside --container).
    #[arg(short = 'w', long)]
    pub workdir: Option<PathBuf>,

    /// Run inside this already-running Docker container instead of on the host.
    #[arg(long, env = "SWE_VERIFY_CONTAINER")]
    pub container: Option<String>,

    /// Re-run the reference solution right before testing.
    #[arg(long)]
    pub rerun_solution: bool,

    /// Overall trial deadline in seconds.
    #[arg(long)]
    pub trial_timeout: Option<u64>,

    /// Forward the reward to the feedback sink after persisting.
    #[arg(long)]
    pub feedback: bool,

    /// Output JSON to stdout instead of a summary.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `swe-verify score`.
#[derive(Parser, Debug)]
pub struct ScoreArgs {
    /// Task name or path.
    #[arg(short = 't', long)]
    pub task: String,

    #[arg(long, env = "SWE_VERIFY_TASKS_DIR", default_value = DEFAULT_TASKS_DIR)]
    pub tasks_dir: PathBuf,

    /// CTRF report written by the test run.
    #[arg(short = 'r', long)]
    pub report: PathBuf,

    /// Exit code of the test run.
    #[arg(short = 'e', long, allow_hyphen_values = true)]
    pub exit_code: i32,

    #[arg(short = 'o', long, default_value = DEFAULT_OUTPUT_DIR)]
    pub output: PathBuf,

    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `swe-verify inspect`.
#[derive(Parser, Debug)]
pub struct InspectArgs {
    /// Task name or path. Omit with --all.
    #[arg(required_unless_present = "all")]
    pub task: Option<String>,

    /// Inspect every task under --tasks-dir.
    #[arg(long)]
    pub all: bool,

    #[arg(long, env = "SWE_VERIFY_TASKS_DIR", default_value = DEFAULT_TASKS_DIR)]
    pub tasks_dir: PathBuf,

    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `swe-verify feedback`.
#[derive(Parser, Debug)]
pub struct FeedbackArgs {
    /// Directory holding reward.json.
    #[arg(short = 'd', long, default_value = DEFAULT_OUTPUT_DIR)]
    pub trial_dir: PathBuf,

    /// Run identifier the feedback is attached to.
    #[arg(long)]
    pub run_id: String,

    /// Agent cost in USD.
    #[arg(long)]
    pub cost_usd: Option<f64>,

    /// Number of agent steps.
    #[arg(long)]
    pub steps: Option<u64>,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Commands::Run(args) => run_trial_command(args).await,
        Commands::Score(args) => run_score_command(args).await,
        Commands::Inspect(args) => run_inspect_command(args),
        Commands::Feedback(args) => run_feedback_command(args).await,
    }
}

// ============================================================================
// Trial
// ============================================================================

async fn run_trial_command(args: RunArgs) -> anyhow::Result<ExitCode> {
    let bundle = match load_bundle(&args.tasks_dir, &args.task) {
        Ok(bundle) => Arc::new(bundle),
        Err(code) => return Ok(code),
    };

    let mut config = RunConfig::new(&args.output)
        .with_producer(args.producer)
        .with_agent_command(&args.agent_cmd)
        .with_agent_args(args.agent_args.clone())
        .with_agent_timeout(Duration::from_secs(args.agent_timeout))
        .with_solution_timeout(Duration::from_secs(args.solution_timeout))
        .with_rerun_solution(args.rerun_solution);
    if let Some(secs) = args.trial_timeout {
        config = config.with_trial_timeout(Duration::from_secs(secs));
    }
    if let Some(ref model) = args.model {
        config = config.with_model(model);
    }
    if let Some(ref container) = args.container {
        config = config.with_container(container);
    }

    let sandbox = match build_sandbox(&config, args.workdir.as_deref(), &bundle) {
        Ok(sandbox) => sandbox,
        Err(reason) => {
            error!(task_id = %bundle.id, reason = %reason, "Sandbox unavailable");
            let record = persist_setup_failure(&args.output, &bundle.id, &reason)
                .context("Failed to persist reward")?;
            print_record(&record, &args.output, args.json)?;
            return Ok(ExitCode::SUCCESS);
        }
    };

    let mut pipeline = TrialPipeline::new(bundle, sandbox, &config);
    if args.feedback {
        pipeline = pipeline.with_feedback(default_sink());
    }

    let completion = pipeline
        .run_until(shutdown_signal())
        .await
        .context("Failed to persist reward")?;

    if args.json {
        let json = serde_json::to_string_pretty(&TrialSummary {
            output_dir: &completion.output_dir,
            record: &completion.record,
            outcome: &completion.outcome,
        })?;
        println!("{json}");
    } else {
        print_record(&completion.record, &completion.output_dir, false)?;
        for result in completion.outcome.test_results.iter().filter(|r| !r.passed) {
            println!(
                "  FAIL {}: {}",
                result.test_id,
                result.message.as_deref().unwrap_or("")
            );
        }
    }

    Ok(ExitCode::SUCCESS)
}

#[derive(Serialize)]
struct TrialSummary<'a> {
    output_dir: &'a Path,
    record: &'a RewardRecord,
    outcome: &'a TrialOutcome,
}

fn build_sandbox(
    config: &RunConfig,
    workdir: Option<&Path>,
    bundle: &TaskBundle,
) -> Result<Arc<dyn Sandbox>, String> {
    match config.container {
        Some(ref container) => {
            let workdir = workdir
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(&bundle.environment.workdir));
            DockerSandbox::attach(container, workdir)
                .map(|s| Arc::new(s) as Arc<dyn Sandbox>)
                .map_err(|e| e.to_string())
        }
        None => {
            let workdir = workdir.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
            LocalSandbox::new(workdir)
                .map(|s| Arc::new(s) as Arc<dyn Sandbox>)
                .map_err(|e| e.to_string())
        }
    }
}

/// Resolves when the user asks to stop; never resolves if the handler cannot be installed.
async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
    warn!("Received Ctrl+C, cancelling trial");
}

// ============================================================================
// Score
// ============================================================================

async fn run_score_command(args: ScoreArgs) -> anyhow::Result<ExitCode> {
    let bundle = match load_bundle(&args.tasks_dir, &args.task) {
        Ok(bundle) => bundle,
        Err(code) => return Ok(code),
    };

    let started_at = Utc::now();
    let trial_id = format!("trial-{}", uuid::Uuid::new_v4());
    let outcome = match read_report(&args.report).await {
        Ok(report) => TrialOutcome::completed(
            &trial_id,
            &bundle.id,
            map_report(&bundle.test_suite, &report),
            Some(args.exit_code),
            SolutionReport::none(),
            started_at,
        ),
        Err(reason) => {
            warn!(task_id = %bundle.id, reason = %reason, "No usable report");
            TrialOutcome::abnormal(
                &trial_id,
                &bundle.id,
                &bundle.test_suite,
                Some(args.exit_code),
                reason,
                SolutionReport::none(),
                started_at,
            )
        }
    };

    let record = RewardSynthesizer::for_bundle(&bundle).synthesize(&outcome);
    let writer = ResultWriter::new(&args.output);
    writer
        .write_reward(&record)
        .context("Failed to persist reward")?;
    if let Err(e) = writer.write_outcome(&outcome) {
        warn!(error = %e, "Failed to write trial details");
    }

    print_record(&record, &args.output, args.json)?;
    Ok(ExitCode::SUCCESS)
}

async fn read_report(path: &Path) -> Result<CtrfReport, String> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| format!("report {} unreadable: {}", path.display(), e))?;
    CtrfReport::parse(&bytes).map_err(|e| format!("unparseable report: {}", e))
}

// ============================================================================
// Inspect
// ============================================================================

#[derive(Debug, Serialize)]
struct InspectEntry {
    id: String,
    path: PathBuf,
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    policy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tests: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    digest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn run_inspect_command(args: InspectArgs) -> anyhow::Result<ExitCode> {
    let loader = TaskLoader::new(&args.tasks_dir);

    let paths = if args.all {
        loader.discover()
    } else {
        let task = args.task.as_deref().unwrap_or_default();
        match loader.resolve(task) {
            Ok(path) => vec![path],
            Err(e) => {
                error!(task = %task, error = %e, "Task load failed");
                eprintln!("error: {e}");
                return Ok(ExitCode::from(EXIT_TASK_LOAD));
            }
        }
    };
    if paths.is_empty() {
        warn!(tasks_dir = %args.tasks_dir.display(), "No tasks found");
    }

    let entries: Vec<InspectEntry> = paths
        .iter()
        .map(|path| {
            let fallback_id = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            match crate::task::load_task_dir(path) {
                Ok(bundle) => InspectEntry {
                    id: bundle.id.clone(),
                    path: path.clone(),
                    valid: true,
                    policy: Some(bundle.reward_policy.to_string()),
                    tests: Some(bundle.test_count()),
                    digest: Some(bundle.digest.clone()),
                    error: None,
                },
                Err(e) => InspectEntry {
                    id: fallback_id,
                    path: path.clone(),
                    valid: false,
                    policy: None,
                    tests: None,
                    digest: None,
                    error: Some(e.to_string()),
                },
            }
        })
        .collect();

    let invalid = entries.iter().filter(|e| !e.valid).count();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        println!("\n=== Tasks ({} found, {} invalid) ===", entries.len(), invalid);
        for entry in &entries {
            if entry.valid {
                println!(
                    "  {} [{}] tests={} digest={}",
                    entry.id,
                    entry.policy.as_deref().unwrap_or(""),
                    entry.tests.unwrap_or(0),
                    entry.digest.as_deref().map(|d| &d[..d.len().min(12)]).unwrap_or("")
                );
            } else {
                println!(
                    "  {} INVALID: {}",
                    entry.id,
                    entry.error.as_deref().unwrap_or("")
                );
            }
        }
    }

    if invalid > 0 {
        Ok(ExitCode::from(EXIT_TASK_LOAD))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

// ============================================================================
// Feedback
// ============================================================================

async fn run_feedback_command(args: FeedbackArgs) -> anyhow::Result<ExitCode> {
    let writer = ResultWriter::new(&args.trial_dir);
    let Some(record) = writer.read_reward().context("Failed to read reward record")? else {
        anyhow::bail!("No reward.json in {}", args.trial_dir.display());
    };

    let mut events = vec![FeedbackEvent::from_record(&args.run_id, &record)];
    if let Some(cost) = args.cost_usd {
        events.push(FeedbackEvent::cost(&args.run_id, cost));
    }
    if let Some(steps) = args.steps {
        events.push(FeedbackEvent::steps(&args.run_id, steps));
    }

    let sink = default_sink();
    let sent = forward(sink.as_ref(), &events).await;
    info!(
        run_id = %args.run_id,
        sink = %sink.name(),
        sent,
        total = events.len(),
        "Feedback forwarded"
    );
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// Helpers
// ============================================================================

/// Loads a bundle, mapping failure to the task-load exit code.
fn load_bundle(tasks_dir: &Path, task: &str) -> Result<TaskBundle, ExitCode> {
    TaskLoader::new(tasks_dir).load(task).map_err(|e| {
        error!(task = %task, error = %e, "Task load failed");
        eprintln!("error: {e}");
        ExitCode::from(EXIT_TASK_LOAD)
    })
}

fn print_record(record: &RewardRecord, output_dir: &Path, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(record)?);
        return Ok(());
    }

    let detail = &record.detail;
    println!("\n=== Trial Result ===");
    println!("Task:        {}", detail.task_id);
    println!("Trial:       {}", detail.trial_id);
    println!("Reward:      {}", record.reward_txt().trim_end());
    println!("Passed:      {}", record.passed);
    println!("Tests:       {}/{}", detail.tests_passed, detail.tests_total);
    println!("Exit status: {}", detail.exit_status);
    println!("Cause:       {}", detail.cause);
    if let Some(ref reason) = detail.abnormal_reason {
        println!("Reason:      {reason}");
    }
    if !detail.flags.is_empty() {
        println!("Flags:       {}", detail.flags.join(", "));
    }
    println!("Output:      {}", output_dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_args() {
        let cli = Cli::try_parse_from([
            "swe-verify",
            "run",
            "web-scraper-task",
            "--producer",
            "agent",
            "--agent-cmd",
            "python -m baseagent",
            "--trial-timeout",
            "900",
            "--rerun-solution",
        ])
        .unwrap();

        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.task, "web-scraper-task");
                assert_eq!(args.producer, ProducerKind::Agent);
                assert_eq!(args.agent_cmd, "python -m baseagent");
                assert_eq!(args.trial_timeout, Some(900));
                assert!(args.rerun_solution);
                assert_eq!(args.output, PathBuf::from(DEFAULT_OUTPUT_DIR));
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_parse_score_negative_exit_code() {
        let cli = Cli::try_parse_from([
            "swe-verify",
            "score",
            "--task",
            "t",
            "--report",
            "ctrf.json",
            "--exit-code",
            "-1",
        ])
        .unwrap();
        match cli.command {
            Commands::Score(args) => assert_eq!(args.exit_code, -1),
            _ => panic!("expected score command"),
        }
    }

    #[test]
    fn test_inspect_requires_task_or_all() {
        assert!(Cli::try_parse_from(["swe-verify", "inspect"]).is_err());
        assert!(Cli::try_parse_from(["swe-verify", "inspect", "--all"]).is_ok());
    }

    #[test]
    fn test_unknown_producer_rejected() {
        assert!(Cli::try_parse_from(["swe-verify", "run", "t", "--producer", "wizard"]).is_err());
    }

    #[tokio::test]
    async fn test_missing_task_exits_with_load_code() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = dir.path().join("out");
        let cli = Cli::try_parse_from([
            "swe-verify",
            "run",
            "no-such-task",
            "--tasks-dir",
            dir.path().to_str().unwrap(),
            "--output",
            out.to_str().unwrap(),
        ])
        .unwrap();

        let code = run_with_cli(cli).await.unwrap();

        assert_eq!(code, ExitCode::from(EXIT_TASK_LOAD));
        assert!(!out.join("reward.txt").exists());
    }
}
