//! Agent-driven solution producer.
//!
//! Runs any command-line agent inside the sandbox, handing it the task
//! instructions via stdin or as an argument.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use super::producer::{check_exit, ProducerKind, SolutionProducer};
use crate::error::ProducerError;
use crate::sandbox::{ExecOutput, ExecRequest, Sandbox};
use crate::task::TaskBundle;

/// Default agent command when none is configured.
pub const DEFAULT_AGENT_COMMAND: &str = "agent";

/// Producer that delegates to an external agent CLI.
#[derive(Debug, Clone)]
pub struct AgentSolution {
    /// Base command to run.
    command: String,
    /// Extra arguments appended after the command.
    args: Vec<String>,
    /// Whether to pass instructions via stdin (true) or as argument (false).
    use_stdin: bool,
    timeout: Duration,
    model: Option<String>,
    env_vars: Vec<(String, String)>,
}

impl AgentSolution {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            use_stdin: true,
            timeout,
            model: None,
            env_vars: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Sets whether to use stdin for the instructions.
    pub fn with_stdin(mut self, use_stdin: bool) -> Self {
        self.use_stdin = use_stdin;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    /// Shell command line for a bundle.
    pub fn command_line(&self, bundle: &TaskBundle) -> String {
        let mut parts = vec![self.command.clone()];
        parts.extend(self.args.iter().map(|a| shell_quote(a)));
        if !self.use_stdin {
            parts.push("--instruction".to_string());
            parts.push(shell_quote(&bundle.instructions));
        }
        parts.join(" ")
    }
}

#[async_trait]
impl SolutionProducer for AgentSolution {
    fn kind(&self) -> ProducerKind {
        ProducerKind::Agent
    }

    async fn produce(
        &self,
        bundle: &TaskBundle,
        sandbox: &dyn Sandbox,
    ) -> Result<ExecOutput, ProducerError> {
        let mut request = ExecRequest::new(self.command_line(bundle), self.timeout)
            .with_env("TASK_ID", &bundle.id);
        if let Some(ref model) = self.model {
            request = request.with_env("MODEL_NAME", model);
        }
        for (key, value) in &self.env_vars {
            request = request.with_env(key, value);
        }
        if self.use_stdin {
            request = request.with_stdin(&bundle.instructions);
        }

        info!(
            task_id = %bundle.id,
            command = %self.command,
            sandbox = %sandbox.id(),
            "Starting agent"
        );
        let output = sandbox.exec(&request).await?;
        debug!(exit_code = ?output.exit_code, "Agent finished");

        check_exit(output, self.timeout).map_err(|e| match e {
            ProducerError::NonZeroExit { code, stderr } => {
                ProducerError::Harness(format!("exit code {}: {}", code, stderr))
            }
            other => other,
        })
    }
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::LocalSandbox;
    use crate::task::load_task_dir;
    use std::fs;
    use tempfile::TempDir;

    fn bundle(root: &std::path::Path) -> TaskBundle {
        let dir = root.join("task");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("task.yaml"),
            "id: agent-task\ntests:\n  command: \"true\"\n  cases:\n    - id: a\n",
        )
        .unwrap();
        fs::write(dir.join("instruction.md"), "Don't panic").unwrap();
        load_task_dir(&dir).unwrap()
    }

    #[test]
    fn test_command_line_quotes_instructions() {
        let tasks = TempDir::new().unwrap();
        let b = bundle(tasks.path());
        let agent = AgentSolution::new("my-agent", Duration::from_secs(5))
            .with_args(vec!["--fast".into()])
            .with_stdin(false);

        assert_eq!(
            agent.command_line(&b),
            "my-agent '--fast' --instruction 'Don'\\''t panic'"
        );
    }

    #[tokio::test]
    async fn test_agent_receives_instructions_on_stdin() {
        let tasks = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let b = bundle(tasks.path());
        let sandbox = LocalSandbox::new(work.path()).unwrap();
        let agent = AgentSolution::new("cat > prompt.txt", Duration::from_secs(5))
            .with_model("test-model");

        let output = agent.produce(&b, &sandbox).await.unwrap();

        assert!(output.is_success());
        let prompt = fs::read_to_string(work.path().join("prompt.txt")).unwrap();
        assert_eq!(prompt, "Don't panic");
    }

    #[tokio::test]
    async fn test_agent_failure_is_harness_error() {
        let tasks = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let b = bundle(tasks.path());
        let sandbox = LocalSandbox::new(work.path()).unwrap();
        let agent = AgentSolution::new("exit 3", Duration::from_secs(5));

        let err = agent.produce(&b, &sandbox).await.unwrap_err();
        assert!(matches!(err, ProducerError::Harness(_)));
    }
}
