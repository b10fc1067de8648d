//! Configuration for a trial run.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::agent::{AgentSolution, DEFAULT_AGENT_COMMAND};
use super::producer::{NoSolution, ProducerKind, ReferenceSolution, SolutionProducer};

/// Settings for running one trial against a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Directory the reward artifacts are written to.
    pub output_dir: PathBuf,
    /// How the candidate solution is produced.
    pub producer: ProducerKind,
    /// Agent command, for [`ProducerKind::Agent`].
    pub agent_command: String,
    /// Extra agent arguments.
    pub agent_args: Vec<String>,
    /// Maximum agent execution time.
    pub agent_timeout: Duration,
    /// Maximum reference solution execution time.
    pub solution_timeout: Duration,
    /// Re-run the reference solution immediately before testing.
    pub rerun_solution: bool,
    /// Overall deadline for the trial, if any.
    pub trial_timeout: Option<Duration>,
    /// Model name passed to the agent (if applicable).
    pub model: Option<String>,
    /// Environment variables passed to the agent.
    pub env_vars: Vec<(String, String)>,
    /// Running container to execute in; `None` runs on the host.
    pub container: Option<String>,
}

impl RunConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            producer: ProducerKind::Reference,
            agent_command: DEFAULT_AGENT_COMMAND.to_string(),
            agent_args: Vec::new(),
            agent_timeout: Duration::from_secs(1800), // 30 minutes
            solution_timeout: Duration::from_secs(600),
            rerun_solution: false,
            trial_timeout: None,
            model: None,
            env_vars: Vec::new(),
            container: None,
        }
    }

    pub fn with_producer(mut self, producer: ProducerKind) -> Self {
        self.producer = producer;
        self
    }

    pub fn with_agent_command(mut self, command: impl Into<String>) -> Self {
        self.agent_command = command.into();
        self
    }

    pub fn with_agent_args(mut self, args: Vec<String>) -> Self {
        self.agent_args = args;
        self
    }

    pub fn with_agent_timeout(mut self, timeout: Duration) -> Self {
        self.agent_timeout = timeout;
        self
    }

    pub fn with_solution_timeout(mut self, timeout: Duration) -> Self {
        self.solution_timeout = timeout;
        self
    }

    pub fn with_rerun_solution(mut self, rerun: bool) -> Self {
        self.rerun_solution = rerun;
        self
    }

    pub fn with_trial_timeout(mut self, timeout: Duration) -> Self {
        self.trial_timeout = Some(timeout);
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

    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }

    /// Instantiates the configured producer.
    pub fn build_producer(&self) -> Box<dyn SolutionProducer> {
        match self.producer {
            ProducerKind::Reference => Box::new(ReferenceSolution::new(self.solution_timeout)),
            ProducerKind::None => Box::new(NoSolution),
            ProducerKind::Agent => {
                let mut agent = AgentSolution::new(&self.agent_command, self.agent_timeout)
                    .with_args(self.agent_args.clone());
                if let Some(ref model) = self.model {
                    agent = agent.with_model(model);
                }
                for (key, value) in &self.env_vars {
                    agent = agent.with_env(key, value);
                }
                Box::new(agent)
            }
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::new("./outputs")
    }
}
