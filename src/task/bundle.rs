//! Task bundle model.
//!
//! A bundle is the immutable description of one benchmark task: what the
//! agent is asked to do, how its sandbox starts out, and which test suite
//! decides whether it succeeded.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::reward::PolicyKind;

/// Default batch timeout for a test suite.
pub const DEFAULT_TEST_TIMEOUT_SECS: u64 = 600;

/// Default report location, relative to the sandbox working directory.
pub const DEFAULT_REPORT_PATH: &str = "ctrf.json";

/// A fully loaded and validated task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskBundle {
    /// Task identifier.
    pub id: String,
    /// Directory the bundle was loaded from.
    pub root: PathBuf,
    /// Natural-language instructions handed to the agent.
    pub instructions: String,
    /// Descriptive metadata.
    pub metadata: TaskMetadata,
    /// Initial sandbox state.
    pub environment: EnvironmentSpec,
    /// The suite that scores the trial.
    pub test_suite: TestSuite,
    /// Reward policy selected for this task.
    pub reward_policy: PolicyKind,
    /// Reference solution script, if the task ships one.
    pub solution_script: Option<PathBuf>,
    /// SHA-256 over the manifest and the instructions.
    pub digest: String,
}

impl TaskBundle {
    /// Number of declared test cases.
    pub fn test_count(&self) -> usize {
        self.test_suite.cases.len()
    }
}

/// Descriptive task metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskMetadata {
    #[serde(default)]
    pub difficulty: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Description of the sandbox's initial state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    /// Container image the sandbox is provisioned from.
    #[serde(default = "default_image")]
    pub image: String,
    /// Working directory inside the sandbox.
    #[serde(default = "default_workdir")]
    pub workdir: String,
    /// Commands the provisioner runs before the trial starts.
    #[serde(default)]
    pub setup: Vec<String>,
}

fn default_image() -> String {
    "python:3.12-slim".to_string()
}

fn default_workdir() -> String {
    "/app".to_string()
}

impl Default for EnvironmentSpec {
    fn default() -> Self {
        Self {
            image: default_image(),
            workdir: default_workdir(),
            setup: Vec::new(),
        }
    }
}

/// Ordered set of test cases executed as a single batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuite {
    /// Command that runs every case and writes a CTRF report.
    pub command: String,
    /// Where the command writes its report, relative to the working directory.
    pub report_path: PathBuf,
    /// Batch timeout; exceeding it counts as abnormal termination.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// Declared cases in suite order.
    pub cases: Vec<TestCase>,
}

impl TestSuite {
    /// Looks up a declared case by id.
    pub fn case(&self, id: &str) -> Option<&TestCase> {
        self.cases.iter().find(|c| c.id == id)
    }
}

/// A single, individually identifiable test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    /// Identifier as reported by the test run.
    pub id: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Weight under the weighted policy.
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

impl TestCase {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            weight: default_weight(),
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

/// On-disk shape of `task.yaml`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TaskManifest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(flatten)]
    pub metadata: TaskMetadata,
    #[serde(default)]
    pub environment: EnvironmentSpec,
    pub tests: TestsManifest,
    #[serde(default)]
    pub reward: RewardManifest,
    #[serde(default)]
    pub solution: SolutionManifest,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TestsManifest {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub report_path: Option<PathBuf>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub cases: Vec<TestCase>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RewardManifest {
    #[serde(default)]
    pub policy: PolicyKind,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SolutionManifest {
    #[serde(default = "default_solution_script")]
    pub script: PathBuf,
}

fn default_solution_script() -> PathBuf {
    PathBuf::from("solution/solve.sh")
}

impl Default for SolutionManifest {
    fn default() -> Self {
        Self {
            script: default_solution_script(),
        }
    }
}
