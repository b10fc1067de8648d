//! Task bundles: immutable descriptions of benchmark tasks.
//!
//! A task directory looks like:
//!
//! ```text
//! <task>/task.yaml          metadata, environment, tests, reward policy
//! <task>/instruction.md     what the agent is asked to do
//! <task>/solution/solve.sh  reference solution (optional)
//! <task>/tests/...          assets used by the batch test command
//! ```

pub mod bundle;
pub mod loader;

pub use bundle::{EnvironmentSpec, TaskBundle, TaskMetadata, TestCase, TestSuite};
pub use loader::{discover_tasks, load_task_dir, TaskLoader};
