//! Resolves task identifiers and loads validated bundles from disk.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use walkdir::WalkDir;

use super::bundle::{
    TaskBundle, TaskManifest, TestSuite, DEFAULT_REPORT_PATH, DEFAULT_TEST_TIMEOUT_SECS,
};
use crate::error::TaskError;
use crate::reward::PolicyKind;

/// Manifest file name inside a task directory.
pub const MANIFEST_FILE: &str = "task.yaml";

/// Instructions file name inside a task directory.
pub const INSTRUCTIONS_FILE: &str = "instruction.md";

static TASK_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("valid task id regex"));

/// Loads task bundles from a tasks root directory.
#[derive(Debug, Clone)]
pub struct TaskLoader {
    tasks_root: PathBuf,
}

impl TaskLoader {
    /// Creates a loader that resolves bare task names under `tasks_root`.
    pub fn new(tasks_root: impl Into<PathBuf>) -> Self {
        Self {
            tasks_root: tasks_root.into(),
        }
    }

    /// Returns the tasks root.
    pub fn tasks_root(&self) -> &Path {
        &self.tasks_root
    }

    /// Resolves an identifier to a task directory.
    ///
    /// The identifier may be a path to a task directory or a task name under
    /// the tasks root.
    pub fn resolve(&self, identifier: &str) -> Result<PathBuf, TaskError> {
        let direct = PathBuf::from(identifier);
        if direct.join(MANIFEST_FILE).is_file() {
            return Ok(direct);
        }

        if TASK_ID_PATTERN.is_match(identifier) {
            let under_root = self.tasks_root.join(identifier);
            if under_root.join(MANIFEST_FILE).is_file() {
                return Ok(under_root);
            }
        }

        Err(TaskError::NotFound(identifier.to_string()))
    }

    /// Resolves and loads a task bundle.
    pub fn load(&self, identifier: &str) -> Result<TaskBundle, TaskError> {
        let dir = self.resolve(identifier)?;
        load_task_dir(&dir)
    }

    /// Lists every task directory under the tasks root.
    pub fn discover(&self) -> Vec<PathBuf> {
        discover_tasks(&self.tasks_root)
    }
}

/// Loads and validates the bundle stored in `dir`.
pub fn load_task_dir(dir: &Path) -> Result<TaskBundle, TaskError> {
    let fallback_id = dir
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| dir.display().to_string());

    let manifest_path = dir.join(MANIFEST_FILE);
    if !manifest_path.is_file() {
        return Err(TaskError::NotFound(dir.display().to_string()));
    }

    let manifest_raw = fs::read_to_string(&manifest_path).map_err(|e| {
        TaskError::malformed(&fallback_id, format!("cannot read {MANIFEST_FILE}: {e}"))
    })?;
    let manifest: TaskManifest = serde_yaml::from_str(&manifest_raw).map_err(|e| {
        TaskError::malformed(&fallback_id, format!("invalid {MANIFEST_FILE}: {e}"))
    })?;

    let id = manifest.id.clone().unwrap_or(fallback_id);
    if !TASK_ID_PATTERN.is_match(&id) {
        return Err(TaskError::malformed(&id, "task id must be alphanumeric with '.', '_' or '-'"));
    }

    let instructions = fs::read_to_string(dir.join(INSTRUCTIONS_FILE))
        .map_err(|e| TaskError::malformed(&id, format!("cannot read {INSTRUCTIONS_FILE}: {e}")))?;

    validate_tests(&id, &manifest)?;

    let solution_path = dir.join(&manifest.solution.script);
    let solution_script = solution_path.is_file().then_some(solution_path);

    let test_suite = TestSuite {
        command: manifest.tests.command.trim().to_string(),
        report_path: manifest
            .tests
            .report_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_REPORT_PATH)),
        timeout: Duration::from_secs(
            manifest
                .tests
                .timeout_secs
                .unwrap_or(DEFAULT_TEST_TIMEOUT_SECS),
        ),
        cases: manifest.tests.cases.clone(),
    };

    let bundle = TaskBundle {
        digest: bundle_digest(&manifest_raw, &instructions),
        id,
        root: dir.to_path_buf(),
        instructions,
        metadata: manifest.metadata,
        environment: manifest.environment,
        test_suite,
        reward_policy: manifest.reward.policy,
        solution_script,
    };

    info!(
        task_id = %bundle.id,
        tests = bundle.test_count(),
        policy = %bundle.reward_policy,
        "Loaded task bundle"
    );
    Ok(bundle)
}

fn validate_tests(id: &str, manifest: &TaskManifest) -> Result<(), TaskError> {
    let tests = &manifest.tests;

    if tests.command.trim().is_empty() {
        return Err(TaskError::malformed(id, "test suite has no batch command"));
    }
    if tests.cases.is_empty() {
        return Err(TaskError::malformed(id, "test suite has no cases"));
    }
    if tests.timeout_secs == Some(0) {
        return Err(TaskError::malformed(id, "test timeout must be positive"));
    }

    let mut seen = HashSet::new();
    for case in &tests.cases {
        if case.id.trim().is_empty() {
            return Err(TaskError::malformed(id, "test case with empty id"));
        }
        if !seen.insert(case.id.as_str()) {
            return Err(TaskError::malformed(
                id,
                format!("duplicate test id '{}'", case.id),
            ));
        }
        if !case.weight.is_finite() || case.weight < 0.0 {
            return Err(TaskError::malformed(
                id,
                format!("test '{}' has invalid weight {}", case.id, case.weight),
            ));
        }
    }

    if manifest.reward.policy == PolicyKind::Weighted {
        let total: f64 = tests.cases.iter().map(|c| c.weight).sum();
        if total <= 0.0 {
            return Err(TaskError::malformed(id, "weighted policy with zero total weight"));
        }
    }

    debug!(task_id = id, cases = tests.cases.len(), "Test suite validated");
    Ok(())
}

/// SHA-256 over the manifest and instructions, hex encoded.
fn bundle_digest(manifest: &str, instructions: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(manifest.as_bytes());
    hasher.update([0u8]);
    hasher.update(instructions.as_bytes());
    hex::encode(hasher.finalize())
}

/// Discovers every directory under `root` that contains a `task.yaml`.
pub fn discover_tasks(root: &Path) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = WalkDir::new(root)
        .max_depth(3)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file() && e.file_name() == MANIFEST_FILE)
        .filter_map(|e| e.path().parent().map(Path::to_path_buf))
        .collect();
    dirs.sort();
    dirs
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const VALID_MANIFEST: &str = r#"
id: demo-task
difficulty: easy
tests:
  command: "bash tests/test.sh"
  timeout_secs: 30
  cases:
    - id: test_one
    - id: test_two
    - id: test_three
"#;

    fn write_task(root: &Path, name: &str, manifest: &str) -> PathBuf {
        let dir = root.join(name);
        fs::create_dir_all(dir.join("solution")).unwrap();
        fs::write(dir.join(MANIFEST_FILE), manifest).unwrap();
        fs::write(dir.join(INSTRUCTIONS_FILE), "Create output.txt").unwrap();
        fs::write(dir.join("solution/solve.sh"), "echo hi > output.txt").unwrap();
        dir
    }

    #[test]
    fn test_load_valid_task() {
        let temp = TempDir::new().unwrap();
        let dir = write_task(temp.path(), "demo-task", VALID_MANIFEST);

        let bundle = load_task_dir(&dir).unwrap();
        assert_eq!(bundle.id, "demo-task");
        assert_eq!(bundle.test_count(), 3);
        assert_eq!(bundle.test_suite.timeout, Duration::from_secs(30));
        assert_eq!(bundle.test_suite.report_path, PathBuf::from("ctrf.json"));
        assert_eq!(bundle.instructions, "Create output.txt");
        assert!(bundle.solution_script.is_some());
        assert_eq!(bundle.digest.len(), 64);
    }

    #[test]
    fn test_resolve_by_name_and_path() {
        let temp = TempDir::new().unwrap();
        let dir = write_task(temp.path(), "demo-task", VALID_MANIFEST);
        let loader = TaskLoader::new(temp.path());

        assert_eq!(loader.resolve("demo-task").unwrap(), temp.path().join("demo-task"));
        assert_eq!(loader.resolve(&dir.display().to_string()).unwrap(), dir);
    }

    #[test]
    fn test_unknown_task_not_found() {
        let temp = TempDir::new().unwrap();
        let loader = TaskLoader::new(temp.path());
        assert!(matches!(loader.load("missing"), Err(TaskError::NotFound(_))));
        assert!(matches!(loader.load("../escape"), Err(TaskError::NotFound(_))));
    }

    #[test]
    fn test_zero_cases_is_malformed() {
        let temp = TempDir::new().unwrap();
        let dir = write_task(
            temp.path(),
            "empty",
            "tests:\n  command: \"true\"\n  cases: []\n",
        );
        let err = load_task_dir(&dir).unwrap_err();
        assert!(matches!(err, TaskError::Malformed { .. }));
        assert!(err.to_string().contains("no cases"));
    }

    #[test]
    fn test_duplicate_ids_are_malformed() {
        let temp = TempDir::new().unwrap();
        let dir = write_task(
            temp.path(),
            "dupes",
            "tests:\n  command: \"true\"\n  cases:\n    - id: a\n    - id: a\n",
        );
        let err = load_task_dir(&dir).unwrap_err();
        assert!(err.to_string().contains("duplicate test id 'a'"));
    }

    #[test]
    fn test_invalid_yaml_is_malformed() {
        let temp = TempDir::new().unwrap();
        let dir = write_task(temp.path(), "broken", "tests: [unclosed");
        assert!(matches!(
            load_task_dir(&dir),
            Err(TaskError::Malformed { .. })
        ));
    }

    #[test]
    fn test_missing_instructions_is_malformed() {
        let temp = TempDir::new().unwrap();
        let dir = write_task(temp.path(), "demo-task", VALID_MANIFEST);
        fs::remove_file(dir.join(INSTRUCTIONS_FILE)).unwrap();
        assert!(matches!(
            load_task_dir(&dir),
            Err(TaskError::Malformed { .. })
        ));
    }

    #[test]
    fn test_negative_weight_is_malformed() {
        let temp = TempDir::new().unwrap();
        let dir = write_task(
            temp.path(),
            "weights",
            "tests:\n  command: \"true\"\n  cases:\n    - id: a\n      weight: -0.5\n",
        );
        assert!(load_task_dir(&dir).unwrap_err().to_string().contains("invalid weight"));
    }

    #[test]
    fn test_weighted_zero_total_is_malformed() {
        let temp = TempDir::new().unwrap();
        let dir = write_task(
            temp.path(),
            "weights",
            "reward:\n  policy: weighted\ntests:\n  command: \"true\"\n  cases:\n    - id: a\n      weight: 0\n",
        );
        assert!(load_task_dir(&dir).unwrap_err().to_string().contains("zero total weight"));
    }

    #[test]
    fn test_discover_tasks() {
        let temp = TempDir::new().unwrap();
        write_task(temp.path(), "b-task", VALID_MANIFEST);
        write_task(temp.path(), "a-task", VALID_MANIFEST);
        fs::create_dir_all(temp.path().join("not-a-task")).unwrap();

        let found = discover_tasks(temp.path());
        assert_eq!(found, vec![temp.path().join("a-task"), temp.path().join("b-task")]);
    }
}
