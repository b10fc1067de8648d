//! CTRF (Common Test Report Format) documents.
//!
//! The batch test command writes one of these; the trial emits a normalized
//! one next to the reward files so downstream tooling can read either.

use serde::{Deserialize, Serialize};

use crate::runner::outcome::TrialOutcome;

/// Top-level CTRF document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CtrfReport {
    pub results: CtrfResults,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CtrfResults {
    #[serde(default)]
    pub tool: CtrfTool,
    #[serde(default)]
    pub summary: CtrfSummary,
    #[serde(default)]
    pub tests: Vec<CtrfTest>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CtrfTool {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Counts over all tests in the report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CtrfSummary {
    #[serde(default)]
    pub tests: u64,
    #[serde(default)]
    pub passed: u64,
    #[serde(default)]
    pub failed: u64,
    #[serde(default)]
    pub pending: u64,
    #[serde(default)]
    pub skipped: u64,
    #[serde(default)]
    pub other: u64,
    /// Start time, milliseconds since the epoch.
    #[serde(default)]
    pub start: i64,
    /// Stop time, milliseconds since the epoch.
    #[serde(default)]
    pub stop: i64,
}

/// A single test entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CtrfTest {
    pub name: String,
    pub status: CtrfStatus,
    /// Duration in milliseconds.
    #[serde(default)]
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CtrfStatus {
    Passed,
    Failed,
    Skipped,
    Pending,
    #[serde(other)]
    Other,
}

impl CtrfReport {
    /// Parses a report from raw bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Finds the entry for a declared test id.
    ///
    /// Runners usually qualify names (`tests/test_outputs.py::test_x`), so an
    /// entry matches on the exact id or on a `::`-separated suffix.
    pub fn find(&self, test_id: &str) -> Option<&CtrfTest> {
        self.results
            .tests
            .iter()
            .find(|t| t.name == test_id)
            .or_else(|| {
                self.results
                    .tests
                    .iter()
                    .find(|t| t.name.rsplit("::").next() == Some(test_id))
            })
    }

    /// Builds a normalized report from a trial outcome.
    pub fn from_outcome(outcome: &TrialOutcome) -> Self {
        let tests: Vec<CtrfTest> = outcome
            .test_results
            .iter()
            .map(|r| CtrfTest {
                name: r.test_id.clone(),
                status: if r.passed {
                    CtrfStatus::Passed
                } else {
                    CtrfStatus::Failed
                },
                duration: 0.0,
                message: r.message.clone(),
                trace: None,
            })
            .collect();

        let passed = tests.iter().filter(|t| t.status == CtrfStatus::Passed).count() as u64;
        let total = tests.len() as u64;

        Self {
            results: CtrfResults {
                tool: CtrfTool {
                    name: env!("CARGO_PKG_NAME").to_string(),
                    version: Some(env!("CARGO_PKG_VERSION").to_string()),
                },
                summary: CtrfSummary {
                    tests: total,
                    passed,
                    failed: total - passed,
                    pending: 0,
                    skipped: 0,
                    other: 0,
                    start: outcome.started_at.timestamp_millis(),
                    stop: outcome.completed_at.timestamp_millis(),
                },
                tests,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PYTEST_REPORT: &str = r#"{
      "results": {
        "tool": { "name": "pytest" },
        "summary": { "tests": 3, "passed": 2, "failed": 1, "pending": 0,
                     "skipped": 0, "other": 0, "start": 1, "stop": 2 },
        "tests": [
          { "name": "tests/test_outputs.py::test_file_exists", "status": "passed", "duration": 1.5 },
          { "name": "test_title", "status": "failed", "message": "title.txt is empty" },
          { "name": "tests/test_outputs.py::test_flaky", "status": "rerun" }
        ]
      }
    }"#;

    #[test]
    fn test_parse_pytest_report() {
        let report = CtrfReport::parse(PYTEST_REPORT.as_bytes()).unwrap();
        assert_eq!(report.results.tool.name, "pytest");
        assert_eq!(report.results.summary.failed, 1);
        assert_eq!(report.results.tests.len(), 3);
        assert_eq!(report.results.tests[2].status, CtrfStatus::Other);
    }

    #[test]
    fn test_find_by_exact_and_qualified_name() {
        let report = CtrfReport::parse(PYTEST_REPORT.as_bytes()).unwrap();

        let exists = report.find("test_file_exists").unwrap();
        assert_eq!(exists.status, CtrfStatus::Passed);

        let title = report.find("test_title").unwrap();
        assert_eq!(title.message.as_deref(), Some("title.txt is empty"));

        assert!(report.find("test_missing").is_none());
    }

    #[test]
    fn test_minimal_report_uses_defaults() {
        let report = CtrfReport::parse(br#"{"results": {"tests": []}}"#).unwrap();
        assert_eq!(report.results.summary, CtrfSummary::default());
        assert!(report.results.tool.name.is_empty());
    }

    #[test]
    fn test_rejects_non_ctrf_json() {
        assert!(CtrfReport::parse(br#"{"passed": true}"#).is_err());
        assert!(CtrfReport::parse(b"not json").is_err());
    }
}
