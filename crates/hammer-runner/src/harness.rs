//! Verification test execution and JSON report parsing.

use crate::process::{run_command, CommandSpec};
use anyhow::Context;
use async_trait::async_trait;
use hammer_core::{ExecutionPhase, TestCaseResult, TestOutcome, TestResult};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Longest failure message kept from a traceback.
const MAX_LONGREPR_CHARS: usize = 200;

#[derive(Debug, Clone)]
pub struct TestRequest {
    pub phase: ExecutionPhase,
    /// Directory holding the phase's generated tests.
    pub tests_dir: PathBuf,
    /// Directory the runner is started from.
    pub cwd: PathBuf,
    /// Where the JSON report is written.
    pub report_path: PathBuf,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct TestRun {
    pub result: TestResult,
    pub log: String,
}

/// Runs the generated verification tests for one phase.
#[async_trait]
pub trait TestHarness: Send + Sync {
    async fn run_tests(&self, request: &TestRequest) -> anyhow::Result<TestRun>;
}

/// [`TestHarness`] backed by pytest and its JSON report plugin.
pub struct PytestHarness {
    python: String,
}

impl PytestHarness {
    pub fn new(python: impl Into<String>) -> Self {
        Self {
            python: python.into(),
        }
    }

    pub fn command(&self, request: &TestRequest) -> CommandSpec {
        CommandSpec::new(&self.python)
            .args(["-m", "pytest"])
            .arg(request.tests_dir.to_string_lossy())
            .args(["-m", request.phase.as_str()])
            .arg("--json-report")
            .arg(format!("--json-report-file={}", request.report_path.display()))
            .args(["-q", "--tb=short"])
            .cwd(&request.cwd)
            .timeout(request.timeout)
    }
}

/// Whether `dir` holds at least one `test_*.py` module.
fn has_test_modules(dir: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    entries.flatten().any(|entry| {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        name.starts_with("test_") && name.ends_with(".py")
    })
}

#[async_trait]
impl TestHarness for PytestHarness {
    async fn run_tests(&self, request: &TestRequest) -> anyhow::Result<TestRun> {
        if !has_test_modules(&request.tests_dir) {
            let message = format!(
                "No test modules in {} for phase {}",
                request.tests_dir.display(),
                request.phase
            );
            return Ok(TestRun {
                result: TestResult::error(message.clone()),
                log: message,
            });
        }

        // A stale report from an earlier run must not be mistaken for this one.
        if request.report_path.exists() {
            std::fs::remove_file(&request.report_path)
                .with_context(|| format!("remove {:?}", request.report_path))?;
        }

        let spec = self.command(request);
        debug!(command = %spec.display(), "running verification tests");
        let output = run_command(&spec).await?;
        let log = output.combined();

        if output.timed_out {
            return Ok(TestRun {
                result: TestResult::error(format!(
                    "Tests timed out after {} seconds",
                    request.timeout.as_secs()
                )),
                log,
            });
        }

        let result = if request.report_path.exists() {
            read_report(&request.report_path)?
        } else {
            // No report: only the exit status is known.
            let passed = output.success();
            TestResult {
                passed: u32::from(passed),
                failed: u32::from(!passed),
                ..Default::default()
            }
        };

        Ok(TestRun { result, log })
    }
}

// ---------------------------------------------------------------------------
// JSON report
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct Summary {
    #[serde(default)]
    passed: u32,
    #[serde(default)]
    failed: u32,
    #[serde(default)]
    skipped: u32,
    #[serde(default)]
    error: u32,
}

#[derive(Debug, Default, Deserialize)]
struct Crash {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct CallInfo {
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    crash: Option<Crash>,
    #[serde(default)]
    longrepr: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ReportedTest {
    #[serde(default)]
    nodeid: String,
    #[serde(default)]
    outcome: String,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    call: Option<CallInfo>,
    #[serde(default)]
    metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Report {
    #[serde(default)]
    summary: Summary,
    #[serde(default)]
    tests: Vec<ReportedTest>,
}

fn outcome_of(raw: &str) -> TestOutcome {
    match raw {
        "passed" => TestOutcome::Passed,
        "failed" => TestOutcome::Failed,
        "skipped" => TestOutcome::Skipped,
        _ => TestOutcome::Error,
    }
}

fn failure_message(call: Option<&CallInfo>) -> Option<String> {
    let call = call?;
    if let Some(crash) = &call.crash {
        if !crash.message.is_empty() {
            return Some(crash.message.clone());
        }
    }
    let text = match call.longrepr.as_ref()? {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    (!text.is_empty()).then(|| text.chars().take(MAX_LONGREPR_CHARS).collect())
}

fn weight_of(metadata: Option<&Value>) -> f64 {
    metadata
        .and_then(|m| m.get("weight"))
        .and_then(|w| match w {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        })
        .unwrap_or(1.0)
}

/// Parse a pytest JSON report.
///
/// Counts come from the report summary; weights from each test's
/// `metadata.weight` (default 1.0). The case name is the part of the node id
/// after the last `::`.
pub fn parse_report(json: &str) -> anyhow::Result<TestResult> {
    let report: Report = serde_json::from_str(json).context("parse pytest JSON report")?;

    let mut total_weight = 0.0;
    let mut earned_weight = 0.0;
    let details = report
        .tests
        .iter()
        .map(|test| {
            let outcome = outcome_of(&test.outcome);
            let weight = weight_of(test.metadata.as_ref());
            total_weight += weight;
            if outcome == TestOutcome::Passed {
                earned_weight += weight;
            }
            let name = test
                .nodeid
                .rsplit("::")
                .next()
                .unwrap_or(&test.nodeid)
                .to_string();
            let message = if outcome == TestOutcome::Failed {
                failure_message(test.call.as_ref())
            } else {
                None
            };
            TestCaseResult {
                name,
                outcome,
                weight,
                duration: test
                    .duration
                    .or_else(|| test.call.as_ref().and_then(|c| c.duration))
                    .unwrap_or(0.0),
                message,
            }
        })
        .collect();

    Ok(TestResult {
        passed: report.summary.passed,
        failed: report.summary.failed,
        skipped: report.summary.skipped,
        errors: report.summary.error,
        total_weight,
        earned_weight,
        details,
    })
}

pub fn read_report(path: &Path) -> anyhow::Result<TestResult> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("read {:?}", path))?;
    parse_report(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r#"{
        "summary": {"passed": 2, "failed": 1, "skipped": 1, "total": 4},
        "tests": [
            {"nodeid": "tests/baseline/test_bindings.py::test_http_port_listen[web1]",
             "outcome": "passed", "metadata": {"weight": 2.0},
             "call": {"duration": 0.25}},
            {"nodeid": "tests/baseline/test_services.py::test_nginx_running",
             "outcome": "passed"},
            {"nodeid": "tests/baseline/test_fw.py::test_port_open",
             "outcome": "failed", "metadata": {"weight": 1.5},
             "call": {"crash": {"message": "AssertionError: port 8080 closed"}}},
            {"nodeid": "test_skip", "outcome": "skipped"}
        ]
    }"#;

    #[test]
    fn test_parse_report_counts_and_weights() {
        let result = parse_report(REPORT).expect("parse report");
        assert_eq!(result.passed, 2);
        assert_eq!(result.failed, 1);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.errors, 0);
        assert_eq!(result.total_weight, 5.5);
        assert_eq!(result.earned_weight, 3.0);

        assert_eq!(result.details[0].name, "test_http_port_listen[web1]");
        assert_eq!(result.details[0].duration, 0.25);
        assert_eq!(result.details[1].weight, 1.0);
        assert_eq!(
            result.details[2].message.as_deref(),
            Some("AssertionError: port 8080 closed")
        );
        assert_eq!(result.details[3].name, "test_skip");
        assert_eq!(result.details[3].outcome, TestOutcome::Skipped);
    }

    #[test]
    fn test_longrepr_fallback_is_truncated() {
        let long = "x".repeat(500);
        let json = format!(
            r#"{{"summary": {{"failed": 1}}, "tests": [{{"nodeid": "a::b", "outcome": "failed", "call": {{"longrepr": "{}"}}}}]}}"#,
            long
        );
        let result = parse_report(&json).expect("parse report");
        assert_eq!(result.details[0].message.as_ref().map(|m| m.len()), Some(200));
    }

    #[test]
    fn test_empty_report_is_zero() {
        let result = parse_report("{}").expect("parse empty report");
        assert_eq!(result, TestResult::default());
    }

    #[test]
    fn test_invalid_json_is_error() {
        assert!(parse_report("not json").is_err());
    }

    #[test]
    fn test_command_line_shape() {
        let request = TestRequest {
            phase: ExecutionPhase::Mutation,
            tests_dir: PathBuf::from("/ws/tests/mutation"),
            cwd: PathBuf::from("/ws"),
            report_path: PathBuf::from("/out/results/mutation/pytest_report.json"),
            timeout: Duration::from_secs(600),
        };
        let spec = PytestHarness::new("python3").command(&request);
        assert_eq!(spec.program, "python3");
        assert_eq!(
            spec.args,
            vec![
                "-m",
                "pytest",
                "/ws/tests/mutation",
                "-m",
                "mutation",
                "--json-report",
                "--json-report-file=/out/results/mutation/pytest_report.json",
                "-q",
                "--tb=short",
            ]
        );
    }

    fn request(dir: &Path) -> TestRequest {
        TestRequest {
            phase: ExecutionPhase::Baseline,
            tests_dir: dir.join("tests/baseline"),
            cwd: dir.to_path_buf(),
            report_path: dir.join("report.json"),
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_missing_tests_dir_is_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let run = PytestHarness::new("python3")
            .run_tests(&request(dir.path()))
            .await
            .expect("run tests");
        assert_eq!(run.result.errors, 1);
        assert_eq!(run.result.passed + run.result.failed, 0);
        let message = run.result.details[0].message.as_deref().unwrap_or_default();
        assert!(message.contains("No test modules"), "{}", message);
        assert!(message.contains("phase baseline"), "{}", message);
    }

    #[tokio::test]
    async fn test_tests_dir_without_modules_is_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tests = dir.path().join("tests/baseline");
        std::fs::create_dir_all(&tests).expect("mkdir");
        std::fs::write(tests.join("conftest.py"), "").expect("write");
        std::fs::write(tests.join("cases.json"), "{}").expect("write");

        let run = PytestHarness::new("python3")
            .run_tests(&request(dir.path()))
            .await
            .expect("run tests");
        assert_eq!(run.result.errors, 1);
        assert_eq!(run.result.details[0].outcome, TestOutcome::Error);
    }

    #[test]
    fn test_test_modules_detected() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(!has_test_modules(dir.path()));
        std::fs::write(dir.path().join("test_contracts.py"), "").expect("write");
        assert!(has_test_modules(dir.path()));
    }
}
