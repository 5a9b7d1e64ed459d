//! Converge, test and report records exchanged with the grading pipeline.

use crate::phase::ExecutionPhase;
use crate::scoring::{overall_success, total_score, IdempotenceVerdict};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Task counters for one host.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostRecap {
    pub ok: u32,
    pub changed: u32,
    pub unreachable: u32,
    pub failed: u32,
    pub skipped: u32,
    pub rescued: u32,
    pub ignored: u32,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Outcome of one converge run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConvergeResult {
    pub ok: u32,
    pub changed: u32,
    pub failed: u32,
    pub unreachable: u32,
    pub skipped: u32,
    pub rescued: u32,
    pub ignored: u32,
    /// Per-host breakdown.
    #[serde(default)]
    pub play_recap: BTreeMap<String, HostRecap>,
    /// Handler name to number of runs.
    #[serde(default)]
    pub handlers_run: BTreeMap<String, u32>,
    pub success: bool,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Set when a failure policy turned a failed converge into a success.
    /// Counts are left untouched.
    #[serde(default, skip_serializing_if = "is_false")]
    pub failures_allowed_by_policy: bool,
}

impl ConvergeResult {
    /// A failed converge with no task counts, e.g. a spawn error or timeout.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            ..Default::default()
        }
    }

    /// Sum per-host recaps into the aggregate counters.
    pub fn from_recap(play_recap: BTreeMap<String, HostRecap>, success: bool) -> Self {
        let mut result = Self {
            success,
            ..Default::default()
        };
        for host in play_recap.values() {
            result.ok += host.ok;
            result.changed += host.changed;
            result.failed += host.failed;
            result.unreachable += host.unreachable;
            result.skipped += host.skipped;
            result.rescued += host.rescued;
            result.ignored += host.ignored;
        }
        result.play_recap = play_recap;
        result
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TestOutcome {
    Passed,
    Failed,
    Skipped,
    Error,
}

impl TestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestOutcome::Passed => "passed",
            TestOutcome::Failed => "failed",
            TestOutcome::Skipped => "skipped",
            TestOutcome::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestCaseResult {
    pub name: String,
    pub outcome: TestOutcome,
    pub weight: f64,
    /// Seconds.
    pub duration: f64,
    #[serde(default)]
    pub message: Option<String>,
}

/// Outcome of one verification run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TestResult {
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub errors: u32,
    pub total_weight: f64,
    pub earned_weight: f64,
    #[serde(default)]
    pub details: Vec<TestCaseResult>,
}

impl TestResult {
    /// Aggregate counts and weights from individual cases.
    pub fn from_cases(details: Vec<TestCaseResult>) -> Self {
        let mut result = Self::default();
        for case in &details {
            result.total_weight += case.weight;
            match case.outcome {
                TestOutcome::Passed => {
                    result.passed += 1;
                    result.earned_weight += case.weight;
                }
                TestOutcome::Failed => result.failed += 1,
                TestOutcome::Skipped => result.skipped += 1,
                TestOutcome::Error => result.errors += 1,
            }
        }
        result.details = details;
        result
    }

    /// A run that produced no usable report.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            errors: 1,
            details: vec![TestCaseResult {
                name: "test_run".to_string(),
                outcome: TestOutcome::Error,
                weight: 0.0,
                duration: 0.0,
                message: Some(message.into()),
            }],
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseResult {
    pub phase: ExecutionPhase,
    pub converge: ConvergeResult,
    pub tests: TestResult,
    pub score: f64,
    pub max_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotence: Option<IdempotenceVerdict>,
}

impl PhaseResult {
    pub fn new(phase: ExecutionPhase, converge: ConvergeResult, tests: TestResult) -> Self {
        let (score, max_score) = crate::scoring::phase_score(&tests);
        Self {
            phase,
            converge,
            tests,
            score,
            max_score,
            idempotence: None,
        }
    }

    /// Converge succeeded and no test failed or errored.
    pub fn passed(&self) -> bool {
        self.converge.success && self.tests.failed == 0 && self.tests.errors == 0
    }
}

/// Final grading report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GradeReport {
    pub assignment_id: String,
    pub spec_version: String,
    pub timestamp: DateTime<Utc>,
    pub phases: BTreeMap<ExecutionPhase, PhaseResult>,
    pub total_score: f64,
    pub max_score: f64,
    pub percentage: f64,
    pub success: bool,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl GradeReport {
    pub fn new(assignment_id: impl Into<String>, spec_version: impl Into<String>) -> Self {
        Self {
            assignment_id: assignment_id.into(),
            spec_version: spec_version.into(),
            timestamp: Utc::now(),
            phases: BTreeMap::new(),
            total_score: 0.0,
            max_score: 0.0,
            percentage: 0.0,
            success: false,
            error_message: None,
        }
    }

    /// Record a phase and recompute totals.
    pub fn record_phase(&mut self, result: PhaseResult) {
        self.phases.insert(result.phase, result);
        self.recompute();
    }

    /// Mark the report as aborted; totals keep whatever phases completed.
    pub fn abort(&mut self, message: impl Into<String>) {
        self.error_message = Some(message.into());
        self.recompute();
    }

    fn recompute(&mut self) {
        let (earned, max, pct) = total_score(self.phases.values());
        self.total_score = earned;
        self.max_score = max;
        self.percentage = pct;
        self.success = self.error_message.is_none()
            && !self.phases.is_empty()
            && overall_success(self.phases.values());
    }
}
