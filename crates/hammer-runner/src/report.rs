//! Grading report output: `report.json` and a plain-text `summary.txt`.

use anyhow::Context;
use hammer_core::GradeReport;
use std::path::{Path, PathBuf};

pub const REPORT_FILE: &str = "report.json";
pub const SUMMARY_FILE: &str = "summary.txt";

fn pass_fail(ok: bool) -> &'static str {
    if ok {
        "PASS"
    } else {
        "FAIL"
    }
}

/// Human-readable summary of a report.
pub fn render_summary(report: &GradeReport) -> String {
    let mut lines = vec![
        "HAMMER Grading Report".to_string(),
        "=====================".to_string(),
        format!("Assignment: {}", report.assignment_id),
        format!("Timestamp: {}", report.timestamp.to_rfc3339()),
        String::new(),
        "Results by Phase:".to_string(),
        "-----------------".to_string(),
    ];

    for (phase, result) in &report.phases {
        lines.push(format!("\n{}:", phase.as_str().to_uppercase()));
        lines.push(format!("  Converge: {}", pass_fail(result.converge.success)));
        lines.push(format!(
            "    ok={}, changed={}, failed={}",
            result.converge.ok, result.converge.changed, result.converge.failed
        ));
        if let Some(verdict) = &result.idempotence {
            lines.push(format!("  Idempotence: {}", verdict.message));
        }
        lines.push(format!(
            "  Tests: {} passed, {} failed",
            result.tests.passed, result.tests.failed
        ));
        lines.push(format!(
            "  Score: {:.1} / {:.1}",
            result.score, result.max_score
        ));
    }

    lines.push(String::new());
    if let Some(error) = &report.error_message {
        lines.push(format!("Error: {}", error));
    }
    lines.push(format!(
        "Total Score: {:.1} / {:.1} ({:.1}%)",
        report.total_score, report.max_score, report.percentage
    ));
    lines.push(format!("Overall: {}", pass_fail(report.success)));
    lines.join("\n")
}

/// Write `report.json` and `summary.txt` into `results_dir`.
pub fn write_report(report: &GradeReport, results_dir: &Path) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(results_dir)
        .with_context(|| format!("create {:?}", results_dir))?;

    let report_path = results_dir.join(REPORT_FILE);
    let json = serde_json::to_string_pretty(report).context("serialize grade report")?;
    std::fs::write(&report_path, json).with_context(|| format!("write {:?}", report_path))?;

    let summary_path = results_dir.join(SUMMARY_FILE);
    std::fs::write(&summary_path, render_summary(report))
        .with_context(|| format!("write {:?}", summary_path))?;

    Ok(report_path)
}
