//! Converge failure policies.

use hammer_core::spec::FailurePolicy;
use hammer_core::ConvergeResult;
use regex::{Regex, RegexBuilder};
use std::sync::LazyLock;

/// Case-insensitive, from the marker to the end of the line.
static FAILURE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(fatal:.*|failed!.*)").expect("failure line pattern"));

/// Lines of a converge log that report a task failure.
pub fn failure_lines(log: &str) -> Vec<&str> {
    FAILURE_LINE.find_iter(log).map(|m| m.as_str()).collect()
}

/// Whether the failures in `result` are covered by `policy`.
///
/// Requires `allow_failures`, at most `max_failures` failed tasks when a
/// bound is set, and, when patterns are given, every failure line in `log`
/// matching at least one of them. The bound counts the larger of the failed
/// counter and the number of failure lines, so a run without stats is still
/// held to it.
pub fn failures_allowed(
    result: &ConvergeResult,
    log: &str,
    policy: &FailurePolicy,
) -> anyhow::Result<bool> {
    if !policy.allow_failures {
        return Ok(false);
    }

    if let Some(max) = policy.max_failures {
        let failed = result.failed.max(failure_lines(log).len() as u32);
        if failed > max {
            tracing::debug!(failed, max, "failures exceed policy bound");
            return Ok(false);
        }
    }

    let patterns = match &policy.expected_patterns {
        Some(patterns) if !patterns.is_empty() => patterns
            .iter()
            .map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| anyhow::anyhow!("invalid failure pattern '{}': {}", p, e))
            })
            .collect::<anyhow::Result<Vec<_>>>()?,
        _ => return Ok(true),
    };

    for line in failure_lines(log) {
        if !patterns.iter().any(|re| re.is_match(line)) {
            tracing::debug!(line, "unexpected converge failure");
            return Ok(false);
        }
    }
    Ok(true)
}

/// Recode a failed converge as successful when the policy covers it.
///
/// Counts are preserved and `failures_allowed_by_policy` is set.
pub fn apply_failure_policy(
    result: ConvergeResult,
    log: &str,
    policy: Option<&FailurePolicy>,
) -> anyhow::Result<ConvergeResult> {
    let Some(policy) = policy else {
        return Ok(result);
    };
    if result.success || !failures_allowed(&result, log, policy)? {
        return Ok(result);
    }
    Ok(ConvergeResult {
        success: true,
        error_message: None,
        failures_allowed_by_policy: true,
        ..result
    })
}
