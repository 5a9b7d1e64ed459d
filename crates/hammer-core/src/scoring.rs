//! Weighted scoring and pass/fail semantics.

use crate::results::{ConvergeResult, PhaseResult, TestResult};
use serde::{Deserialize, Serialize};

/// `(earned, max)` for one phase. A phase with no declared weight scores `(0, 0)`.
pub fn phase_score(tests: &TestResult) -> (f64, f64) {
    if tests.total_weight == 0.0 {
        return (0.0, 0.0);
    }
    (tests.earned_weight, tests.total_weight)
}

/// `(earned, max, percentage)` across the phases that ran.
pub fn total_score<'a>(phases: impl IntoIterator<Item = &'a PhaseResult>) -> (f64, f64, f64) {
    let (earned, max) = phases
        .into_iter()
        .map(|p| phase_score(&p.tests))
        .fold((0.0, 0.0), |(e, m), (pe, pm)| (e + pe, m + pm));
    let percentage = if max > 0.0 { 100.0 * earned / max } else { 0.0 };
    (earned, max, percentage)
}

/// Every phase converged and had no failed or errored tests.
pub fn overall_success<'a>(phases: impl IntoIterator<Item = &'a PhaseResult>) -> bool {
    phases.into_iter().all(PhaseResult::passed)
}

/// Idempotence check outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdempotenceVerdict {
    pub idempotent: bool,
    pub message: String,
}

/// Idempotent iff the converge succeeded with no failed, unreachable or changed tasks.
pub fn check_idempotence(converge: &ConvergeResult) -> IdempotenceVerdict {
    let violation = if !converge.success {
        Some(format!(
            "Playbook failed: {}",
            converge.error_message.as_deref().unwrap_or("unknown error")
        ))
    } else if converge.failed > 0 {
        Some(format!("Playbook had {} failed tasks", converge.failed))
    } else if converge.unreachable > 0 {
        Some(format!("Playbook had {} unreachable hosts", converge.unreachable))
    } else if converge.changed > 0 {
        Some(format!(
            "Playbook had {} changed tasks (expected 0 for idempotence)",
            converge.changed
        ))
    } else {
        None
    };

    match violation {
        Some(message) => IdempotenceVerdict {
            idempotent: false,
            message,
        },
        None => IdempotenceVerdict {
            idempotent: true,
            message: "Playbook is idempotent".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::ExecutionPhase;

    fn tests_with(total: f64, earned: f64, failed: u32, errors: u32) -> TestResult {
        TestResult {
            failed,
            errors,
            total_weight: total,
            earned_weight: earned,
            ..Default::default()
        }
    }

    fn phase(phase: ExecutionPhase, converge_ok: bool, tests: TestResult) -> PhaseResult {
        PhaseResult::new(
            phase,
            ConvergeResult {
                success: converge_ok,
                ..Default::default()
            },
            tests,
        )
    }

    #[test]
    fn test_zero_weight_phase_scores_nothing() {
        assert_eq!(phase_score(&tests_with(0.0, 5.0, 0, 0)), (0.0, 0.0));
    }

    #[test]
    fn test_single_phase_percentage() {
        let p = phase(ExecutionPhase::Baseline, true, tests_with(10.0, 7.5, 1, 0));
        let (earned, max, pct) = total_score([&p]);
        assert_eq!((earned, max), (7.5, 10.0));
        assert_eq!(pct, 75.0);
    }

    #[test]
    fn test_total_score_with_no_weight_is_zero_percent() {
        let p = phase(ExecutionPhase::Baseline, true, tests_with(0.0, 0.0, 0, 0));
        assert_eq!(total_score([&p]), (0.0, 0.0, 0.0));
    }

    #[test]
    fn test_one_failing_phase_fails_report() {
        let good = phase(ExecutionPhase::Baseline, true, tests_with(4.0, 4.0, 0, 0));
        let bad_converge = phase(ExecutionPhase::Mutation, false, tests_with(4.0, 4.0, 0, 0));
        let errored = phase(ExecutionPhase::Idempotence, true, tests_with(4.0, 4.0, 0, 1));

        assert!(overall_success([&good]));
        assert!(!overall_success([&good, &bad_converge]));
        assert!(!overall_success([&good, &errored]));
    }

    #[test]
    fn test_idempotent_converge() {
        let verdict = check_idempotence(&ConvergeResult {
            ok: 12,
            success: true,
            ..Default::default()
        });
        assert!(verdict.idempotent);
        assert_eq!(verdict.message, "Playbook is idempotent");
    }

    #[test]
    fn test_each_violation_is_named() {
        let base = ConvergeResult {
            success: true,
            ..Default::default()
        };

        let changed = check_idempotence(&ConvergeResult {
            changed: 2,
            ..base.clone()
        });
        assert!(!changed.idempotent);
        assert!(changed.message.contains("2 changed tasks"));

        let failed = check_idempotence(&ConvergeResult {
            failed: 1,
            ..base.clone()
        });
        assert!(failed.message.contains("1 failed tasks"));

        let unreachable = check_idempotence(&ConvergeResult {
            unreachable: 3,
            ..base.clone()
        });
        assert!(unreachable.message.contains("3 unreachable hosts"));

        let crashed = check_idempotence(&ConvergeResult::failure("timed out"));
        assert!(!crashed.idempotent);
        assert_eq!(crashed.message, "Playbook failed: timed out");
    }
}
