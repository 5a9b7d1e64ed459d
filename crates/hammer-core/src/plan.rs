//! Execution plan assembly.

use crate::contracts::{expand, PhaseContractPlan};
use crate::error::Result;
use crate::phase::{ExecutionPhase, PerPhase};
use crate::spec::AssignmentSpec;
use crate::variables::{resolve_phase, PhaseVariablePlan};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Converge,
    Snapshot,
    Verify,
}

impl StepKind {
    pub const ORDER: [StepKind; 3] = [StepKind::Converge, StepKind::Snapshot, StepKind::Verify];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Converge => "converge",
            StepKind::Snapshot => "snapshot",
            StepKind::Verify => "verify",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionStep {
    pub name: String,
    pub phase: ExecutionPhase,
    pub kind: StepKind,
    pub description: String,
}

impl ExecutionStep {
    pub fn new(phase: ExecutionPhase, kind: StepKind) -> Self {
        let description = match kind {
            StepKind::Converge => format!("Run converge for {}", phase),
            StepKind::Snapshot => format!("Export observed variable snapshots for {}", phase),
            StepKind::Verify => format!("Run verification tests for {}", phase),
        };
        Self {
            name: format!("{}_{}", phase, kind.as_str()),
            phase,
            kind,
            description,
        }
    }
}

/// Everything the grading pipeline and the bundle writers need from a spec.
///
/// Built once per invocation and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionPlan {
    pub variables: PerPhase<PhaseVariablePlan>,
    pub contracts: PerPhase<PhaseContractPlan>,
    pub steps: Vec<ExecutionStep>,
}

impl ExecutionPlan {
    pub fn variables_for(&self, phase: ExecutionPhase) -> &PhaseVariablePlan {
        self.variables.get(phase)
    }

    pub fn contracts_for(&self, phase: ExecutionPhase) -> &PhaseContractPlan {
        self.contracts.get(phase)
    }

    pub fn steps_for(&self, phase: ExecutionPhase) -> impl Iterator<Item = &ExecutionStep> {
        self.steps.iter().filter(move |s| s.phase == phase)
    }
}

/// Build the plan for all three phases: baseline, mutation, idempotence.
pub fn build_execution_plan(spec: &AssignmentSpec) -> Result<ExecutionPlan> {
    let variables = PerPhase::build(|phase| resolve_phase(spec, phase));
    let contracts = PerPhase::try_build(|phase| {
        let plan = expand(spec, &spec.topology, variables.get(phase))?;
        debug!(phase = %phase, checks = plan.check_count(), "expanded contracts");
        Ok(plan)
    })?;

    let steps = ExecutionPhase::ALL
        .iter()
        .flat_map(|phase| StepKind::ORDER.iter().map(move |kind| ExecutionStep::new(*phase, *kind)))
        .collect();

    Ok(ExecutionPlan {
        variables,
        contracts,
        steps,
    })
}
