//! HAMMER Core Library
//!
//! Assignment specifications, semantic validation, per-phase variable
//! resolution, contract expansion into verification checks, execution
//! plans, and grading results.

pub mod contracts;
pub mod digest;
pub mod error;
pub mod lock;
pub mod network;
pub mod phase;
pub mod plan;
pub mod results;
pub mod scoring;
pub mod selector;
pub mod spec;
pub mod telemetry;
pub mod validate;
pub mod variables;

pub use error::{HammerError, Result};

pub use phase::{ExecutionPhase, OverlayPhase, PerPhase};

pub use spec::{load_spec, AssignmentSpec, SUPPORTED_SPEC_VERSION};

pub use validate::{validate, validate_spec, SpecIssue};

pub use variables::{
    resolve_phase, resolve_phase_by_name, resolve_variable, PhaseVariablePlan, ResolvedVariable,
    VariableSource,
};

pub use contracts::{expand, PhaseContractPlan};

pub use plan::{build_execution_plan, ExecutionPlan, ExecutionStep, StepKind};

pub use network::NetworkPlan;
pub use lock::{ChecksumLedger, LockArtifact, PinnedVersions};

pub use results::{
    ConvergeResult, GradeReport, HostRecap, PhaseResult, TestCaseResult, TestOutcome, TestResult,
};
pub use scoring::{check_idempotence, IdempotenceVerdict};

pub use telemetry::{init_tracing, LogFormat};
