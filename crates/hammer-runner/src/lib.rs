//! HAMMER Runner - bundle building and grading
//!
//! Everything that touches the filesystem or spawns processes:
//! - Renders student and grading bundles plus the lock artifact
//! - Prepares the grading workspace and activates phase overlays
//! - Generates the per-phase verification tests
//! - Drives converge, reboot and verification per phase
//! - Writes the grading report

pub mod bundle;
pub mod config;
pub mod converge;
pub mod harness;
pub mod pipeline;
pub mod policy;
pub mod prerequisites;
pub mod process;
pub mod reboot;
pub mod report;
pub mod testgen;
pub mod workspace;

// Re-export key types
pub use bundle::{build_bundles, BuildOutcome, RenderContext};
pub use config::RunnerConfig;
pub use converge::{ConvergeExecutor, ConvergeOutcome, ConvergeRequest, PlaybookConverge};
pub use harness::{PytestHarness, TestHarness, TestRequest, TestRun};
pub use pipeline::{GradeRequest, GradingPipeline};
pub use policy::apply_failure_policy;
pub use process::{run_command, CommandOutput, CommandSpec};
pub use reboot::{AnsibleNodeController, NodeController, RebootOutcome, RebootSettings};
pub use report::{render_summary, write_report};
pub use testgen::{phase_cases, write_phase_tests};
pub use workspace::GradingWorkspace;
