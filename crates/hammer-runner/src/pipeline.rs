//! Grading pipeline orchestration.
//!
//! Phases run one at a time in canonical order. Each phase walks the plan's
//! steps for that phase (converge, snapshot, verify) against the shared
//! grading workspace, and its artifacts land under `<out>/results/<phase>/`.

use crate::bundle::inventory::INVENTORY_PATH;
use crate::config::RunnerConfig;
use crate::converge::{ConvergeExecutor, ConvergeRequest, PlaybookConverge};
use crate::harness::{PytestHarness, TestHarness, TestRequest};
use crate::policy::apply_failure_policy;
use crate::reboot::{reboot_nodes, AnsibleNodeController, NodeController, RebootSettings};
use crate::report::write_report;
use crate::workspace::{GradingWorkspace, WORKSPACE_DIR};
use anyhow::Context;
use hammer_core::spec::PhaseOverlay;
use hammer_core::{
    build_execution_plan, check_idempotence, AssignmentSpec, ConvergeResult, ExecutionPhase,
    ExecutionPlan, GradeReport, IdempotenceVerdict, PhaseResult, StepKind, TestResult,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

pub const RESULTS_DIR: &str = "results";

/// One grading invocation.
#[derive(Debug, Clone)]
pub struct GradeRequest<'a> {
    pub spec: &'a AssignmentSpec,
    pub student_repo: &'a Path,
    pub grading_bundle: &'a Path,
    pub out_dir: &'a Path,
    /// Phases to run; empty means all of them.
    pub phases: Vec<ExecutionPhase>,
}

/// Deduplicate and sort into canonical order. Empty selects every phase.
pub fn normalize_phases(phases: &[ExecutionPhase]) -> Vec<ExecutionPhase> {
    if phases.is_empty() {
        return ExecutionPhase::ALL.to_vec();
    }
    let mut phases = phases.to_vec();
    phases.sort();
    phases.dedup();
    phases
}

fn write_text(path: &Path, content: &str) -> anyhow::Result<()> {
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)
        .with_context(|| format!("serialize {:?}", path.file_name()))?;
    write_text(path, &json)
}

/// Converge stage output carried to the end of a phase.
struct ConvergeStage {
    result: ConvergeResult,
    idempotence: Option<IdempotenceVerdict>,
}

pub struct GradingPipeline {
    config: RunnerConfig,
    converge: Arc<dyn ConvergeExecutor>,
    harness: Arc<dyn TestHarness>,
    nodes: Arc<dyn NodeController>,
}

impl GradingPipeline {
    pub fn new(
        config: RunnerConfig,
        converge: Arc<dyn ConvergeExecutor>,
        harness: Arc<dyn TestHarness>,
        nodes: Arc<dyn NodeController>,
    ) -> Self {
        Self {
            config,
            converge,
            harness,
            nodes,
        }
    }

    /// Pipeline backed by ansible-playbook, pytest and ad-hoc ansible, with
    /// the node controller pointed at the workspace inventory under `out_dir`.
    pub fn ansible(config: RunnerConfig, out_dir: &Path) -> Self {
        let inventory = out_dir.join(WORKSPACE_DIR).join(INVENTORY_PATH);
        let converge = Arc::new(PlaybookConverge::new(&config.ansible_playbook_bin));
        let harness = Arc::new(PytestHarness::new(&config.python_bin));
        let nodes = Arc::new(AnsibleNodeController::new(&config.ansible_bin, inventory));
        Self::new(config, converge, harness, nodes)
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Grade a submission.
    ///
    /// The report is always written. A failure partway through is recorded
    /// in the report rather than returned; only a failure to write the
    /// report itself is an `Err`.
    pub async fn run(&self, request: &GradeRequest<'_>) -> anyhow::Result<GradeReport> {
        let start = Instant::now();
        let results_dir = request.out_dir.join(RESULTS_DIR);
        let mut report = GradeReport::new(
            request.spec.assignment_id.clone(),
            request.spec.spec_version.clone(),
        );

        info!(
            event = "grade.started",
            assignment_id = %request.spec.assignment_id,
            student_repo = %request.student_repo.display(),
            "starting grading run"
        );

        if let Err(e) = self.run_phases(request, &mut report).await {
            error!(event = "grade.aborted", error = %format!("{:#}", e), "grading aborted");
            report.abort(format!("{:#}", e));
        }

        write_report(&report, &results_dir)?;

        info!(
            event = "grade.finished",
            assignment_id = %report.assignment_id,
            success = report.success,
            score = report.total_score,
            max_score = report.max_score,
            duration_ms = start.elapsed().as_millis() as u64,
            "grading finished"
        );
        Ok(report)
    }

    async fn run_phases(
        &self,
        request: &GradeRequest<'_>,
        report: &mut GradeReport,
    ) -> anyhow::Result<()> {
        let spec = request.spec;
        let plan = build_execution_plan(spec).context("build execution plan")?;
        let workspace =
            GradingWorkspace::prepare(request.student_repo, request.grading_bundle, request.out_dir)?;

        for phase in normalize_phases(&request.phases) {
            let phase_dir = phase_results_dir(request.out_dir, phase);
            std::fs::create_dir_all(&phase_dir)
                .with_context(|| format!("create {:?}", phase_dir))?;

            info!(event = "phase.started", phase = %phase, "running phase");
            let result = self
                .run_phase(spec, &plan, &workspace, phase, &phase_dir)
                .await
                .with_context(|| format!("phase {}", phase))?;
            info!(
                event = "phase.finished",
                phase = %phase,
                converged = result.converge.success,
                passed = result.tests.passed,
                failed = result.tests.failed,
                score = result.score,
                "phase complete"
            );
            report.record_phase(result);
        }
        Ok(())
    }

    async fn run_phase(
        &self,
        spec: &AssignmentSpec,
        plan: &ExecutionPlan,
        workspace: &GradingWorkspace,
        phase: ExecutionPhase,
        phase_dir: &Path,
    ) -> anyhow::Result<PhaseResult> {
        let overlay = spec.phase_overlays.get(phase.overlay_phase());
        let mut converge: Option<ConvergeStage> = None;
        let mut tests: Option<TestResult> = None;

        for step in plan.steps_for(phase) {
            info!(stage = %step.name, "executing step");
            match step.kind {
                StepKind::Converge => {
                    converge = Some(
                        self.converge_phase(spec, workspace, phase, overlay, phase_dir)
                            .await?,
                    );
                }
                StepKind::Snapshot => {
                    workspace.record_snapshot(plan.variables_for(phase))?;
                }
                StepKind::Verify => {
                    tests = Some(self.verify_phase(workspace, phase, phase_dir).await?);
                }
            }
        }

        let stage = converge.context("plan has no converge step")?;
        let mut result = PhaseResult::new(phase, stage.result, tests.unwrap_or_default());
        result.idempotence = stage.idempotence;
        Ok(result)
    }

    async fn converge_phase(
        &self,
        spec: &AssignmentSpec,
        workspace: &GradingWorkspace,
        phase: ExecutionPhase,
        overlay: Option<&PhaseOverlay>,
        phase_dir: &Path,
    ) -> anyhow::Result<ConvergeStage> {
        let extra_vars = workspace.activate(phase.overlay_phase())?;
        let request = ConvergeRequest {
            workspace: workspace.root().to_path_buf(),
            playbook: workspace.root().join(&spec.entrypoints.playbook_path),
            inventory: workspace.inventory(),
            extra_vars_file: Some(extra_vars),
            vault_password_file: workspace.vault_password_file(),
            handlers: spec
                .handler_contracts
                .iter()
                .map(|h| h.handler_name.clone())
                .collect(),
            timeout: self.config.converge_timeout,
        };

        let outcome = self.converge.converge(&request).await?;
        write_text(&phase_dir.join("converge.log"), &outcome.log)?;
        workspace.record_converge_log(phase, &outcome.log)?;
        workspace.record_handler_runs(phase, &outcome.result)?;

        let result = apply_failure_policy(
            outcome.result,
            &outcome.log,
            overlay.and_then(|o| o.failure_policy.as_ref()),
        )?;
        if result.failures_allowed_by_policy {
            info!(phase = %phase, failed = result.failed, "converge failures allowed by policy");
        }
        write_json(&phase_dir.join("converge_result.json"), &result)?;

        if !result.success {
            warn!(
                phase = %phase,
                error = ?result.error_message,
                "converge failed"
            );
        }

        if let Some(reboot) = overlay.and_then(|o| o.reboot.as_ref()).filter(|r| r.enabled) {
            let nodes = reboot
                .nodes
                .clone()
                .unwrap_or_else(|| spec.topology.node_names());
            let settings = RebootSettings::from_secs(reboot.timeout, reboot.poll_interval);
            let outcomes = reboot_nodes(self.nodes.as_ref(), &nodes, settings).await;
            write_json(&phase_dir.join("reboot.json"), &outcomes)?;

            let failures: Vec<String> = outcomes
                .iter()
                .filter(|o| !o.success)
                .map(|o| {
                    format!(
                        "Node: {}\nError: {}\n",
                        o.node,
                        o.error.as_deref().unwrap_or("unknown error")
                    )
                })
                .collect();
            if !failures.is_empty() {
                write_text(&phase_dir.join("reboot_failure.txt"), &failures.join("\n"))?;
            }
        }

        let idempotence = (phase == ExecutionPhase::Idempotence).then(|| {
            let verdict = check_idempotence(&result);
            info!(
                phase = %phase,
                idempotent = verdict.idempotent,
                message = %verdict.message,
                "idempotence check"
            );
            verdict
        });

        Ok(ConvergeStage {
            result,
            idempotence,
        })
    }

    async fn verify_phase(
        &self,
        workspace: &GradingWorkspace,
        phase: ExecutionPhase,
        phase_dir: &Path,
    ) -> anyhow::Result<TestResult> {
        let request = TestRequest {
            phase,
            tests_dir: workspace.tests_dir(phase),
            cwd: phase_dir.to_path_buf(),
            report_path: phase_dir.join("pytest_report.json"),
            timeout: self.config.test_timeout,
        };

        let run = self.harness.run_tests(&request).await?;
        write_text(&phase_dir.join("test.log"), &run.log)?;
        write_json(&phase_dir.join("test_result.json"), &run.result)?;
        Ok(run.result)
    }
}

/// `<out>/results/<phase>`.
pub fn phase_results_dir(out_dir: &Path, phase: ExecutionPhase) -> PathBuf {
    out_dir.join(RESULTS_DIR).join(phase.as_str())
}
