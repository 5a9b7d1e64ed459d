//! Grading pipeline with scripted collaborators in place of ansible,
//! pytest and real VMs.

mod common;

use async_trait::async_trait;
use common::{planned, read_json, read_yaml, webapp, write};
use hammer_core::lock::DEFAULT_BOX;
use hammer_core::{
    ConvergeResult, ExecutionPhase, TestCaseResult, TestOutcome, TestResult,
};
use hammer_runner::{
    build_bundles, ConvergeExecutor, ConvergeOutcome, ConvergeRequest, GradeRequest,
    GradingPipeline, NodeController, RenderContext, RunnerConfig, TestHarness, TestRequest,
    TestRun,
};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ---------------------------------------------------------------------------
// Scripted collaborators
// ---------------------------------------------------------------------------

/// What the converge saw when it ran.
#[derive(Debug, Clone)]
struct ConvergeCall {
    extra_vars_file: Option<PathBuf>,
    web_http_port: Option<u64>,
    handlers: Vec<String>,
}

#[derive(Default)]
struct ScriptedConverge {
    responses: Mutex<VecDeque<ConvergeOutcome>>,
    calls: Mutex<Vec<ConvergeCall>>,
}

impl ScriptedConverge {
    fn new(responses: Vec<ConvergeOutcome>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<ConvergeCall> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl ConvergeExecutor for ScriptedConverge {
    async fn converge(&self, request: &ConvergeRequest) -> anyhow::Result<ConvergeOutcome> {
        let web = request.workspace.join("group_vars/web.yml");
        let web_http_port = web
            .exists()
            .then(|| read_yaml(&web)["http_port"].as_u64())
            .flatten();
        self.calls.lock().expect("calls lock").push(ConvergeCall {
            extra_vars_file: request.extra_vars_file.clone(),
            web_http_port,
            handlers: request.handlers.clone(),
        });
        let next = self.responses.lock().expect("responses lock").pop_front();
        Ok(next.unwrap_or_else(|| converged(0, "")))
    }
}

struct ScriptedHarness {
    phases: Mutex<Vec<ExecutionPhase>>,
}

impl ScriptedHarness {
    fn new() -> Self {
        Self {
            phases: Mutex::new(Vec::new()),
        }
    }
}

fn case(name: &str, outcome: TestOutcome, weight: f64) -> TestCaseResult {
    TestCaseResult {
        name: name.to_string(),
        outcome,
        weight,
        duration: 0.2,
        message: None,
    }
}

#[async_trait]
impl TestHarness for ScriptedHarness {
    async fn run_tests(&self, request: &TestRequest) -> anyhow::Result<TestRun> {
        self.phases.lock().expect("phases lock").push(request.phase);
        Ok(TestRun {
            result: TestResult::from_cases(vec![
                case("test_http_port_binding", TestOutcome::Passed, 2.0),
                case("test_nginx_running", TestOutcome::Passed, 1.0),
            ]),
            log: format!("2 passed ({})", request.phase),
        })
    }
}

/// Every reboot goes down on the first check and is back on the next.
#[derive(Default)]
struct FlappingNodes {
    checks: AtomicUsize,
    reboots: Mutex<Vec<String>>,
}

#[async_trait]
impl NodeController for FlappingNodes {
    async fn issue_reboot(&self, node: &str) -> anyhow::Result<()> {
        self.reboots.lock().expect("reboots lock").push(node.to_string());
        Ok(())
    }

    async fn is_reachable(&self, _node: &str) -> bool {
        self.checks.fetch_add(1, Ordering::SeqCst) % 2 == 1
    }
}

fn converged(changed: u32, log: &str) -> ConvergeOutcome {
    let mut result = ConvergeResult {
        ok: 10,
        changed,
        success: true,
        ..Default::default()
    };
    if changed > 0 {
        result.handlers_run.insert("restart nginx".to_string(), 1);
    }
    ConvergeOutcome {
        result,
        log: log.to_string(),
    }
}

fn failed_converge(log: &str) -> ConvergeOutcome {
    let mut result = ConvergeResult::failure("Playbook execution failed (exit code 2)");
    result.failed = 1;
    ConvergeOutcome {
        result,
        log: log.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

struct Lab {
    _dir: tempfile::TempDir,
    spec: hammer_core::AssignmentSpec,
    student: PathBuf,
    grading_bundle: PathBuf,
    out: PathBuf,
}

fn lab() -> Lab {
    let dir = tempfile::tempdir().expect("tempdir");
    let p = planned(webapp());
    let build_dir = dir.path().join("build");
    let outcome = build_bundles(&RenderContext {
        spec: &p.spec,
        spec_dir: None,
        plan: &p.plan,
        network: &p.network,
        box_version: DEFAULT_BOX,
        out_dir: &build_dir,
    })
    .expect("build bundles");

    let student = dir.path().join("student");
    write(&student.join("site.yml"), "- hosts: all\n  roles: [nginx]\n");
    write(&student.join("roles/nginx/tasks/main.yml"), "- name: install\n");

    Lab {
        spec: p.spec,
        student,
        grading_bundle: outcome.grading_bundle,
        out: dir.path().join("grade"),
        _dir: dir,
    }
}

fn request<'a>(lab: &'a Lab, phases: Vec<ExecutionPhase>) -> GradeRequest<'a> {
    GradeRequest {
        spec: &lab.spec,
        student_repo: &lab.student,
        grading_bundle: &lab.grading_bundle,
        out_dir: &lab.out,
        phases,
    }
}

fn pipeline(
    converge: Arc<ScriptedConverge>,
    harness: Arc<ScriptedHarness>,
    nodes: Arc<FlappingNodes>,
) -> GradingPipeline {
    GradingPipeline::new(RunnerConfig::default(), converge, harness, nodes)
}

const EXPECTED_FAILURE: &str =
    "TASK [nginx : wait]\nfatal: [web1]: FAILED! => {\"msg\": \"Service nginx not yet available\"}\n";

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_full_run_grades_every_phase() {
    let lab = lab();
    let converge = Arc::new(ScriptedConverge::new(vec![
        converged(5, "PLAY RECAP\nDeployment complete\n"),
        failed_converge(EXPECTED_FAILURE),
        converged(0, "PLAY RECAP\n"),
    ]));
    let harness = Arc::new(ScriptedHarness::new());
    let nodes = Arc::new(FlappingNodes::default());

    let report = pipeline(converge.clone(), harness.clone(), nodes.clone())
        .run(&request(&lab, vec![]))
        .await
        .expect("grading run");

    assert!(report.success, "report: {:?}", report.error_message);
    assert_eq!(report.phases.len(), 3);
    assert_eq!(report.total_score, 9.0);
    assert_eq!(report.max_score, 9.0);
    assert_eq!(report.percentage, 100.0);

    let mutation = &report.phases[&ExecutionPhase::Mutation];
    assert!(mutation.converge.success);
    assert!(mutation.converge.failures_allowed_by_policy);
    assert_eq!(mutation.converge.failed, 1);

    let idempotence = &report.phases[&ExecutionPhase::Idempotence];
    let verdict = idempotence.idempotence.as_ref().expect("idempotence verdict");
    assert!(verdict.idempotent);
    assert!(report.phases[&ExecutionPhase::Baseline].idempotence.is_none());

    // each converge saw its own overlay
    let calls = converge.calls();
    let ports: Vec<Option<u64>> = calls.iter().map(|c| c.web_http_port).collect();
    assert_eq!(ports, vec![Some(8080), Some(9090), Some(9090)]);
    let mutation_extra = calls[1].extra_vars_file.as_ref().expect("extra vars file");
    assert!(mutation_extra.ends_with("overlays/mutation/extra_vars.json"));
    assert_eq!(read_json(mutation_extra)["app_banner"], "goodbye");
    assert!(calls
        .iter()
        .all(|c| c.handlers == vec!["restart nginx".to_string()]));

    assert_eq!(
        *harness.phases.lock().expect("phases lock"),
        vec![
            ExecutionPhase::Baseline,
            ExecutionPhase::Mutation,
            ExecutionPhase::Idempotence
        ]
    );
    // mutation and idempotence share the mutation overlay, which reboots web1
    assert_eq!(
        *nodes.reboots.lock().expect("reboots lock"),
        vec!["web1".to_string(), "web1".to_string()]
    );
}

#[tokio::test]
async fn test_run_leaves_phase_artifacts() {
    let lab = lab();
    let converge = Arc::new(ScriptedConverge::new(vec![
        converged(5, "Deployment complete\n"),
        failed_converge(EXPECTED_FAILURE),
    ]));
    let report = pipeline(
        converge,
        Arc::new(ScriptedHarness::new()),
        Arc::new(FlappingNodes::default()),
    )
    .run(&request(&lab, vec![]))
    .await
    .expect("grading run");
    assert!(report.success);

    let results = lab.out.join("results");
    assert!(results.join("report.json").exists());
    let summary = std::fs::read_to_string(results.join("summary.txt")).expect("summary");
    assert!(summary.contains("\nMUTATION:\n  Converge: PASS"));
    assert!(summary.contains("Overall: PASS"));

    for phase in ["baseline", "mutation", "idempotence"] {
        for file in ["converge.log", "converge_result.json", "test.log", "test_result.json"] {
            assert!(
                results.join(phase).join(file).exists(),
                "missing {}/{}",
                phase,
                file
            );
        }
    }
    let baseline_log =
        std::fs::read_to_string(results.join("baseline/converge.log")).expect("converge log");
    assert_eq!(baseline_log, "Deployment complete\n");

    let reboots = read_json(&results.join("mutation/reboot.json"));
    assert_eq!(reboots[0]["node"], "web1");
    assert_eq!(reboots[0]["success"], true);
    assert!(!results.join("mutation/reboot_failure.txt").exists());

    let workspace = lab.out.join("grading_workspace");
    let handlers = read_json(&workspace.join(".handler_runs/baseline.json"));
    assert_eq!(handlers["restart nginx"], 1);
    let output = std::fs::read_to_string(workspace.join(".converge_logs/baseline.log"))
        .expect("workspace converge log");
    assert_eq!(output, "Deployment complete\n");
    let snapshot = read_json(&workspace.join(".snapshots/mutation.json"));
    assert_eq!(snapshot["http_port"]["value"], 9090);
    assert_eq!(snapshot["http_port"]["source"], "group_vars");
}

#[tokio::test]
async fn test_selected_phases_run_in_canonical_order() {
    let lab = lab();
    let converge = Arc::new(ScriptedConverge::default());
    let harness = Arc::new(ScriptedHarness::new());

    let report = pipeline(converge.clone(), harness.clone(), Arc::new(FlappingNodes::default()))
        .run(&request(
            &lab,
            vec![ExecutionPhase::Idempotence, ExecutionPhase::Baseline],
        ))
        .await
        .expect("grading run");

    let phases: Vec<ExecutionPhase> = report.phases.keys().copied().collect();
    assert_eq!(phases, vec![ExecutionPhase::Baseline, ExecutionPhase::Idempotence]);
    assert_eq!(converge.calls().len(), 2);
    assert_eq!(
        *harness.phases.lock().expect("phases lock"),
        vec![ExecutionPhase::Baseline, ExecutionPhase::Idempotence]
    );
    assert!(!lab.out.join("results/mutation").exists());
}

#[tokio::test]
async fn test_unexpected_converge_failure_fails_run() {
    let lab = lab();
    let converge = Arc::new(ScriptedConverge::new(vec![
        converged(5, ""),
        failed_converge("fatal: [web1]: FAILED! => {\"msg\": \"No package nginx available\"}\n"),
    ]));

    let report = pipeline(
        converge,
        Arc::new(ScriptedHarness::new()),
        Arc::new(FlappingNodes::default()),
    )
    .run(&request(&lab, vec![ExecutionPhase::Baseline, ExecutionPhase::Mutation]))
    .await
    .expect("grading run");

    let mutation = &report.phases[&ExecutionPhase::Mutation];
    assert!(!mutation.converge.success);
    assert!(!mutation.converge.failures_allowed_by_policy);
    assert!(!report.success);
    // tests still score
    assert_eq!(report.total_score, 6.0);
    assert!(report.error_message.is_none());
}

#[tokio::test]
async fn test_missing_bundle_aborts_with_report() {
    let lab = lab();
    let missing = lab.out.join("no_such_bundle");
    let mut req = request(&lab, vec![]);
    req.grading_bundle = Path::new(&missing);

    let report = pipeline(
        Arc::new(ScriptedConverge::default()),
        Arc::new(ScriptedHarness::new()),
        Arc::new(FlappingNodes::default()),
    )
    .run(&req)
    .await
    .expect("report is still written");

    assert!(!report.success);
    assert!(report.phases.is_empty());
    let error = report.error_message.as_deref().expect("error message");
    assert!(error.contains("Grading bundle not found"), "{}", error);

    let written = read_json(&lab.out.join("results/report.json"));
    assert_eq!(written["success"], false);
    assert!(std::fs::read_to_string(lab.out.join("results/summary.txt"))
        .expect("summary")
        .contains("Error: Grading bundle not found"));
}
