//! HAMMER - assignment builder and grader CLI
//!
//! ## Commands
//!
//! - `validate`: Check an assignment specification
//! - `build`: Render the student and grading bundles plus `lock.json`
//! - `grade`: Converge and verify a student submission, phase by phase

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hammer_core::lock::DEFAULT_BOX;
use hammer_core::{
    build_execution_plan, load_spec, validate, AssignmentSpec, ExecutionPhase, GradeReport,
    LogFormat, NetworkPlan,
};
use hammer_runner::config::{
    CONVERGE_TIMEOUT_ENV, DEFAULT_CONVERGE_TIMEOUT_SECS, DEFAULT_TEST_TIMEOUT_SECS,
    TEST_TIMEOUT_ENV,
};
use hammer_runner::pipeline::RESULTS_DIR;
use hammer_runner::report::REPORT_FILE;
use hammer_runner::{
    build_bundles, prerequisites, BuildOutcome, GradeRequest, GradingPipeline, RenderContext,
    RunnerConfig,
};
use std::path::{Path, PathBuf};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "hammer")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Assignment builder and grader for multi-node infrastructure labs", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate an assignment specification
    Validate {
        /// Path to the assignment spec YAML
        #[arg(long)]
        spec: PathBuf,
    },

    /// Build the student and grading bundles
    Build {
        /// Path to the assignment spec YAML
        #[arg(long)]
        spec: PathBuf,

        /// Output directory for bundles
        #[arg(long)]
        out: PathBuf,

        /// Vagrant box to pin in the lock file
        #[arg(long, default_value = DEFAULT_BOX)]
        box_version: String,
    },

    /// Grade a student submission
    Grade {
        /// Path to the assignment spec YAML
        #[arg(long)]
        spec: PathBuf,

        /// Path to the student submission
        #[arg(long)]
        student_repo: PathBuf,

        /// Output directory for results
        #[arg(long)]
        out: PathBuf,

        /// Existing grading bundle (lab already provisioned)
        #[arg(long)]
        grading_bundle: Option<PathBuf>,

        /// Run only this phase (repeatable)
        #[arg(long = "phase", value_parser = parse_phase)]
        phases: Vec<ExecutionPhase>,

        /// Do not regenerate the grading bundle
        #[arg(long, requires = "grading_bundle")]
        skip_build: bool,

        /// Seconds allowed for one converge
        #[arg(long, env = CONVERGE_TIMEOUT_ENV, default_value_t = DEFAULT_CONVERGE_TIMEOUT_SECS)]
        converge_timeout: u64,

        /// Seconds allowed for one verification run
        #[arg(long, env = TEST_TIMEOUT_ENV, default_value_t = DEFAULT_TEST_TIMEOUT_SECS)]
        test_timeout: u64,
    },
}

fn parse_phase(raw: &str) -> std::result::Result<ExecutionPhase, String> {
    raw.parse().map_err(|e: hammer_core::HammerError| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let format = if cli.json {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    hammer_core::init_tracing(format, level);

    match cli.command {
        Commands::Validate { spec } => cmd_validate(&spec),
        Commands::Build {
            spec,
            out,
            box_version,
        } => {
            prerequisites::ensure(prerequisites::BUILD_TOOLS)?;
            cmd_build(&spec, &out, &box_version).map(|_| ())
        }
        Commands::Grade {
            spec,
            student_repo,
            out,
            grading_bundle,
            phases,
            skip_build,
            converge_timeout,
            test_timeout,
        } => {
            prerequisites::ensure(prerequisites::GRADE_TOOLS)?;
            let config = RunnerConfig::default().with_timeouts(converge_timeout, test_timeout);
            cmd_grade(
                &spec,
                &student_repo,
                &out,
                grading_bundle.as_deref(),
                phases,
                skip_build,
                config,
            )
            .await
        }
    }
}

/// Load a spec and reject it if semantic validation reports any issue.
fn load_valid_spec(path: &Path) -> Result<AssignmentSpec> {
    let spec = load_spec(path).with_context(|| format!("Failed to load spec {:?}", path))?;
    let issues = validate(&spec);
    if !issues.is_empty() {
        eprintln!("Validation Error:");
        for issue in &issues {
            eprintln!("  {}", issue);
        }
        anyhow::bail!("{} validation issue(s) in {:?}", issues.len(), path);
    }
    Ok(spec)
}

fn cmd_validate(path: &Path) -> Result<()> {
    let spec = load_valid_spec(path)?;
    println!("✓ Spec is valid!");
    println!("  Assignment ID: {}", spec.assignment_id);
    println!("  Nodes: {}", spec.topology.node_names().join(", "));
    println!("  Variables: {}", spec.variable_contracts.len());
    Ok(())
}

fn cmd_build(spec_path: &Path, out: &Path, box_version: &str) -> Result<BuildOutcome> {
    let spec = load_valid_spec(spec_path)?;
    let plan = build_execution_plan(&spec).context("Failed to build execution plan")?;
    let network = NetworkPlan::from_spec(&spec);

    info!(assignment_id = %spec.assignment_id, out = %out.display(), "building bundles");
    let outcome = build_bundles(&RenderContext {
        spec: &spec,
        spec_dir: spec_path.parent(),
        plan: &plan,
        network: &network,
        box_version,
        out_dir: out,
    })?;

    println!("✓ Build complete!");
    println!("  Student bundle: {}", outcome.student_bundle.display());
    println!("  Grading bundle: {}", outcome.grading_bundle.display());
    println!("  Lock file: {}", outcome.lock_path.display());
    println!("  Spec hash: {}...", &outcome.lock.spec_hash[..16]);
    println!("  Network: {}", outcome.lock.resolved_network.cidr);
    Ok(outcome)
}

async fn cmd_grade(
    spec_path: &Path,
    student_repo: &Path,
    out: &Path,
    grading_bundle: Option<&Path>,
    phases: Vec<ExecutionPhase>,
    skip_build: bool,
    config: RunnerConfig,
) -> Result<()> {
    let spec = load_valid_spec(spec_path)?;

    let bundle = match grading_bundle {
        Some(bundle) => bundle.to_path_buf(),
        None if skip_build => anyhow::bail!("--skip-build requires --grading-bundle"),
        None => cmd_build(spec_path, &out.join("build"), DEFAULT_BOX)?.grading_bundle,
    };

    println!("Grading {:?}", student_repo);
    println!("Results: {:?}", out.join(RESULTS_DIR));
    println!();

    let pipeline = GradingPipeline::ansible(config, out);
    let report = pipeline
        .run(&GradeRequest {
            spec: &spec,
            student_repo,
            grading_bundle: &bundle,
            out_dir: out,
            phases,
        })
        .await
        .context("Grading run failed")?;

    print_report(&report, out);

    if report.success {
        println!("\n✓ All phases passed!");
        Ok(())
    } else {
        anyhow::bail!("Grading failed")
    }
}

fn print_report(report: &GradeReport, out: &Path) {
    for (phase, result) in &report.phases {
        let status = if result.passed() { "✓" } else { "✗" };
        println!(
            "  {} {} converge={} ok={} changed={} failed={} tests={}/{} score={:.1}/{:.1}",
            status,
            phase.as_str().to_uppercase(),
            if result.converge.success { "PASS" } else { "FAIL" },
            result.converge.ok,
            result.converge.changed,
            result.converge.failed,
            result.tests.passed,
            result.tests.passed + result.tests.failed + result.tests.errors,
            result.score,
            result.max_score
        );
        if let Some(verdict) = &result.idempotence {
            println!("      idempotence: {}", verdict.message);
        }
    }

    println!();
    if let Some(error) = &report.error_message {
        println!("Error: {}", error);
    }
    println!("Assignment: {}", report.assignment_id);
    println!(
        "Status: {}",
        if report.success { "✓ PASSED" } else { "✗ FAILED" }
    );
    println!(
        "Total Score: {:.1} / {:.1} ({:.1}%)",
        report.total_score, report.max_score, report.percentage
    );
    println!(
        "Detailed report: {}",
        out.join(RESULTS_DIR).join(REPORT_FILE).display()
    );
}
