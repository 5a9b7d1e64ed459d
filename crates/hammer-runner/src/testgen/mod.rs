//! Verification test generation.
//!
//! Every check of a phase becomes one test case in `tests/<phase>/cases.json`:
//! host-scoped checks are split per target host, the rest run once. A fixed
//! pytest module parametrized over the cases and a conftest that reports each
//! case's weight as `metadata.weight` in the JSON report are written next to
//! it, so the harness can score the phase.

use crate::bundle::BundleWriter;
use hammer_core::contracts::checks::*;
use hammer_core::spec::{ExpectedRuns, HttpMethod, MatchType, PackageState, ReachabilityExpectation};
use hammer_core::{ExecutionPhase, PhaseContractPlan};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const CASES_FILE: &str = "cases.json";
pub const TEST_MODULE: &str = "test_contracts.py";
pub const CONFTEST: &str = "conftest.py";

const TEST_MODULE_SOURCE: &str = include_str!("test_contracts.py");
const CONFTEST_SOURCE: &str = include_str!("conftest.py");

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaseKind {
    Binding,
    Package,
    PipPackage,
    Service,
    User,
    Group,
    Firewall,
    Files,
    Reachability,
    HttpEndpoint,
    ExternalHttp,
    Output,
    Handler,
}

impl CaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseKind::Binding => "binding",
            CaseKind::Package => "package",
            CaseKind::PipPackage => "pip_package",
            CaseKind::Service => "service",
            CaseKind::User => "user",
            CaseKind::Group => "group",
            CaseKind::Firewall => "firewall",
            CaseKind::Files => "files",
            CaseKind::Reachability => "reachability",
            CaseKind::HttpEndpoint => "http_endpoint",
            CaseKind::ExternalHttp => "external_http",
            CaseKind::Output => "output",
            CaseKind::Handler => "handler",
        }
    }
}

/// One generated test.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestCase {
    /// pytest parameter id, unique within the phase.
    pub id: String,
    pub kind: CaseKind,
    /// Node the check runs against; `None` runs on the grading host.
    pub host: Option<String>,
    pub weight: f64,
    pub description: String,
    /// The check record as written to `checks/<phase>.json`.
    pub check: Value,
}

/// Contents of `cases.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseCases {
    pub phase: ExecutionPhase,
    pub cases: Vec<TestCase>,
}

/// Lowercase identifier made of `[a-z0-9_]`, without leading digits or
/// repeated underscores.
pub fn safe_name(s: &str) -> String {
    let mapped: String = s
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    let mut out = String::with_capacity(mapped.len());
    for c in mapped.trim_start_matches(|c: char| c.is_ascii_digit()).chars() {
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }
    out.trim_matches('_').to_string()
}

fn state_word(state: PackageState) -> &'static str {
    match state {
        PackageState::Present => "installed",
        PackageState::Absent => "absent",
    }
}

fn method_word(method: HttpMethod) -> &'static str {
    match method {
        HttpMethod::Get => "GET",
        HttpMethod::Post => "POST",
        HttpMethod::Put => "PUT",
        HttpMethod::Delete => "DELETE",
        HttpMethod::Head => "HEAD",
    }
}

fn runs_word(runs: ExpectedRuns) -> &'static str {
    match runs {
        ExpectedRuns::Zero => "does not run",
        ExpectedRuns::AtLeastOnce => "runs at least once",
        ExpectedRuns::ExactlyOnce => "runs exactly once",
    }
}

#[derive(Default)]
struct Cases {
    cases: Vec<TestCase>,
    seen: BTreeMap<String, usize>,
}

impl Cases {
    fn push<T: Serialize>(
        &mut self,
        kind: CaseKind,
        label: &str,
        host: Option<&str>,
        weight: f64,
        description: String,
        check: &T,
    ) -> anyhow::Result<()> {
        let base = safe_name(&format!(
            "{}_{}_{}",
            kind.as_str(),
            label,
            host.unwrap_or("grader")
        ));
        let seen = self.seen.entry(base.clone()).or_insert(0);
        *seen += 1;
        let id = if *seen == 1 {
            base
        } else {
            format!("{}_{}", base, seen)
        };
        self.cases.push(TestCase {
            id,
            kind,
            host: host.map(str::to_string),
            weight,
            description,
            check: serde_json::to_value(check)?,
        });
        Ok(())
    }

    /// One case per target host.
    fn per_host<T: Serialize>(
        &mut self,
        kind: CaseKind,
        label: &str,
        hosts: &[String],
        weight: f64,
        description: &str,
        check: &T,
    ) -> anyhow::Result<()> {
        for host in hosts {
            self.push(kind, label, Some(host), weight, description.to_string(), check)?;
        }
        Ok(())
    }
}

fn http_description(method: HttpMethod, url: &str, status: u16) -> String {
    format!("{} {} returns {}", method_word(method), url, status)
}

/// Flatten a phase's checks into test cases, in category order.
pub fn phase_cases(plan: &PhaseContractPlan) -> anyhow::Result<PhaseCases> {
    let mut out = Cases::default();

    for b in &plan.bindings {
        let label = format!("{}_{}_{}", b.variable, b.binding_index, b.target.kind());
        out.push(
            CaseKind::Binding,
            &label,
            Some(&b.host),
            b.weight,
            b.description.clone(),
            b,
        )?;
    }
    for p in &plan.packages {
        let desc = format!("Package {} is {}", p.name, state_word(p.state));
        out.per_host(CaseKind::Package, &p.name, &p.host_targets, p.weight, &desc, p)?;
    }
    for p in &plan.pip_packages {
        let desc = format!("pip package {} is {} for {}", p.name, state_word(p.state), p.python);
        out.per_host(CaseKind::PipPackage, &p.name, &p.host_targets, p.weight, &desc, p)?;
    }
    for s in &plan.services {
        let desc = format!(
            "Service {} is {} and {}",
            s.name,
            if s.running { "running" } else { "stopped" },
            if s.enabled { "enabled" } else { "disabled" }
        );
        out.per_host(CaseKind::Service, &s.name, &s.host_targets, s.weight, &desc, s)?;
    }
    for u in &plan.users {
        let desc = format!("User {} {}", u.name, if u.exists { "exists" } else { "is absent" });
        out.per_host(CaseKind::User, &u.name, &u.host_targets, u.weight, &desc, u)?;
    }
    for g in &plan.groups {
        let desc = format!("Group {} {}", g.name, if g.exists { "exists" } else { "is absent" });
        out.per_host(CaseKind::Group, &g.name, &g.host_targets, g.weight, &desc, g)?;
    }
    for f in &plan.firewall {
        let ports: Vec<String> = f
            .ports
            .iter()
            .map(|p| format!("{}/{}", p.port, p.protocol.as_str()))
            .collect();
        let desc = format!("Firewall allows {}", ports.join(", "));
        out.per_host(CaseKind::Firewall, &ports.join("_"), &f.host_targets, f.weight, &desc, f)?;
    }
    for f in &plan.files {
        let paths: Vec<&str> = f.items.iter().map(|i| i.path.as_str()).collect();
        let label = paths.first().copied().unwrap_or("files");
        let desc = format!("Files match: {}", paths.join(", "));
        out.per_host(CaseKind::Files, label, &f.host_targets, f.weight, &desc, f)?;
    }
    for r in &plan.reachability {
        let desc = format!(
            "{} {} {}:{}/{}",
            r.from_host,
            match r.expectation {
                ReachabilityExpectation::Reachable => "reaches",
                ReachabilityExpectation::NotReachable => "cannot reach",
            },
            r.to_host,
            r.port,
            r.protocol.as_str()
        );
        let label = format!("{}_{}", r.to_host, r.port);
        out.push(CaseKind::Reachability, &label, Some(&r.from_host), r.weight, desc, r)?;
    }
    for h in &plan.http_endpoints {
        let desc = http_description(h.method, &h.url, h.expected_status);
        out.per_host(CaseKind::HttpEndpoint, &h.url, &h.host_targets, h.weight, &desc, h)?;
    }
    for h in &plan.external_http {
        let desc = http_description(h.method, &h.url, h.expected_status);
        match (&h.from_node_targets, h.from_host) {
            (Some(nodes), false) => {
                out.per_host(CaseKind::ExternalHttp, &h.url, nodes, h.weight, &desc, h)?
            }
            _ => out.push(CaseKind::ExternalHttp, &h.url, None, h.weight, desc, h)?,
        }
    }
    for o in &plan.output_checks {
        let desc = o.description.clone().unwrap_or_else(|| {
            format!(
                "Converge output {} {} '{}'",
                if o.expected { "shows" } else { "never shows" },
                match o.match_type {
                    MatchType::Contains => "text",
                    MatchType::Regex => "pattern",
                },
                o.pattern
            )
        });
        out.push(CaseKind::Output, &o.pattern, None, o.weight, desc, o)?;
    }
    for h in &plan.handlers {
        let desc = format!("Handler '{}' {}", h.handler_name, runs_word(h.expected_runs));
        out.push(CaseKind::Handler, &h.handler_name, None, h.weight, desc, h)?;
    }

    Ok(PhaseCases {
        phase: plan.phase,
        cases: out.cases,
    })
}

/// Write `tests/<phase>/` for one phase. Returns the number of cases.
pub fn write_phase_tests(
    writer: &mut BundleWriter<'_>,
    plan: &PhaseContractPlan,
) -> anyhow::Result<usize> {
    let cases = phase_cases(plan)?;
    let dir = format!("tests/{}", plan.phase);
    writer.write(&format!("{}/{}", dir, CONFTEST), CONFTEST_SOURCE)?;
    writer.write(&format!("{}/{}", dir, TEST_MODULE), TEST_MODULE_SOURCE)?;
    writer.write_json(&format!("{}/{}", dir, CASES_FILE), &cases)?;
    tracing::debug!(phase = %plan.phase, cases = cases.cases.len(), "verification tests generated");
    Ok(cases.cases.len())
}
