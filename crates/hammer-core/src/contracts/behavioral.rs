//! Expansion of behavioral contract categories.

use super::applies_to_phase;
use super::checks::*;
use super::interpolate::{interpolate, resolve_port};
use crate::error::Result;
use crate::phase::ExecutionPhase;
use crate::selector::{resolve, resolve_opt};
use crate::spec::{BehavioralContracts, Topology};
use crate::variables::PhaseVariablePlan;

const DEFAULT_PYTHON: &str = "/usr/bin/python3";

/// Output of [`expand_behavioral`], one list per category.
#[derive(Debug, Default)]
pub struct BehavioralChecks {
    pub packages: Vec<PackageCheck>,
    pub pip_packages: Vec<PipPackageCheck>,
    pub services: Vec<ServiceCheck>,
    pub users: Vec<UserCheck>,
    pub groups: Vec<GroupCheck>,
    pub firewall: Vec<FirewallCheck>,
    pub files: Vec<FileCheck>,
    pub reachability: Vec<ReachabilityCheck>,
    pub http_endpoints: Vec<HttpEndpointCheck>,
    pub external_http: Vec<ExternalHttpCheck>,
    pub output_checks: Vec<OutputCheck>,
}

pub fn expand_behavioral(
    contracts: &BehavioralContracts,
    topology: &Topology,
    vars: &PhaseVariablePlan,
) -> Result<BehavioralChecks> {
    let phase = vars.phase;
    let applies = |phases: &Option<Vec<ExecutionPhase>>| applies_to_phase(phases.as_deref(), phase);

    let packages = contracts
        .packages
        .iter()
        .filter(|p| applies(&p.phases))
        .map(|p| PackageCheck {
            host_targets: resolve(&p.node_selector, topology),
            name: p.name.clone(),
            state: p.state,
            weight: p.weight,
        })
        .collect();

    let pip_packages = contracts
        .pip_packages
        .iter()
        .filter(|p| applies(&p.phases))
        .map(|p| PipPackageCheck {
            host_targets: resolve(&p.node_selector, topology),
            name: p.name.clone(),
            state: p.state,
            python: p.python.clone().unwrap_or_else(|| DEFAULT_PYTHON.to_string()),
            weight: p.weight,
        })
        .collect();

    let services = contracts
        .services
        .iter()
        .filter(|s| applies(&s.phases))
        .map(|s| ServiceCheck {
            host_targets: resolve(&s.node_selector, topology),
            name: s.name.clone(),
            enabled: s.enabled,
            running: s.running,
            weight: s.weight,
        })
        .collect();

    let users = contracts
        .users
        .iter()
        .filter(|u| applies(&u.phases))
        .map(|u| UserCheck {
            host_targets: resolve(&u.node_selector, topology),
            name: u.name.clone(),
            exists: u.exists,
            uid: u.uid,
            gid: u.gid,
            home: u.home.clone(),
            shell: u.shell.clone(),
            groups: u.groups.clone(),
            weight: u.weight,
        })
        .collect();

    let groups = contracts
        .groups
        .iter()
        .filter(|g| applies(&g.phases))
        .map(|g| GroupCheck {
            host_targets: resolve(&g.node_selector, topology),
            name: g.name.clone(),
            exists: g.exists,
            gid: g.gid,
            weight: g.weight,
        })
        .collect();

    let mut firewall = Vec::new();
    for (i, f) in contracts.firewall.iter().enumerate() {
        if !applies(&f.phases) {
            continue;
        }
        let ports = f
            .open_ports
            .iter()
            .enumerate()
            .map(|(j, p)| {
                let at = format!("behavioral_contracts.firewall[{}].open_ports[{}]", i, j);
                Ok(ResolvedFirewallPort {
                    port: resolve_port(&p.port, vars, &at)?,
                    protocol: p.protocol,
                    zone: p.zone.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        firewall.push(FirewallCheck {
            host_targets: resolve(&f.node_selector, topology),
            ports,
            firewall_type: f.firewall_type,
            weight: f.weight,
        });
    }

    let files = contracts
        .files
        .iter()
        .filter(|f| applies(&f.phases))
        .map(|f| FileCheck {
            host_targets: resolve(&f.node_selector, topology),
            items: f.items.clone(),
            weight: f.weight,
        })
        .collect();

    let mut reachability = Vec::new();
    for (i, r) in contracts.reachability.iter().enumerate() {
        if !applies(&r.phases) {
            continue;
        }
        let at = format!("behavioral_contracts.reachability[{}].port", i);
        reachability.push(ReachabilityCheck {
            from_host: r.from_host.clone(),
            to_host: r.to_host.clone(),
            protocol: r.protocol,
            port: resolve_port(&r.port, vars, &at)?,
            expectation: r.expectation,
            weight: r.weight,
        });
    }

    let http_endpoints = contracts
        .http_endpoints
        .iter()
        .filter(|h| applies(&h.phases))
        .map(|h| HttpEndpointCheck {
            host_targets: resolve(&h.node_selector, topology),
            url: interpolate(&h.url, vars),
            method: h.method,
            expected_status: h.expected_status,
            response_contains: h.response_contains.clone(),
            response_regex: h.response_regex.clone(),
            timeout_seconds: h.timeout_seconds,
            weight: h.weight,
        })
        .collect();

    let external_http = contracts
        .external_http
        .iter()
        .filter(|e| applies(&e.phases))
        .map(|e| ExternalHttpCheck {
            url: interpolate(&e.url, vars),
            method: e.method,
            expected_status: e.expected_status,
            response_contains: e.response_contains.clone(),
            response_regex: e.response_regex.clone(),
            timeout_seconds: e.timeout_seconds,
            from_host: e.from_host,
            from_node_targets: resolve_opt(e.from_node.as_ref(), topology),
            weight: e.weight,
        })
        .collect();

    let output_checks = contracts
        .output_checks
        .iter()
        .filter(|o| applies(&o.phases))
        .map(|o| OutputCheck {
            pattern: interpolate(&o.pattern, vars),
            match_type: o.match_type,
            expected: o.expected,
            description: o.description.clone(),
            weight: o.weight,
        })
        .collect();

    Ok(BehavioralChecks {
        packages,
        pip_packages,
        services,
        users,
        groups,
        firewall,
        files,
        reachability,
        http_endpoints,
        external_http,
        output_checks,
    })
}
