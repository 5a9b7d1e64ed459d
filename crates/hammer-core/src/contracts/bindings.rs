//! Binding expansion: variable bindings become per-host checks.

use super::checks::BindingCheck;
use super::interpolate::{interpolate, render_value, substitute_value};
use crate::error::Result;
use crate::spec::{AssignmentSpec, BindingTarget, OverlayKind, Topology, VariableContract};
use crate::variables::PhaseVariablePlan;
use serde_json::Value;
use std::collections::BTreeSet;

/// Hosts a variable's bindings are checked on.
///
/// Uses the most specific scope among the variable's overlay targets:
/// `host_vars` targets, else members of `group_vars` target groups (`all`
/// names every node), else every node for `inventory_vars`/`extra_vars`. With
/// no targets at all the first topology node is used. Results are sorted.
pub fn binding_hosts(contract: &VariableContract, topology: &Topology) -> Vec<String> {
    let mut host_scoped = BTreeSet::new();
    let mut group_scoped = BTreeSet::new();
    let mut global = BTreeSet::new();

    for target in &contract.grading_overlay_targets {
        match target.overlay_kind {
            OverlayKind::HostVars => {
                host_scoped.insert(target.target_name.clone());
            }
            OverlayKind::GroupVars => {
                for node in &topology.nodes {
                    if node.in_group(&target.target_name) || target.target_name == "all" {
                        group_scoped.insert(node.name.clone());
                    }
                }
            }
            OverlayKind::InventoryVars | OverlayKind::ExtraVars => {
                global.extend(topology.nodes.iter().map(|n| n.name.clone()));
            }
        }
    }

    [host_scoped, group_scoped, global]
        .into_iter()
        .find(|scope| !scope.is_empty())
        .map(|scope| scope.into_iter().collect())
        .unwrap_or_else(|| topology.nodes.iter().take(1).map(|n| n.name.clone()).collect())
}

/// Substitute `{{ value }}` and variable placeholders into a binding target.
fn resolve_target(target: &BindingTarget, expected: &Value, vars: &PhaseVariablePlan) -> BindingTarget {
    let text = |s: &str| interpolate(&substitute_value(s, expected), vars);
    match target {
        BindingTarget::ServiceListenPort {
            service,
            protocol,
            address,
        } => BindingTarget::ServiceListenPort {
            service: service.clone(),
            protocol: *protocol,
            address: address.clone(),
        },
        BindingTarget::FirewallPortOpen { zone, protocol } => BindingTarget::FirewallPortOpen {
            zone: zone.clone(),
            protocol: *protocol,
        },
        BindingTarget::TemplateContains { path, pattern } => BindingTarget::TemplateContains {
            path: text(path),
            pattern: text(pattern),
        },
        BindingTarget::FileContains { path, pattern } => BindingTarget::FileContains {
            path: text(path),
            pattern: text(pattern),
        },
        BindingTarget::FileExists { path } => BindingTarget::FileExists { path: text(path) },
        BindingTarget::FileMode { path, mode } => BindingTarget::FileMode {
            path: text(path),
            mode: mode.clone(),
        },
        BindingTarget::FileOwner { path, owner, group } => BindingTarget::FileOwner {
            path: text(path),
            owner: owner.clone(),
            group: group.clone(),
        },
    }
}

fn describe(target: &BindingTarget, expected: &Value) -> String {
    match target {
        BindingTarget::ServiceListenPort { service, .. } => {
            format!("Verify {} listens on port {}", service, render_value(expected))
        }
        BindingTarget::FirewallPortOpen { protocol, .. } => format!(
            "Verify firewall allows port {}/{}",
            render_value(expected),
            protocol.as_str()
        ),
        BindingTarget::TemplateContains { path, .. } | BindingTarget::FileContains { path, .. } => {
            format!("Verify file {} contains expected content", path)
        }
        BindingTarget::FileExists { path } => format!("Verify file {} exists", path),
        BindingTarget::FileMode { path, .. } => format!("Verify file {} has correct mode", path),
        BindingTarget::FileOwner { path, .. } => {
            format!("Verify file {} has correct ownership", path)
        }
    }
}

/// Expand every binding of every variable for the phase in `vars`.
///
/// Order is variable declaration order, then binding index, then host.
pub fn expand_bindings(
    spec: &AssignmentSpec,
    topology: &Topology,
    vars: &PhaseVariablePlan,
) -> Result<Vec<BindingCheck>> {
    let mut checks = Vec::new();

    for contract in &spec.variable_contracts {
        if contract.binding_targets.is_empty() {
            continue;
        }
        let resolved = vars.require(&contract.name, "binding_targets")?;
        let hosts = binding_hosts(contract, topology);

        for (index, binding) in contract.binding_targets.iter().enumerate() {
            let target = resolve_target(&binding.target, &resolved.value, vars);
            let description = describe(&target, &resolved.value);
            for host in &hosts {
                checks.push(BindingCheck {
                    variable: contract.name.clone(),
                    binding_index: index,
                    host: host.clone(),
                    target: target.clone(),
                    expected_value: resolved.value.clone(),
                    source: resolved.source,
                    weight: binding.weight,
                    description: description.clone(),
                });
            }
        }
    }

    Ok(checks)
}
