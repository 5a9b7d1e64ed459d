//! Contract expansion.
//!
//! Turns the declarative contracts of a specification into concrete check
//! records for one phase: phase filters applied, selectors resolved to host
//! lists, variable references replaced by the phase's resolved values.

pub mod behavioral;
pub mod bindings;
pub mod checks;
pub mod interpolate;

pub use behavioral::{expand_behavioral, BehavioralChecks};
pub use bindings::{binding_hosts, expand_bindings};
pub use checks::*;

use crate::error::Result;
use crate::phase::ExecutionPhase;
use crate::selector::resolve;
use crate::spec::{AssignmentSpec, HandlerContract, Topology};
use crate::variables::PhaseVariablePlan;

/// `None` applies to every phase; otherwise the phase must be listed.
pub fn applies_to_phase(phases: Option<&[ExecutionPhase]>, phase: ExecutionPhase) -> bool {
    phases.map_or(true, |list| list.contains(&phase))
}

/// Handler expectations for `phase`. Handlers apply to every phase.
pub fn expand_handlers(
    handlers: &[HandlerContract],
    topology: &Topology,
    phase: ExecutionPhase,
) -> Vec<HandlerCheck> {
    handlers
        .iter()
        .map(|h| HandlerCheck {
            handler_name: h.handler_name.clone(),
            host_targets: resolve(&h.node_selector, topology),
            service: h.handler_target.service.clone(),
            action: h.handler_target.action,
            expected_runs: h.expected_runs.for_phase(phase),
            weight: h.weight,
        })
        .collect()
}

/// Expand every contract category for the phase of `vars`.
pub fn expand(
    spec: &AssignmentSpec,
    topology: &Topology,
    vars: &PhaseVariablePlan,
) -> Result<PhaseContractPlan> {
    let phase = vars.phase;
    let bindings = expand_bindings(spec, topology, vars)?;
    let behavioral = expand_behavioral(&spec.behavioral_contracts, topology, vars)?;
    let handlers = expand_handlers(&spec.handler_contracts, topology, phase);

    Ok(PhaseContractPlan {
        phase,
        bindings,
        packages: behavioral.packages,
        pip_packages: behavioral.pip_packages,
        services: behavioral.services,
        users: behavioral.users,
        groups: behavioral.groups,
        firewall: behavioral.firewall,
        files: behavioral.files,
        reachability: behavioral.reachability,
        http_endpoints: behavioral.http_endpoints,
        external_http: behavioral.external_http,
        output_checks: behavioral.output_checks,
        handlers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{
        ExpectedRuns, ExpectedRunsSet, HandlerAction, HandlerTarget, Node, NodeSelector, Resources,
    };

    #[test]
    fn test_applies_to_phase() {
        use ExecutionPhase::*;
        assert!(applies_to_phase(None, Idempotence));
        assert!(applies_to_phase(Some(&[Baseline][..]), Baseline));
        assert!(!applies_to_phase(Some(&[Baseline][..]), Mutation));
        assert!(applies_to_phase(Some(&[Mutation, Idempotence][..]), Idempotence));
        assert!(!applies_to_phase(Some(&[][..]), Baseline));
    }

    #[test]
    fn test_handler_expectation_follows_phase() {
        let topology = Topology {
            domain: "lab.local".to_string(),
            nodes: vec![Node {
                name: "web1".to_string(),
                groups: vec!["web".to_string()],
                resources: Resources::default(),
                forwarded_ports: vec![],
            }],
            forwarded_ports: vec![],
            dependencies: vec![],
        };
        let handler = HandlerContract {
            handler_name: "restart nginx".to_string(),
            node_selector: NodeSelector::group("web"),
            handler_target: HandlerTarget {
                service: "nginx".to_string(),
                action: HandlerAction::Restart,
            },
            trigger_conditions: vec![],
            non_trigger_conditions: vec![],
            expected_runs: ExpectedRunsSet {
                baseline: ExpectedRuns::AtLeastOnce,
                mutation: ExpectedRuns::ExactlyOnce,
                idempotence: ExpectedRuns::Zero,
            },
            weight: 2.0,
        };

        let checks = expand_handlers(&[handler], &topology, ExecutionPhase::Mutation);
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].host_targets, vec!["web1"]);
        assert_eq!(checks[0].expected_runs, ExpectedRuns::ExactlyOnce);
        assert_eq!(checks[0].weight, 2.0);
    }
}
