//! Loading and validating specification files from disk.

use hammer_core::spec::{BindingTarget, HandlerAction, NodeSelector, PortRef, Trigger};
use hammer_core::{load_spec, validate, validate_spec, HammerError, OverlayPhase};
use std::path::PathBuf;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

#[test]
fn test_webapp_fixture_loads_and_validates() {
    let spec = load_spec(&fixture("webapp.yaml")).expect("load webapp spec");

    assert_eq!(spec.assignment_id, "pe-webapp");
    assert_eq!(spec.seed, 20240611);
    assert_eq!(spec.topology.nodes.len(), 2);
    assert_eq!(spec.topology.nodes[0].resources.cpu, 2);
    assert_eq!(spec.topology.nodes[1].resources.ram_mb, 1024);
    assert_eq!(spec.entrypoints.required_roles, vec!["nginx", "postgres"]);

    let http_port = spec.variable("http_port").expect("http_port contract");
    assert_eq!(http_port.binding_targets.len(), 3);
    assert_eq!(http_port.binding_targets[0].weight, 2.0);
    assert!(matches!(
        &http_port.binding_targets[1].target,
        BindingTarget::FirewallPortOpen { zone, .. } if zone == "public"
    ));

    let firewall = &spec.behavioral_contracts.firewall[0];
    assert_eq!(
        firewall.open_ports[0].port,
        PortRef::Var {
            var: "http_port".to_string()
        }
    );
    assert_eq!(firewall.open_ports[1].port, PortRef::Literal(22));
    assert_eq!(firewall.node_selector, NodeSelector::group("web"));

    let handler = &spec.handler_contracts[0];
    assert_eq!(handler.handler_target.action, HandlerAction::Restart);
    assert_eq!(
        handler.trigger_conditions,
        vec![Trigger::VariableChanged("http_port".to_string())]
    );

    let mutation = spec
        .phase_overlays
        .get(OverlayPhase::Mutation)
        .expect("mutation overlay");
    let reboot = mutation.reboot.as_ref().expect("reboot config");
    assert!(reboot.enabled);
    assert_eq!(reboot.timeout, 180);

    let issues = validate(&spec);
    assert!(issues.is_empty(), "unexpected issues: {:?}", issues);
    validate_spec(&spec).expect("webapp spec is valid");
}

#[test]
fn test_broken_fixture_reports_every_issue() {
    let spec = load_spec(&fixture("broken.yaml")).expect("broken spec still parses");
    let paths: Vec<String> = validate(&spec).into_iter().map(|i| i.path).collect();

    for expected in [
        "spec_version",
        "phase_overlays.baseline",
        "variable_contracts[0].allowed_values",
        "variable_contracts[0].grading_overlay_targets[0].target_name",
        "variable_contracts[0].binding_targets",
        "behavioral_contracts.services[0].node_selector.host",
    ] {
        assert!(
            paths.iter().any(|p| p == expected),
            "missing issue at {}; got {:?}",
            expected,
            paths
        );
    }

    match validate_spec(&spec) {
        Err(HammerError::InvalidSpec(issues)) => assert_eq!(issues.len(), paths.len()),
        other => panic!("expected InvalidSpec, got {:?}", other),
    }
}

#[test]
fn test_missing_file_is_io_error() {
    let err = load_spec(&fixture("does-not-exist.yaml")).unwrap_err();
    assert!(matches!(err, HammerError::Io(_)));
}

#[test]
fn test_malformed_yaml_is_yaml_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("spec.yaml");
    std::fs::write(&path, "assignment_id: [unterminated\n").expect("write spec");
    let err = load_spec(&path).unwrap_err();
    assert!(matches!(err, HammerError::Yaml(_)));
}
