//! Semantic validation of a loaded specification.
//!
//! Structural problems are caught while deserializing. The checks here are
//! the cross-references the rest of the crate relies on: selectors name real
//! hosts and groups, port references name declared variables, bindings are
//! reachable through some overlay, and so on. Every issue carries the dotted
//! path of the offending field.

use crate::error::{HammerError, Result};
use crate::phase::OverlayPhase;
use crate::spec::{
    AssignmentSpec, MatchType, NodeSelector, OverlayKind, PortRef, Trigger, REBOOT_POLL_RANGE,
    REBOOT_TIMEOUT_RANGE, SUPPORTED_SPEC_VERSION,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Component, Path};

/// A single validation finding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpecIssue {
    /// Field path, e.g. `behavioral_contracts.services[0].node_selector`.
    pub path: String,
    pub message: String,
}

impl SpecIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for SpecIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

struct Validator<'a> {
    spec: &'a AssignmentSpec,
    nodes: BTreeSet<&'a str>,
    groups: BTreeSet<&'a str>,
    variables: BTreeSet<&'a str>,
    issues: Vec<SpecIssue>,
}

impl<'a> Validator<'a> {
    fn new(spec: &'a AssignmentSpec) -> Self {
        Self {
            spec,
            nodes: spec.topology.nodes.iter().map(|n| n.name.as_str()).collect(),
            groups: spec
                .topology
                .nodes
                .iter()
                .flat_map(|n| n.groups.iter().map(String::as_str))
                .collect(),
            variables: spec
                .variable_contracts
                .iter()
                .map(|v| v.name.as_str())
                .collect(),
            issues: Vec::new(),
        }
    }

    fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.issues.push(SpecIssue::new(path, message));
    }

    fn host(&mut self, path: String, host: &str) {
        if !self.nodes.contains(host) {
            self.push(path, format!("unknown host '{}'", host));
        }
    }

    fn selector(&mut self, path: String, selector: &NodeSelector) {
        match selector {
            NodeSelector::Host(host) => self.host(format!("{}.host", path), host),
            NodeSelector::Group(group) => {
                if !self.groups.contains(group.as_str()) {
                    self.push(
                        format!("{}.group", path),
                        format!("group '{}' has no member nodes", group),
                    );
                }
            }
        }
    }

    fn port(&mut self, path: String, port: &PortRef) {
        match port {
            PortRef::Literal(0) => self.push(path, "port must be between 1 and 65535"),
            PortRef::Literal(_) => {}
            PortRef::Var { var } => {
                if !self.variables.contains(var.as_str()) {
                    self.push(path, format!("references undefined variable '{}'", var));
                }
            }
        }
    }

    fn weight(&mut self, path: String, weight: f64) {
        if !(weight >= 0.0 && weight.is_finite()) {
            self.push(path, format!("weight must be a non-negative number, got {}", weight));
        }
    }

    fn regex(&mut self, path: String, pattern: &str) {
        if let Err(e) = regex::Regex::new(pattern) {
            self.push(path, format!("invalid regular expression: {}", e));
        }
    }

    fn relative_path(&mut self, path: String, value: &str) {
        let p = Path::new(value);
        let escapes = p
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
        if value.is_empty() || escapes {
            self.push(path, format!("'{}' must be a relative path inside the bundle", value));
        }
    }

    fn root(&mut self) {
        let spec = self.spec;
        if spec.spec_version != SUPPORTED_SPEC_VERSION {
            self.push(
                "spec_version",
                format!(
                    "unsupported spec_version '{}', expected '{}'",
                    spec.spec_version, SUPPORTED_SPEC_VERSION
                ),
            );
        }
        if spec.provider != "libvirt" {
            self.push("provider", format!("unsupported provider '{}'", spec.provider));
        }
        if spec.os != "almalinux9" {
            self.push("os", format!("unsupported os '{}'", spec.os));
        }
        if spec.assignment_id.trim().is_empty() {
            self.push("assignment_id", "must not be empty");
        }
    }

    fn topology(&mut self) {
        let spec = self.spec;
        let topology = &spec.topology;
        if topology.nodes.is_empty() {
            self.push("topology.nodes", "at least one node is required");
        }
        let mut seen = BTreeSet::new();
        for (i, node) in topology.nodes.iter().enumerate() {
            if !seen.insert(node.name.as_str()) {
                self.push(
                    format!("topology.nodes[{}].name", i),
                    format!("duplicate node name '{}'", node.name),
                );
            }
        }
        for (i, dep) in topology.dependencies.iter().enumerate() {
            self.host(format!("topology.dependencies[{}].from_host", i), &dep.from_host);
            self.host(format!("topology.dependencies[{}].to_host", i), &dep.to_host);
        }
    }

    fn entrypoints(&mut self) {
        let spec = self.spec;
        let entry = &spec.entrypoints;
        self.relative_path("entrypoints.playbook_path".to_string(), &entry.playbook_path);
        for (i, f) in entry.required_files.iter().enumerate() {
            self.relative_path(format!("entrypoints.required_files[{}]", i), f);
        }
        for (i, f) in entry.provided_files.iter().enumerate() {
            self.relative_path(format!("entrypoints.provided_files[{}].source", i), &f.source);
            self.relative_path(
                format!("entrypoints.provided_files[{}].destination", i),
                &f.destination,
            );
        }
    }

    fn variables(&mut self) {
        let spec = self.spec;
        let overlays = &spec.phase_overlays;

        if !spec.variable_contracts.is_empty() && overlays.baseline.is_none() {
            self.push(
                "phase_overlays.baseline",
                "required when variable_contracts exist",
            );
        }

        let mut seen = BTreeSet::new();
        for (i, var) in spec.variable_contracts.iter().enumerate() {
            let at = format!("variable_contracts[{}]", i);
            if !seen.insert(var.name.as_str()) {
                self.push(format!("{}.name", at), format!("duplicate variable '{}'", var.name));
            }
            if !var.binding_targets.is_empty() && var.allowed_values.len() < 2 {
                self.push(
                    format!("{}.allowed_values", at),
                    format!(
                        "variable '{}' has bindings but fewer than 2 allowed values",
                        var.name
                    ),
                );
            }
            if var.grading_overlay_targets.is_empty() {
                self.push(
                    format!("{}.grading_overlay_targets", at),
                    format!("variable '{}' needs at least one overlay target", var.name),
                );
            }
            for (j, target) in var.grading_overlay_targets.iter().enumerate() {
                let path = format!("{}.grading_overlay_targets[{}].target_name", at, j);
                match target.overlay_kind {
                    OverlayKind::GroupVars => {
                        let name = target.target_name.as_str();
                        if name != "all" && !self.groups.contains(name) {
                            self.push(path, format!("unknown group '{}'", name));
                        }
                    }
                    OverlayKind::HostVars => self.host(path, &target.target_name),
                    OverlayKind::InventoryVars | OverlayKind::ExtraVars => {}
                }
            }
            for (j, binding) in var.binding_targets.iter().enumerate() {
                self.weight(format!("{}.binding_targets[{}].weight", at, j), binding.weight);
            }
            let set_somewhere = overlays.iter().any(|(_, o)| o.sets(&var.name));
            if !var.binding_targets.is_empty() && !set_somewhere {
                self.push(
                    format!("{}.binding_targets", at),
                    format!(
                        "variable '{}' has bindings but is never set in phase_overlays",
                        var.name
                    ),
                );
            }
        }

        for (i, scenario) in spec.precedence_scenarios.iter().enumerate() {
            let at = format!("precedence_scenarios[{}]", i);
            match spec.variable(&scenario.variable) {
                None => self.push(
                    format!("{}.variable", at),
                    format!("references unknown variable '{}'", scenario.variable),
                ),
                Some(var) => {
                    for &b in &scenario.bindings_to_verify {
                        if b >= var.binding_targets.len() {
                            self.push(
                                format!("{}.bindings_to_verify", at),
                                format!(
                                    "binding index {} out of range for variable '{}'",
                                    b, var.name
                                ),
                            );
                        }
                    }
                }
            }
            if scenario.layers.len() < 2 {
                self.push(format!("{}.layers", at), "at least two layers are required");
            }
            if !scenario.layers.contains(&scenario.expected_winner) {
                self.push(
                    format!("{}.expected_winner", at),
                    "expected_winner must be one of the listed layers",
                );
            }
        }
    }

    fn overlays(&mut self) {
        let spec = self.spec;
        for (phase, overlay) in spec.phase_overlays.iter() {
            let at = format!("phase_overlays.{}", phase);
            for group in overlay.group_vars.keys() {
                if group != "all" && !self.groups.contains(group.as_str()) {
                    self.push(
                        format!("{}.group_vars.{}", at, group),
                        format!("unknown group '{}'", group),
                    );
                }
            }
            for host in overlay.host_vars.keys() {
                self.host(format!("{}.host_vars.{}", at, host), host);
            }
            if let Some(reboot) = &overlay.reboot {
                for (i, node) in reboot.nodes.iter().flatten().enumerate() {
                    self.host(format!("{}.reboot.nodes[{}]", at, i), node);
                }
                if !REBOOT_TIMEOUT_RANGE.contains(&reboot.timeout) {
                    self.push(
                        format!("{}.reboot.timeout", at),
                        format!("must be between 30 and 600 seconds, got {}", reboot.timeout),
                    );
                }
                if !REBOOT_POLL_RANGE.contains(&reboot.poll_interval) {
                    self.push(
                        format!("{}.reboot.poll_interval", at),
                        format!(
                            "must be between 1 and 30 seconds, got {}",
                            reboot.poll_interval
                        ),
                    );
                }
            }
            if let Some(policy) = &overlay.failure_policy {
                for (i, pattern) in policy.expected_patterns.iter().flatten().enumerate() {
                    self.regex(format!("{}.failure_policy.expected_patterns[{}]", at, i), pattern);
                }
            }
        }
        if spec.phase_overlays.get(OverlayPhase::Mutation).is_none()
            && spec
                .variable_contracts
                .iter()
                .any(|v| !v.binding_targets.is_empty())
        {
            tracing::warn!("no mutation overlay: mutation and idempotence reuse student defaults");
        }
    }

    fn behavioral(&mut self) {
        let spec = self.spec;
        let bc = &spec.behavioral_contracts;
        let base = "behavioral_contracts";

        macro_rules! selectors_and_weights {
            ($field:ident) => {
                for (i, c) in bc.$field.iter().enumerate() {
                    let at = format!("{}.{}[{}]", base, stringify!($field), i);
                    self.selector(format!("{}.node_selector", at), &c.node_selector);
                    self.weight(format!("{}.weight", at), c.weight);
                }
            };
        }

        selectors_and_weights!(packages);
        selectors_and_weights!(pip_packages);
        selectors_and_weights!(services);
        selectors_and_weights!(users);
        selectors_and_weights!(groups);
        selectors_and_weights!(firewall);
        selectors_and_weights!(files);
        selectors_and_weights!(http_endpoints);

        for (i, fw) in bc.firewall.iter().enumerate() {
            for (j, port) in fw.open_ports.iter().enumerate() {
                self.port(format!("{}.firewall[{}].open_ports[{}].port", base, i, j), &port.port);
            }
        }

        for (i, files) in bc.files.iter().enumerate() {
            for (j, item) in files.items.iter().enumerate() {
                if let Some(pattern) = &item.content_regex {
                    self.regex(
                        format!("{}.files[{}].items[{}].content_regex", base, i, j),
                        pattern,
                    );
                }
            }
        }

        if !bc.reachability.is_empty() && !spec.features.reachability {
            self.push(
                format!("{}.reachability", base),
                "reachability contracts present but features.reachability is false",
            );
        }
        for (i, r) in bc.reachability.iter().enumerate() {
            let at = format!("{}.reachability[{}]", base, i);
            self.host(format!("{}.from_host", at), &r.from_host);
            self.host(format!("{}.to_host", at), &r.to_host);
            self.port(format!("{}.port", at), &r.port);
            self.weight(format!("{}.weight", at), r.weight);
        }

        for (i, h) in bc.http_endpoints.iter().enumerate() {
            let at = format!("{}.http_endpoints[{}]", base, i);
            self.http_fields(&at, h.expected_status, h.timeout_seconds, h.response_regex.as_deref());
        }

        for (i, e) in bc.external_http.iter().enumerate() {
            let at = format!("{}.external_http[{}]", base, i);
            match (&e.from_node, e.from_host) {
                (Some(_), true) => {
                    self.push(&at, "set either from_host or from_node, not both")
                }
                (None, false) => self.push(&at, "one of from_host or from_node is required"),
                (Some(node), false) => self.selector(format!("{}.from_node", at), node),
                (None, true) => {}
            }
            self.http_fields(&at, e.expected_status, e.timeout_seconds, e.response_regex.as_deref());
            self.weight(format!("{}.weight", at), e.weight);
        }

        for (i, o) in bc.output_checks.iter().enumerate() {
            let at = format!("{}.output_checks[{}]", base, i);
            if o.match_type == MatchType::Regex {
                self.regex(format!("{}.pattern", at), &o.pattern);
            }
            self.weight(format!("{}.weight", at), o.weight);
        }
    }

    fn http_fields(&mut self, at: &str, status: u16, timeout: u32, regex: Option<&str>) {
        if !(100..=599).contains(&status) {
            self.push(
                format!("{}.expected_status", at),
                format!("must be an HTTP status code, got {}", status),
            );
        }
        if !(1..=60).contains(&timeout) {
            self.push(
                format!("{}.timeout_seconds", at),
                format!("must be between 1 and 60 seconds, got {}", timeout),
            );
        }
        if let Some(pattern) = regex {
            self.regex(format!("{}.response_regex", at), pattern);
        }
    }

    fn handlers(&mut self) {
        let spec = self.spec;
        if !spec.handler_contracts.is_empty() && !spec.features.handlers {
            self.push(
                "handler_contracts",
                "handler contracts present but features.handlers is false",
            );
        }
        for (i, h) in spec.handler_contracts.iter().enumerate() {
            let at = format!("handler_contracts[{}]", i);
            self.selector(format!("{}.node_selector", at), &h.node_selector);
            self.weight(format!("{}.weight", at), h.weight);
            for (j, trigger) in h.trigger_conditions.iter().enumerate() {
                if let Trigger::VariableChanged(var) = trigger {
                    if !self.variables.contains(var.as_str()) {
                        self.push(
                            format!("{}.trigger_conditions[{}].variable_changed", at, j),
                            format!(
                                "handler '{}' trigger references undefined variable '{}'",
                                h.handler_name, var
                            ),
                        );
                    }
                }
            }
        }
    }

    fn vault(&mut self) {
        let spec = self.spec;
        match (&spec.vault, spec.features.vault) {
            (Some(_), false) => self.push("vault", "vault spec present but features.vault is false"),
            (None, true) => self.push("vault", "features.vault is true but no vault spec is given"),
            (Some(vault), true) => {
                for var in &vault.vaulted_variables {
                    if !self.variables.contains(var.as_str()) {
                        self.push(
                            "vault.vaulted_variables",
                            format!("references unknown variable '{}'", var),
                        );
                    }
                }
            }
            (None, false) => {}
        }
    }
}

/// Collect every semantic issue in `spec`. An empty list means valid.
pub fn validate(spec: &AssignmentSpec) -> Vec<SpecIssue> {
    let mut v = Validator::new(spec);
    v.root();
    v.topology();
    v.entrypoints();
    v.variables();
    v.overlays();
    v.behavioral();
    v.handlers();
    v.vault();
    v.issues
}

/// [`validate`], turning any issue into [`HammerError::InvalidSpec`].
pub fn validate_spec(spec: &AssignmentSpec) -> Result<()> {
    let issues = validate(spec);
    if issues.is_empty() {
        Ok(())
    } else {
        Err(HammerError::InvalidSpec(issues))
    }
}
