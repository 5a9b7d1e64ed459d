//! Variable contracts, their bindings, and precedence scenarios.

use super::topology::Protocol;
use crate::phase::OverlayPhase;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VarType {
    Int,
    String,
    Bool,
    List,
    Dict,
}

/// Overlay layer a grading run may set a variable through.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OverlayKind {
    InventoryVars,
    GroupVars,
    HostVars,
    ExtraVars,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OverlayTarget {
    pub overlay_kind: OverlayKind,
    pub target_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariableDefaults {
    pub student: Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BindingsMode {
    #[default]
    All,
    Any,
}

fn default_zone() -> String {
    "public".to_string()
}

fn default_address() -> String {
    "0.0.0.0".to_string()
}

/// Observable system state a variable's value must show up in.
///
/// Serialized as `{"type": "...", "target": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "target", rename_all = "snake_case")]
pub enum BindingTarget {
    ServiceListenPort {
        service: String,
        #[serde(default)]
        protocol: Protocol,
        #[serde(default = "default_address")]
        address: String,
    },
    FirewallPortOpen {
        #[serde(default = "default_zone")]
        zone: String,
        #[serde(default)]
        protocol: Protocol,
    },
    TemplateContains {
        path: String,
        pattern: String,
    },
    FileContains {
        path: String,
        pattern: String,
    },
    FileExists {
        path: String,
    },
    FileMode {
        path: String,
        mode: String,
    },
    FileOwner {
        path: String,
        owner: String,
        group: String,
    },
}

impl BindingTarget {
    pub fn kind(&self) -> &'static str {
        match self {
            BindingTarget::ServiceListenPort { .. } => "service_listen_port",
            BindingTarget::FirewallPortOpen { .. } => "firewall_port_open",
            BindingTarget::TemplateContains { .. } => "template_contains",
            BindingTarget::FileContains { .. } => "file_contains",
            BindingTarget::FileExists { .. } => "file_exists",
            BindingTarget::FileMode { .. } => "file_mode",
            BindingTarget::FileOwner { .. } => "file_owner",
        }
    }
}

pub(crate) fn default_weight() -> f64 {
    1.0
}

/// A weighted assertion on a variable's observable effect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Binding {
    #[serde(flatten)]
    pub target: BindingTarget,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

/// A variable the student playbook must honour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariableContract {
    pub name: String,
    #[serde(rename = "type")]
    pub var_type: VarType,
    pub defaults: VariableDefaults,
    #[serde(default)]
    pub allowed_values: Vec<Value>,
    #[serde(default)]
    pub grading_overlay_targets: Vec<OverlayTarget>,
    #[serde(default)]
    pub binding_targets: Vec<Binding>,
    #[serde(default)]
    pub bindings_mode: BindingsMode,
}

/// Layers a precedence scenario can stack.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PrecedenceLayer {
    RoleDefault,
    RoleVars,
    PlayVars,
    VarsFiles,
    InventoryVars,
    GroupVars,
    HostVars,
    ExtraVars,
}

/// Documents which layer must win when a variable is set in several places.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrecedenceScenario {
    pub name: String,
    pub variable: String,
    pub layers: Vec<PrecedenceLayer>,
    pub expected_winner: PrecedenceLayer,
    #[serde(default)]
    pub bindings_to_verify: Vec<usize>,
    #[serde(default = "default_scenario_phase")]
    pub phase: OverlayPhase,
}

fn default_scenario_phase() -> OverlayPhase {
    OverlayPhase::Baseline
}
