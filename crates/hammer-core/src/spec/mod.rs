//! In-memory model of an assignment specification.
//!
//! The model is read-only input to everything else in this crate. Loading
//! checks structure only; cross-reference checks live in [`crate::validate`].

pub mod contracts;
pub mod overlays;
pub mod topology;
pub mod variables;

pub use contracts::*;
pub use overlays::*;
pub use topology::*;
pub use variables::*;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

pub const SUPPORTED_SPEC_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureFlags {
    #[serde(default)]
    pub vault: bool,
    #[serde(default)]
    pub selinux: bool,
    #[serde(default = "enabled")]
    pub handlers: bool,
    #[serde(default)]
    pub reachability: bool,
}

fn enabled() -> bool {
    true
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            vault: false,
            selinux: false,
            handlers: true,
            reachability: false,
        }
    }
}

/// File shipped to students alongside the generated bundle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProvidedFile {
    pub source: String,
    pub destination: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entrypoints {
    pub playbook_path: String,
    #[serde(default)]
    pub required_roles: Vec<String>,
    #[serde(default)]
    pub required_files: Vec<String>,
    #[serde(default)]
    pub provided_files: Vec<ProvidedFile>,
}

fn default_provider() -> String {
    "libvirt".to_string()
}

fn default_os() -> String {
    "almalinux9".to_string()
}

/// Root of an assignment specification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssignmentSpec {
    pub assignment_id: String,
    pub assignment_version: String,
    pub spec_version: String,
    pub seed: i64,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_os")]
    pub os: String,
    #[serde(default)]
    pub features: FeatureFlags,
    pub topology: Topology,
    pub entrypoints: Entrypoints,
    #[serde(default)]
    pub variable_contracts: Vec<VariableContract>,
    #[serde(default)]
    pub precedence_scenarios: Vec<PrecedenceScenario>,
    #[serde(default)]
    pub behavioral_contracts: BehavioralContracts,
    #[serde(default)]
    pub handler_contracts: Vec<HandlerContract>,
    #[serde(default)]
    pub idempotence: IdempotencePolicy,
    #[serde(default)]
    pub phase_overlays: PhaseOverlays,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault: Option<VaultSpec>,
}

impl AssignmentSpec {
    /// Parse a specification from YAML text.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn variable(&self, name: &str) -> Option<&VariableContract> {
        self.variable_contracts.iter().find(|v| v.name == name)
    }
}

/// Read and parse a specification file.
pub fn load_spec(path: &Path) -> Result<AssignmentSpec> {
    let content = std::fs::read_to_string(path)?;
    let spec = AssignmentSpec::from_yaml_str(&content)?;
    debug!(
        path = %path.display(),
        assignment_id = %spec.assignment_id,
        nodes = spec.topology.nodes.len(),
        variables = spec.variable_contracts.len(),
        "loaded specification"
    );
    Ok(spec)
}
