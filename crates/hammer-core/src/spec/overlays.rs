//! Per-phase grading overlays and phase-level policies.

use crate::phase::OverlayPhase;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Flat variable map.
pub type VarMap = BTreeMap<String, Value>;

/// Variable maps keyed by group or host name.
pub type ScopedVarMap = BTreeMap<String, VarMap>;

pub const REBOOT_TIMEOUT_RANGE: std::ops::RangeInclusive<u64> = 30..=600;
pub const REBOOT_POLL_RANGE: std::ops::RangeInclusive<u64> = 1..=30;

fn default_reboot_timeout() -> u64 {
    120
}

fn default_poll_interval() -> u64 {
    5
}

/// Reboot nodes after converge and before verification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RebootConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Nodes to reboot; all topology nodes when absent.
    #[serde(default)]
    pub nodes: Option<Vec<String>>,
    /// Seconds to wait for a node to come back.
    #[serde(default = "default_reboot_timeout")]
    pub timeout: u64,
    /// Seconds between reachability checks.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
}

impl Default for RebootConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            nodes: None,
            timeout: default_reboot_timeout(),
            poll_interval: default_poll_interval(),
        }
    }
}

/// Converge failures a phase expects and tolerates.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FailurePolicy {
    #[serde(default)]
    pub allow_failures: bool,
    #[serde(default)]
    pub max_failures: Option<u32>,
    #[serde(default)]
    pub expected_patterns: Option<Vec<String>>,
}

/// Variable overrides and policies for one overlay phase.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PhaseOverlay {
    #[serde(default)]
    pub inventory_vars: VarMap,
    #[serde(default)]
    pub group_vars: ScopedVarMap,
    #[serde(default)]
    pub host_vars: ScopedVarMap,
    #[serde(default)]
    pub extra_vars: VarMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reboot: Option<RebootConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_policy: Option<FailurePolicy>,
}

impl PhaseOverlay {
    /// Whether any of the four variable layers sets `name`.
    pub fn sets(&self, name: &str) -> bool {
        self.inventory_vars.contains_key(name)
            || self.extra_vars.contains_key(name)
            || self.group_vars.values().any(|vars| vars.contains_key(name))
            || self.host_vars.values().any(|vars| vars.contains_key(name))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PhaseOverlays {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<PhaseOverlay>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutation: Option<PhaseOverlay>,
}

impl PhaseOverlays {
    pub fn get(&self, phase: OverlayPhase) -> Option<&PhaseOverlay> {
        match phase {
            OverlayPhase::Baseline => self.baseline.as_ref(),
            OverlayPhase::Mutation => self.mutation.as_ref(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (OverlayPhase, &PhaseOverlay)> {
        [OverlayPhase::Baseline, OverlayPhase::Mutation]
            .into_iter()
            .filter_map(move |p| self.get(p).map(|o| (p, o)))
    }
}

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdempotenceEnforcement {
    #[serde(default = "yes")]
    pub require_changed_zero: bool,
    #[serde(default = "yes")]
    pub require_no_handlers: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdempotencePolicy {
    #[serde(default = "yes")]
    pub required: bool,
    #[serde(default)]
    pub allowed_changes: Option<Vec<String>>,
    #[serde(default)]
    pub enforcement: Option<IdempotenceEnforcement>,
}

impl Default for IdempotencePolicy {
    fn default() -> Self {
        Self {
            required: true,
            allowed_changes: None,
            enforcement: None,
        }
    }
}

/// Ansible Vault material for assignments with the vault feature enabled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VaultSpec {
    pub vault_password: String,
    #[serde(default)]
    pub vault_ids: Option<Vec<String>>,
    #[serde(default)]
    pub vaulted_vars_files: Vec<String>,
    #[serde(default)]
    pub vaulted_variables: Vec<String>,
    #[serde(default)]
    pub bindings_to_verify: Vec<usize>,
}
