//! Per-phase variable resolution.
//!
//! Each declared variable starts at its student default and is overridden,
//! in increasing precedence, by the overlay's `inventory_vars`, `group_vars`,
//! `host_vars`, then `extra_vars`. Group and host maps are walked in
//! lexicographic key order, so when several groups (or hosts) set the same
//! variable the alphabetically last one wins.

use crate::error::{HammerError, Result};
use crate::phase::ExecutionPhase;
use crate::spec::{AssignmentSpec, PhaseOverlay, ScopedVarMap, VarMap, VariableContract};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Overlay layer that supplied a resolved value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VariableSource {
    Default,
    InventoryVars,
    GroupVars,
    HostVars,
    ExtraVars,
}

impl VariableSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            VariableSource::Default => "default",
            VariableSource::InventoryVars => "inventory_vars",
            VariableSource::GroupVars => "group_vars",
            VariableSource::HostVars => "host_vars",
            VariableSource::ExtraVars => "extra_vars",
        }
    }
}

impl fmt::Display for VariableSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolvedVariable {
    pub name: String,
    pub value: Value,
    pub source: VariableSource,
}

/// Resolved variables for one phase plus the raw overlay maps they came from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseVariablePlan {
    pub phase: ExecutionPhase,
    pub resolved: BTreeMap<String, ResolvedVariable>,
    pub inventory_vars: VarMap,
    pub group_vars: ScopedVarMap,
    pub host_vars: ScopedVarMap,
    pub extra_vars: VarMap,
}

impl PhaseVariablePlan {
    pub fn get(&self, name: &str) -> Option<&ResolvedVariable> {
        self.resolved.get(name)
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.resolved.get(name).map(|r| &r.value)
    }

    /// Look up a variable that validated input guarantees exists.
    pub fn require(&self, name: &str, referenced_by: &str) -> Result<&ResolvedVariable> {
        self.resolved
            .get(name)
            .ok_or_else(|| HammerError::UnresolvedVariable {
                variable: name.to_string(),
                referenced_by: referenced_by.to_string(),
            })
    }
}

/// Resolve a single variable against an overlay.
pub fn resolve_variable(contract: &VariableContract, overlay: Option<&PhaseOverlay>) -> ResolvedVariable {
    let name = contract.name.as_str();
    let mut value = &contract.defaults.student;
    let mut source = VariableSource::Default;

    if let Some(overlay) = overlay {
        if let Some(v) = overlay.inventory_vars.get(name) {
            value = v;
            source = VariableSource::InventoryVars;
        }

        // BTreeMap iteration is lexicographic; the last matching group wins.
        for vars in overlay.group_vars.values() {
            if let Some(v) = vars.get(name) {
                value = v;
                source = VariableSource::GroupVars;
            }
        }

        for vars in overlay.host_vars.values() {
            if let Some(v) = vars.get(name) {
                value = v;
                source = VariableSource::HostVars;
            }
        }

        if let Some(v) = overlay.extra_vars.get(name) {
            value = v;
            source = VariableSource::ExtraVars;
        }
    }

    ResolvedVariable {
        name: name.to_string(),
        value: value.clone(),
        source,
    }
}

/// Resolve every declared variable for `phase`.
///
/// Idempotence reads the mutation overlay. A specification without variable
/// contracts resolves to an empty map.
pub fn resolve_phase(spec: &AssignmentSpec, phase: ExecutionPhase) -> PhaseVariablePlan {
    let overlay = spec.phase_overlays.get(phase.overlay_phase());

    let resolved = spec
        .variable_contracts
        .iter()
        .map(|contract| (contract.name.clone(), resolve_variable(contract, overlay)))
        .collect();

    let (inventory_vars, group_vars, host_vars, extra_vars) = match overlay {
        Some(o) => (
            o.inventory_vars.clone(),
            o.group_vars.clone(),
            o.host_vars.clone(),
            o.extra_vars.clone(),
        ),
        None => Default::default(),
    };

    PhaseVariablePlan {
        phase,
        resolved,
        inventory_vars,
        group_vars,
        host_vars,
        extra_vars,
    }
}

/// [`resolve_phase`] for a phase given by name.
pub fn resolve_phase_by_name(spec: &AssignmentSpec, phase: &str) -> Result<PhaseVariablePlan> {
    Ok(resolve_phase(spec, phase.parse()?))
}
