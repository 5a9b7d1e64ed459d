//! The fixed three-phase grading lifecycle.

use crate::error::{HammerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the three grading phases, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    Baseline,
    Mutation,
    Idempotence,
}

/// Phases that carry their own overlay data in a specification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OverlayPhase {
    Baseline,
    Mutation,
}

impl ExecutionPhase {
    /// All phases in the order a plan runs them.
    pub const ALL: [ExecutionPhase; 3] = [
        ExecutionPhase::Baseline,
        ExecutionPhase::Mutation,
        ExecutionPhase::Idempotence,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionPhase::Baseline => "baseline",
            ExecutionPhase::Mutation => "mutation",
            ExecutionPhase::Idempotence => "idempotence",
        }
    }

    /// Overlay whose variables this phase converges with.
    ///
    /// Idempotence re-applies the mutated configuration, so it reads the
    /// mutation overlay rather than falling back to defaults.
    pub fn overlay_phase(&self) -> OverlayPhase {
        match self {
            ExecutionPhase::Baseline => OverlayPhase::Baseline,
            ExecutionPhase::Mutation | ExecutionPhase::Idempotence => OverlayPhase::Mutation,
        }
    }
}

impl OverlayPhase {
    pub const ALL: [OverlayPhase; 2] = [OverlayPhase::Baseline, OverlayPhase::Mutation];

    /// The execution phase that owns this overlay.
    pub fn execution_phase(&self) -> ExecutionPhase {
        match self {
            OverlayPhase::Baseline => ExecutionPhase::Baseline,
            OverlayPhase::Mutation => ExecutionPhase::Mutation,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OverlayPhase::Baseline => "baseline",
            OverlayPhase::Mutation => "mutation",
        }
    }
}

impl fmt::Display for ExecutionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for OverlayPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionPhase {
    type Err = HammerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "baseline" => Ok(ExecutionPhase::Baseline),
            "mutation" => Ok(ExecutionPhase::Mutation),
            "idempotence" => Ok(ExecutionPhase::Idempotence),
            other => Err(HammerError::UnknownPhase(other.to_string())),
        }
    }
}

/// One value per execution phase.
///
/// Used instead of a string-keyed map so that a lookup by phase can never miss.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PerPhase<T> {
    pub baseline: T,
    pub mutation: T,
    pub idempotence: T,
}

impl<T> PerPhase<T> {
    /// Build a value for every phase, in execution order.
    pub fn build(mut f: impl FnMut(ExecutionPhase) -> T) -> Self {
        Self {
            baseline: f(ExecutionPhase::Baseline),
            mutation: f(ExecutionPhase::Mutation),
            idempotence: f(ExecutionPhase::Idempotence),
        }
    }

    /// Fallible [`PerPhase::build`]; stops at the first error.
    pub fn try_build(mut f: impl FnMut(ExecutionPhase) -> Result<T>) -> Result<Self> {
        Ok(Self {
            baseline: f(ExecutionPhase::Baseline)?,
            mutation: f(ExecutionPhase::Mutation)?,
            idempotence: f(ExecutionPhase::Idempotence)?,
        })
    }

    pub fn get(&self, phase: ExecutionPhase) -> &T {
        match phase {
            ExecutionPhase::Baseline => &self.baseline,
            ExecutionPhase::Mutation => &self.mutation,
            ExecutionPhase::Idempotence => &self.idempotence,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ExecutionPhase, &T)> {
        ExecutionPhase::ALL.into_iter().map(move |p| (p, self.get(p)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotence_maps_to_mutation_overlay() {
        assert_eq!(ExecutionPhase::Baseline.overlay_phase(), OverlayPhase::Baseline);
        assert_eq!(ExecutionPhase::Mutation.overlay_phase(), OverlayPhase::Mutation);
        assert_eq!(ExecutionPhase::Idempotence.overlay_phase(), OverlayPhase::Mutation);
        for overlay in OverlayPhase::ALL {
            assert_eq!(overlay.execution_phase().overlay_phase(), overlay);
        }
    }

    #[test]
    fn test_parse_phase_names() {
        for phase in ExecutionPhase::ALL {
            let parsed: ExecutionPhase = phase.as_str().parse().expect("parse phase");
            assert_eq!(parsed, phase);
        }
        let err = "teardown".parse::<ExecutionPhase>().unwrap_err();
        assert!(matches!(err, HammerError::UnknownPhase(name) if name == "teardown"));
    }

    #[test]
    fn test_phase_order_is_execution_order() {
        let mut phases = vec![
            ExecutionPhase::Idempotence,
            ExecutionPhase::Baseline,
            ExecutionPhase::Mutation,
        ];
        phases.sort();
        assert_eq!(phases, ExecutionPhase::ALL.to_vec());
    }

    #[test]
    fn test_per_phase_serializes_with_phase_keys() {
        let values = PerPhase {
            baseline: 1,
            mutation: 2,
            idempotence: 3,
        };
        let json = serde_json::to_value(&values).expect("serialize");
        assert_eq!(json["idempotence"], 3);
        assert_eq!(*values.get(ExecutionPhase::Mutation), 2);
        let order: Vec<_> = values.iter().map(|(p, _)| p).collect();
        assert_eq!(order, ExecutionPhase::ALL.to_vec());
    }
}
