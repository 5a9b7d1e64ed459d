//! Error taxonomy for the HAMMER core library.

use crate::validate::SpecIssue;

/// Errors raised while loading a specification or building a plan from it.
///
/// Converge and test failures are never errors; they travel as data inside
/// [`crate::results::ConvergeResult`] and [`crate::results::TestResult`].
#[derive(Debug, thiserror::Error)]
pub enum HammerError {
    #[error("unknown execution phase: {0}")]
    UnknownPhase(String),

    #[error("variable {variable} referenced by {referenced_by} was not resolved")]
    UnresolvedVariable {
        variable: String,
        referenced_by: String,
    },

    #[error("variable {variable} resolved to {value}, which is not a valid port")]
    InvalidPortValue { variable: String, value: String },

    #[error("specification has {} issue(s): {}", .0.len(), summarize(.0))]
    InvalidSpec(Vec<SpecIssue>),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn summarize(issues: &[SpecIssue]) -> String {
    issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for HAMMER core operations.
pub type Result<T> = std::result::Result<T, HammerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_phase_display() {
        let err = HammerError::UnknownPhase("teardown".to_string());
        assert_eq!(err.to_string(), "unknown execution phase: teardown");
    }

    #[test]
    fn test_unresolved_variable_display() {
        let err = HammerError::UnresolvedVariable {
            variable: "http_port".to_string(),
            referenced_by: "firewall[0]".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("http_port"));
        assert!(msg.contains("firewall[0]"));
    }

    #[test]
    fn test_invalid_spec_lists_paths() {
        let err = HammerError::InvalidSpec(vec![
            SpecIssue::new("topology.nodes[1].name", "duplicate node name 'web1'"),
            SpecIssue::new("phase_overlays.baseline", "required when variable_contracts exist"),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("2 issue(s)"));
        assert!(msg.contains("topology.nodes[1].name"));
        assert!(msg.contains("phase_overlays.baseline"));
    }
}
