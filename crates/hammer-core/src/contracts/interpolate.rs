//! Placeholder substitution and symbolic port resolution.

use crate::error::{HammerError, Result};
use crate::spec::PortRef;
use crate::variables::PhaseVariablePlan;
use serde_json::Value;

/// Text form of a variable value as it appears inside a URL or pattern.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Replace `{{ name }}` and `{{name}}` with each resolved variable's value.
pub fn interpolate(text: &str, vars: &PhaseVariablePlan) -> String {
    if !text.contains("{{") {
        return text.to_string();
    }
    let mut out = text.to_string();
    for (name, resolved) in &vars.resolved {
        let rendered = render_value(&resolved.value);
        out = out
            .replace(&format!("{{{{ {} }}}}", name), &rendered)
            .replace(&format!("{{{{{}}}}}", name), &rendered);
    }
    out
}

/// Replace the `{{ value }}` placeholder used by binding targets.
pub fn substitute_value(text: &str, value: &Value) -> String {
    let rendered = render_value(value);
    text.replace("{{ value }}", &rendered)
        .replace("{{value}}", &rendered)
}

/// Resolve a literal or variable-backed port.
pub fn resolve_port(port: &PortRef, vars: &PhaseVariablePlan, referenced_by: &str) -> Result<u16> {
    match port {
        PortRef::Literal(p) => Ok(*p),
        PortRef::Var { var } => {
            let resolved = vars.require(var, referenced_by)?;
            port_from_value(&resolved.value).ok_or_else(|| HammerError::InvalidPortValue {
                variable: var.clone(),
                value: resolved.value.to_string(),
            })
        }
    }
}

fn port_from_value(value: &Value) -> Option<u16> {
    let n = match value {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.trim().parse::<u64>().ok()?,
        _ => return None,
    };
    u16::try_from(n).ok().filter(|p| *p != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::ExecutionPhase;
    use crate::variables::{ResolvedVariable, VariableSource};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn vars(pairs: &[(&str, Value)]) -> PhaseVariablePlan {
        let resolved = pairs
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    ResolvedVariable {
                        name: name.to_string(),
                        value: value.clone(),
                        source: VariableSource::ExtraVars,
                    },
                )
            })
            .collect();
        PhaseVariablePlan {
            phase: ExecutionPhase::Mutation,
            resolved,
            inventory_vars: BTreeMap::new(),
            group_vars: BTreeMap::new(),
            host_vars: BTreeMap::new(),
            extra_vars: BTreeMap::new(),
        }
    }

    #[test]
    fn test_interpolate_both_spellings() {
        let v = vars(&[("http_port", json!(9090)), ("app_name", json!("shop"))]);
        assert_eq!(
            interpolate("http://web1:{{ http_port }}/{{app_name}}/", &v),
            "http://web1:9090/shop/"
        );
    }

    #[test]
    fn test_interpolate_leaves_unknown_placeholders() {
        let v = vars(&[("http_port", json!(9090))]);
        assert_eq!(interpolate("{{ missing }}", &v), "{{ missing }}");
        assert_eq!(interpolate("plain text", &v), "plain text");
    }

    #[test]
    fn test_substitute_value_placeholder() {
        assert_eq!(
            substitute_value("listen {{ value }};", &json!(8080)),
            "listen 8080;"
        );
        assert_eq!(substitute_value("user={{value}}", &json!("deploy")), "user=deploy");
    }

    #[test]
    fn test_resolve_port_from_variable() {
        let v = vars(&[("http_port", json!(9090)), ("text_port", json!("8443"))]);
        let by_var = PortRef::Var {
            var: "http_port".to_string(),
        };
        assert_eq!(resolve_port(&by_var, &v, "firewall[0]").expect("port"), 9090);
        let by_text = PortRef::Var {
            var: "text_port".to_string(),
        };
        assert_eq!(resolve_port(&by_text, &v, "firewall[0]").expect("port"), 8443);
        assert_eq!(resolve_port(&PortRef::Literal(22), &v, "x").expect("port"), 22);
    }

    #[test]
    fn test_resolve_port_rejects_bad_values() {
        let v = vars(&[("flag", json!(true)), ("big", json!(70000))]);
        for name in ["flag", "big"] {
            let port = PortRef::Var {
                var: name.to_string(),
            };
            let err = resolve_port(&port, &v, "reachability[0]").unwrap_err();
            assert!(matches!(err, HammerError::InvalidPortValue { .. }));
        }

        let missing = PortRef::Var {
            var: "nope".to_string(),
        };
        let err = resolve_port(&missing, &v, "reachability[0]").unwrap_err();
        assert!(matches!(err, HammerError::UnresolvedVariable { .. }));
    }
}
