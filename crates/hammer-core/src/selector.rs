//! Resolve node selectors against a topology.

use crate::spec::{NodeSelector, Topology};

/// Resolve `selector` to an ordered list of host names.
///
/// A host selector yields that host. A group selector yields every node
/// carrying the group, in topology declaration order. A group nobody
/// belongs to yields an empty list; callers treat that as "applies to no host".
pub fn resolve(selector: &NodeSelector, topology: &Topology) -> Vec<String> {
    match selector {
        NodeSelector::Host(host) => vec![host.clone()],
        NodeSelector::Group(group) => topology
            .nodes
            .iter()
            .filter(|node| node.in_group(group))
            .map(|node| node.name.clone())
            .collect(),
    }
}

/// Resolve an optional selector; `None` resolves to `None`.
pub fn resolve_opt(selector: Option<&NodeSelector>, topology: &Topology) -> Option<Vec<String>> {
    selector.map(|s| resolve(s, topology))
}
