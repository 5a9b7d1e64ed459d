//! Nodes, groups and the selectors that address them.

use serde::{Deserialize, Serialize};

/// VM resource request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resources {
    pub cpu: u32,
    pub ram_mb: u32,
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            cpu: 1,
            ram_mb: 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

/// Host-to-guest port forward.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForwardedPort {
    pub host_port: u16,
    pub guest_port: u16,
    #[serde(default)]
    pub protocol: Protocol,
}

/// A single VM in the assignment topology.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub name: String,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub resources: Resources,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forwarded_ports: Vec<ForwardedPort>,
}

impl Node {
    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    Reachability,
    Ordering,
}

/// Directed edge between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dependency {
    pub from_host: String,
    pub to_host: String,
    pub kind: DependencyKind,
}

fn default_domain() -> String {
    "lab.local".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Topology {
    #[serde(default = "default_domain")]
    pub domain: String,
    pub nodes: Vec<Node>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forwarded_ports: Vec<ForwardedPort>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,
}

impl Topology {
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn has_node(&self, name: &str) -> bool {
        self.node(name).is_some()
    }

    /// Whether at least one node carries `group`.
    pub fn has_group(&self, group: &str) -> bool {
        self.nodes.iter().any(|n| n.in_group(group))
    }

    /// Node names in declaration order.
    pub fn node_names(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.name.clone()).collect()
    }
}

/// Scope of a contract check: one host, or every member of a group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "RawSelector", into = "RawSelector")]
pub enum NodeSelector {
    Host(String),
    Group(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSelector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    group: Option<String>,
}

impl TryFrom<RawSelector> for NodeSelector {
    type Error = String;

    fn try_from(raw: RawSelector) -> Result<Self, Self::Error> {
        match (raw.host, raw.group) {
            (Some(host), None) => Ok(NodeSelector::Host(host)),
            (None, Some(group)) => Ok(NodeSelector::Group(group)),
            (Some(_), Some(_)) => Err("node_selector must set host or group, not both".to_string()),
            (None, None) => Err("node_selector must set one of host or group".to_string()),
        }
    }
}

impl From<NodeSelector> for RawSelector {
    fn from(selector: NodeSelector) -> Self {
        match selector {
            NodeSelector::Host(host) => RawSelector {
                host: Some(host),
                group: None,
            },
            NodeSelector::Group(group) => RawSelector {
                host: None,
                group: Some(group),
            },
        }
    }
}

impl NodeSelector {
    pub fn host(name: impl Into<String>) -> Self {
        NodeSelector::Host(name.into())
    }

    pub fn group(name: impl Into<String>) -> Self {
        NodeSelector::Group(name.into())
    }
}
