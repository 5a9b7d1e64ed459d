//! Deterministic private network layout derived from the assignment seed.

use crate::spec::AssignmentSpec;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// First host octet handed to nodes; lower addresses are left for the gateway.
const FIRST_NODE_OCTET: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkPlan {
    pub cidr: String,
    pub gateway: String,
    pub netmask: String,
    /// Node name to IPv4 address.
    pub node_ip_map: BTreeMap<String, String>,
}

impl NetworkPlan {
    /// `192.168.<x>.0/24` where `x` is derived from the seed; nodes get
    /// `.10`, `.11`, ... in declaration order.
    pub fn from_spec(spec: &AssignmentSpec) -> Self {
        let octet = subnet_octet(spec.seed);
        let prefix = format!("192.168.{}", octet);

        let node_ip_map = spec
            .topology
            .nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.name.clone(), format!("{}.{}", prefix, FIRST_NODE_OCTET + i)))
            .collect();

        Self {
            cidr: format!("{}.0/24", prefix),
            gateway: format!("{}.1", prefix),
            netmask: "255.255.255.0".to_string(),
            node_ip_map,
        }
    }

    pub fn ip_of(&self, node: &str) -> Option<&str> {
        self.node_ip_map.get(node).map(String::as_str)
    }
}

/// Subnet octet in `1..=254`: first byte of sha256 of the decimal seed.
pub fn subnet_octet(seed: i64) -> u8 {
    let digest = Sha256::digest(seed.to_string().as_bytes());
    (digest[0] % 254) + 1
}
