//! Inventory and ansible.cfg rendering.

use hammer_core::spec::{Topology, VarMap};
use hammer_core::NetworkPlan;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

pub const INVENTORY_PATH: &str = "inventory/hosts.yml";

type HostVars = BTreeMap<String, Value>;

#[derive(Debug, Default, Serialize, PartialEq)]
pub struct InventoryGroup {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub hosts: BTreeMap<String, HostVars>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, InventoryGroup>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub vars: BTreeMap<String, Value>,
}

/// YAML inventory: every node under `all.hosts` with its address, one child
/// group per topology group, and inventory-level variables under `all.vars`.
#[derive(Debug, Serialize, PartialEq)]
pub struct Inventory {
    pub all: InventoryGroup,
}

impl Inventory {
    pub fn new(topology: &Topology, network: &NetworkPlan, vars: &VarMap) -> Self {
        let mut all = InventoryGroup {
            vars: vars.clone(),
            ..Default::default()
        };

        for node in &topology.nodes {
            let mut host = HostVars::new();
            if let Some(ip) = network.ip_of(&node.name) {
                host.insert("ansible_host".to_string(), Value::String(ip.to_string()));
            }
            all.hosts.insert(node.name.clone(), host);

            for group in &node.groups {
                all.children
                    .entry(group.clone())
                    .or_default()
                    .hosts
                    .insert(node.name.clone(), HostVars::new());
            }
        }

        Self { all }
    }

    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

pub fn ansible_cfg(roles_path: Option<&str>) -> String {
    let mut cfg = format!(
        "[defaults]\ninventory = {}\nhost_key_checking = False\nretry_files_enabled = False\n",
        INVENTORY_PATH
    );
    if let Some(roles) = roles_path {
        cfg.push_str(&format!("roles_path = {}\n", roles));
    }
    cfg
}
