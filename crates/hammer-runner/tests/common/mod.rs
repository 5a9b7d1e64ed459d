//! Shared fixtures for runner integration tests.

#![allow(dead_code)]

use hammer_core::{build_execution_plan, load_spec, AssignmentSpec, ExecutionPlan, NetworkPlan};
use std::path::{Path, PathBuf};

pub fn fixture_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../hammer-core/tests/fixtures/webapp.yaml")
}

pub fn webapp() -> AssignmentSpec {
    load_spec(&fixture_path()).expect("load webapp fixture")
}

pub struct Planned {
    pub spec: AssignmentSpec,
    pub plan: ExecutionPlan,
    pub network: NetworkPlan,
}

pub fn planned(spec: AssignmentSpec) -> Planned {
    let plan = build_execution_plan(&spec).expect("build plan");
    let network = NetworkPlan::from_spec(&spec);
    Planned {
        spec,
        plan,
        network,
    }
}

pub fn write(path: &Path, content: &str) {
    std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    std::fs::write(path, content).expect("write file");
}

pub fn read_json(path: &Path) -> serde_json::Value {
    let content = std::fs::read_to_string(path).unwrap_or_else(|e| panic!("read {:?}: {}", path, e));
    serde_json::from_str(&content).expect("parse json")
}

pub fn read_yaml(path: &Path) -> serde_yaml::Value {
    let content = std::fs::read_to_string(path).unwrap_or_else(|e| panic!("read {:?}: {}", path, e));
    serde_yaml::from_str(&content).expect("parse yaml")
}
