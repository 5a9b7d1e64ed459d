//! Declarative behavioral and handler contracts.

use super::topology::{NodeSelector, Protocol};
use super::variables::default_weight;
use crate::phase::ExecutionPhase;
use serde::{Deserialize, Serialize};

/// A port given literally or by the name of a variable holding it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum PortRef {
    Literal(u16),
    Var { var: String },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PackageState {
    #[default]
    Present,
    Absent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackageContract {
    pub name: String,
    pub state: PackageState,
    pub node_selector: NodeSelector,
    #[serde(default)]
    pub phases: Option<Vec<ExecutionPhase>>,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipPackageContract {
    pub name: String,
    #[serde(default)]
    pub state: PackageState,
    #[serde(default)]
    pub python: Option<String>,
    pub node_selector: NodeSelector,
    #[serde(default)]
    pub phases: Option<Vec<ExecutionPhase>>,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceContract {
    pub name: String,
    pub enabled: bool,
    pub running: bool,
    pub node_selector: NodeSelector,
    #[serde(default)]
    pub phases: Option<Vec<ExecutionPhase>>,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserContract {
    pub name: String,
    #[serde(default = "yes")]
    pub exists: bool,
    #[serde(default)]
    pub uid: Option<u32>,
    #[serde(default)]
    pub gid: Option<u32>,
    #[serde(default)]
    pub home: Option<String>,
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default)]
    pub groups: Option<Vec<String>>,
    pub node_selector: NodeSelector,
    #[serde(default)]
    pub phases: Option<Vec<ExecutionPhase>>,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupContract {
    pub name: String,
    #[serde(default = "yes")]
    pub exists: bool,
    #[serde(default)]
    pub gid: Option<u32>,
    pub node_selector: NodeSelector,
    #[serde(default)]
    pub phases: Option<Vec<ExecutionPhase>>,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FirewallPort {
    pub port: PortRef,
    #[serde(default)]
    pub protocol: Protocol,
    pub zone: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FirewallType {
    #[default]
    Firewalld,
    Iptables,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FirewallContract {
    pub open_ports: Vec<FirewallPort>,
    pub node_selector: NodeSelector,
    #[serde(default)]
    pub firewall_type: FirewallType,
    #[serde(default)]
    pub phases: Option<Vec<ExecutionPhase>>,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

/// Expected state of a single path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileItem {
    pub path: String,
    pub present: bool,
    #[serde(default)]
    pub is_directory: bool,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub content_regex: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilesContract {
    pub items: Vec<FileItem>,
    pub node_selector: NodeSelector,
    #[serde(default)]
    pub phases: Option<Vec<ExecutionPhase>>,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReachabilityExpectation {
    Reachable,
    NotReachable,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReachabilityContract {
    pub from_host: String,
    pub to_host: String,
    #[serde(default)]
    pub protocol: Protocol,
    pub port: PortRef,
    pub expectation: ReachabilityExpectation,
    #[serde(default)]
    pub phases: Option<Vec<ExecutionPhase>>,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Head,
}

fn default_status() -> u16 {
    200
}

fn default_http_timeout() -> u32 {
    5
}

fn default_external_timeout() -> u32 {
    10
}

/// HTTP request issued from inside the topology.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpEndpointContract {
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default = "default_status")]
    pub expected_status: u16,
    #[serde(default)]
    pub response_contains: Option<String>,
    #[serde(default)]
    pub response_regex: Option<String>,
    #[serde(default = "default_http_timeout")]
    pub timeout_seconds: u32,
    pub node_selector: NodeSelector,
    #[serde(default)]
    pub phases: Option<Vec<ExecutionPhase>>,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

/// HTTP request issued from the grading host or from another VM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExternalHttpContract {
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default = "default_status")]
    pub expected_status: u16,
    #[serde(default)]
    pub response_contains: Option<String>,
    #[serde(default)]
    pub response_regex: Option<String>,
    #[serde(default = "default_external_timeout")]
    pub timeout_seconds: u32,
    #[serde(default)]
    pub from_host: bool,
    #[serde(default)]
    pub from_node: Option<NodeSelector>,
    #[serde(default)]
    pub phases: Option<Vec<ExecutionPhase>>,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    #[default]
    Contains,
    Regex,
}

/// Pattern expected (or forbidden) in the converge output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputContract {
    pub pattern: String,
    #[serde(default)]
    pub match_type: MatchType,
    #[serde(default = "yes")]
    pub expected: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub phases: Option<Vec<ExecutionPhase>>,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

/// All behavioral contract categories. Absent categories are empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BehavioralContracts {
    pub packages: Vec<PackageContract>,
    pub pip_packages: Vec<PipPackageContract>,
    pub services: Vec<ServiceContract>,
    pub users: Vec<UserContract>,
    pub groups: Vec<GroupContract>,
    pub firewall: Vec<FirewallContract>,
    pub files: Vec<FilesContract>,
    pub reachability: Vec<ReachabilityContract>,
    pub http_endpoints: Vec<HttpEndpointContract>,
    pub external_http: Vec<ExternalHttpContract>,
    pub output_checks: Vec<OutputContract>,
}

// ----------------------------------------------------------------------------
// Handlers
// ----------------------------------------------------------------------------

/// Change that should fire a handler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    FileChanged(String),
    TemplateChanged(String),
    VariableChanged(String),
}

/// Situation in which a handler must stay quiet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NonTrigger {
    NoopRerun(bool),
    UnrelatedFileChanged(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HandlerAction {
    Restart,
    Reload,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandlerTarget {
    pub service: String,
    pub action: HandlerAction,
}

/// How many times a handler may run in one converge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedRuns {
    Zero,
    AtLeastOnce,
    ExactlyOnce,
}

impl ExpectedRuns {
    pub fn satisfied_by(&self, runs: u32) -> bool {
        match self {
            ExpectedRuns::Zero => runs == 0,
            ExpectedRuns::AtLeastOnce => runs >= 1,
            ExpectedRuns::ExactlyOnce => runs == 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExpectedRunsSet {
    pub baseline: ExpectedRuns,
    pub mutation: ExpectedRuns,
    pub idempotence: ExpectedRuns,
}

impl ExpectedRunsSet {
    pub fn for_phase(&self, phase: ExecutionPhase) -> ExpectedRuns {
        match phase {
            ExecutionPhase::Baseline => self.baseline,
            ExecutionPhase::Mutation => self.mutation,
            ExecutionPhase::Idempotence => self.idempotence,
        }
    }
}

fn default_handler_weight() -> f64 {
    2.0
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandlerContract {
    pub handler_name: String,
    pub node_selector: NodeSelector,
    pub handler_target: HandlerTarget,
    #[serde(default)]
    pub trigger_conditions: Vec<Trigger>,
    #[serde(default)]
    pub non_trigger_conditions: Vec<NonTrigger>,
    pub expected_runs: ExpectedRunsSet,
    #[serde(default = "default_handler_weight")]
    pub weight: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_ref_literal_or_var() {
        let literal: PortRef = serde_yaml::from_str("8080").expect("literal port");
        assert_eq!(literal, PortRef::Literal(8080));

        let var: PortRef = serde_yaml::from_str("var: http_port").expect("var port");
        assert_eq!(
            var,
            PortRef::Var {
                var: "http_port".to_string()
            }
        );
    }

    #[test]
    fn test_handler_contract_parses_triggers() {
        let yaml = r#"
handler_name: restart nginx
node_selector:
  group: web
handler_target:
  service: nginx
  action: restart
trigger_conditions:
  - template_changed: /etc/nginx/nginx.conf
  - variable_changed: http_port
non_trigger_conditions:
  - noop_rerun: true
expected_runs:
  baseline: at_least_once
  mutation: exactly_once
  idempotence: zero
"#;
        let handler: HandlerContract = serde_yaml::from_str(yaml).expect("parse handler");
        assert_eq!(handler.weight, 2.0);
        assert_eq!(
            handler.trigger_conditions,
            vec![
                Trigger::TemplateChanged("/etc/nginx/nginx.conf".to_string()),
                Trigger::VariableChanged("http_port".to_string()),
            ]
        );
        assert_eq!(handler.non_trigger_conditions, vec![NonTrigger::NoopRerun(true)]);
        assert_eq!(
            handler.expected_runs.for_phase(ExecutionPhase::Idempotence),
            ExpectedRuns::Zero
        );
    }

    #[test]
    fn test_expected_runs_satisfaction() {
        assert!(ExpectedRuns::Zero.satisfied_by(0));
        assert!(!ExpectedRuns::Zero.satisfied_by(1));
        assert!(ExpectedRuns::AtLeastOnce.satisfied_by(3));
        assert!(!ExpectedRuns::AtLeastOnce.satisfied_by(0));
        assert!(ExpectedRuns::ExactlyOnce.satisfied_by(1));
        assert!(!ExpectedRuns::ExactlyOnce.satisfied_by(2));
    }

    #[test]
    fn test_behavioral_contracts_default_empty() {
        let bc: BehavioralContracts = serde_yaml::from_str("packages: []").expect("parse");
        assert!(bc.services.is_empty());
        assert!(bc.output_checks.is_empty());
    }

    #[test]
    fn test_http_endpoint_defaults() {
        let yaml = "url: http://localhost/\nnode_selector:\n  host: web1\n";
        let http: HttpEndpointContract = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(http.method, HttpMethod::Get);
        assert_eq!(http.expected_status, 200);
        assert_eq!(http.timeout_seconds, 5);
        assert!(http.phases.is_none());
    }
}
