//! Concrete, fully resolved check records handed to test generation.

use crate::phase::ExecutionPhase;
use crate::spec::{
    BindingTarget, ExpectedRuns, FileItem, FirewallType, HandlerAction, HttpMethod, MatchType,
    PackageState, Protocol, ReachabilityExpectation,
};
use crate::variables::VariableSource;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One binding of one variable, checked on one host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BindingCheck {
    pub variable: String,
    /// Position of the binding in the variable's `binding_targets`.
    pub binding_index: usize,
    pub host: String,
    #[serde(flatten)]
    pub target: BindingTarget,
    pub expected_value: Value,
    pub source: VariableSource,
    pub weight: f64,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackageCheck {
    pub host_targets: Vec<String>,
    pub name: String,
    pub state: PackageState,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipPackageCheck {
    pub host_targets: Vec<String>,
    pub name: String,
    pub state: PackageState,
    /// Interpreter whose site-packages are inspected.
    pub python: String,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceCheck {
    pub host_targets: Vec<String>,
    pub name: String,
    pub enabled: bool,
    pub running: bool,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserCheck {
    pub host_targets: Vec<String>,
    pub name: String,
    pub exists: bool,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub home: Option<String>,
    pub shell: Option<String>,
    pub groups: Option<Vec<String>>,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupCheck {
    pub host_targets: Vec<String>,
    pub name: String,
    pub exists: bool,
    pub gid: Option<u32>,
    pub weight: f64,
}

/// Firewall port with any variable reference already substituted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolvedFirewallPort {
    pub port: u16,
    pub protocol: Protocol,
    pub zone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FirewallCheck {
    pub host_targets: Vec<String>,
    pub ports: Vec<ResolvedFirewallPort>,
    pub firewall_type: FirewallType,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileCheck {
    pub host_targets: Vec<String>,
    pub items: Vec<FileItem>,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReachabilityCheck {
    pub from_host: String,
    pub to_host: String,
    pub protocol: Protocol,
    pub port: u16,
    pub expectation: ReachabilityExpectation,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpEndpointCheck {
    /// Nodes the request is issued from.
    pub host_targets: Vec<String>,
    pub url: String,
    pub method: HttpMethod,
    pub expected_status: u16,
    pub response_contains: Option<String>,
    pub response_regex: Option<String>,
    pub timeout_seconds: u32,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExternalHttpCheck {
    pub url: String,
    pub method: HttpMethod,
    pub expected_status: u16,
    pub response_contains: Option<String>,
    pub response_regex: Option<String>,
    pub timeout_seconds: u32,
    /// Issue the request from the grading host.
    pub from_host: bool,
    /// Otherwise, the VMs to issue it from.
    pub from_node_targets: Option<Vec<String>>,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputCheck {
    pub pattern: String,
    pub match_type: MatchType,
    pub expected: bool,
    pub description: Option<String>,
    pub weight: f64,
}

/// Handler expectation for the phase being expanded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandlerCheck {
    pub handler_name: String,
    pub host_targets: Vec<String>,
    pub service: String,
    pub action: HandlerAction,
    pub expected_runs: ExpectedRuns,
    pub weight: f64,
}

/// Every expanded check for one phase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseContractPlan {
    pub phase: ExecutionPhase,
    pub bindings: Vec<BindingCheck>,
    pub packages: Vec<PackageCheck>,
    pub pip_packages: Vec<PipPackageCheck>,
    pub services: Vec<ServiceCheck>,
    pub users: Vec<UserCheck>,
    pub groups: Vec<GroupCheck>,
    pub firewall: Vec<FirewallCheck>,
    pub files: Vec<FileCheck>,
    pub reachability: Vec<ReachabilityCheck>,
    pub http_endpoints: Vec<HttpEndpointCheck>,
    pub external_http: Vec<ExternalHttpCheck>,
    pub output_checks: Vec<OutputCheck>,
    pub handlers: Vec<HandlerCheck>,
}

impl PhaseContractPlan {
    pub fn empty(phase: ExecutionPhase) -> Self {
        Self {
            phase,
            bindings: vec![],
            packages: vec![],
            pip_packages: vec![],
            services: vec![],
            users: vec![],
            groups: vec![],
            firewall: vec![],
            files: vec![],
            reachability: vec![],
            http_endpoints: vec![],
            external_http: vec![],
            output_checks: vec![],
            handlers: vec![],
        }
    }

    /// Number of check records across all categories.
    pub fn check_count(&self) -> usize {
        self.bindings.len()
            + self.packages.len()
            + self.pip_packages.len()
            + self.services.len()
            + self.users.len()
            + self.groups.len()
            + self.firewall.len()
            + self.files.len()
            + self.reachability.len()
            + self.http_endpoints.len()
            + self.external_http.len()
            + self.output_checks.len()
            + self.handlers.len()
    }
}
