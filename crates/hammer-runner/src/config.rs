//! Runner configuration.

use std::time::Duration;

pub const DEFAULT_CONVERGE_TIMEOUT_SECS: u64 = 1800;
pub const DEFAULT_TEST_TIMEOUT_SECS: u64 = 600;

pub const CONVERGE_TIMEOUT_ENV: &str = "HAMMER_CONVERGE_TIMEOUT";
pub const TEST_TIMEOUT_ENV: &str = "HAMMER_TEST_TIMEOUT";

/// Timeouts and external tool names used by the grading pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerConfig {
    /// Upper bound for one converge run.
    pub converge_timeout: Duration,
    /// Upper bound for one verification run.
    pub test_timeout: Duration,
    pub ansible_playbook_bin: String,
    pub ansible_bin: String,
    pub python_bin: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            converge_timeout: Duration::from_secs(DEFAULT_CONVERGE_TIMEOUT_SECS),
            test_timeout: Duration::from_secs(DEFAULT_TEST_TIMEOUT_SECS),
            ansible_playbook_bin: "ansible-playbook".to_string(),
            ansible_bin: "ansible".to_string(),
            python_bin: "python3".to_string(),
        }
    }
}

impl RunnerConfig {
    pub fn with_timeouts(mut self, converge_secs: u64, test_secs: u64) -> Self {
        self.converge_timeout = Duration::from_secs(converge_secs);
        self.test_timeout = Duration::from_secs(test_secs);
        self
    }
}
