//! Node reboots between converge and verification.

use crate::process::{run_command, CommandOutput, CommandSpec};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

/// How long a node gets to drop off the network after the reboot is issued.
const DOWN_WINDOW_POLLS: u32 = 30;
const DOWN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Control plane for lab nodes.
#[async_trait]
pub trait NodeController: Send + Sync {
    /// Ask `node` to reboot. Returning does not mean the node is down yet.
    async fn issue_reboot(&self, node: &str) -> anyhow::Result<()>;

    /// Whether `node` currently accepts management connections.
    async fn is_reachable(&self, node: &str) -> bool;
}

/// [`NodeController`] that drives the ad-hoc `ansible` binary.
pub struct AnsibleNodeController {
    program: String,
    inventory: PathBuf,
}

impl AnsibleNodeController {
    pub fn new(program: impl Into<String>, inventory: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            inventory: inventory.into(),
        }
    }

    fn base(&self, node: &str) -> CommandSpec {
        CommandSpec::new(&self.program)
            .arg(node)
            .arg("-i")
            .arg(self.inventory.to_string_lossy())
            .env("ANSIBLE_HOST_KEY_CHECKING", "False")
    }

    pub fn reboot_command(&self, node: &str) -> CommandSpec {
        // Backgrounded so the dropped connection does not count as a failure.
        self.base(node)
            .args(["-m", "shell", "-a", "sleep 2 && sudo reboot", "-B", "1", "-P", "0"])
            .timeout(Duration::from_secs(30))
    }

    pub fn ping_command(&self, node: &str) -> CommandSpec {
        self.base(node)
            .args(["-m", "ping"])
            .timeout(Duration::from_secs(10))
    }
}

#[async_trait]
impl NodeController for AnsibleNodeController {
    async fn issue_reboot(&self, node: &str) -> anyhow::Result<()> {
        let output = run_command(&self.reboot_command(node))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send reboot command: {}", e))?;
        check_reboot_sent(&output)
    }

    async fn is_reachable(&self, node: &str) -> bool {
        matches!(run_command(&self.ping_command(node)).await, Ok(out) if out.success())
    }
}

/// A reboot command that exited non-zero never reached the node, e.g. on an
/// authentication or connection failure. A timeout is not an error: the
/// connection may drop as the node goes down.
fn check_reboot_sent(output: &CommandOutput) -> anyhow::Result<()> {
    if output.timed_out || output.exit_code == 0 {
        return Ok(());
    }
    let detail = output.combined();
    let detail = detail.trim();
    if detail.is_empty() {
        anyhow::bail!(
            "Failed to send reboot command: exit code {}",
            output.exit_code
        );
    }
    anyhow::bail!(
        "Failed to send reboot command: exit code {}: {}",
        output.exit_code,
        detail
    )
}

/// Timing of one reboot wait.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RebootSettings {
    /// Total time allowed from issuing the reboot to the node answering again.
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl RebootSettings {
    pub fn from_secs(timeout: u64, poll_interval: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout),
            poll_interval: Duration::from_secs(poll_interval),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RebootOutcome {
    pub node: String,
    pub success: bool,
    /// Seconds from issuing the reboot to the final verdict.
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Reboot `node` and wait until it is reachable again.
///
/// The node must first become unreachable within 30 seconds (polled every
/// second), then reachable again before `settings.timeout` has elapsed since
/// the reboot was issued.
pub async fn wait_for_reboot(
    controller: &dyn NodeController,
    node: &str,
    settings: RebootSettings,
) -> RebootOutcome {
    let start = Instant::now();
    let outcome = |success: bool, error: Option<String>| RebootOutcome {
        node: node.to_string(),
        success,
        duration: start.elapsed().as_secs_f64(),
        error,
    };

    if let Err(e) = controller.issue_reboot(node).await {
        return outcome(false, Some(e.to_string()));
    }

    let mut went_down = false;
    for _ in 0..DOWN_WINDOW_POLLS {
        if !controller.is_reachable(node).await {
            went_down = true;
            break;
        }
        sleep(DOWN_POLL_INTERVAL).await;
    }
    if !went_down {
        return outcome(
            false,
            Some(format!(
                "SSH never went down on {} - reboot may not have initiated",
                node
            )),
        );
    }

    while start.elapsed() < settings.timeout {
        if controller.is_reachable(node).await {
            return outcome(true, None);
        }
        sleep(settings.poll_interval).await;
    }

    outcome(
        false,
        Some(format!(
            "SSH did not become available within {}s",
            settings.timeout.as_secs()
        )),
    )
}

/// Reboot `nodes` one after another.
pub async fn reboot_nodes(
    controller: &dyn NodeController,
    nodes: &[String],
    settings: RebootSettings,
) -> Vec<RebootOutcome> {
    let mut outcomes = Vec::with_capacity(nodes.len());
    for node in nodes {
        info!(node = %node, "rebooting node");
        let result = wait_for_reboot(controller, node, settings).await;
        if result.success {
            info!(node = %node, duration = result.duration, "node back after reboot");
        } else {
            warn!(node = %node, error = ?result.error, "reboot failed");
        }
        outcomes.push(result);
    }
    outcomes
}
