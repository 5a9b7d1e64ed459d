//! Converge execution: apply the student's playbook to the lab.
//!
//! `ansible-playbook` runs with the JSON stdout callback. Per-host stats and
//! handler task results are read from that document, and a plain-text log in
//! the usual `TASK`/`PLAY RECAP` layout is rendered from it for the results
//! directory and the failure policy.

use crate::process::{run_command, CommandSpec};
use async_trait::async_trait;
use hammer_core::{ConvergeResult, HostRecap};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

const STDOUT_CALLBACK: &str = "json";

/// Inputs for one converge run.
#[derive(Debug, Clone)]
pub struct ConvergeRequest {
    /// Directory the playbook runs from.
    pub workspace: PathBuf,
    pub playbook: PathBuf,
    pub inventory: PathBuf,
    /// JSON file passed as `-e @file`.
    pub extra_vars_file: Option<PathBuf>,
    pub vault_password_file: Option<PathBuf>,
    /// Handler names whose runs are counted.
    pub handlers: Vec<String>,
    pub timeout: Duration,
}

/// Converge result plus the log it was derived from.
#[derive(Debug, Clone)]
pub struct ConvergeOutcome {
    pub result: ConvergeResult,
    pub log: String,
}

/// Runs a configuration-management pass over the lab nodes.
#[async_trait]
pub trait ConvergeExecutor: Send + Sync {
    async fn converge(&self, request: &ConvergeRequest) -> anyhow::Result<ConvergeOutcome>;
}

// ---------------------------------------------------------------------------
// JSON callback document
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct Named {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct HostTaskResult {
    #[serde(default)]
    changed: bool,
    #[serde(default)]
    failed: bool,
    #[serde(default)]
    skipped: bool,
    #[serde(default)]
    unreachable: bool,
    #[serde(default)]
    msg: Option<Value>,
}

impl HostTaskResult {
    fn status_line(&self, host: &str) -> String {
        let msg = || serde_json::json!({ "msg": self.msg.clone().unwrap_or(Value::Null) });
        if self.unreachable {
            format!("fatal: [{}]: UNREACHABLE! => {}", host, msg())
        } else if self.failed {
            format!("fatal: [{}]: FAILED! => {}", host, msg())
        } else if self.skipped {
            format!("skipping: [{}]", host)
        } else if self.changed {
            format!("changed: [{}]", host)
        } else {
            format!("ok: [{}]", host)
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct TaskEntry {
    #[serde(default)]
    task: Named,
    #[serde(default)]
    hosts: BTreeMap<String, HostTaskResult>,
}

#[derive(Debug, Default, Deserialize)]
struct PlayEntry {
    #[serde(default)]
    play: Named,
    #[serde(default)]
    tasks: Vec<TaskEntry>,
}

/// Per-host stats as the callback reports them (`failures`, not `failed`).
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HostStats {
    ok: u32,
    changed: u32,
    failures: u32,
    unreachable: u32,
    skipped: u32,
    rescued: u32,
    ignored: u32,
}

impl From<&HostStats> for HostRecap {
    fn from(s: &HostStats) -> Self {
        HostRecap {
            ok: s.ok,
            changed: s.changed,
            unreachable: s.unreachable,
            failed: s.failures,
            skipped: s.skipped,
            rescued: s.rescued,
            ignored: s.ignored,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PlaybookDocument {
    #[serde(default)]
    plays: Vec<PlayEntry>,
    #[serde(default)]
    stats: BTreeMap<String, HostStats>,
}

/// What a JSON callback run reported.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybookRun {
    pub play_recap: BTreeMap<String, HostRecap>,
    /// Every requested handler with the number of times it executed.
    pub handlers_run: BTreeMap<String, u32>,
    /// Text rendering of the run.
    pub log: String,
}

/// Task names of role handlers carry a `role : ` prefix.
fn is_task_for(task_name: &str, handler: &str) -> bool {
    task_name == handler
        || task_name
            .rsplit_once(" : ")
            .map_or(false, |(_, name)| name == handler)
}

fn render_log(doc: &PlaybookDocument) -> String {
    let mut log = String::new();
    for play in &doc.plays {
        log.push_str(&format!("PLAY [{}] ***\n", play.play.name));
        for task in &play.tasks {
            log.push_str(&format!("\nTASK [{}] ***\n", task.task.name));
            for (host, result) in &task.hosts {
                log.push_str(&result.status_line(host));
                log.push('\n');
            }
        }
        log.push('\n');
    }
    log.push_str("PLAY RECAP ***\n");
    for (host, s) in &doc.stats {
        log.push_str(&format!(
            "{} : ok={} changed={} unreachable={} failed={} skipped={} rescued={} ignored={}\n",
            host, s.ok, s.changed, s.unreachable, s.failures, s.skipped, s.rescued, s.ignored
        ));
    }
    log
}

/// Read the JSON callback document from `stdout`.
///
/// Anything printed before the document is ignored. Returns `None` when
/// there is no parseable document, e.g. when the playbook failed to load.
pub fn parse_playbook_output(stdout: &str, handlers: &[String]) -> Option<PlaybookRun> {
    let start = stdout.find('{')?;
    let doc: PlaybookDocument = match serde_json::from_str(stdout[start..].trim_end()) {
        Ok(doc) => doc,
        Err(e) => {
            debug!(error = %e, "converge output is not a JSON callback document");
            return None;
        }
    };

    let mut handlers_run: BTreeMap<String, u32> =
        handlers.iter().map(|h| (h.clone(), 0)).collect();
    for task in doc.plays.iter().flat_map(|p| &p.tasks) {
        let executed = task.hosts.values().any(|r| !r.skipped);
        if !executed {
            continue;
        }
        for (handler, runs) in handlers_run.iter_mut() {
            if is_task_for(&task.task.name, handler) {
                *runs += 1;
            }
        }
    }

    Some(PlaybookRun {
        play_recap: doc.stats.iter().map(|(h, s)| (h.clone(), s.into())).collect(),
        handlers_run,
        log: render_log(&doc),
    })
}

// ---------------------------------------------------------------------------
// ansible-playbook executor
// ---------------------------------------------------------------------------

/// [`ConvergeExecutor`] backed by `ansible-playbook`.
///
/// Success follows the exit status; counters and handler runs come from the
/// JSON callback document when one was printed.
pub struct PlaybookConverge {
    program: String,
}

impl PlaybookConverge {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn command(&self, request: &ConvergeRequest) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.program)
            .arg("-i")
            .arg(request.inventory.to_string_lossy())
            .arg(request.playbook.to_string_lossy());
        if let Some(vars) = &request.extra_vars_file {
            spec = spec.arg("-e").arg(format!("@{}", vars.display()));
        }
        if let Some(vault) = &request.vault_password_file {
            spec = spec
                .arg("--vault-password-file")
                .arg(vault.to_string_lossy());
        }
        spec.cwd(&request.workspace)
            .env("ANSIBLE_HOST_KEY_CHECKING", "False")
            .env("ANSIBLE_RETRY_FILES_ENABLED", "False")
            .env("ANSIBLE_STDOUT_CALLBACK", STDOUT_CALLBACK)
            .timeout(request.timeout)
    }
}

#[async_trait]
impl ConvergeExecutor for PlaybookConverge {
    async fn converge(&self, request: &ConvergeRequest) -> anyhow::Result<ConvergeOutcome> {
        let spec = self.command(request);
        debug!(command = %spec.display(), "running converge");

        let output = match run_command(&spec).await {
            Ok(output) => output,
            Err(e) => {
                warn!(error = %e, "converge could not start");
                return Ok(ConvergeOutcome {
                    result: ConvergeResult::failure(e.to_string()),
                    log: e.to_string(),
                });
            }
        };

        if output.timed_out {
            return Ok(ConvergeOutcome {
                result: ConvergeResult::failure(format!(
                    "Converge timed out after {} seconds",
                    request.timeout.as_secs()
                )),
                log: output.combined(),
            });
        }

        let failed_message = || format!("Playbook execution failed (exit code {})", output.exit_code);

        let outcome = match parse_playbook_output(&output.stdout, &request.handlers) {
            Some(run) => {
                let mut result = ConvergeResult::from_recap(run.play_recap, output.success());
                result.handlers_run = run.handlers_run;
                if !result.success {
                    result.error_message = Some(failed_message());
                }
                let log = if output.stderr.is_empty() {
                    run.log
                } else {
                    format!("{}\n{}", run.log, output.stderr)
                };
                ConvergeOutcome { result, log }
            }
            None => {
                let result = if output.success() {
                    ConvergeResult {
                        success: true,
                        ..Default::default()
                    }
                } else {
                    ConvergeResult::failure(failed_message())
                };
                ConvergeOutcome {
                    result,
                    log: output.combined(),
                }
            }
        };

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(dir: &std::path::Path, timeout: Duration) -> ConvergeRequest {
        ConvergeRequest {
            workspace: dir.to_path_buf(),
            playbook: dir.join("site.yml"),
            inventory: dir.join("inventory/hosts.yml"),
            extra_vars_file: Some(dir.join("overlays/mutation/extra_vars.json")),
            vault_password_file: None,
            handlers: vec!["restart nginx".to_string()],
            timeout,
        }
    }

    #[test]
    fn test_command_line_shape() {
        let dir = std::path::Path::new("/work");
        let mut req = request(dir, Duration::from_secs(60));
        req.vault_password_file = Some(dir.join(".vault_pass"));
        let spec = PlaybookConverge::new("ansible-playbook").command(&req);
        assert_eq!(
            spec.args,
            vec![
                "-i",
                "/work/inventory/hosts.yml",
                "/work/site.yml",
                "-e",
                "@/work/overlays/mutation/extra_vars.json",
                "--vault-password-file",
                "/work/.vault_pass",
            ]
        );
        assert_eq!(spec.timeout, Some(Duration::from_secs(60)));
        assert!(spec
            .env
            .contains(&("ANSIBLE_HOST_KEY_CHECKING".to_string(), "False".to_string())));
        assert!(spec
            .env
            .contains(&("ANSIBLE_STDOUT_CALLBACK".to_string(), "json".to_string())));
    }

    #[tokio::test]
    async fn test_exit_status_decides_success() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ok = PlaybookConverge::new("true")
            .converge(&request(dir.path(), Duration::from_secs(10)))
            .await
            .expect("converge");
        assert!(ok.result.success);

        let failed = PlaybookConverge::new("false")
            .converge(&request(dir.path(), Duration::from_secs(10)))
            .await
            .expect("converge");
        assert!(!failed.result.success);
        assert_eq!(
            failed.result.error_message.as_deref(),
            Some("Playbook execution failed (exit code 1)")
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_failed_result() {
        let dir = tempfile::tempdir().expect("tempdir");
        let outcome = PlaybookConverge::new("hammer-no-such-playbook-bin")
            .converge(&request(dir.path(), Duration::from_secs(10)))
            .await
            .expect("converge");
        assert!(!outcome.result.success);
        assert!(outcome.log.contains("failed to launch"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_yields_failure_with_partial_log() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let script = dir.path().join("slow-playbook");
        std::fs::write(&script, "#!/bin/sh\necho 'TASK [nginx : install]'\nexec sleep 10\n")
            .expect("write script");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
            .expect("chmod script");

        let outcome = PlaybookConverge::new(script.to_string_lossy())
            .converge(&request(dir.path(), Duration::from_secs(1)))
            .await
            .expect("converge");
        assert!(!outcome.result.success);
        assert_eq!(
            outcome.result.error_message.as_deref(),
            Some("Converge timed out after 1 seconds")
        );
        assert!(outcome.log.contains("TASK [nginx : install]"));
    }

    const CHANGED_RUN: &str = r#"{
  "plays": [
    {
      "play": {"name": "Configure web tier"},
      "tasks": [
        {"task": {"name": "nginx : render site config"},
         "hosts": {"web1": {"changed": true, "msg": ""}}},
        {"task": {"name": "nginx : restart nginx"},
         "hosts": {"web1": {"changed": true}}},
        {"task": {"name": "postgres : restart postgres"},
         "hosts": {"db1": {"skipped": true}}}
      ]
    }
  ],
  "stats": {
    "web1": {"ok": 5, "changed": 3, "failures": 0, "unreachable": 0,
             "skipped": 0, "rescued": 0, "ignored": 0},
    "db1": {"ok": 2, "changed": 0, "failures": 0, "unreachable": 0,
            "skipped": 1, "rescued": 0, "ignored": 0}
  }
}"#;

    const FAILED_RUN: &str = r#"{
  "plays": [
    {
      "play": {"name": "Configure web tier"},
      "tasks": [
        {"task": {"name": "app : wait for backend"},
         "hosts": {"web1": {"failed": true, "msg": "Service backend not yet available"}}},
        {"task": {"name": "app : seed database"},
         "hosts": {"web1": {"failed": true, "msg": "relation does not exist"}}}
      ]
    }
  ],
  "stats": {
    "web1": {"ok": 3, "changed": 1, "failures": 2, "unreachable": 0}
  }
}"#;

    /// Executable that refuses to run without the JSON callback, then prints
    /// `document` and exits with `code`.
    #[cfg(unix)]
    fn fake_playbook(dir: &std::path::Path, document: &str, code: i32) -> String {
        use std::os::unix::fs::PermissionsExt;

        let doc = dir.join("callback.json");
        std::fs::write(&doc, document).expect("write document");
        let script = dir.join("fake-ansible-playbook");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\n[ \"$ANSIBLE_STDOUT_CALLBACK\" = json ] || exit 9\ncat '{}'\nexit {}\n",
                doc.display(),
                code
            ),
        )
        .expect("write script");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
            .expect("chmod script");
        script.to_string_lossy().to_string()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_callback_stats_drive_counters_and_handlers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let program = fake_playbook(dir.path(), CHANGED_RUN, 0);

        let outcome = PlaybookConverge::new(program)
            .converge(&request(dir.path(), Duration::from_secs(10)))
            .await
            .expect("converge");
        let result = &outcome.result;
        assert!(result.success);
        assert_eq!(result.ok, 7);
        assert_eq!(result.changed, 3);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.play_recap["web1"].changed, 3);
        assert_eq!(result.handlers_run.get("restart nginx"), Some(&1));

        let verdict = hammer_core::check_idempotence(result);
        assert!(!verdict.idempotent);
        assert!(verdict.message.contains("3 changed tasks"));

        assert!(outcome.log.contains("TASK [nginx : render site config]"));
        assert!(outcome.log.contains("changed: [web1]"));
        assert!(outcome.log.contains("skipping: [db1]"));
        assert!(outcome
            .log
            .contains("web1 : ok=5 changed=3 unreachable=0 failed=0 skipped=0 rescued=0 ignored=0"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_callback_failures_feed_failure_policy() {
        use crate::policy::apply_failure_policy;
        use hammer_core::spec::FailurePolicy;

        let dir = tempfile::tempdir().expect("tempdir");
        let program = fake_playbook(dir.path(), FAILED_RUN, 2);

        let outcome = PlaybookConverge::new(program)
            .converge(&request(dir.path(), Duration::from_secs(10)))
            .await
            .expect("converge");
        assert!(!outcome.result.success);
        assert_eq!(outcome.result.failed, 2);
        assert_eq!(
            outcome.result.error_message.as_deref(),
            Some("Playbook execution failed (exit code 2)")
        );
        assert_eq!(outcome.log.matches("FAILED!").count(), 2);
        assert!(outcome
            .log
            .contains(r#"fatal: [web1]: FAILED! => {"msg":"Service backend not yet available"}"#));

        let bounded = FailurePolicy {
            allow_failures: true,
            max_failures: Some(1),
            expected_patterns: None,
        };
        let result = apply_failure_policy(outcome.result.clone(), &outcome.log, Some(&bounded))
            .expect("apply policy");
        assert!(!result.success);

        let generous = FailurePolicy {
            max_failures: Some(2),
            ..bounded
        };
        let result = apply_failure_policy(outcome.result, &outcome.log, Some(&generous))
            .expect("apply policy");
        assert!(result.success);
        assert!(result.failures_allowed_by_policy);
    }

    #[test]
    fn test_parse_skips_leading_noise_and_rejects_text() {
        let noisy = format!("[WARNING]: no inventory cache\n{}\n", CHANGED_RUN);
        let run = parse_playbook_output(&noisy, &["restart postgres".to_string()])
            .expect("callback document");
        // skipped on every host, so it never ran
        assert_eq!(run.handlers_run.get("restart postgres"), Some(&0));
        assert_eq!(run.play_recap.len(), 2);

        assert!(parse_playbook_output("PLAY RECAP ***\nweb1 : ok=5 changed=3\n", &[]).is_none());
        assert!(parse_playbook_output("", &[]).is_none());
    }
}
