//! External command execution with timeouts.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

/// Time allowed for output pipes to drain after the child exits or is killed.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// A command to run.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// `None` waits forever.
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Shell-like rendering for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Result of a finished or killed command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code; -1 when killed or terminated by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    /// The command hit its timeout and was killed. Output is partial.
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }

    /// stdout followed by stderr.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

type SharedBuf = Arc<Mutex<Vec<u8>>>;

/// Copy a pipe into a shared buffer chunk by chunk so partial output
/// survives when the reader is abandoned.
fn drain<R>(mut pipe: R, buf: SharedBuf) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if let Ok(mut guard) = buf.lock() {
                        guard.extend_from_slice(&chunk[..n]);
                    }
                }
            }
        }
    })
}

fn take(buf: &SharedBuf) -> String {
    buf.lock()
        .map(|guard| String::from_utf8_lossy(&guard).to_string())
        .unwrap_or_default()
}

/// Run `spec` to completion or until its timeout.
///
/// stdout and stderr are read concurrently with the wait. On timeout the
/// child is killed and whatever it printed so far is returned with
/// `timed_out` set. Only spawn failures are errors.
pub async fn run_command(spec: &CommandSpec) -> anyhow::Result<CommandOutput> {
    let start = Instant::now();

    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &spec.cwd {
        command.current_dir(dir);
    }
    for (key, value) in &spec.env {
        command.env(key, value);
    }

    let mut child = command
        .spawn()
        .map_err(|e| anyhow::anyhow!("failed to launch `{}`: {}", spec.program, e))?;

    let stdout_buf = SharedBuf::default();
    let stderr_buf = SharedBuf::default();
    let mut readers = Vec::new();
    if let Some(pipe) = child.stdout.take() {
        readers.push(drain(pipe, stdout_buf.clone()));
    }
    if let Some(pipe) = child.stderr.take() {
        readers.push(drain(pipe, stderr_buf.clone()));
    }

    let (status, timed_out) = match spec.timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => (Some(status?), false),
            Err(_) => {
                tracing::warn!(
                    command = %spec.display(),
                    timeout_secs = limit.as_secs(),
                    "command timed out, killing"
                );
                child.kill().await.ok();
                (None, true)
            }
        },
        None => (Some(child.wait().await?), false),
    };

    // A grandchild may still hold the pipes open; do not wait on it forever.
    for reader in readers {
        let abort = reader.abort_handle();
        if tokio::time::timeout(DRAIN_GRACE, reader).await.is_err() {
            abort.abort();
        }
    }

    let exit_code = status.and_then(|s| s.code()).unwrap_or(-1);

    Ok(CommandOutput {
        exit_code,
        stdout: take(&stdout_buf),
        stderr: take(&stderr_buf),
        duration_ms: start.elapsed().as_millis() as u64,
        timed_out,
    })
}
