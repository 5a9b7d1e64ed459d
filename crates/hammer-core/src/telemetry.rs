//! Log output for the HAMMER binaries.
//!
//! HAMMER's own crates log at the requested level while dependencies only
//! surface warnings. A filter in `HAMMER_LOG` (or `RUST_LOG`) replaces that
//! default entirely. Logs go to stderr so command output on stdout stays clean.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_ENV: &str = "HAMMER_LOG";

const HAMMER_CRATES: [&str; 3] = ["hammer_core", "hammer_runner", "hammer_cli"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per event, fields flattened to the top level.
    Json,
}

/// Filter used when no environment override is set.
pub fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    std::iter::once("warn".to_string())
        .chain(HAMMER_CRATES.iter().map(|krate| format!("{}={}", krate, level)))
        .collect::<Vec<_>>()
        .join(",")
}

fn env_directives() -> Option<String> {
    [LOG_ENV, EnvFilter::DEFAULT_ENV]
        .iter()
        .find_map(|key| std::env::var(key).ok().filter(|v| !v.trim().is_empty()))
}

/// Parse `overrides` if given and valid, else fall back to the default filter.
/// The rejected override is returned alongside.
pub fn build_filter(level: Level, overrides: Option<&str>) -> (EnvFilter, Option<String>) {
    match overrides {
        Some(directives) => match EnvFilter::try_new(directives) {
            Ok(filter) => (filter, None),
            Err(_) => (
                EnvFilter::new(default_directives(level)),
                Some(directives.to_string()),
            ),
        },
        None => (EnvFilter::new(default_directives(level)), None),
    }
}

/// Install the global subscriber. Returns `false` if one was already set.
pub fn init_tracing(format: LogFormat, level: Level) -> bool {
    let (filter, rejected) = build_filter(level, env_directives().as_deref());

    let text = (format == LogFormat::Text)
        .then(|| fmt::layer().with_target(false).with_writer(std::io::stderr));
    let json = (format == LogFormat::Json).then(|| {
        fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_writer(std::io::stderr)
    });

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .try_init()
        .is_ok();

    if let Some(directives) = rejected {
        tracing::warn!(%directives, "invalid log filter ignored");
    }
    installed
}
