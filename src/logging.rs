//! Logging setup.
//!
//! Logs go to stderr so stdout stays clean for reports and JSON output.
//! `RUST_LOG` always wins; otherwise `-q` / `-v` / `-vv` choose the level.

use std::str::FromStr;
use tracing_subscriber::EnvFilter;

/// Environment variable selecting the log line format.
pub const LOG_FORMAT_ENV: &str = "CSYNC_LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" | "" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Default filter directive for a verbosity setting.
#[must_use]
pub const fn level_for(verbose: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

/// Install the global subscriber.
///
/// `format` of `None` reads [`LOG_FORMAT_ENV`], falling back to text.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed or the
/// format variable holds an unknown value.
pub fn init_logging(verbose: u8, quiet: bool, format: Option<LogFormat>) -> anyhow::Result<()> {
    let format = match format {
        Some(format) => format,
        None => std::env::var(LOG_FORMAT_ENV)
            .ok()
            .map(|raw| raw.parse::<LogFormat>())
            .transpose()
            .map_err(anyhow::Error::msg)?
            .unwrap_or(LogFormat::Text),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("contact_sync={}", level_for(verbose, quiet))));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    }
    .map_err(|err| anyhow::anyhow!("failed to install subscriber: {err}"))
}

/// Route logs through the test harness writer; safe to call repeatedly.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("contact_sync=debug"))
        .with_test_writer()
        .try_init();
}
