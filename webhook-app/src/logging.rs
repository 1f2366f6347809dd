//! Logging setup for the webhook service
//!
//! The library crates only emit `tracing` events; this module installs the
//! subscriber that turns them into output.

use std::fmt;
use std::str::FromStr;

use tracing_subscriber::{fmt as layer_fmt, EnvFilter, Registry};

/// Logging mode for different use cases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// No output
    Silent,
    /// Compact stderr output
    Development,
    /// Pretty output with thread ids and source locations
    Debug,
}

impl FromStr for LoggingMode {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "silent" => Ok(LoggingMode::Silent),
            "development" => Ok(LoggingMode::Development),
            "debug" => Ok(LoggingMode::Debug),
            other => Err(LoggingError::InvalidMode(other.to_string())),
        }
    }
}

impl fmt::Display for LoggingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoggingMode::Silent => "silent",
            LoggingMode::Development => "development",
            LoggingMode::Debug => "debug",
        };
        f.write_str(name)
    }
}

/// Logging configuration error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracingInit(String),

    #[error("Unknown logging mode '{0}'. Valid modes: silent, development, debug")]
    InvalidMode(String),
}

/// Initialize logging with the specified mode.
///
/// `default_level` applies in every mode that produces output, when neither
/// `WEBHOOK_LOG_LEVEL` nor `RUST_LOG` is set. The mode picks the output
/// format, never the level.
pub fn init_logging(mode: LoggingMode, default_level: &str) -> Result<(), LoggingError> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let Some(directive) = mode_directive(mode, default_level, |name| std::env::var(name).ok())
    else {
        return Ok(());
    };
    let filter = EnvFilter::new(directive);

    match mode {
        LoggingMode::Silent => Ok(()),
        LoggingMode::Development => Registry::default()
            .with(
                layer_fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false)
                    .compact(),
            )
            .with(filter)
            .try_init()
            .map_err(|e| LoggingError::TracingInit(e.to_string())),
        LoggingMode::Debug => Registry::default()
            .with(
                layer_fmt::layer()
                    .pretty()
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .with(filter)
            .try_init()
            .map_err(|e| LoggingError::TracingInit(e.to_string())),
    }
}

/// The filter directive a mode installs, or `None` when it installs nothing.
fn mode_directive<F>(mode: LoggingMode, default_level: &str, lookup: F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    match mode {
        LoggingMode::Silent => None,
        LoggingMode::Development | LoggingMode::Debug => {
            Some(filter_directive(default_level, lookup))
        }
    }
}

/// First `WEBHOOK_LOG_LEVEL`, then `RUST_LOG`, then the default.
fn filter_directive<F>(default_level: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup("WEBHOOK_LOG_LEVEL")
        .or_else(|| lookup("RUST_LOG"))
        .unwrap_or_else(|| default_level.to_string())
}
