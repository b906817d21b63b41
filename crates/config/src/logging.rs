//! Logging configuration
//!
//! Controls the daemon's internal logging behavior.

use serde::Deserialize;

/// Log level
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Per-frame detail, very verbose
    Trace,
    /// Debugging information
    Debug,
    /// Normal operation (default)
    #[default]
    Info,
    /// Warnings only
    Warn,
    /// Errors only
    Error,
}

impl LogLevel {
    /// Convert to a tracing filter directive string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable console output (default)
    #[default]
    Console,
    /// JSON structured logging
    Json,
}

/// Logging configuration
///
/// # Example
///
/// ```toml
/// [log]
/// level = "debug"
/// format = "console"
/// ```
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: LogLevel,

    /// Output format (console, json)
    pub format: LogFormat,
}

impl LogConfig {
    /// Default filter directive, scoped to the daemon's own crates
    ///
    /// `RUST_LOG` still overrides this at runtime.
    pub fn filter_directive(&self) -> String {
        format!("rvbus={}", self.level.as_str())
    }
}
