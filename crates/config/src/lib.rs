//! rvbus Configuration
//!
//! TOML-based configuration loading with sensible defaults. An empty config
//! runs a daemon on the default port; only specify what you need to change.
//!
//! # Parsing
//!
//! Use the `FromStr` trait to parse configuration:
//!
//! ```
//! use rvbus_config::Config;
//! use std::str::FromStr;
//!
//! let config = Config::from_str("[daemon]\nport = 7501").unwrap();
//! assert_eq!(config.daemon.port, 7501);
//! ```

mod client;
mod daemon;
mod error;
mod logging;

use std::fs;
use std::path::Path;
use std::str::FromStr;

pub use client::ClientConfig;
pub use daemon::DaemonConfig;
pub use error::{ConfigError, Result};
pub use logging::{LogConfig, LogFormat, LogLevel};

use serde::Deserialize;

/// Main configuration structure
///
/// All sections are optional with sensible defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,

    /// Daemon listener settings
    pub daemon: DaemonConfig,

    /// Client session settings (used by the publish/listen commands)
    pub client: ClientConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, contains invalid TOML, or
    /// fails validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_str(&contents)
    }

    fn parse(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// Runs automatically when parsing; callers that build or mutate a
    /// `Config` in code can recheck it here.
    ///
    /// # Errors
    ///
    /// Returns the first invalid value found.
    pub fn validate(&self) -> Result<()> {
        if self.daemon.port == 0 {
            return Err(ConfigError::invalid_value(
                "daemon",
                "port",
                "must be nonzero",
            ));
        }
        if self.daemon.delivery_queue == 0 {
            return Err(ConfigError::invalid_value(
                "daemon",
                "delivery_queue",
                "must be at least 1",
            ));
        }
        if self.daemon.recv_buffer_size < 1024 {
            return Err(ConfigError::invalid_value(
                "daemon",
                "recv_buffer_size",
                "must be at least 1024 bytes",
            ));
        }
        if self.daemon.status_interval_secs == 0 {
            return Err(ConfigError::invalid_value(
                "daemon",
                "status_interval_secs",
                "must be nonzero",
            ));
        }
        if self.client.daemon.is_empty() {
            return Err(ConfigError::invalid_value(
                "client",
                "daemon",
                "must not be empty",
            ));
        }
        Ok(())
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
