//! Daemon address parsing
//!
//! The daemon string accepts the forms the legacy tooling used:
//!
//! - `tcp:host:port` - explicit transport
//! - `host:port`     - transport implied
//! - `7500`          - bare port on localhost
//! - `tcp`           - local daemon on the default port
//! - `null`          - loopback session without a daemon

use std::fmt;
use std::str::FromStr;

use crate::error::ClientError;

/// Default daemon port
pub const DEFAULT_PORT: u16 = 7500;

/// A parsed daemon address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonAddr {
    /// Connect over TCP
    Tcp {
        /// Host name or address
        host: String,
        /// Daemon port
        port: u16,
    },
    /// No daemon: a local loopback session
    Null,
}

impl DaemonAddr {
    /// The `host:port` string for a TCP address
    pub fn socket_addr(&self) -> Option<String> {
        match self {
            Self::Tcp { host, port } => Some(format!("{host}:{port}")),
            Self::Null => None,
        }
    }
}

impl fmt::Display for DaemonAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "tcp:{host}:{port}"),
            Self::Null => write!(f, "null"),
        }
    }
}

impl FromStr for DaemonAddr {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ClientError::BadDaemon(s.to_string()));
        }
        if s.eq_ignore_ascii_case("null") {
            return Ok(Self::Null);
        }
        if s.eq_ignore_ascii_case("tcp") {
            return Ok(Self::Tcp {
                host: "127.0.0.1".to_string(),
                port: DEFAULT_PORT,
            });
        }

        let rest = s.strip_prefix("tcp:").unwrap_or(s);

        // A bare number is a port on the local host
        if rest.bytes().all(|b| b.is_ascii_digit()) {
            let port: u16 = rest
                .parse()
                .map_err(|_| ClientError::BadDaemon(s.to_string()))?;
            return Ok(Self::Tcp {
                host: "127.0.0.1".to_string(),
                port,
            });
        }

        match rest.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => {
                let port: u16 = port
                    .parse()
                    .map_err(|_| ClientError::BadDaemon(s.to_string()))?;
                Ok(Self::Tcp {
                    host: host.to_string(),
                    port,
                })
            }
            // Host alone takes the default port
            None => Ok(Self::Tcp {
                host: rest.to_string(),
                port: DEFAULT_PORT,
            }),
            Some(_) => Err(ClientError::BadDaemon(s.to_string())),
        }
    }
}
