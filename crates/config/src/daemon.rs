//! Daemon listener configuration

use serde::Deserialize;

fn default_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    7500
}

fn default_recv_buffer_size() -> usize {
    64 * 1024
}

fn default_delivery_queue() -> usize {
    256
}

fn default_status_interval_secs() -> u64 {
    90
}

fn default_true() -> bool {
    true
}

/// Daemon listener configuration
///
/// # Example
///
/// ```toml
/// [daemon]
/// address = "0.0.0.0"
/// port = 7500
/// service = "7500"
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Bind address
    #[serde(default = "default_address")]
    pub address: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Optional service name used to namespace fabric subjects
    pub service: Option<String>,

    /// Per-connection read buffer size in bytes
    #[serde(default = "default_recv_buffer_size")]
    pub recv_buffer_size: usize,

    /// Per-session fabric delivery queue depth
    #[serde(default = "default_delivery_queue")]
    pub delivery_queue: usize,

    /// Seconds between host-status heartbeats to each session
    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: u64,

    /// Set TCP_NODELAY on accepted sockets
    #[serde(default = "default_true")]
    pub tcp_nodelay: bool,

    /// Enable SO_KEEPALIVE on accepted sockets
    #[serde(default = "default_true")]
    pub tcp_keepalive: bool,

    /// Log a trace line per frame sent and received
    pub trace_frames: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            service: None,
            recv_buffer_size: default_recv_buffer_size(),
            delivery_queue: default_delivery_queue(),
            status_interval_secs: default_status_interval_secs(),
            tcp_nodelay: true,
            tcp_keepalive: true,
            trace_frames: false,
        }
    }
}

impl DaemonConfig {
    /// The socket address string to bind
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.port, 7500);
        assert_eq!(config.bind_addr(), "0.0.0.0:7500");
        assert_eq!(config.status_interval_secs, 90);
        assert!(config.tcp_nodelay);
        assert!(!config.trace_frames);
        assert!(config.service.is_none());
    }

    #[test]
    fn test_deserialize_partial() {
        let toml = r#"
port = 7501
service = "7501"
trace_frames = true
"#;
        let config: DaemonConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.port, 7501);
        assert_eq!(config.service.as_deref(), Some("7501"));
        assert!(config.trace_frames);
        // Unspecified fields keep their defaults
        assert_eq!(config.delivery_queue, 256);
    }
}
