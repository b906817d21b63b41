//! Client session configuration

use serde::Deserialize;

fn default_daemon() -> String {
    "tcp:127.0.0.1:7500".to_string()
}

fn default_userid() -> String {
    "nobody".to_string()
}

/// Client session configuration
///
/// The `daemon` string accepts the legacy forms: `tcp:host:port`,
/// `host:port`, a bare port, `tcp` (local daemon, default port) or `null`
/// (loopback session without a daemon).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    /// Daemon address string
    #[serde(default = "default_daemon")]
    pub daemon: String,

    /// Network specification forwarded during session setup
    pub network: Option<String>,

    /// Service name forwarded during session setup
    pub service: Option<String>,

    /// User identifier reported to the daemon
    #[serde(default = "default_userid")]
    pub userid: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            daemon: default_daemon(),
            network: None,
            service: None,
            userid: default_userid(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.daemon, "tcp:127.0.0.1:7500");
        assert_eq!(config.userid, "nobody");
        assert!(config.service.is_none());
    }

    #[test]
    fn test_deserialize() {
        let toml = r#"
daemon = "null"
service = "7500"
userid = "svc-account"
"#;
        let config: ClientConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.daemon, "null");
        assert_eq!(config.service.as_deref(), Some("7500"));
        assert_eq!(config.userid, "svc-account");
    }
}
