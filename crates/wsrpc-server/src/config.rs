//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{ConfigError, Result};

/// Configuration for the RPC server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Heartbeat interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Heartbeat timeout in seconds (close after this long without a pong).
    pub heartbeat_timeout_secs: u64,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Outbound frames buffered per connection before sends are dropped.
    pub send_queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 50,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            max_message_size: 16 * 1024 * 1024, // 16 MB
            send_queue_capacity: 1024,
        }
    }
}

impl ServerConfig {
    /// `host:port` string suitable for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Heartbeat interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Heartbeat timeout.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue("server.host must not be empty".into()));
        }
        let positive = [
            ("server.max_connections", self.max_connections == 0),
            ("server.heartbeat_interval_secs", self.heartbeat_interval_secs == 0),
            ("server.max_message_size", self.max_message_size == 0),
            ("server.send_queue_capacity", self.send_queue_capacity == 0),
        ];
        if let Some((field, _)) = positive.iter().find(|(_, zero)| *zero) {
            return Err(ConfigError::InvalidValue(format!("{field} must be > 0")));
        }
        if self.heartbeat_timeout_secs < self.heartbeat_interval_secs {
            return Err(ConfigError::InvalidValue(
                "server.heartbeat_timeout_secs must be >= heartbeat_interval_secs".into(),
            ));
        }
        Ok(())
    }
}

/// Log output configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive (e.g. `"info"` or `"wsrpc_core=debug,info"`).
    /// `RUST_LOG` takes precedence when set.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

/// Complete settings document.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Listener and connection limits.
    pub server: ServerConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

impl Settings {
    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::InvalidValue("logging.level must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn default_host() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
    }

    #[test]
    fn default_port_is_zero() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.port, 0);
    }

    #[test]
    fn default_limits() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.max_connections, 50);
        assert_eq!(cfg.max_message_size, 16 * 1024 * 1024);
        assert_eq!(cfg.send_queue_capacity, 1024);
    }

    #[test]
    fn default_heartbeat() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(cfg.heartbeat_timeout(), Duration::from_secs(90));
    }

    #[test]
    fn bind_addr_format() {
        let cfg = ServerConfig {
            host: "0.0.0.0".into(),
            port: 8080,
            ..ServerConfig::default()
        };
        assert_eq!(cfg.bind_addr(), "0.0.0.0:8080");
    }

    #[test]
    fn defaults_are_valid() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn zero_max_connections_rejected() {
        let cfg = ServerConfig {
            max_connections: 0,
            ..ServerConfig::default()
        };
        assert_matches!(cfg.validate(), Err(ConfigError::InvalidValue(msg)) if msg.contains("max_connections"));
    }

    #[test]
    fn zero_send_queue_rejected() {
        let cfg = ServerConfig {
            send_queue_capacity: 0,
            ..ServerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn timeout_shorter_than_interval_rejected() {
        let cfg = ServerConfig {
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 10,
            ..ServerConfig::default()
        };
        assert_matches!(cfg.validate(), Err(ConfigError::InvalidValue(msg)) if msg.contains("heartbeat_timeout_secs"));
    }

    #[test]
    fn empty_log_level_rejected() {
        let settings = Settings {
            logging: LoggingConfig {
                level: "  ".into(),
                json: false,
            },
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn serde_roundtrip() {
        let settings = Settings::default();
        let json = serde_json::to_string(&settings).unwrap();
        let back: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(back, settings);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let json = r#"{"server":{"host":"10.0.0.1","port":3000},"logging":{"json":true}}"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.server.host, "10.0.0.1");
        assert_eq!(settings.server.port, 3000);
        assert_eq!(settings.server.max_connections, 50);
        assert!(settings.logging.json);
        assert_eq!(settings.logging.level, "info");
    }
}
