//! Configuration structures for deserialisation.
//!
//! These structures map directly to the JSON configuration file format.

use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::mcp::engine::ProtocolOptions;
use crate::mcp::http::SseConfig;

/// Root configuration structure.
///
/// This is the top-level structure that matches the JSON config file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Optional JSON schema reference (ignored during parsing).
    #[serde(rename = "$schema", default)]
    _schema: Option<String>,

    /// Optional comment field (ignored during parsing).
    #[serde(rename = "_comment", default)]
    _comment: Option<String>,

    /// Server identity.
    #[serde(default)]
    pub server: ServerConfig,

    /// Transport selection.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Request timeouts.
    #[serde(default)]
    pub protocol: ProtocolConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation checks fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.name.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                message: "server.name must not be empty".to_string(),
            });
        }

        if self.transport.bind.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::ValidationError {
                message: format!(
                    "Invalid bind address '{}'. Expected host:port, e.g. 127.0.0.1:8080",
                    self.transport.bind
                ),
            });
        }

        for (field, path) in [
            ("sse_path", &self.transport.sse_path),
            ("message_path", &self.transport.message_path),
        ] {
            if !path.starts_with('/') {
                return Err(ConfigError::ValidationError {
                    message: format!("transport.{field} must start with '/'"),
                });
            }
        }
        if self.transport.sse_path == self.transport.message_path {
            return Err(ConfigError::ValidationError {
                message: "transport.sse_path and transport.message_path must differ".to_string(),
            });
        }

        if self.protocol.request_timeout_ms == 0 {
            return Err(ConfigError::ValidationError {
                message: "protocol.request_timeout_ms must be greater than 0".to_string(),
            });
        }
        if self.protocol.max_total_timeout_ms == Some(0) {
            return Err(ConfigError::ValidationError {
                message: "protocol.max_total_timeout_ms must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

/// Server identity configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Name reported in `serverInfo`.
    #[serde(default = "default_server_name")]
    pub name: String,

    /// Usage hints returned from `initialize`.
    #[serde(default)]
    pub instructions: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            instructions: None,
        }
    }
}

fn default_server_name() -> String {
    env!("CARGO_PKG_NAME").to_string()
}

/// Which transport the binary serves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Newline-delimited JSON over stdin/stdout.
    #[default]
    Stdio,
    /// HTTP with Server-Sent Events.
    Sse,
}

/// Transport configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransportConfig {
    /// Transport to serve. Default: "stdio"
    #[serde(default)]
    pub kind: TransportKind,

    /// Socket address for the SSE server.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Path of the SSE event stream.
    #[serde(default = "default_sse_path")]
    pub sse_path: String,

    /// Path clients POST messages to.
    #[serde(default = "default_message_path")]
    pub message_path: String,
}

impl TransportConfig {
    /// Route layout for the SSE server.
    #[must_use]
    pub fn sse(&self) -> SseConfig {
        SseConfig {
            sse_path: self.sse_path.clone(),
            message_path: self.message_path.clone(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            bind: default_bind(),
            sse_path: default_sse_path(),
            message_path: default_message_path(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_sse_path() -> String {
    "/sse".to_string()
}

fn default_message_path() -> String {
    "/messages".to_string()
}

/// Request timeout configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProtocolConfig {
    /// Inactivity timeout for outbound requests, in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Ceiling on total request time regardless of progress, in milliseconds.
    #[serde(default)]
    pub max_total_timeout_ms: Option<u64>,
}

impl ProtocolConfig {
    /// Engine options for a server role.
    #[must_use]
    pub fn server_options(&self) -> ProtocolOptions {
        ProtocolOptions {
            enforce_initialization: true,
            default_timeout: Duration::from_millis(self.request_timeout_ms),
            default_max_total_timeout: self.max_total_timeout_ms.map(Duration::from_millis),
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            max_total_timeout_ms: None,
        }
    }
}

const fn default_request_timeout_ms() -> u64 {
    60_000
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let json = r"{}";
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.transport.kind, TransportKind::Stdio);
        assert_eq!(config.protocol.request_timeout_ms, 60_000);
    }

    #[test]
    fn parse_full_config() {
        let json = r#"{
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "_comment": "Test config",
            "server": {
                "name": "demo",
                "instructions": "Use the add tool for arithmetic."
            },
            "transport": {
                "kind": "sse",
                "bind": "0.0.0.0:3000",
                "sse_path": "/events",
                "message_path": "/rpc"
            },
            "protocol": {
                "request_timeout_ms": 5000,
                "max_total_timeout_ms": 30000
            },
            "logging": {
                "level": "debug"
            }
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.name, "demo");
        assert_eq!(config.transport.kind, TransportKind::Sse);
        assert_eq!(config.transport.sse().sse_path, "/events");
        assert_eq!(config.logging.level, "debug");

        let options = config.protocol.server_options();
        assert!(options.enforce_initialization);
        assert_eq!(options.default_timeout, Duration::from_secs(5));
        assert_eq!(options.default_max_total_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn transport_config_defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.bind, "127.0.0.1:8080");
        assert_eq!(config.sse_path, "/sse");
        assert_eq!(config.message_path, "/messages");
    }

    #[test]
    fn logging_config_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "warn");
    }

    #[test]
    fn reject_zero_timeout() {
        let json = r#"{ "protocol": { "request_timeout_ms": 0 } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());

        let json = r#"{ "protocol": { "max_total_timeout_ms": 0 } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_bad_bind_address() {
        let json = r#"{ "transport": { "bind": "localhost" } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_clashing_paths() {
        let json = r#"{ "transport": { "sse_path": "/mcp", "message_path": "/mcp" } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_unknown_transport_kind() {
        let json = r#"{ "transport": { "kind": "websocket" } }"#;
        let result: Result<Config, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn reject_unknown_fields() {
        let json = r#"{
            "unknown_field": "value"
        }"#;

        let result: Result<Config, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}
