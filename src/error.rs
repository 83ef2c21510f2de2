//! Error types for mcp-sdk.
//!
//! Three families live here:
//!
//! - [`McpError`]: a protocol-level failure carrying a JSON-RPC error code.
//!   This is what [`crate::mcp::engine::Protocol::request`] returns and what
//!   request handlers return to have an error response sent to the peer.
//! - [`TransportError`]: a fault in the underlying message channel.
//! - [`ConfigError`]: configuration loading and validation failures.

use std::path::PathBuf;

use serde_json::{json, Value};
use thiserror::Error;

use crate::mcp::protocol::{ErrorCode, JsonRpcErrorData};

/// Which deadline expired when a request timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// No response or progress within the per-request timeout.
    Inactivity,
    /// The overall ceiling elapsed, regardless of progress.
    MaxTotal,
}

impl TimeoutKind {
    /// Wire name stored in the error's `data.timeoutKind`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inactivity => "inactivity",
            Self::MaxTotal => "maxTotal",
        }
    }
}

/// A protocol error with a JSON-RPC code, message and optional data.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("MCP error {}: {message}", code.code())]
pub struct McpError {
    /// The error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Additional structured information.
    pub data: Option<Value>,
}

impl McpError {
    /// Creates an error with the given code and message.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attaches structured data to the error.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Invalid method parameters.
    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams, message)
    }

    /// The request was malformed or not permitted in the current state.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    /// Unexpected failure inside a handler.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// No handler is registered for `method`.
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            ErrorCode::MethodNotFound,
            format!("Method not found: {method}"),
        )
    }

    /// A non-handshake method arrived before the session was initialised.
    #[must_use]
    pub fn not_initialized() -> Self {
        Self::new(ErrorCode::ServerNotInitialized, "Server not initialized")
    }

    /// The transport closed while the request was pending.
    #[must_use]
    pub fn connection_closed() -> Self {
        Self::new(ErrorCode::ConnectionClosed, "Connection closed")
    }

    /// The caller cancelled the request.
    #[must_use]
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::RequestCancelled, reason)
    }

    /// A request deadline expired.
    #[must_use]
    pub fn timeout(kind: TimeoutKind, limit_ms: u128, elapsed_ms: u128) -> Self {
        let message = match kind {
            TimeoutKind::Inactivity => format!("Request timed out after {limit_ms}ms"),
            TimeoutKind::MaxTotal => {
                format!("Maximum total timeout of {limit_ms}ms exceeded")
            }
        };
        Self::new(ErrorCode::RequestTimeout, message).with_data(json!({
            "timeoutKind": kind.as_str(),
            "timeout": limit_ms,
            "elapsed": elapsed_ms,
        }))
    }

    /// Wraps a transport fault affecting a pending request.
    #[must_use]
    pub fn transport(error: &TransportError) -> Self {
        Self::new(ErrorCode::RequestFailed, format!("Transport error: {error}"))
    }

    /// Returns `true` if this is a timeout of either kind.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.code == ErrorCode::RequestTimeout
    }

    /// Returns which deadline expired, if this is a timeout.
    #[must_use]
    pub fn timeout_kind(&self) -> Option<TimeoutKind> {
        if !self.is_timeout() {
            return None;
        }
        match self
            .data
            .as_ref()
            .and_then(|d| d.get("timeoutKind"))
            .and_then(Value::as_str)
        {
            Some("maxTotal") => Some(TimeoutKind::MaxTotal),
            _ => Some(TimeoutKind::Inactivity),
        }
    }

    /// Returns `true` if the caller cancelled the request.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.code == ErrorCode::RequestCancelled
    }

    /// Converts this error into its wire representation.
    #[must_use]
    pub fn to_error_data(&self) -> JsonRpcErrorData {
        JsonRpcErrorData {
            code: self.code.code(),
            message: self.message.clone(),
            data: self.data.clone(),
        }
    }
}

impl From<JsonRpcErrorData> for McpError {
    fn from(data: JsonRpcErrorData) -> Self {
        Self {
            code: ErrorCode::from_code(data.code),
            message: data.message,
            data: data.data,
        }
    }
}

impl From<TemplateError> for McpError {
    fn from(error: TemplateError) -> Self {
        Self::invalid_params(error.to_string())
    }
}

/// Result type for protocol operations.
pub type McpResult<T> = Result<T, McpError>;

/// Errors raised by transports.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Reading or writing the underlying stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The HTTP request could not be performed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The peer answered with a non-success HTTP status.
    #[error("HTTP status {status}")]
    HttpStatus {
        /// The status code received.
        status: u16,
    },

    /// A transport URL could not be parsed or resolved.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The transport has been closed.
    #[error("transport closed")]
    Closed,

    /// The server never announced where to POST messages.
    #[error("no endpoint event within {}ms", .0.as_millis())]
    EndpointTimeout(std::time::Duration),

    /// `start()` has not been called yet.
    #[error("transport not started")]
    NotStarted,

    /// `start()` was called twice.
    #[error("transport already started")]
    AlreadyStarted,

    /// An inbound message could not be accepted.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// An inbound body exceeded the size limit.
    #[error("message of {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge {
        /// Size of the rejected body.
        size: usize,
        /// Maximum accepted size.
        limit: usize,
    },

    /// An inbound body had the wrong content type.
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),
}

/// A resource URI template that cannot be compiled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid resource template {template:?}: {reason}")]
pub struct TemplateError {
    /// The offending template.
    pub template: String,
    /// What is wrong with it.
    pub reason: String,
}

/// Errors that can occur during configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read configuration file: {path}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file could not be parsed.
    #[error("failed to parse configuration file: {path}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Configuration file not found.
    #[error("configuration file not found: {path}")]
    NotFound {
        /// Path where the configuration file was expected.
        path: PathBuf,
    },

    /// Configuration validation failed.
    #[error("configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation failure.
        message: String,
    },
}
