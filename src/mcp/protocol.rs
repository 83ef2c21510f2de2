//! JSON-RPC 2.0 message types for MCP protocol.
//!
//! This module defines the envelopes exchanged by both protocol roles.
//! All messages follow the JSON-RPC 2.0 specification with MCP-specific extensions.
//!
//! # Message Types
//!
//! - **Request**: `{jsonrpc, id, method, params}`, expects a response
//! - **Response**: `{jsonrpc, id, result}`
//! - **Error**: `{jsonrpc, id, error: {code, message, data?}}`
//! - **Notification**: `{jsonrpc, method, params}`, no `id`, no response
//!
//! Classification is structural: an object with `id` and `result` is a
//! response, `id` and `error` an error response, `id` and `method` a request,
//! and `method` alone a notification.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// JSON-RPC version carried by every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// The newest MCP protocol version this implementation speaks.
pub const LATEST_PROTOCOL_VERSION: &str = "2024-11-05";

/// Protocol versions accepted during the initialize handshake.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &[LATEST_PROTOCOL_VERSION, "2024-10-07", "0.1.0"];

/// Returns `true` if `version` is in [`SUPPORTED_PROTOCOL_VERSIONS`].
#[must_use]
pub fn is_supported_version(version: &str) -> bool {
    SUPPORTED_PROTOCOL_VERSIONS.contains(&version)
}

/// Request method names.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const PING: &str = "ping";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
    pub const RESOURCES_LIST: &str = "resources/list";
    pub const RESOURCES_TEMPLATES_LIST: &str = "resources/templates/list";
    pub const RESOURCES_READ: &str = "resources/read";
    pub const RESOURCES_SUBSCRIBE: &str = "resources/subscribe";
    pub const RESOURCES_UNSUBSCRIBE: &str = "resources/unsubscribe";
    pub const PROMPTS_LIST: &str = "prompts/list";
    pub const PROMPTS_GET: &str = "prompts/get";
}

/// Notification method names.
pub mod notifications {
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const PROGRESS: &str = "notifications/progress";
    /// Older peers send progress under this bare name.
    pub const LEGACY_PROGRESS: &str = "progress";
    pub const CANCELLED: &str = "notifications/cancelled";
    pub const RESOURCES_UPDATED: &str = "notifications/resources/updated";
    pub const RESOURCES_LIST_CHANGED: &str = "notifications/resources/list_changed";
    pub const TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
    pub const PROMPTS_LIST_CHANGED: &str = "notifications/prompts/list_changed";
}

/// A JSON-RPC 2.0 request ID.
///
/// Per the MCP specification, IDs must be strings or integers, never `null`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric request ID.
    Number(i64),
    /// String request ID.
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl RequestId {
    /// Interprets a progress token or `requestId` field as a request ID.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Self::Number),
            Value::String(s) => Some(Self::String(s.clone())),
            _ => None,
        }
    }

    /// Returns the ID as a JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Number(n) => Value::from(*n),
            Self::String(s) => Value::from(s.as_str()),
        }
    }
}

/// A JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Must be "2.0".
    pub jsonrpc: String,

    /// Unique request identifier.
    pub id: RequestId,

    /// The method to invoke.
    pub method: String,

    /// Optional parameters for the method.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Creates a new request envelope.
    #[must_use]
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }

    /// Validates that this is a well-formed JSON-RPC 2.0 request.
    ///
    /// Returns an error message if validation fails.
    #[must_use]
    pub fn validate(&self) -> Option<&'static str> {
        if self.jsonrpc != JSONRPC_VERSION {
            return Some("jsonrpc field must be \"2.0\"");
        }
        if self.method.is_empty() {
            return Some("method field cannot be empty");
        }
        None
    }
}

/// A JSON-RPC 2.0 notification message.
///
/// Notifications do not have an ID and do not expect a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// Must be "2.0".
    pub jsonrpc: String,

    /// The notification method.
    pub method: String,

    /// Optional parameters for the notification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Creates a new notification envelope.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }

    /// Creates a progress notification for `token`.
    #[must_use]
    pub fn progress(token: &RequestId, progress: f64, total: Option<f64>) -> Self {
        let mut params = Map::new();
        params.insert("progressToken".to_string(), token.to_value());
        params.insert("progress".to_string(), Value::from(progress));
        if let Some(total) = total {
            params.insert("total".to_string(), Value::from(total));
        }
        Self::new(notifications::PROGRESS, Some(Value::Object(params)))
    }
}

/// A successful JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always "2.0".
    pub jsonrpc: String,

    /// The request ID this response corresponds to.
    pub id: RequestId,

    /// The result of the method call.
    pub result: Value,
}

impl JsonRpcResponse {
    /// Creates a new success response.
    #[must_use]
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result,
        }
    }
}

/// JSON-RPC 2.0 and MCP error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Invalid JSON was received.
    ParseError,
    /// The JSON sent is not a valid Request object.
    InvalidRequest,
    /// The method does not exist or is not available.
    MethodNotFound,
    /// Invalid method parameters.
    InvalidParams,
    /// Internal JSON-RPC error.
    InternalError,
    /// The transport closed while a request was pending.
    ConnectionClosed,
    /// A request deadline expired.
    RequestTimeout,
    /// A method other than the handshake arrived before initialisation.
    ServerNotInitialized,
    /// The request was cancelled by the caller.
    RequestCancelled,
    /// The request failed for a transport-level reason.
    RequestFailed,
    /// An error response arrived without a code.
    UnknownErrorCode,
    /// Any other code.
    Other(i32),
}

impl ErrorCode {
    /// Returns the numeric code for this error.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::ConnectionClosed => -32000,
            Self::RequestTimeout => -32001,
            Self::ServerNotInitialized => -32002,
            Self::RequestCancelled => -32004,
            Self::RequestFailed => -32005,
            Self::UnknownErrorCode => -32099,
            Self::Other(code) => code,
        }
    }

    /// Maps a numeric code back to its variant.
    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        match code {
            -32700 => Self::ParseError,
            -32600 => Self::InvalidRequest,
            -32601 => Self::MethodNotFound,
            -32602 => Self::InvalidParams,
            -32603 => Self::InternalError,
            -32000 => Self::ConnectionClosed,
            -32001 => Self::RequestTimeout,
            -32002 => Self::ServerNotInitialized,
            -32004 => Self::RequestCancelled,
            -32005 => Self::RequestFailed,
            -32099 => Self::UnknownErrorCode,
            other => Self::Other(other),
        }
    }

    /// Returns the default message for this error code.
    #[must_use]
    pub const fn default_message(self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::ConnectionClosed => "Connection closed",
            Self::RequestTimeout => "Request timed out",
            Self::ServerNotInitialized => "Server not initialized",
            Self::RequestCancelled => "Request cancelled",
            Self::RequestFailed => "Request failed",
            Self::UnknownErrorCode | Self::Other(_) => "Unknown error",
        }
    }
}

const fn unknown_error_code() -> i32 {
    ErrorCode::UnknownErrorCode.code()
}

fn unknown_error_message() -> String {
    ErrorCode::UnknownErrorCode.default_message().to_string()
}

/// A JSON-RPC 2.0 error object.
///
/// Deserialisation is lenient: a missing code or message falls back to
/// the `UnknownErrorCode` defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorData {
    /// The error code.
    #[serde(default = "unknown_error_code")]
    pub code: i32,

    /// A short description of the error.
    #[serde(default = "unknown_error_message")]
    pub message: String,

    /// Additional information about the error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcErrorData {
    /// Creates a new error from an error code.
    #[must_use]
    pub fn from_code(code: ErrorCode) -> Self {
        Self {
            code: code.code(),
            message: code.default_message().to_string(),
            data: None,
        }
    }

    /// Creates a new error with a custom message.
    #[must_use]
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }
}

/// A JSON-RPC 2.0 error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Always "2.0".
    pub jsonrpc: String,

    /// The request ID this error corresponds to (if known).
    #[serde(default)]
    pub id: Option<RequestId>,

    /// The error details.
    pub error: JsonRpcErrorData,
}

impl JsonRpcError {
    /// Creates a new error response.
    #[must_use]
    pub fn new(id: Option<RequestId>, error: JsonRpcErrorData) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            error,
        }
    }

    /// Creates a parse error response (ID cannot be determined).
    #[must_use]
    pub fn parse_error() -> Self {
        Self::new(None, JsonRpcErrorData::from_code(ErrorCode::ParseError))
    }

    /// Creates an invalid request error response.
    #[must_use]
    pub fn invalid_request(id: Option<RequestId>) -> Self {
        Self::new(id, JsonRpcErrorData::from_code(ErrorCode::InvalidRequest))
    }
}

/// Any JSON-RPC envelope, classified by shape.
#[derive(Debug, Clone)]
pub enum JsonRpcMessage {
    /// A request expecting a response.
    Request(JsonRpcRequest),
    /// A successful response.
    Response(JsonRpcResponse),
    /// An error response.
    Error(JsonRpcError),
    /// A notification (no response expected).
    Notification(JsonRpcNotification),
}

impl JsonRpcMessage {
    /// Returns the method name for requests and notifications.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(req) => Some(&req.method),
            Self::Notification(notif) => Some(&notif.method),
            Self::Response(_) | Self::Error(_) => None,
        }
    }

    /// Returns the request ID, if this envelope carries one.
    #[must_use]
    pub const fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(req) => Some(&req.id),
            Self::Response(resp) => Some(&resp.id),
            Self::Error(err) => err.id.as_ref(),
            Self::Notification(_) => None,
        }
    }

    /// Serialises the envelope to a single-line JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if a contained value cannot be serialised.
    pub fn to_json(&self) -> serde_json::Result<String> {
        match self {
            Self::Request(req) => serde_json::to_string(req),
            Self::Response(resp) => serde_json::to_string(resp),
            Self::Error(err) => serde_json::to_string(err),
            Self::Notification(notif) => serde_json::to_string(notif),
        }
    }
}

/// Parses a raw JSON string into a classified envelope.
///
/// # Errors
///
/// Returns a `JsonRpcError` describing why the input is not a message:
/// `ParseError` for malformed JSON, `InvalidRequest` (with the ID when one
/// could be recovered) for structurally invalid envelopes.
pub fn parse_message(json: &str) -> Result<JsonRpcMessage, JsonRpcError> {
    let value: Value = serde_json::from_str(json).map_err(|_| JsonRpcError::parse_error())?;

    let obj = value.as_object().ok_or_else(JsonRpcError::parse_error)?;

    // A null id is treated as absent.
    let id = obj
        .get("id")
        .filter(|v| !v.is_null())
        .and_then(RequestId::from_value);
    let has_id = obj.get("id").is_some_and(|v| !v.is_null());

    let jsonrpc = obj.get("jsonrpc").and_then(Value::as_str);
    if jsonrpc != Some(JSONRPC_VERSION) {
        return Err(JsonRpcError::invalid_request(id));
    }

    let invalid = |id: Option<RequestId>| move |_| JsonRpcError::invalid_request(id);

    if has_id && obj.contains_key("result") {
        let response: JsonRpcResponse =
            serde_json::from_value(value).map_err(invalid(id))?;
        return Ok(JsonRpcMessage::Response(response));
    }

    if has_id && obj.contains_key("error") {
        let error: JsonRpcError = serde_json::from_value(value).map_err(invalid(id))?;
        return Ok(JsonRpcMessage::Error(error));
    }

    if has_id && obj.contains_key("method") {
        let request: JsonRpcRequest =
            serde_json::from_value(value).map_err(invalid(id.clone()))?;
        if request.validate().is_some() {
            return Err(JsonRpcError::invalid_request(Some(request.id)));
        }
        return Ok(JsonRpcMessage::Request(request));
    }

    if !has_id && obj.contains_key("method") {
        let notification: JsonRpcNotification =
            serde_json::from_value(value).map_err(invalid(None))?;
        return Ok(JsonRpcMessage::Notification(notification));
    }

    Err(JsonRpcError::invalid_request(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_request() {
        let json = r#"{"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}"#;
        let msg = parse_message(json).unwrap();

        let JsonRpcMessage::Request(req) = msg else {
            panic!("Expected Request, got {msg:?}");
        };
        assert_eq!(req.id, RequestId::Number(1));
        assert_eq!(req.method, "initialize");
    }

    #[test]
    fn parse_valid_notification() {
        let json = r#"{"jsonrpc": "2.0", "method": "notifications/initialized"}"#;
        let msg = parse_message(json).unwrap();

        let JsonRpcMessage::Notification(notif) = msg else {
            panic!("Expected Notification, got {msg:?}");
        };
        assert_eq!(notif.method, "notifications/initialized");
    }

    #[test]
    fn parse_response_and_error() {
        let ok = parse_message(r#"{"jsonrpc":"2.0","id":"a","result":{"x":1}}"#).unwrap();
        assert!(matches!(ok, JsonRpcMessage::Response(ref r) if r.id == RequestId::from("a")));

        let err = parse_message(
            r#"{"jsonrpc":"2.0","id":7,"error":{"code":-32601,"message":"nope"}}"#,
        )
        .unwrap();
        let JsonRpcMessage::Error(err) = err else {
            panic!("Expected Error");
        };
        assert_eq!(err.id, Some(RequestId::Number(7)));
        assert_eq!(err.error.code, ErrorCode::MethodNotFound.code());
    }

    #[test]
    fn error_without_code_defaults_to_unknown() {
        let msg = parse_message(r#"{"jsonrpc":"2.0","id":3,"error":{}}"#).unwrap();
        let JsonRpcMessage::Error(err) = msg else {
            panic!("Expected Error");
        };
        assert_eq!(err.error.code, ErrorCode::UnknownErrorCode.code());
        assert_eq!(err.error.message, "Unknown error");
    }

    #[test]
    fn null_id_is_a_notification() {
        let msg = parse_message(r#"{"jsonrpc":"2.0","id":null,"method":"ping"}"#).unwrap();
        assert!(matches!(msg, JsonRpcMessage::Notification(_)));
    }

    #[test]
    fn parse_invalid_json() {
        let err = parse_message("not valid json").unwrap_err();
        assert_eq!(err.error.code, ErrorCode::ParseError.code());
    }

    #[test]
    fn parse_wrong_jsonrpc_version_keeps_id() {
        let json = r#"{"jsonrpc": "1.0", "id": 1, "method": "test"}"#;
        let err = parse_message(json).unwrap_err();
        assert_eq!(err.error.code, ErrorCode::InvalidRequest.code());
        assert_eq!(err.id, Some(RequestId::Number(1)));
    }

    #[test]
    fn parse_shapeless_object() {
        let err = parse_message(r#"{"jsonrpc":"2.0","id":1}"#).unwrap_err();
        assert_eq!(err.error.code, ErrorCode::InvalidRequest.code());
    }

    #[test]
    fn serialise_request_is_single_line() {
        let req = JsonRpcRequest::new(
            RequestId::Number(1),
            "tools/call",
            Some(serde_json::json!({"name": "add", "arguments": {"a": 1}})),
        );
        let json = JsonRpcMessage::Request(req).to_json().unwrap();
        assert!(!json.contains('\n'));
        assert!(json.contains(r#""method":"tools/call""#));
    }

    #[test]
    fn serialise_error_response() {
        let error = JsonRpcError::new(
            Some(RequestId::Number(1)),
            JsonRpcErrorData::with_message(ErrorCode::MethodNotFound, "unknown/method"),
        );
        let json = serde_json::to_string(&error).unwrap();
        assert!(json.contains(r#""jsonrpc":"2.0""#));
        assert!(json.contains(r#""id":1"#));
        assert!(json.contains(r#""code":-32601"#));
        assert!(!json.contains("data"));
    }

    #[test]
    fn error_codes_round_trip() {
        for code in [
            ErrorCode::ParseError,
            ErrorCode::ConnectionClosed,
            ErrorCode::RequestTimeout,
            ErrorCode::ServerNotInitialized,
            ErrorCode::RequestCancelled,
            ErrorCode::RequestFailed,
            ErrorCode::UnknownErrorCode,
        ] {
            assert_eq!(ErrorCode::from_code(code.code()), code);
        }
        assert_eq!(ErrorCode::from_code(42), ErrorCode::Other(42));
    }

    #[test]
    fn supported_versions() {
        assert!(is_supported_version("2024-11-05"));
        assert!(is_supported_version("2024-10-07"));
        assert!(!is_supported_version("1999-01-01"));
    }

    #[test]
    fn request_id_display() {
        assert_eq!(format!("{}", RequestId::Number(42)), "42");
        assert_eq!(format!("{}", RequestId::String("abc".to_string())), "abc");
    }
}
