//! MCP client role.
//!
//! [`Client`] performs the `initialize` handshake over a [`Protocol`] engine
//! and offers typed wrappers for the core server methods.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::error::{McpError, McpResult};
use crate::mcp::engine::{Protocol, ProtocolOptions, RequestOptions};
use crate::mcp::protocol::{is_supported_version, methods, notifications, LATEST_PROTOCOL_VERSION};
use crate::mcp::transport::Transport;
use crate::mcp::types::{
    CallToolResult, Capabilities, GetPromptResult, Implementation, InitializeParams,
    InitializeResult, ListPromptsResult, ListResourceTemplatesResult, ListResourcesResult,
    ListToolsResult, ReadResourceResult,
};

/// Options for a [`Client`].
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// Capabilities sent in `initialize`.
    pub capabilities: Capabilities,
    /// Engine settings.
    pub protocol: ProtocolOptions,
}

/// The client half of an MCP session.
#[derive(Clone)]
pub struct Client {
    protocol: Protocol,
    info: Implementation,
    capabilities: Capabilities,
    server: Arc<RwLock<Option<InitializeResult>>>,
}

impl Client {
    /// Creates a client. Nothing is sent until [`Client::connect`].
    #[must_use]
    pub fn new(info: Implementation, options: ClientOptions) -> Self {
        Self {
            protocol: Protocol::new(options.protocol),
            info,
            capabilities: options.capabilities,
            server: Arc::new(RwLock::new(None)),
        }
    }

    /// The underlying engine, e.g. for registering notification handlers.
    #[must_use]
    pub const fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    /// Connects and performs the handshake.
    ///
    /// # Errors
    ///
    /// Fails if the transport cannot start, the server rejects `initialize`,
    /// or the server answers with an unsupported protocol version. The
    /// connection is closed on handshake failure.
    pub async fn connect(&self, transport: Arc<dyn Transport>) -> McpResult<InitializeResult> {
        self.protocol.connect(transport).await?;

        match self.handshake().await {
            Ok(result) => Ok(result),
            Err(e) => {
                tracing::error!(error = %e, "initialization failed");
                let _ = self.protocol.close().await;
                Err(e)
            }
        }
    }

    async fn handshake(&self) -> McpResult<InitializeResult> {
        let params = InitializeParams {
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            capabilities: self.capabilities.clone(),
            client_info: Some(self.info.clone()),
        };
        let params = serde_json::to_value(&params)
            .map_err(|e| McpError::internal(format!("Failed to serialise params: {e}")))?;

        let result: InitializeResult = self
            .call(methods::INITIALIZE, Some(params), RequestOptions::default())
            .await?;

        if !is_supported_version(&result.protocol_version) {
            return Err(McpError::invalid_request(format!(
                "Server's protocol version is not supported: {}",
                result.protocol_version
            )));
        }

        self.protocol.notify(notifications::INITIALIZED, None).await?;
        self.protocol.mark_initialized();

        tracing::info!(
            server = %result.server_info.name,
            version = %result.protocol_version,
            "connected to server"
        );
        *self.server.write() = Some(result.clone());
        Ok(result)
    }

    /// Closes the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails to close cleanly.
    pub async fn close(&self) -> McpResult<()> {
        self.protocol.close().await
    }

    /// Server name and version, once connected.
    #[must_use]
    pub fn server_info(&self) -> Option<Implementation> {
        self.server.read().as_ref().map(|s| s.server_info.clone())
    }

    /// Server capabilities, once connected.
    #[must_use]
    pub fn server_capabilities(&self) -> Capabilities {
        self.server
            .read()
            .as_ref()
            .map(|s| s.capabilities.clone())
            .unwrap_or_default()
    }

    /// Returns `true` if the server declared the dotted capability `path`.
    #[must_use]
    pub fn server_supports(&self, path: &str) -> bool {
        self.server
            .read()
            .as_ref()
            .is_some_and(|s| s.capabilities.supports(path))
    }

    /// Usage hints sent by the server.
    #[must_use]
    pub fn instructions(&self) -> Option<String> {
        self.server
            .read()
            .as_ref()
            .and_then(|s| s.instructions.clone())
    }

    /// Sends `method` and deserialises the result into `T`.
    ///
    /// # Errors
    ///
    /// Returns the request failure, or `InternalError` if the result does
    /// not have the expected shape.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
        options: RequestOptions,
    ) -> McpResult<T> {
        let value = self.protocol.request(method, params, options).await?;
        serde_json::from_value(value)
            .map_err(|e| McpError::internal(format!("Invalid {method} result: {e}")))
    }

    /// Checks the server is alive.
    ///
    /// # Errors
    ///
    /// Returns the request failure.
    pub async fn ping(&self) -> McpResult<()> {
        self.protocol
            .request(methods::PING, None, RequestOptions::default())
            .await
            .map(drop)
    }

    /// Lists the server's tools.
    ///
    /// # Errors
    ///
    /// Returns the request failure.
    pub async fn list_tools(&self) -> McpResult<ListToolsResult> {
        self.call(methods::TOOLS_LIST, None, RequestOptions::default())
            .await
    }

    /// Calls tool `name` with `arguments`.
    ///
    /// A tool that fails on its own terms still returns `Ok` with
    /// `is_error` set.
    ///
    /// # Errors
    ///
    /// Returns the request failure.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<CallToolResult> {
        self.call_tool_with(name, arguments, RequestOptions::default())
            .await
    }

    /// Like [`Client::call_tool`] with per-request options.
    ///
    /// # Errors
    ///
    /// Returns the request failure.
    pub async fn call_tool_with(
        &self,
        name: &str,
        arguments: Value,
        options: RequestOptions,
    ) -> McpResult<CallToolResult> {
        self.call(
            methods::TOOLS_CALL,
            Some(json!({ "name": name, "arguments": arguments })),
            options,
        )
        .await
    }

    /// Lists concrete resources.
    ///
    /// # Errors
    ///
    /// Returns the request failure.
    pub async fn list_resources(&self) -> McpResult<ListResourcesResult> {
        self.call(methods::RESOURCES_LIST, None, RequestOptions::default())
            .await
    }

    /// Lists resource templates.
    ///
    /// # Errors
    ///
    /// Returns the request failure.
    pub async fn list_resource_templates(&self) -> McpResult<ListResourceTemplatesResult> {
        self.call(
            methods::RESOURCES_TEMPLATES_LIST,
            None,
            RequestOptions::default(),
        )
        .await
    }

    /// Reads resource `uri`.
    ///
    /// # Errors
    ///
    /// Returns the request failure.
    pub async fn read_resource(&self, uri: &str) -> McpResult<ReadResourceResult> {
        self.call(
            methods::RESOURCES_READ,
            Some(json!({ "uri": uri })),
            RequestOptions::default(),
        )
        .await
    }

    /// Subscribes to updates of `uri`.
    ///
    /// # Errors
    ///
    /// Returns the request failure.
    pub async fn subscribe_resource(&self, uri: &str) -> McpResult<()> {
        self.protocol
            .request(
                methods::RESOURCES_SUBSCRIBE,
                Some(json!({ "uri": uri })),
                RequestOptions::default(),
            )
            .await
            .map(drop)
    }

    /// Cancels a subscription to `uri`.
    ///
    /// # Errors
    ///
    /// Returns the request failure.
    pub async fn unsubscribe_resource(&self, uri: &str) -> McpResult<()> {
        self.protocol
            .request(
                methods::RESOURCES_UNSUBSCRIBE,
                Some(json!({ "uri": uri })),
                RequestOptions::default(),
            )
            .await
            .map(drop)
    }

    /// Lists prompts.
    ///
    /// # Errors
    ///
    /// Returns the request failure.
    pub async fn list_prompts(&self) -> McpResult<ListPromptsResult> {
        self.call(methods::PROMPTS_LIST, None, RequestOptions::default())
            .await
    }

    /// Renders prompt `name` with `arguments`.
    ///
    /// # Errors
    ///
    /// Returns the request failure.
    pub async fn get_prompt(&self, name: &str, arguments: Value) -> McpResult<GetPromptResult> {
        self.call(
            methods::PROMPTS_GET,
            Some(json!({ "name": name, "arguments": arguments })),
            RequestOptions::default(),
        )
        .await
    }
}
