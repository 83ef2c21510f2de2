//! MCP server role.
//!
//! This module implements the server side of the MCP lifecycle:
//!
//! 1. **Initialisation**: version check against the supported list,
//!    capability exchange, then `notifications/initialized`
//! 2. **Operation**: tools, resources and prompts served from registries
//! 3. **Shutdown**: connection close or process signal
//!
//! [`Server`] performs the handshake atop a [`Protocol`] engine.
//! [`McpServer`] adds tool/resource/prompt registries and their request
//! handlers on top of it.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{McpError, McpResult};
use crate::mcp::engine::{InitState, Protocol, ProtocolOptions, RequestContext};
use crate::mcp::protocol::{
    is_supported_version, methods, notifications, SUPPORTED_PROTOCOL_VERSIONS,
};
use crate::mcp::resource_template::ResourceTemplate;
use crate::mcp::transport::Transport;
use crate::mcp::types::{
    CallToolParams, CallToolResult, Capabilities, GetPromptResult, Implementation,
    InitializeParams, InitializeResult, ListPromptsResult, ListResourceTemplatesResult,
    ListResourcesResult, ListToolsResult, Prompt, ReadResourceResult, Resource,
    ResourceTemplateInfo, Tool,
};

/// Options for a [`Server`].
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Capabilities declared in the `initialize` result.
    pub capabilities: Capabilities,
    /// Usage hints returned to the client.
    pub instructions: Option<String>,
    /// Engine settings.
    pub protocol: ProtocolOptions,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            capabilities: Capabilities::new(),
            instructions: None,
            protocol: ProtocolOptions {
                enforce_initialization: true,
                ..ProtocolOptions::default()
            },
        }
    }
}

/// What the client declared during `initialize`.
#[derive(Debug, Clone)]
pub struct ClientSession {
    /// Negotiated protocol version.
    pub protocol_version: String,
    /// Client information, if sent.
    pub client_info: Option<Implementation>,
    /// Client capabilities.
    pub capabilities: Capabilities,
}

type InitializedCallback = Arc<dyn Fn() + Send + Sync>;

struct ServerShared {
    info: Implementation,
    instructions: Option<String>,
    capabilities: RwLock<Capabilities>,
    session: RwLock<Option<ClientSession>>,
    on_initialized: RwLock<Option<InitializedCallback>>,
}

/// The server half of the handshake.
#[derive(Clone)]
pub struct Server {
    protocol: Protocol,
    shared: Arc<ServerShared>,
}

impl Server {
    /// Creates a server and registers `initialize`, `ping` and
    /// `notifications/initialized`.
    #[must_use]
    pub fn new(info: Implementation, options: ServerOptions) -> Self {
        let protocol = Protocol::new(options.protocol);
        let shared = Arc::new(ServerShared {
            info,
            instructions: options.instructions,
            capabilities: RwLock::new(options.capabilities),
            session: RwLock::new(None),
            on_initialized: RwLock::new(None),
        });

        let state = Arc::clone(&shared);
        protocol.set_request_handler(methods::INITIALIZE, move |params, ctx| {
            let state = Arc::clone(&state);
            async move { handle_initialize(&state, params, &ctx) }
        });
        protocol.set_request_handler(methods::PING, |_params, _ctx| async { Ok(json!({})) });

        let state = Arc::clone(&shared);
        protocol.set_notification_handler(notifications::INITIALIZED, move |_params| {
            let callback = state.on_initialized.read().clone();
            async move {
                if let Some(callback) = callback {
                    callback();
                }
            }
        });

        Self { protocol, shared }
    }

    /// The underlying engine.
    #[must_use]
    pub const fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    /// Server name and version.
    #[must_use]
    pub fn info(&self) -> &Implementation {
        &self.shared.info
    }

    /// Attaches and starts `transport`.
    ///
    /// # Errors
    ///
    /// Fails if already connected or the transport cannot start.
    pub async fn connect(&self, transport: Arc<dyn Transport>) -> McpResult<()> {
        self.protocol.connect(transport).await
    }

    /// Closes the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails to close cleanly.
    pub async fn close(&self) -> McpResult<()> {
        self.protocol.close().await
    }

    /// Merges `capabilities` into those declared at `initialize`.
    pub fn register_capabilities(&self, capabilities: &Capabilities) {
        let mut current = self.shared.capabilities.write();
        for (key, value) in &capabilities.0 {
            current.0.insert(key.clone(), value.clone());
        }
    }

    fn set_capability(&self, path: &str, value: Value) {
        self.shared.capabilities.write().set(path, value);
    }

    /// Capabilities currently declared.
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.shared.capabilities.read().clone()
    }

    /// Runs `callback` when the client completes the handshake.
    pub fn on_initialized(&self, callback: impl Fn() + Send + Sync + 'static) {
        *self.shared.on_initialized.write() = Some(Arc::new(callback));
    }

    /// Returns `true` once `notifications/initialized` has arrived.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.protocol.init_state() == InitState::Initialized
    }

    /// The client's declared information.
    #[must_use]
    pub fn client_info(&self) -> Option<Implementation> {
        self.shared
            .session
            .read()
            .as_ref()
            .and_then(|s| s.client_info.clone())
    }

    /// The client's declared capabilities.
    #[must_use]
    pub fn client_capabilities(&self) -> Capabilities {
        self.shared
            .session
            .read()
            .as_ref()
            .map(|s| s.capabilities.clone())
            .unwrap_or_default()
    }

    /// Returns `true` if the client declared the dotted capability `path`.
    #[must_use]
    pub fn client_supports(&self, path: &str) -> bool {
        self.shared
            .session
            .read()
            .as_ref()
            .is_some_and(|s| s.capabilities.supports(path))
    }

    /// The negotiated protocol version.
    #[must_use]
    pub fn protocol_version(&self) -> Option<String> {
        self.shared
            .session
            .read()
            .as_ref()
            .map(|s| s.protocol_version.clone())
    }
}

fn handle_initialize(
    state: &ServerShared,
    params: Option<Value>,
    ctx: &RequestContext,
) -> McpResult<Value> {
    let params: InitializeParams = parse_params(params)?;

    if !is_supported_version(&params.protocol_version) {
        return Err(McpError::invalid_request(format!(
            "Unsupported protocol version: {}",
            params.protocol_version
        ))
        .with_data(json!({ "supported": SUPPORTED_PROTOCOL_VERSIONS })));
    }

    ctx.protocol().begin_initialization()?;

    tracing::info!(
        client = params.client_info.as_ref().map_or("unknown", |c| c.name.as_str()),
        version = %params.protocol_version,
        "client initializing"
    );

    let result = InitializeResult {
        protocol_version: params.protocol_version.clone(),
        capabilities: state.capabilities.read().clone(),
        server_info: state.info.clone(),
        instructions: state.instructions.clone(),
    };

    *state.session.write() = Some(ClientSession {
        protocol_version: params.protocol_version,
        client_info: params.client_info,
        capabilities: params.capabilities,
    });

    to_result(&result)
}

/// Deserialises request params, treating absent params as `{}`.
fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> McpResult<T> {
    serde_json::from_value(params.unwrap_or_else(|| Value::Object(Map::new())))
        .map_err(|e| McpError::invalid_params(format!("Invalid params: {e}")))
}

fn to_result<T: Serialize>(value: &T) -> McpResult<Value> {
    serde_json::to_value(value).map_err(|e| {
        tracing::error!(error = %e, "Failed to serialise result");
        McpError::internal("Internal error: failed to serialise result")
    })
}

// ==================== Registries ====================

type ToolHandler = Arc<
    dyn Fn(Map<String, Value>, RequestContext) -> BoxFuture<'static, anyhow::Result<CallToolResult>>
        + Send
        + Sync,
>;
type ResourceHandler = Arc<
    dyn Fn(String, IndexMap<String, String>) -> BoxFuture<'static, anyhow::Result<ReadResourceResult>>
        + Send
        + Sync,
>;
type PromptHandler = Arc<
    dyn Fn(Map<String, Value>) -> BoxFuture<'static, anyhow::Result<GetPromptResult>> + Send + Sync,
>;

struct RegisteredTool {
    definition: Tool,
    handler: ToolHandler,
}

struct RegisteredResource {
    template: ResourceTemplate,
    handler: ResourceHandler,
}

struct RegisteredPrompt {
    definition: Prompt,
    handler: PromptHandler,
}

#[derive(Default)]
struct Registry {
    tools: RwLock<IndexMap<String, RegisteredTool>>,
    resources: RwLock<Vec<RegisteredResource>>,
    prompts: RwLock<IndexMap<String, RegisteredPrompt>>,
    subscriptions: Mutex<HashSet<String>>,
}

/// Parameters carrying a resource URI.
#[derive(Debug, Deserialize)]
struct UriParams {
    #[serde(default)]
    uri: String,
}

/// Parameters of `prompts/get`.
#[derive(Debug, Deserialize)]
struct GetPromptParams {
    name: String,
    #[serde(default)]
    arguments: Map<String, Value>,
}

/// A server with tool, resource and prompt registries.
#[derive(Clone)]
pub struct McpServer {
    server: Server,
    registry: Arc<Registry>,
}

impl McpServer {
    /// Creates a server and registers every core method.
    #[must_use]
    pub fn new(info: Implementation, options: ServerOptions) -> Self {
        let server = Server::new(info, options);
        let registry = Arc::new(Registry::default());
        let protocol = server.protocol();

        let reg = Arc::clone(&registry);
        protocol.set_request_handler(methods::TOOLS_LIST, move |_params, _ctx| {
            let tools: Vec<Tool> = reg
                .tools
                .read()
                .values()
                .map(|t| t.definition.clone())
                .collect();
            async move { to_result(&ListToolsResult { tools }) }
        });

        let reg = Arc::clone(&registry);
        protocol.set_request_handler(methods::TOOLS_CALL, move |params, ctx| {
            call_tool(Arc::clone(&reg), params, ctx)
        });

        let reg = Arc::clone(&registry);
        protocol.set_request_handler(methods::RESOURCES_LIST, move |_params, _ctx| {
            let resources = reg
                .resources
                .read()
                .iter()
                .filter(|r| r.template.is_listable())
                .map(|r| Resource {
                    uri: r.template.example_uri(),
                    name: template_name(&r.template),
                    description: r.template.description().map(str::to_string),
                    mime_type: r.template.mime_type().map(str::to_string),
                })
                .collect();
            async move { to_result(&ListResourcesResult { resources }) }
        });

        let reg = Arc::clone(&registry);
        protocol.set_request_handler(methods::RESOURCES_TEMPLATES_LIST, move |_params, _ctx| {
            let resource_templates = reg
                .resources
                .read()
                .iter()
                .map(|r| ResourceTemplateInfo {
                    uri_template: r.template.uri_template().to_string(),
                    name: template_name(&r.template),
                    description: r.template.description().map(str::to_string),
                    mime_type: r.template.mime_type().map(str::to_string),
                })
                .collect();
            async move { to_result(&ListResourceTemplatesResult { resource_templates }) }
        });

        let reg = Arc::clone(&registry);
        protocol.set_request_handler(methods::RESOURCES_READ, move |params, _ctx| {
            read_resource(Arc::clone(&reg), params)
        });

        let reg = Arc::clone(&registry);
        protocol.set_request_handler(methods::RESOURCES_SUBSCRIBE, move |params, _ctx| {
            let reg = Arc::clone(&reg);
            async move {
                let UriParams { uri } = parse_params(params)?;
                if uri.is_empty() {
                    return Err(McpError::invalid_params("Resource URI is required"));
                }
                let subscribable = reg
                    .resources
                    .read()
                    .iter()
                    .find(|r| r.template.matches(&uri))
                    .map(|r| r.template.is_subscribable());
                match subscribable {
                    None => Err(McpError::invalid_params(format!("Resource not found: {uri}"))),
                    Some(false) => Err(McpError::invalid_params(format!(
                        "Resource does not support subscriptions: {uri}"
                    ))),
                    Some(true) => {
                        tracing::debug!(uri = %uri, "resource subscribed");
                        reg.subscriptions.lock().insert(uri);
                        Ok(json!({}))
                    }
                }
            }
        });

        let reg = Arc::clone(&registry);
        protocol.set_request_handler(methods::RESOURCES_UNSUBSCRIBE, move |params, _ctx| {
            let reg = Arc::clone(&reg);
            async move {
                let UriParams { uri } = parse_params(params)?;
                reg.subscriptions.lock().remove(&uri);
                Ok(json!({}))
            }
        });

        let reg = Arc::clone(&registry);
        protocol.set_request_handler(methods::PROMPTS_LIST, move |_params, _ctx| {
            let prompts: Vec<Prompt> = reg
                .prompts
                .read()
                .values()
                .map(|p| p.definition.clone())
                .collect();
            async move { to_result(&ListPromptsResult { prompts }) }
        });

        let reg = Arc::clone(&registry);
        protocol.set_request_handler(methods::PROMPTS_GET, move |params, _ctx| {
            get_prompt(Arc::clone(&reg), params)
        });

        Self { server, registry }
    }

    /// The handshake layer.
    #[must_use]
    pub const fn server(&self) -> &Server {
        &self.server
    }

    /// Attaches and starts `transport`.
    ///
    /// # Errors
    ///
    /// Fails if already connected or the transport cannot start.
    pub async fn connect(&self, transport: Arc<dyn Transport>) -> McpResult<()> {
        self.server.connect(transport).await
    }

    /// Closes the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails to close cleanly.
    pub async fn close(&self) -> McpResult<()> {
        self.server.close().await
    }

    /// Serves `transport` until it closes or the process is asked to stop.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot start.
    pub async fn run(&self, transport: Arc<dyn Transport>) -> McpResult<()> {
        self.connect(transport).await?;

        tokio::select! {
            () = self.server.protocol().closed() => {
                tracing::info!("Connection closed, shutting down");
            }
            () = shutdown_signal() => {
                tracing::info!("Initiating graceful shutdown");
            }
        }

        self.close().await
    }

    /// Registers a tool.
    ///
    /// `definition` may set `description` and `inputSchema`; anything it
    /// omits falls back to an empty description and an object schema with
    /// no properties.
    ///
    /// The handler returns `anyhow::Result`. An error that is an
    /// [`McpError`] becomes a JSON-RPC error response; any other error
    /// becomes a result with `isError: true`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParams` if the merged definition is not a valid tool.
    pub fn tool<F, Fut>(&self, name: &str, definition: Value, handler: F) -> McpResult<()>
    where
        F: Fn(Map<String, Value>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<CallToolResult>> + Send + 'static,
    {
        let defaults = json!({
            "name": name,
            "description": "",
            "inputSchema": {
                "type": "object",
                "properties": {},
                "required": [],
            },
        });
        let definition: Tool = serde_json::from_value(merge_definition(defaults, definition))
            .map_err(|e| McpError::invalid_params(format!("Invalid tool definition: {e}")))?;

        let handler: ToolHandler = Arc::new(move |args, ctx| handler(args, ctx).boxed());
        self.registry.tools.write().insert(
            name.to_string(),
            RegisteredTool {
                definition,
                handler,
            },
        );
        self.server.set_capability("tools.listChanged", Value::Bool(true));
        Ok(())
    }

    /// Registers a resource template and the handler serving its URIs.
    pub fn resource<F, Fut>(&self, template: ResourceTemplate, handler: F)
    where
        F: Fn(String, IndexMap<String, String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ReadResourceResult>> + Send + 'static,
    {
        if template.is_subscribable() {
            self.server
                .set_capability("resources.subscribe", Value::Bool(true));
        }
        self.server
            .set_capability("resources.listChanged", Value::Bool(true));

        let handler: ResourceHandler = Arc::new(move |uri, params| handler(uri, params).boxed());
        self.registry
            .resources
            .write()
            .push(RegisteredResource { template, handler });
    }

    /// Registers a prompt.
    ///
    /// `definition` may set `description` and `arguments`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParams` if the merged definition is not a valid prompt.
    pub fn prompt<F, Fut>(&self, name: &str, definition: Value, handler: F) -> McpResult<()>
    where
        F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<GetPromptResult>> + Send + 'static,
    {
        let defaults = json!({ "name": name, "arguments": [] });
        let definition: Prompt = serde_json::from_value(merge_definition(defaults, definition))
            .map_err(|e| McpError::invalid_params(format!("Invalid prompt definition: {e}")))?;

        let handler: PromptHandler = Arc::new(move |args| handler(args).boxed());
        self.registry.prompts.write().insert(
            name.to_string(),
            RegisteredPrompt {
                definition,
                handler,
            },
        );
        self.server
            .set_capability("prompts.listChanged", Value::Bool(true));
        Ok(())
    }

    /// Returns `true` if the client subscribed to `uri`.
    #[must_use]
    pub fn is_subscribed(&self, uri: &str) -> bool {
        self.registry.subscriptions.lock().contains(uri)
    }

    /// Tells the client that subscribed resource `uri` changed.
    ///
    /// Returns `false` without sending when the session is not initialised,
    /// not connected, or `uri` is not subscribed.
    pub async fn notify_resource_updated(&self, uri: &str) -> bool {
        if !self.is_subscribed(uri) {
            tracing::debug!(uri = %uri, "not subscribed, skipping update");
            return false;
        }
        self.send_if_ready(notifications::RESOURCES_UPDATED, Some(json!({ "uri": uri })))
            .await
    }

    /// Tells the client the resource list changed.
    pub async fn notify_resource_list_changed(&self) -> bool {
        self.send_if_ready(notifications::RESOURCES_LIST_CHANGED, None)
            .await
    }

    /// Tells the client the tool list changed.
    pub async fn notify_tool_list_changed(&self) -> bool {
        self.send_if_ready(notifications::TOOLS_LIST_CHANGED, None)
            .await
    }

    /// Tells the client the prompt list changed.
    pub async fn notify_prompt_list_changed(&self) -> bool {
        self.send_if_ready(notifications::PROMPTS_LIST_CHANGED, None)
            .await
    }

    async fn send_if_ready(&self, method: &str, params: Option<Value>) -> bool {
        let protocol = self.server.protocol();
        if !self.server.is_initialized() || !protocol.is_connected() {
            return false;
        }
        match protocol.notify(method, params).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(method, error = %e, "Failed to send notification");
                false
            }
        }
    }
}

fn template_name(template: &ResourceTemplate) -> String {
    template
        .name()
        .map_or_else(|| template.uri_template().to_string(), str::to_string)
}

/// Overlays the object `definition` onto `defaults`, one level deep.
fn merge_definition(mut defaults: Value, definition: Value) -> Value {
    if let (Value::Object(base), Value::Object(overrides)) = (&mut defaults, definition) {
        for (key, value) in overrides {
            if key != "name" {
                base.insert(key, value);
            }
        }
    }
    defaults
}

async fn call_tool(
    registry: Arc<Registry>,
    params: Option<Value>,
    ctx: RequestContext,
) -> McpResult<Value> {
    let params: CallToolParams = parse_params(params)?;
    if params.name.is_empty() {
        return Err(McpError::invalid_params("Tool name is required"));
    }

    let (schema, handler) = registry
        .tools
        .read()
        .get(&params.name)
        .map(|t| (t.definition.input_schema.clone(), Arc::clone(&t.handler)))
        .ok_or_else(|| McpError::invalid_params(format!("Tool not found: {}", params.name)))?;

    validate_arguments(&schema, &params.arguments)?;

    match handler(params.arguments, ctx).await {
        Ok(result) => to_result(&result),
        Err(error) => match error.downcast::<McpError>() {
            Ok(protocol_error) => Err(protocol_error),
            Err(error) => {
                tracing::error!(tool = %params.name, error = %error, "Tool execution error");
                to_result(&CallToolResult::error(format!("Error: {error}")))
            }
        },
    }
}

async fn read_resource(registry: Arc<Registry>, params: Option<Value>) -> McpResult<Value> {
    let UriParams { uri } = parse_params(params)?;
    if uri.is_empty() {
        return Err(McpError::invalid_params("Resource URI is required"));
    }

    let routed = registry.resources.read().iter().find_map(|r| {
        r.template
            .match_uri(&uri)
            .map(|values| (values, Arc::clone(&r.handler)))
    });
    let Some((values, handler)) = routed else {
        return Err(McpError::invalid_params(format!("Resource not found: {uri}")));
    };

    tracing::info!(uri = %uri, "Resource access");
    match handler(uri.clone(), values).await {
        Ok(result) => to_result(&result),
        Err(error) => match error.downcast::<McpError>() {
            Ok(protocol_error) => Err(protocol_error),
            Err(error) => {
                tracing::error!(uri = %uri, error = %error, "Resource read failed");
                Err(McpError::internal(format!("Resource read failed: {error}")))
            }
        },
    }
}

async fn get_prompt(registry: Arc<Registry>, params: Option<Value>) -> McpResult<Value> {
    let params: GetPromptParams = parse_params(params)?;

    let (description, handler) = registry
        .prompts
        .read()
        .get(&params.name)
        .map(|p| (p.definition.description.clone(), Arc::clone(&p.handler)))
        .ok_or_else(|| McpError::invalid_params(format!("Prompt not found: {}", params.name)))?;

    let mut result = handler(params.arguments).await.map_err(|e| {
        tracing::error!(prompt = %params.name, error = %e, "Prompt processing failed");
        McpError::internal(format!("Prompt processing failed: {e}"))
    })?;
    if description.is_some() {
        result.description = description;
    }
    to_result(&result)
}

/// Checks required keys and primitive `type`s declared by `schema`.
fn validate_arguments(schema: &Value, arguments: &Map<String, Value>) -> McpResult<()> {
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if arguments.get(name).map_or(true, Value::is_null) {
                return Err(McpError::invalid_params(format!(
                    "Missing required parameter: {name}"
                )));
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };
    for (name, value) in arguments {
        let Some(expected) = properties
            .get(name)
            .and_then(|p| p.get("type"))
            .and_then(Value::as_str)
        else {
            continue;
        };
        let ok = match expected {
            "string" => value.is_string(),
            "number" => value.is_number(),
            "integer" => value.is_i64() || value.is_u64(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            "null" => value.is_null(),
            _ => true,
        };
        if !ok {
            return Err(McpError::invalid_params(format!(
                "Invalid type for parameter '{name}': expected {expected}"
            )));
        }
    }
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
#[cfg(unix)]
pub async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (Ok(mut sigint), Ok(mut sigterm)) = (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) else {
        tracing::warn!("Failed to install signal handlers");
        std::future::pending::<()>().await;
        return;
    };

    tokio::select! {
        _ = sigint.recv() => tracing::info!("Received SIGINT"),
        _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
    }
}

/// Resolves on Ctrl+C.
#[cfg(windows)]
pub async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("Received Ctrl+C");
    } else {
        std::future::pending::<()>().await;
    }
}
