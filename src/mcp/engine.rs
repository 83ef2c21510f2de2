//! The protocol engine shared by the client and server roles.
//!
//! [`Protocol`] owns the pending-request table, the request and notification
//! handler registries, and the link to one live [`Transport`]. It
//! correlates responses to requests by id, so any number of requests may be
//! in flight at once.
//!
//! # Inbound dispatch
//!
//! Messages from the transport are classified and handled in wire order.
//! Responses, errors and notifications are processed inline; each request
//! is handed to its own task so a slow handler never blocks the stream.
//! Handler faults (including panics) become JSON-RPC error responses and
//! never escape dispatch.
//!
//! # Timeouts
//!
//! Every request races its reply against a real timer. The inactivity
//! deadline can be pushed back by progress notifications when the caller
//! asks for it; the optional max-total deadline never moves.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Map, Value};
use tokio::sync::{oneshot, Notify};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::{McpError, McpResult, TimeoutKind, TransportError};
use crate::mcp::protocol::{
    methods, notifications, parse_message, ErrorCode, JsonRpcError, JsonRpcMessage,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
};
use crate::mcp::transport::{Transport, TransportHandler};

/// Default per-request inactivity timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// A progress update for an outstanding request.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    /// Work done so far.
    pub progress: f64,
    /// Total work, if known.
    pub total: Option<f64>,
    /// Optional human-readable status.
    pub message: Option<String>,
}

/// Callback invoked for each progress notification of a request.
pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

/// Per-call options for [`Protocol::request`].
#[derive(Clone, Default)]
pub struct RequestOptions {
    /// Inactivity timeout; the engine default applies when `None`.
    pub timeout: Option<Duration>,
    /// Ceiling on total duration regardless of progress.
    pub max_total_timeout: Option<Duration>,
    /// Restart the inactivity timer whenever progress arrives.
    pub reset_timeout_on_progress: bool,
    /// Receives progress notifications for this request.
    pub on_progress: Option<ProgressCallback>,
    /// Cancels the request when triggered.
    pub cancel: Option<CancellationToken>,
}

impl RequestOptions {
    /// Sets the inactivity timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the max-total timeout.
    #[must_use]
    pub const fn with_max_total_timeout(mut self, timeout: Duration) -> Self {
        self.max_total_timeout = Some(timeout);
        self
    }

    /// Restarts the inactivity timer on progress.
    #[must_use]
    pub const fn reset_timeout_on_progress(mut self) -> Self {
        self.reset_timeout_on_progress = true;
        self
    }

    /// Registers a progress callback.
    #[must_use]
    pub fn on_progress(mut self, callback: impl Fn(Progress) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    /// Cancels the request when `token` fires.
    #[must_use]
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("timeout", &self.timeout)
            .field("max_total_timeout", &self.max_total_timeout)
            .field("reset_timeout_on_progress", &self.reset_timeout_on_progress)
            .field("on_progress", &self.on_progress.is_some())
            .field("cancel", &self.cancel.is_some())
            .finish()
    }
}

/// Engine-wide settings.
#[derive(Debug, Clone)]
pub struct ProtocolOptions {
    /// Reject everything but `initialize` and `ping` until initialised.
    pub enforce_initialization: bool,
    /// Inactivity timeout used when a request does not set one.
    pub default_timeout: Duration,
    /// Max-total timeout used when a request does not set one.
    pub default_max_total_timeout: Option<Duration>,
}

impl Default for ProtocolOptions {
    fn default() -> Self {
        Self {
            enforce_initialization: false,
            default_timeout: DEFAULT_REQUEST_TIMEOUT,
            default_max_total_timeout: None,
        }
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    /// No `initialize` yet.
    Uninitialized,
    /// `initialize` answered, awaiting `notifications/initialized`.
    Initializing,
    /// Handshake complete.
    Initialized,
}

/// What a request handler learns about the request it serves.
#[derive(Clone)]
pub struct RequestContext {
    /// The request id.
    pub id: RequestId,
    /// The method being served.
    pub method: String,
    /// Fires when the peer cancels the request or the connection closes.
    pub cancel: CancellationToken,
    progress_token: Option<RequestId>,
    protocol: Protocol,
}

impl RequestContext {
    /// The engine serving this request, for sending notifications.
    #[must_use]
    pub const fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    /// Reports progress if the peer asked for it. Returns whether anything was sent.
    pub async fn report_progress(&self, progress: f64, total: Option<f64>) -> bool {
        let Some(token) = &self.progress_token else {
            return false;
        };
        let notification = JsonRpcNotification::progress(token, progress, total);
        self.protocol
            .send(&JsonRpcMessage::Notification(notification))
            .await
            .is_ok()
    }
}

type RequestHandlerFn =
    Arc<dyn Fn(Option<Value>, RequestContext) -> BoxFuture<'static, McpResult<Value>> + Send + Sync>;
type NotificationHandlerFn = Arc<dyn Fn(Option<Value>) -> BoxFuture<'static, ()> + Send + Sync>;

struct PendingRequest {
    tx: oneshot::Sender<McpResult<Value>>,
    activity: Arc<Notify>,
    on_progress: Option<ProgressCallback>,
}

struct Inner {
    options: ProtocolOptions,
    next_id: AtomicI64,
    pending: Mutex<HashMap<RequestId, PendingRequest>>,
    in_flight: Mutex<HashMap<RequestId, CancellationToken>>,
    request_handlers: RwLock<HashMap<String, RequestHandlerFn>>,
    notification_handlers: RwLock<HashMap<String, NotificationHandlerFn>>,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    state: Mutex<InitState>,
    closed: Mutex<CancellationToken>,
}

/// Removes a pending entry when the waiting caller goes away.
struct PendingGuard<'a> {
    inner: &'a Inner,
    id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.inner.pending.lock().remove(&self.id);
    }
}

/// A JSON-RPC engine bound to at most one transport at a time.
///
/// Cloning is cheap; clones share all state.
#[derive(Clone)]
pub struct Protocol {
    inner: Arc<Inner>,
}

impl Default for Protocol {
    fn default() -> Self {
        Self::new(ProtocolOptions::default())
    }
}

impl Protocol {
    /// Creates an engine with no transport and no handlers.
    #[must_use]
    pub fn new(options: ProtocolOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                options,
                next_id: AtomicI64::new(1),
                pending: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                request_handlers: RwLock::new(HashMap::new()),
                notification_handlers: RwLock::new(HashMap::new()),
                transport: Mutex::new(None),
                state: Mutex::new(InitState::Uninitialized),
                closed: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    /// The options this engine was built with.
    #[must_use]
    pub fn options(&self) -> &ProtocolOptions {
        &self.inner.options
    }

    // ==================== Connection ====================

    /// Attaches `transport` and starts it.
    ///
    /// # Errors
    ///
    /// Fails if a transport is already attached or the transport cannot start.
    pub async fn connect(&self, transport: Arc<dyn Transport>) -> McpResult<()> {
        {
            let mut slot = self.inner.transport.lock();
            if slot.is_some() {
                return Err(McpError::invalid_request("Already connected to a transport"));
            }
            *slot = Some(Arc::clone(&transport));
        }
        *self.inner.closed.lock() = CancellationToken::new();

        let handler = Arc::new(EngineHandler {
            inner: Arc::downgrade(&self.inner),
        });
        if let Err(e) = transport.start(handler).await {
            self.inner.transport.lock().take();
            tracing::error!(error = %e, "failed to start transport");
            return Err(McpError::transport(&e));
        }

        tracing::info!("transport connected");
        Ok(())
    }

    /// Returns `true` while a transport is attached.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.transport.lock().is_some()
    }

    /// Closes the attached transport, rejecting every pending request.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails to close cleanly.
    pub async fn close(&self) -> McpResult<()> {
        let transport = self.inner.transport.lock().take();
        let result = match transport {
            Some(transport) => transport.close().await.map_err(|e| McpError::transport(&e)),
            None => Ok(()),
        };
        self.handle_close();
        result
    }

    /// Resolves once the current connection has closed.
    pub async fn closed(&self) {
        let token = self.inner.closed.lock().clone();
        token.cancelled().await;
    }

    // ==================== Initialisation state ====================

    /// Current handshake state.
    #[must_use]
    pub fn init_state(&self) -> InitState {
        *self.inner.state.lock()
    }

    /// Moves from `Uninitialized` to `Initializing`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` if initialisation already began.
    pub fn begin_initialization(&self) -> McpResult<()> {
        let mut state = self.inner.state.lock();
        if *state != InitState::Uninitialized {
            return Err(McpError::invalid_request("Server already initialized"));
        }
        *state = InitState::Initializing;
        Ok(())
    }

    /// Completes the handshake. Returns `false` if it had already completed.
    pub fn mark_initialized(&self) -> bool {
        let mut state = self.inner.state.lock();
        if *state == InitState::Initialized {
            return false;
        }
        *state = InitState::Initialized;
        true
    }

    // ==================== Handler registration ====================

    /// Registers the handler for request `method`, replacing any previous one.
    pub fn set_request_handler<F, Fut>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(Option<Value>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = McpResult<Value>> + Send + 'static,
    {
        let handler: RequestHandlerFn = Arc::new(move |params, ctx| handler(params, ctx).boxed());
        self.inner
            .request_handlers
            .write()
            .insert(method.into(), handler);
    }

    /// Removes the handler for request `method`.
    pub fn remove_request_handler(&self, method: &str) {
        self.inner.request_handlers.write().remove(method);
    }

    /// Registers the handler for notification `method`.
    pub fn set_notification_handler<F, Fut>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: NotificationHandlerFn = Arc::new(move |params| handler(params).boxed());
        self.inner
            .notification_handlers
            .write()
            .insert(method.into(), handler);
    }

    /// Removes the handler for notification `method`.
    pub fn remove_notification_handler(&self, method: &str) {
        self.inner.notification_handlers.write().remove(method);
    }

    // ==================== Outbound ====================

    /// Sends a request and waits for its result.
    ///
    /// # Errors
    ///
    /// - `RequestTimeout` when a deadline expires (see [`McpError::timeout_kind`])
    /// - `RequestCancelled` when the cancel token fires
    /// - `ConnectionClosed` when not connected or the connection drops
    /// - `RequestFailed` when the transport fails
    /// - whatever error the peer answered with
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        options: RequestOptions,
    ) -> McpResult<Value> {
        let transport = self.transport()?;
        let id = RequestId::Number(self.inner.next_id.fetch_add(1, Ordering::Relaxed));

        let params = if options.on_progress.is_some() {
            Some(with_progress_token(params, &id))
        } else {
            params
        };

        let (tx, mut rx) = oneshot::channel();
        let activity = Arc::new(Notify::new());
        self.inner.pending.lock().insert(
            id.clone(),
            PendingRequest {
                tx,
                activity: Arc::clone(&activity),
                on_progress: options.on_progress.clone(),
            },
        );
        let _guard = PendingGuard {
            inner: &self.inner,
            id: id.clone(),
        };

        let json = JsonRpcMessage::Request(JsonRpcRequest::new(id.clone(), method, params))
            .to_json()
            .map_err(|e| McpError::internal(format!("Failed to serialise request: {e}")))?;

        let timeout = options.timeout.unwrap_or(self.inner.options.default_timeout);
        let max_total = options
            .max_total_timeout
            .or(self.inner.options.default_max_total_timeout);
        let cancel = options.cancel.clone().unwrap_or_default();

        let started = Instant::now();
        let mut inactivity_deadline = started + timeout;
        let total_deadline = max_total.map(|limit| started + limit);

        // The write runs on its own task so an abandoned request never tears
        // a frame, and the deadlines below cover a stalled write too.
        tracing::debug!(method, id = %id, "sending request");
        let mut write = tokio::spawn(async move { transport.write_message(&json).await });
        let mut written = false;

        let failure = loop {
            tokio::select! {
                biased;
                reply = &mut rx => {
                    return reply.unwrap_or_else(|_| Err(McpError::connection_closed()));
                }
                outcome = &mut write, if !written => {
                    written = true;
                    match outcome {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => return Err(McpError::transport(&e)),
                        Err(e) => return Err(McpError::internal(format!("Request write failed: {e}"))),
                    }
                }
                () = activity.notified() => {
                    if options.reset_timeout_on_progress {
                        inactivity_deadline = Instant::now() + timeout;
                    }
                }
                () = cancel.cancelled() => {
                    break McpError::cancelled("Request cancelled");
                }
                () = sleep_until(total_deadline.unwrap_or(inactivity_deadline)), if total_deadline.is_some() => {
                    let limit = max_total.unwrap_or_default();
                    break McpError::timeout(
                        TimeoutKind::MaxTotal,
                        limit.as_millis(),
                        started.elapsed().as_millis(),
                    );
                }
                () = sleep_until(inactivity_deadline) => {
                    break McpError::timeout(
                        TimeoutKind::Inactivity,
                        timeout.as_millis(),
                        started.elapsed().as_millis(),
                    );
                }
            }
        };

        // Whoever removes the entry settles the request.
        let settled_elsewhere = self.inner.pending.lock().remove(&id).is_none();
        if settled_elsewhere {
            if let Ok(reply) = rx.await {
                return reply;
            }
        }

        tracing::debug!(method, id = %id, error = %failure, "request abandoned");
        if !written {
            // The peer never saw the request.
            return Err(failure);
        }
        let reason = failure.message.clone();
        let _ = self
            .notify(
                notifications::CANCELLED,
                Some(json!({ "requestId": id.to_value(), "reason": reason })),
            )
            .await;
        Err(failure)
    }

    /// Sends a notification.
    ///
    /// # Errors
    ///
    /// Returns an error if not connected or the write fails.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> McpResult<()> {
        let message = JsonRpcMessage::Notification(JsonRpcNotification::new(method, params));
        self.send(&message).await
    }

    fn transport(&self) -> McpResult<Arc<dyn Transport>> {
        self.inner
            .transport
            .lock()
            .clone()
            .ok_or_else(|| McpError::new(ErrorCode::ConnectionClosed, "Not connected"))
    }

    async fn send(&self, message: &JsonRpcMessage) -> McpResult<()> {
        let transport = self.transport()?;
        let json = message
            .to_json()
            .map_err(|e| McpError::internal(format!("Failed to serialise message: {e}")))?;
        transport
            .write_message(&json)
            .await
            .map_err(|e| McpError::transport(&e))
    }

    // ==================== Inbound ====================

    /// Processes one raw inbound message to completion.
    ///
    /// Requests are served inline, so the response has been sent when this
    /// returns. Faults are logged and answered, never returned.
    pub async fn handle_message(&self, raw: &str) {
        self.dispatch(raw, false).await;
    }

    async fn dispatch(&self, raw: &str, spawn_requests: bool) {
        let message = match parse_message(raw) {
            Ok(message) => message,
            Err(error) => {
                tracing::warn!(code = error.error.code, "dropping malformed message");
                if error.id.is_some() {
                    self.send_logged(JsonRpcMessage::Error(error)).await;
                }
                return;
            }
        };

        match message {
            JsonRpcMessage::Response(response) => {
                self.settle(&response.id, Ok(response.result));
            }
            JsonRpcMessage::Error(error) => match error.id {
                Some(id) => self.settle(&id, Err(McpError::from(error.error))),
                None => {
                    tracing::warn!(code = error.error.code, message = %error.error.message, "peer reported an error");
                }
            },
            JsonRpcMessage::Request(request) => {
                // Registered before the handler task exists, so a cancel that
                // follows right behind the request still finds it.
                let cancel = CancellationToken::new();
                self.inner
                    .in_flight
                    .lock()
                    .insert(request.id.clone(), cancel.clone());
                if spawn_requests {
                    let protocol = self.clone();
                    tokio::spawn(async move { protocol.handle_request(request, cancel).await });
                } else {
                    self.handle_request(request, cancel).await;
                }
            }
            JsonRpcMessage::Notification(notification) => {
                self.handle_notification(notification).await;
            }
        }
    }

    fn settle(&self, id: &RequestId, result: McpResult<Value>) {
        let entry = self.inner.pending.lock().remove(id);
        match entry {
            Some(entry) => {
                let _ = entry.tx.send(result);
            }
            None => tracing::warn!(id = %id, "response for unknown request id"),
        }
    }

    async fn handle_request(&self, request: JsonRpcRequest, cancel: CancellationToken) {
        let id = request.id.clone();
        let method = request.method.clone();
        tracing::debug!(method = %method, id = %id, "handling request");

        let outcome = self.run_request(request, cancel).await;
        self.inner.in_flight.lock().remove(&id);
        let Some(outcome) = outcome else {
            tracing::debug!(method = %method, id = %id, "request cancelled by peer");
            return;
        };

        let message = match outcome {
            Ok(result) => JsonRpcMessage::Response(JsonRpcResponse::success(id, result)),
            Err(error) => {
                tracing::debug!(method = %method, error = %error, "request failed");
                JsonRpcMessage::Error(JsonRpcError::new(Some(id), error.to_error_data()))
            }
        };
        self.send_logged(message).await;
    }

    /// Runs the handler for `request`. `None` means the peer cancelled it.
    async fn run_request(
        &self,
        request: JsonRpcRequest,
        cancel: CancellationToken,
    ) -> Option<McpResult<Value>> {
        let JsonRpcRequest {
            id, method, params, ..
        } = request;

        if cancel.is_cancelled() {
            return None;
        }

        if self.inner.options.enforce_initialization
            && method != methods::INITIALIZE
            && method != methods::PING
            && self.init_state() != InitState::Initialized
        {
            return Some(Err(McpError::not_initialized()));
        }

        let handler = self.inner.request_handlers.read().get(&method).cloned();
        let Some(handler) = handler else {
            return Some(Err(McpError::method_not_found(&method)));
        };

        let ctx = RequestContext {
            id: id.clone(),
            method: method.clone(),
            cancel: cancel.clone(),
            progress_token: progress_token(params.as_ref()),
            protocol: self.clone(),
        };
        let work = AssertUnwindSafe(async move { handler(params, ctx).await }).catch_unwind();

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            outcome = work => Some(outcome),
        };

        match outcome? {
            Ok(result) => Some(result),
            Err(_) => {
                tracing::error!(method = %method, id = %id, "request handler panicked");
                Some(Err(McpError::internal("Internal error")))
            }
        }
    }

    async fn handle_notification(&self, notification: JsonRpcNotification) {
        let JsonRpcNotification { method, params, .. } = notification;

        match method.as_str() {
            notifications::PROGRESS | notifications::LEGACY_PROGRESS => {
                self.handle_progress(params.as_ref());
                return;
            }
            notifications::CANCELLED => self.handle_cancelled(params.as_ref()),
            notifications::INITIALIZED => self.handle_initialized(),
            _ => {}
        }

        let handler = self.inner.notification_handlers.read().get(&method).cloned();
        let Some(handler) = handler else {
            if method != notifications::CANCELLED && method != notifications::INITIALIZED {
                tracing::debug!(method = %method, "no handler for notification");
            }
            return;
        };

        let work = AssertUnwindSafe(async move { handler(params).await }).catch_unwind();
        if work.await.is_err() {
            tracing::error!(method = %method, "notification handler panicked");
        }
    }

    fn handle_progress(&self, params: Option<&Value>) {
        let Some(params) = params else {
            return;
        };
        let Some(token) = params
            .get("progressToken")
            .or_else(|| params.get("token"))
            .and_then(RequestId::from_value)
        else {
            tracing::debug!("progress notification without token");
            return;
        };

        let (callback, activity) = {
            let pending = self.inner.pending.lock();
            let Some(entry) = pending.get(&token) else {
                tracing::debug!(token = %token, "progress for unknown request");
                return;
            };
            (entry.on_progress.clone(), Arc::clone(&entry.activity))
        };

        if let Some(callback) = callback {
            callback(Progress {
                progress: params.get("progress").and_then(Value::as_f64).unwrap_or(0.0),
                total: params.get("total").and_then(Value::as_f64),
                message: params
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        }
        activity.notify_one();
    }

    fn handle_cancelled(&self, params: Option<&Value>) {
        let Some(id) = params
            .and_then(|p| p.get("requestId"))
            .and_then(RequestId::from_value)
        else {
            return;
        };
        if let Some(token) = self.inner.in_flight.lock().get(&id) {
            tracing::debug!(id = %id, "peer cancelled request");
            token.cancel();
        }
    }

    fn handle_initialized(&self) {
        let mut state = self.inner.state.lock();
        match *state {
            InitState::Initializing => {
                *state = InitState::Initialized;
                tracing::info!("session initialized");
            }
            InitState::Uninitialized => {
                tracing::warn!("initialized notification before initialize request");
            }
            InitState::Initialized => {}
        }
    }

    async fn send_logged(&self, message: JsonRpcMessage) {
        if let Err(e) = self.send(&message).await {
            tracing::error!(error = %e, "failed to send message");
        }
    }

    // ==================== Transport lifecycle ====================

    fn handle_close(&self) {
        let token = self.inner.closed.lock().clone();
        if token.is_cancelled() {
            return;
        }
        self.inner.transport.lock().take();
        let rejected = self.reject_all(McpError::connection_closed);
        for (_, cancel) in self.inner.in_flight.lock().drain() {
            cancel.cancel();
        }
        tracing::info!(rejected, "connection closed");
        token.cancel();
    }

    fn handle_transport_error(&self, error: &TransportError) {
        let rejected = self.reject_all(|| McpError::transport(error));
        tracing::error!(error = %error, rejected, "transport error");
    }

    fn reject_all(&self, make_error: impl Fn() -> McpError) -> usize {
        let drained: Vec<PendingRequest> = self
            .inner
            .pending
            .lock()
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        let count = drained.len();
        for entry in drained {
            let _ = entry.tx.send(Err(make_error()));
        }
        count
    }

    /// Number of requests awaiting a response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.lock().len()
    }
}

fn with_progress_token(params: Option<Value>, id: &RequestId) -> Value {
    let mut params = match params {
        Some(Value::Object(map)) => map,
        Some(other) => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
        None => Map::new(),
    };
    let meta = params
        .entry("_meta")
        .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(meta) = meta {
        meta.insert("progressToken".to_string(), id.to_value());
    }
    Value::Object(params)
}

fn progress_token(params: Option<&Value>) -> Option<RequestId> {
    params?
        .get("_meta")?
        .get("progressToken")
        .and_then(RequestId::from_value)
}

/// Bridges transport callbacks into the engine without keeping it alive.
struct EngineHandler {
    inner: Weak<Inner>,
}

impl EngineHandler {
    fn protocol(&self) -> Option<Protocol> {
        self.inner.upgrade().map(|inner| Protocol { inner })
    }
}

#[async_trait]
impl TransportHandler for EngineHandler {
    async fn on_message(&self, message: String) {
        if let Some(protocol) = self.protocol() {
            protocol.dispatch(&message, true).await;
        }
    }

    async fn on_close(&self) {
        if let Some(protocol) = self.protocol() {
            protocol.handle_close();
        }
    }

    async fn on_error(&self, error: &TransportError) {
        if let Some(protocol) = self.protocol() {
            protocol.handle_transport_error(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::transport::HandlerSlot;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    /// Records outbound frames and lets the test inject inbound ones.
    struct LoopbackTransport {
        slot: HandlerSlot,
        sent: mpsc::UnboundedSender<String>,
    }

    impl LoopbackTransport {
        fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
            let (sent, rx) = mpsc::unbounded_channel();
            (
                Arc::new(Self {
                    slot: HandlerSlot::default(),
                    sent,
                }),
                rx,
            )
        }

        async fn inject(&self, message: &str) {
            if let Some(handler) = self.slot.get() {
                handler.on_message(message.to_string()).await;
            }
        }
    }

    #[async_trait]
    impl Transport for LoopbackTransport {
        async fn start(&self, handler: Arc<dyn TransportHandler>) -> Result<(), TransportError> {
            self.slot.install(handler)
        }

        async fn write_message(&self, message: &str) -> Result<(), TransportError> {
            self.sent
                .send(message.to_string())
                .map_err(|_| TransportError::Closed)
        }

        async fn close(&self) -> Result<(), TransportError> {
            self.slot.fire_close().await;
            Ok(())
        }
    }

    async fn connected() -> (Protocol, Arc<LoopbackTransport>, mpsc::UnboundedReceiver<String>) {
        let protocol = Protocol::default();
        let (transport, rx) = LoopbackTransport::new();
        protocol.connect(transport.clone()).await.unwrap();
        (protocol, transport, rx)
    }

    fn parse(raw: &str) -> Value {
        serde_json::from_str(raw).unwrap()
    }

    #[tokio::test]
    async fn handler_reply_matches_request_id() {
        let (protocol, _transport, mut sent) = connected().await;
        protocol.set_request_handler("echo", |params, _ctx| async move {
            Ok(params.unwrap_or(Value::Null))
        });

        protocol
            .handle_message(r#"{"jsonrpc":"2.0","id":"abc","method":"echo","params":{"x":1}}"#)
            .await;

        let reply = parse(&sent.recv().await.unwrap());
        assert_eq!(reply["id"], "abc");
        assert_eq!(reply["result"], json!({"x": 1}));
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let (protocol, _transport, mut sent) = connected().await;

        protocol
            .handle_message(r#"{"jsonrpc":"2.0","id":9,"method":"nope"}"#)
            .await;

        let reply = parse(&sent.recv().await.unwrap());
        assert_eq!(reply["id"], 9);
        assert_eq!(reply["error"]["code"], ErrorCode::MethodNotFound.code());
    }

    #[tokio::test]
    async fn handler_errors_keep_their_code() {
        let (protocol, _transport, mut sent) = connected().await;
        protocol.set_request_handler("strict", |_params, _ctx| async move {
            Err::<Value, _>(McpError::invalid_params("missing field"))
        });

        protocol
            .handle_message(r#"{"jsonrpc":"2.0","id":1,"method":"strict"}"#)
            .await;

        let reply = parse(&sent.recv().await.unwrap());
        assert_eq!(reply["error"]["code"], ErrorCode::InvalidParams.code());
        assert_eq!(reply["error"]["message"], "missing field");
    }

    #[tokio::test]
    async fn handler_panic_becomes_internal_error() {
        let (protocol, _transport, mut sent) = connected().await;
        protocol.set_request_handler("boom", |_params, _ctx| async move {
            panic!("handler exploded");
        });

        protocol
            .handle_message(r#"{"jsonrpc":"2.0","id":1,"method":"boom"}"#)
            .await;

        let reply = parse(&sent.recv().await.unwrap());
        assert_eq!(reply["error"]["code"], ErrorCode::InternalError.code());
    }

    #[tokio::test]
    async fn malformed_input_is_dropped() {
        let (protocol, _transport, mut sent) = connected().await;

        protocol.handle_message("{not json").await;
        protocol.handle_message(r#"{"jsonrpc":"2.0"}"#).await;

        assert!(sent.try_recv().is_err());
    }

    #[tokio::test]
    async fn notifications_reach_their_handler() {
        let (protocol, _transport, _sent) = connected().await;
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        protocol.set_notification_handler("notifications/ping", move |_params| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        protocol
            .handle_message(r#"{"jsonrpc":"2.0","method":"notifications/ping"}"#)
            .await;
        protocol
            .handle_message(r#"{"jsonrpc":"2.0","method":"notifications/other"}"#)
            .await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn enforced_initialization_gates_methods() {
        let protocol = Protocol::new(ProtocolOptions {
            enforce_initialization: true,
            ..ProtocolOptions::default()
        });
        let (transport, mut sent) = LoopbackTransport::new();
        protocol.connect(transport).await.unwrap();
        protocol.set_request_handler("tools/list", |_p, _c| async move { Ok(json!({"tools": []})) });
        protocol.set_request_handler("ping", |_p, _c| async move { Ok(json!({})) });

        protocol
            .handle_message(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#)
            .await;
        let reply = parse(&sent.recv().await.unwrap());
        assert_eq!(reply["error"]["code"], ErrorCode::ServerNotInitialized.code());

        protocol
            .handle_message(r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#)
            .await;
        let reply = parse(&sent.recv().await.unwrap());
        assert_eq!(reply["result"], json!({}));

        protocol.begin_initialization().unwrap();
        assert!(protocol.begin_initialization().is_err());
        assert!(protocol.mark_initialized());

        protocol
            .handle_message(r#"{"jsonrpc":"2.0","id":3,"method":"tools/list"}"#)
            .await;
        let reply = parse(&sent.recv().await.unwrap());
        assert_eq!(reply["result"], json!({"tools": []}));
    }

    #[tokio::test]
    async fn initialized_notification_completes_handshake() {
        let protocol = Protocol::default();
        let initialized = r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;

        protocol.handle_message(initialized).await;
        assert_eq!(protocol.init_state(), InitState::Uninitialized);

        protocol.begin_initialization().unwrap();
        protocol.handle_message(initialized).await;
        assert_eq!(protocol.init_state(), InitState::Initialized);
    }

    #[tokio::test(start_paused = true)]
    async fn inactivity_timeout_rejects_and_sends_cancel() {
        let (protocol, transport, mut sent) = connected().await;

        let result = protocol
            .request(
                "slow",
                None,
                RequestOptions::default().with_timeout(Duration::from_millis(50)),
            )
            .await;

        let error = result.unwrap_err();
        assert_eq!(error.timeout_kind(), Some(TimeoutKind::Inactivity));

        let request = parse(&sent.recv().await.unwrap());
        let cancel = parse(&sent.recv().await.unwrap());
        assert_eq!(cancel["method"], "notifications/cancelled");
        assert_eq!(cancel["params"]["requestId"], request["id"]);

        // A late reply is ignored.
        transport
            .inject(&format!(
                r#"{{"jsonrpc":"2.0","id":{},"result":{{}}}}"#,
                request["id"]
            ))
            .await;
        assert_eq!(protocol.pending_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn max_total_timeout_ignores_progress() {
        let (protocol, transport, mut sent) = connected().await;
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);

        let requester = protocol.clone();
        let call = tokio::spawn(async move {
            requester
                .request(
                    "long",
                    Some(json!({})),
                    RequestOptions::default()
                        .with_timeout(Duration::from_millis(100))
                        .with_max_total_timeout(Duration::from_millis(250))
                        .reset_timeout_on_progress()
                        .on_progress(move |_| {
                            counter.fetch_add(1, Ordering::SeqCst);
                        }),
                )
                .await
        });

        let request = parse(&sent.recv().await.unwrap());
        assert_eq!(request["params"]["_meta"]["progressToken"], request["id"]);

        for step in 1..=4 {
            tokio::time::sleep(Duration::from_millis(80)).await;
            transport
                .inject(&format!(
                    r#"{{"jsonrpc":"2.0","method":"notifications/progress","params":{{"progressToken":{},"progress":{step}}}}}"#,
                    request["id"]
                ))
                .await;
        }

        let error = call.await.unwrap().unwrap_err();
        assert_eq!(error.timeout_kind(), Some(TimeoutKind::MaxTotal));
        assert!(seen.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn cancellation_rejects_with_request_cancelled() {
        let (protocol, _transport, mut sent) = connected().await;
        let token = CancellationToken::new();

        let requester = protocol.clone();
        let options = RequestOptions::default().with_cancel(token.clone());
        let call = tokio::spawn(async move { requester.request("wait", None, options).await });

        let _request = sent.recv().await.unwrap();
        token.cancel();

        let error = call.await.unwrap().unwrap_err();
        assert!(error.is_cancelled());
        let notice = parse(&sent.recv().await.unwrap());
        assert_eq!(notice["method"], "notifications/cancelled");
    }

    #[tokio::test]
    async fn close_rejects_all_pending() {
        let (protocol, _transport, mut sent) = connected().await;

        let a = {
            let p = protocol.clone();
            tokio::spawn(async move { p.request("a", None, RequestOptions::default()).await })
        };
        let b = {
            let p = protocol.clone();
            tokio::spawn(async move { p.request("b", None, RequestOptions::default()).await })
        };
        sent.recv().await.unwrap();
        sent.recv().await.unwrap();

        protocol.close().await.unwrap();

        for call in [a, b] {
            let error = call.await.unwrap().unwrap_err();
            assert_eq!(error.code, ErrorCode::ConnectionClosed);
        }
        assert_eq!(protocol.pending_requests(), 0);
        assert!(!protocol.is_connected());
    }

    #[tokio::test]
    async fn second_connect_is_rejected() {
        let (protocol, _transport, _sent) = connected().await;
        let (other, _rx) = LoopbackTransport::new();
        assert!(protocol.connect(other).await.is_err());
    }

    #[tokio::test]
    async fn request_without_transport_fails() {
        let protocol = Protocol::default();
        let error = protocol
            .request("ping", None, RequestOptions::default())
            .await
            .unwrap_err();
        assert_eq!(error.code, ErrorCode::ConnectionClosed);
    }

    /// Accepts the connection but never finishes a write.
    struct StalledTransport {
        slot: HandlerSlot,
    }

    #[async_trait]
    impl Transport for StalledTransport {
        async fn start(&self, handler: Arc<dyn TransportHandler>) -> Result<(), TransportError> {
            self.slot.install(handler)
        }

        async fn write_message(&self, _message: &str) -> Result<(), TransportError> {
            std::future::pending().await
        }

        async fn close(&self) -> Result<(), TransportError> {
            self.slot.fire_close().await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_write_still_times_out_and_cancels() {
        let protocol = Protocol::default();
        let transport = Arc::new(StalledTransport {
            slot: HandlerSlot::default(),
        });
        protocol.connect(transport).await.unwrap();

        let error = protocol
            .request(
                "slow",
                None,
                RequestOptions::default().with_timeout(Duration::from_millis(50)),
            )
            .await
            .unwrap_err();
        assert_eq!(error.timeout_kind(), Some(TimeoutKind::Inactivity));
        assert_eq!(protocol.pending_requests(), 0);

        let token = CancellationToken::new();
        token.cancel();
        let error = protocol
            .request("slow", None, RequestOptions::default().with_cancel(token))
            .await
            .unwrap_err();
        assert!(error.is_cancelled());
        assert_eq!(protocol.pending_requests(), 0);
    }

    fn slow_handler(protocol: &Protocol, started: &Arc<AtomicUsize>, finished: &Arc<AtomicUsize>) {
        let started = Arc::clone(started);
        let finished = Arc::clone(finished);
        protocol.set_request_handler("slow", move |_params, _ctx| {
            let started = Arc::clone(&started);
            let finished = Arc::clone(&finished);
            async move {
                started.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(1)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(json!({"done": true}))
            }
        });
    }

    const CANCEL_FIVE: &str =
        r#"{"jsonrpc":"2.0","method":"notifications/cancelled","params":{"requestId":5}}"#;

    #[tokio::test(start_paused = true)]
    async fn peer_cancel_right_behind_request_suppresses_reply() {
        let (protocol, transport, mut sent) = connected().await;
        let started = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));
        slow_handler(&protocol, &started, &finished);

        transport
            .inject(r#"{"jsonrpc":"2.0","id":5,"method":"slow"}"#)
            .await;
        transport.inject(CANCEL_FIVE).await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(sent.try_recv().is_err());
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn peer_cancel_aborts_running_handler() {
        let (protocol, transport, mut sent) = connected().await;
        let started = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));
        slow_handler(&protocol, &started, &finished);

        transport
            .inject(r#"{"jsonrpc":"2.0","id":5,"method":"slow"}"#)
            .await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(started.load(Ordering::SeqCst), 1);

        transport.inject(CANCEL_FIVE).await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(sent.try_recv().is_err());
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn transport_error_rejects_pending_requests() {
        let (protocol, transport, mut sent) = connected().await;

        let calls: Vec<_> = ["a", "b"]
            .into_iter()
            .map(|method| {
                let p = protocol.clone();
                tokio::spawn(async move { p.request(method, None, RequestOptions::default()).await })
            })
            .collect();
        sent.recv().await.unwrap();
        sent.recv().await.unwrap();
        assert_eq!(protocol.pending_requests(), 2);

        transport
            .slot
            .fire_error(&TransportError::HttpStatus { status: 502 })
            .await;

        for call in calls {
            let error = call.await.unwrap().unwrap_err();
            assert_eq!(error.code, ErrorCode::RequestFailed);
        }
        assert_eq!(protocol.pending_requests(), 0);
        assert!(protocol.is_connected());
    }

    #[tokio::test]
    async fn cancel_after_reply_is_a_no_op() {
        let (protocol, transport, mut sent) = connected().await;
        let token = CancellationToken::new();

        let requester = protocol.clone();
        let options = RequestOptions::default().with_cancel(token.clone());
        let call = tokio::spawn(async move { requester.request("quick", None, options).await });

        let request = parse(&sent.recv().await.unwrap());
        transport
            .inject(&format!(
                r#"{{"jsonrpc":"2.0","id":{},"result":{{"ok":true}}}}"#,
                request["id"]
            ))
            .await;
        token.cancel();

        assert_eq!(call.await.unwrap().unwrap(), json!({"ok": true}));
        assert!(sent.try_recv().is_err());
    }

    #[tokio::test]
    async fn report_progress_uses_the_callers_token() {
        let (protocol, _transport, mut sent) = connected().await;
        protocol.set_request_handler("work", |_params, ctx| async move {
            assert!(ctx.report_progress(1.0, Some(2.0)).await);
            Ok(json!({}))
        });

        protocol
            .handle_message(
                r#"{"jsonrpc":"2.0","id":1,"method":"work","params":{"_meta":{"progressToken":"tok"}}}"#,
            )
            .await;

        let progress = parse(&sent.recv().await.unwrap());
        assert_eq!(progress["method"], "notifications/progress");
        assert_eq!(progress["params"], json!({"progressToken": "tok", "progress": 1.0, "total": 2.0}));
        let reply = parse(&sent.recv().await.unwrap());
        assert_eq!(reply["result"], json!({}));
    }

    #[test]
    fn progress_token_is_merged_into_params() {
        let params = with_progress_token(Some(json!({"a": 1, "_meta": {"x": true}})), &RequestId::Number(4));
        assert_eq!(params["a"], 1);
        assert_eq!(params["_meta"]["x"], true);
        assert_eq!(params["_meta"]["progressToken"], 4);
    }
}
