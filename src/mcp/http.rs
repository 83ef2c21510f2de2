//! HTTP front end for the SSE server transport.
//!
//! Each `GET {sse_path}` opens a new session: a fresh
//! [`SseServerTransport`] and a fresh [`McpServer`] from the factory. The
//! response body is the session's event stream. Clients POST JSON-RPC
//! messages to `{message_path}?sessionId=<id>`, as announced in the
//! `endpoint` event.
//!
//! The session is closed and forgotten when the client drops the stream.

use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::net::TcpListener;

use crate::error::{McpResult, TransportError};
use crate::mcp::server::McpServer;
use crate::mcp::transport::sse_server::MAX_MESSAGE_SIZE;
use crate::mcp::transport::{SseServerTransport, Transport};

/// Builds the server for a new session.
pub type ServerFactory = Arc<dyn Fn() -> McpResult<McpServer> + Send + Sync>;

/// Route layout of the HTTP front end.
#[derive(Debug, Clone)]
pub struct SseConfig {
    /// Path of the event stream.
    pub sse_path: String,
    /// Path clients POST messages to.
    pub message_path: String,
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            sse_path: "/sse".to_string(),
            message_path: "/messages".to_string(),
        }
    }
}

struct Session {
    transport: Arc<SseServerTransport>,
    server: McpServer,
}

type Sessions = Arc<Mutex<HashMap<String, Session>>>;

#[derive(Clone)]
struct AppState {
    sessions: Sessions,
    factory: ServerFactory,
    message_path: String,
}

/// Serves MCP sessions over SSE.
pub struct SseServer {
    config: SseConfig,
    state: AppState,
}

impl SseServer {
    /// Creates a front end that builds one server per session with `factory`.
    pub fn new(
        config: SseConfig,
        factory: impl Fn() -> McpResult<McpServer> + Send + Sync + 'static,
    ) -> Self {
        let state = AppState {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            factory: Arc::new(factory),
            message_path: config.message_path.clone(),
        };
        Self { config, state }
    }

    /// The axum router.
    pub fn router(&self) -> Router {
        Router::new()
            .route(&self.config.sse_path, get(open_stream))
            .route(
                &self.config.message_path,
                post(post_message).layer(DefaultBodyLimit::max(MAX_MESSAGE_SIZE + 1)),
            )
            .with_state(self.state.clone())
    }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.state.sessions.lock().len()
    }

    /// Closes every live session, ending their event streams.
    pub async fn close_all(&self) {
        close_sessions(&self.state.sessions).await;
    }

    /// Accepts connections on `listener` until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener fails.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<()> {
        tracing::info!(
            addr = %listener.local_addr()?,
            sse = %self.config.sse_path,
            messages = %self.config.message_path,
            "starting MCP SSE server"
        );

        let app = self.router();
        let sessions = Arc::clone(&self.state.sessions);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.await;
                // Open event streams would otherwise hold the server up.
                close_sessions(&sessions).await;
            })
            .await
    }
}

async fn close_sessions(sessions: &Sessions) {
    let drained: Vec<Session> = sessions.lock().drain().map(|(_, s)| s).collect();
    for session in drained {
        if let Err(e) = session.server.close().await {
            tracing::warn!(error = %e, "failed to close session");
        }
    }
}

/// Forgets the session and closes its server when the stream is dropped.
struct SessionGuard {
    sessions: Sessions,
    id: String,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let Some(session) = self.sessions.lock().remove(&self.id) else {
            return;
        };
        tracing::info!(session = %self.id, "SSE client disconnected");
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                let _ = session.server.close().await;
            });
        }
    }
}

async fn open_stream(State(st): State<AppState>) -> Response {
    let transport = Arc::new(SseServerTransport::new(st.message_path.clone()));
    let Some(frames) = transport.take_event_stream() else {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };
    let id = transport.session_id().to_string();

    let server = match (st.factory)() {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, "failed to build session server");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    let as_transport: Arc<dyn Transport> = Arc::clone(&transport) as Arc<dyn Transport>;
    if let Err(e) = server.connect(as_transport).await {
        tracing::error!(error = %e, "failed to start SSE session");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    st.sessions
        .lock()
        .insert(id.clone(), Session { transport, server });

    let guard = SessionGuard {
        sessions: Arc::clone(&st.sessions),
        id,
    };
    let body = frames.map(move |frame| {
        let _session = &guard;
        Ok::<_, Infallible>(frame)
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

async fn post_message(
    State(st): State<AppState>,
    Query(query): Query<SessionQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(id) = query.session_id else {
        return (StatusCode::BAD_REQUEST, "Missing sessionId").into_response();
    };

    let transport = st
        .sessions
        .lock()
        .get(&id)
        .map(|s| Arc::clone(&s.transport));
    let Some(transport) = transport else {
        return (StatusCode::NOT_FOUND, "Session not found").into_response();
    };

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|h| h.to_str().ok());

    match transport.handle_post_message(content_type, &body).await {
        Ok(()) => (StatusCode::ACCEPTED, "Accepted").into_response(),
        Err(e) => error_response(&e),
    }
}

fn error_response(error: &TransportError) -> Response {
    let status = match error {
        TransportError::UnsupportedContentType(_) | TransportError::InvalidMessage(_) => {
            StatusCode::BAD_REQUEST
        }
        TransportError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        TransportError::Closed => StatusCode::GONE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, error.to_string()).into_response()
}
