//! SSE server transport.
//!
//! One instance serves one client session. Outbound messages are framed as
//! `event: message` blocks on an event stream that the HTTP layer forwards
//! to the client's open `GET`. Inbound messages arrive as POST bodies and
//! are passed to [`SseServerTransport::handle_post_message`].
//!
//! On start the transport emits a single `event: endpoint` block telling the
//! client where to POST, with the session id embedded as a query parameter.

use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{HandlerSlot, Transport, TransportHandler};
use crate::error::TransportError;

/// Largest POST body accepted (4 MiB).
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Formats one SSE block. Multi-line payloads become multiple `data:` lines.
fn sse_frame(event: &str, data: &str) -> String {
    let mut frame = format!("event: {event}\n");
    for line in data.split('\n') {
        frame.push_str("data: ");
        frame.push_str(line);
        frame.push('\n');
    }
    frame.push('\n');
    frame
}

/// A server-side SSE transport for a single session.
pub struct SseServerTransport {
    endpoint: String,
    session_id: String,
    slot: Arc<HandlerSlot>,
    frames: Mutex<Option<mpsc::UnboundedSender<String>>>,
    stream: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl SseServerTransport {
    /// Creates a transport whose clients POST to `endpoint`.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            endpoint: endpoint.into(),
            session_id: uuid::Uuid::new_v4().to_string(),
            slot: Arc::new(HandlerSlot::default()),
            frames: Mutex::new(Some(tx)),
            stream: Mutex::new(Some(rx)),
        }
    }

    /// The random identifier of this session.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The POST URL announced in the `endpoint` event.
    #[must_use]
    pub fn endpoint_url(&self) -> String {
        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        format!(
            "{}{separator}sessionId={}",
            self.endpoint,
            urlencoding::encode(&self.session_id)
        )
    }

    /// Takes the stream of formatted SSE frames. Returns `None` after the first call.
    ///
    /// The stream ends when the transport closes.
    pub fn take_event_stream(&self) -> Option<impl Stream<Item = String> + Send + 'static> {
        let rx = self.stream.lock().take()?;
        Some(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|frame| (frame, rx))
        }))
    }

    fn send_frame(&self, frame: String) -> Result<(), TransportError> {
        let frames = self.frames.lock();
        let tx = frames.as_ref().ok_or(TransportError::Closed)?;
        tx.send(frame).map_err(|_| TransportError::Closed)
    }

    /// Validates a POST body and hands it to the engine.
    ///
    /// # Errors
    ///
    /// - `NotStarted` / `Closed` if there is no live session
    /// - `UnsupportedContentType` unless the content type is `application/json`
    /// - `PayloadTooLarge` if the body exceeds [`MAX_MESSAGE_SIZE`]
    /// - `InvalidMessage` if the body is not valid JSON
    ///
    /// Content and size faults are also reported through `on_error`.
    pub async fn handle_post_message(
        &self,
        content_type: Option<&str>,
        body: &[u8],
    ) -> Result<(), TransportError> {
        if self.slot.is_closed() {
            return Err(TransportError::Closed);
        }
        let Some(handler) = self.slot.get() else {
            return Err(TransportError::NotStarted);
        };

        if let Err(error) = validate_post(content_type, body) {
            tracing::warn!(session = %self.session_id, error = %error, "rejected POST body");
            handler.on_error(&error).await;
            return Err(error);
        }

        let message = String::from_utf8_lossy(body).into_owned();
        handler.on_message(message).await;
        Ok(())
    }
}

fn validate_post(content_type: Option<&str>, body: &[u8]) -> Result<(), TransportError> {
    let content_type = content_type.unwrap_or_default();
    let media_type = content_type.split(';').next().unwrap_or_default().trim();
    if !media_type.eq_ignore_ascii_case("application/json") {
        return Err(TransportError::UnsupportedContentType(
            content_type.to_string(),
        ));
    }

    if body.len() > MAX_MESSAGE_SIZE {
        return Err(TransportError::PayloadTooLarge {
            size: body.len(),
            limit: MAX_MESSAGE_SIZE,
        });
    }

    serde_json::from_slice::<serde_json::Value>(body)
        .map_err(|e| TransportError::InvalidMessage(format!("Invalid message: {e}")))?;
    Ok(())
}

#[async_trait]
impl Transport for SseServerTransport {
    async fn start(&self, handler: Arc<dyn TransportHandler>) -> Result<(), TransportError> {
        self.slot.install(handler)?;
        self.send_frame(sse_frame("endpoint", &self.endpoint_url()))?;
        tracing::info!(session = %self.session_id, "SSE session started");
        Ok(())
    }

    async fn write_message(&self, message: &str) -> Result<(), TransportError> {
        if !self.slot.is_started() {
            return Err(TransportError::NotStarted);
        }
        if self.slot.is_closed() {
            return Err(TransportError::Closed);
        }
        self.send_frame(sse_frame("message", message))
    }

    async fn close(&self) -> Result<(), TransportError> {
        // Dropping the sender ends the event stream.
        self.frames.lock().take();
        self.slot.fire_close().await;
        Ok(())
    }
}
