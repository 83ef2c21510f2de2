//! SSE client transport.
//!
//! Inbound messages arrive over a long-lived `GET` with
//! `Accept: text/event-stream`; outbound messages are sent as individual
//! `POST` requests with `Content-Type: application/json`.
//!
//! The server may announce where POSTs should go with an `endpoint` event.
//! Its data is resolved relative to the SSE URL. Without one, POSTs go to the
//! SSE URL itself. Every other event carrying data is handed to the engine,
//! whatever its type.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{HandlerSlot, Transport, TransportHandler};
use crate::error::TransportError;

/// How long `start()` waits for the `endpoint` event by default.
pub const DEFAULT_ENDPOINT_TIMEOUT: Duration = Duration::from_secs(30);

/// One decoded server-sent event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseEvent {
    /// The `event:` field, if present.
    pub event: Option<String>,
    /// All `data:` lines joined with `\n`.
    pub data: String,
    /// The `id:` field, if present.
    pub id: Option<String>,
    /// The `retry:` field, if present and numeric.
    pub retry: Option<u64>,
}

impl SseEvent {
    /// The event type, defaulting to `message`.
    #[must_use]
    pub fn event_type(&self) -> &str {
        self.event.as_deref().unwrap_or("message")
    }
}

/// Incremental decoder for `text/event-stream` bodies.
///
/// Bytes may be pushed in arbitrary chunks; events are yielded once their
/// terminating blank line has been seen.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Creates an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and returns every event it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some((end, skip)) = find_terminator(&self.buffer) {
            let block: Vec<u8> = self.buffer.drain(..end + skip).take(end).collect();
            if let Some(event) = parse_block(&String::from_utf8_lossy(&block)) {
                events.push(event);
            }
        }
        events
    }

    /// Bytes received but not yet terminated.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// Finds the first blank line. Returns the block length and terminator length.
fn find_terminator(buf: &[u8]) -> Option<(usize, usize)> {
    buf.iter().enumerate().find_map(|(i, &b)| {
        if b != b'\n' {
            return None;
        }
        match buf.get(i + 1..) {
            Some([b'\n', ..]) => Some((i, 2)),
            Some([b'\r', b'\n', ..]) => Some((i, 3)),
            _ => None,
        }
    })
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = SseEvent::default();
    let mut data_lines: Vec<&str> = Vec::new();

    for line in block.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() || line.starts_with(':') {
            continue;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => data_lines.push(value),
            "event" => event.event = Some(value.to_string()),
            "id" => event.id = Some(value.to_string()),
            "retry" => event.retry = value.trim().parse().ok(),
            _ => {}
        }
    }

    if data_lines.is_empty() {
        return None;
    }
    event.data = data_lines.join("\n");
    if event.data.is_empty() {
        return None;
    }
    Some(event)
}

/// Routes decoded events: endpoints to the POST target, the rest to the handler.
struct Inbound {
    decoder: SseDecoder,
    base: Url,
    endpoint: Arc<watch::Sender<Option<Url>>>,
    handler: Arc<dyn TransportHandler>,
}

impl Inbound {
    async fn feed(&mut self, chunk: &[u8]) {
        for event in self.decoder.push(chunk) {
            match event.event_type() {
                "endpoint" => match self.base.join(event.data.trim()) {
                    Ok(url) => {
                        tracing::info!(endpoint = %url, "SSE endpoint announced");
                        self.endpoint.send_replace(Some(url));
                    }
                    Err(e) => {
                        let error = TransportError::InvalidUrl(e);
                        tracing::warn!(error = %error, "bad SSE endpoint event");
                        self.handler.on_error(&error).await;
                    }
                },
                _ => self.handler.on_message(event.data).await,
            }
        }
    }
}

/// An MCP client transport over Server-Sent Events.
pub struct SseClientTransport {
    url: Url,
    http: reqwest::Client,
    discover_endpoint: bool,
    endpoint_timeout: Duration,
    endpoint: Arc<watch::Sender<Option<Url>>>,
    slot: Arc<HandlerSlot>,
    shutdown: CancellationToken,
}

impl SseClientTransport {
    /// Creates a transport for the SSE stream at `url`.
    ///
    /// By default `start()` waits for the server's `endpoint` event before
    /// returning.
    ///
    /// # Errors
    ///
    /// Returns an error if `url` is not a valid absolute URL.
    pub fn new(url: &str) -> Result<Self, TransportError> {
        Self::with_client(url, reqwest::Client::new())
    }

    /// Creates a transport using a preconfigured HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if `url` is not a valid absolute URL.
    pub fn with_client(url: &str, http: reqwest::Client) -> Result<Self, TransportError> {
        let (endpoint, _) = watch::channel(None);
        Ok(Self {
            url: Url::parse(url)?,
            http,
            discover_endpoint: true,
            endpoint_timeout: DEFAULT_ENDPOINT_TIMEOUT,
            endpoint: Arc::new(endpoint),
            slot: Arc::new(HandlerSlot::default()),
            shutdown: CancellationToken::new(),
        })
    }

    /// POST to the SSE URL without waiting for an `endpoint` event.
    #[must_use]
    pub fn without_endpoint_discovery(mut self) -> Self {
        self.discover_endpoint = false;
        self
    }

    /// Bounds how long `start()` waits for the `endpoint` event.
    #[must_use]
    pub const fn with_endpoint_timeout(mut self, timeout: Duration) -> Self {
        self.endpoint_timeout = timeout;
        self
    }

    /// The URL outbound messages are currently POSTed to.
    #[must_use]
    pub fn post_url(&self) -> Url {
        self.endpoint
            .borrow()
            .clone()
            .unwrap_or_else(|| self.url.clone())
    }

    async fn fail(&self, error: TransportError) -> TransportError {
        tracing::error!(error = %error, url = %self.url, "SSE client error");
        self.slot.fire_error(&error).await;
        error
    }
}

#[async_trait]
impl Transport for SseClientTransport {
    async fn start(&self, handler: Arc<dyn TransportHandler>) -> Result<(), TransportError> {
        self.slot.install(Arc::clone(&handler))?;

        let response = match self
            .http
            .get(self.url.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return Err(self.fail(TransportError::Http(e)).await),
        };
        if !response.status().is_success() {
            let status = response.status().as_u16();
            return Err(self.fail(TransportError::HttpStatus { status }).await);
        }

        let mut endpoint_rx = self.endpoint.subscribe();
        let inbound = Inbound {
            decoder: SseDecoder::new(),
            base: self.url.clone(),
            endpoint: Arc::clone(&self.endpoint),
            handler,
        };
        tokio::spawn(stream_loop(
            response,
            inbound,
            Arc::clone(&self.slot),
            self.shutdown.clone(),
        ));
        tracing::info!(url = %self.url, "SSE stream connected");

        if self.discover_endpoint {
            let announced = async { endpoint_rx.wait_for(Option::is_some).await.is_ok() };
            let announced = tokio::select! {
                announced = tokio::time::timeout(self.endpoint_timeout, announced) => announced,
                () = self.shutdown.cancelled() => Ok(false),
            };
            match announced {
                Ok(true) => {}
                Ok(false) => return Err(TransportError::Closed),
                Err(_) => {
                    self.shutdown.cancel();
                    let error = TransportError::EndpointTimeout(self.endpoint_timeout);
                    return Err(self.fail(error).await);
                }
            }
        }
        Ok(())
    }

    async fn write_message(&self, message: &str) -> Result<(), TransportError> {
        if self.slot.is_closed() {
            return Err(TransportError::Closed);
        }
        if !self.slot.is_started() {
            return Err(TransportError::NotStarted);
        }

        let target = self.post_url();
        let result = self
            .http
            .post(target)
            .header(CONTENT_TYPE, "application/json")
            .body(message.to_owned())
            .send()
            .await;

        let error = match result {
            Ok(response) if response.status().is_success() => return Ok(()),
            Ok(response) => TransportError::HttpStatus {
                status: response.status().as_u16(),
            },
            Err(e) => TransportError::Http(e),
        };
        Err(self.fail(error).await)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.shutdown.cancel();
        self.slot.fire_close().await;
        Ok(())
    }
}

async fn stream_loop(
    response: reqwest::Response,
    mut inbound: Inbound,
    slot: Arc<HandlerSlot>,
    shutdown: CancellationToken,
) {
    let mut stream = response.bytes_stream();

    loop {
        let next = tokio::select! {
            () = shutdown.cancelled() => break,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(chunk)) => inbound.feed(&chunk).await,
            Some(Err(e)) => {
                let error = TransportError::Http(e);
                tracing::error!(error = %error, "SSE stream failed");
                inbound.handler.on_error(&error).await;
                break;
            }
            None => {
                tracing::debug!("SSE stream ended");
                break;
            }
        }
    }

    shutdown.cancel();
    slot.fire_close().await;
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{Event, RecordingHandler};
    use super::*;

    fn inbound() -> (
        Inbound,
        tokio::sync::mpsc::UnboundedReceiver<Event>,
        watch::Receiver<Option<Url>>,
    ) {
        let (handler, rx) = RecordingHandler::new();
        let (endpoint, endpoint_rx) = watch::channel(None);
        let inbound = Inbound {
            decoder: SseDecoder::new(),
            base: Url::parse("http://localhost:8080/sse").unwrap(),
            endpoint: Arc::new(endpoint),
            handler,
        };
        (inbound, rx, endpoint_rx)
    }

    #[tokio::test]
    async fn raw_data_event_reaches_handler_once() {
        let (mut inbound, mut rx, _) = inbound();

        inbound.feed(b"data: hello\n\n").await;

        assert_eq!(rx.try_recv().ok(), Some(Event::Message("hello".to_string())));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn endpoint_event_redirects_posts() {
        let (mut inbound, mut rx, endpoint_rx) = inbound();

        inbound
            .feed(b"event: endpoint\ndata: /messages?sessionId=abc\n\n")
            .await;

        let url = endpoint_rx.borrow().clone().unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/messages?sessionId=abc");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn custom_event_types_reach_handler() {
        let (mut inbound, mut rx, _) = inbound();
        inbound.feed(b"event: heartbeat\ndata: x\n\n").await;
        inbound.feed(b"event: message\ndata: y\n\n").await;

        assert_eq!(rx.try_recv().ok(), Some(Event::Message("x".to_string())));
        assert_eq!(rx.try_recv().ok(), Some(Event::Message("y".to_string())));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn decoder_joins_multiline_data() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: first\ndata: second\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "first\nsecond");
        assert_eq!(events[0].event_type(), "message");
    }

    #[test]
    fn decoder_handles_split_chunks_and_crlf() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: message\r\nda").is_empty());
        assert!(decoder.push(b"ta: {\"a\":1}\r\n").is_empty());
        let events = decoder.push(b"\r\ndata: next\n\n");

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, r#"{"a":1}"#);
        assert_eq!(events[1].data, "next");
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn decoder_ignores_comments_and_unknown_fields() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b": keep-alive\nfoo: bar\nid: 7\nretry: 3000\ndata:tight\n\n");

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "tight");
        assert_eq!(events[0].id.as_deref(), Some("7"));
        assert_eq!(events[0].retry, Some(3000));
    }

    #[test]
    fn decoder_skips_blocks_without_data() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b": ping\n\nevent: message\n\n").is_empty());
    }

    #[test]
    fn rejects_relative_url() {
        assert!(matches!(
            SseClientTransport::new("/sse"),
            Err(TransportError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn write_before_start_fails() {
        let transport = SseClientTransport::new("http://127.0.0.1:1/sse").unwrap();
        assert!(matches!(
            transport.write_message("{}").await,
            Err(TransportError::NotStarted)
        ));
    }
}
