//! stdio transport for MCP.
//!
//! - Messages are UTF-8 encoded JSON-RPC
//! - Messages are delimited by newlines
//! - Messages must not contain embedded newlines
//! - stdin: receives messages from the peer
//! - stdout: sends messages to the peer
//! - stderr: may be used for logging (not MCP messages)
//!
//! The transport is generic over any async reader/writer pair so tests can
//! drive it with in-memory streams. Reading happens on a spawned task that
//! awaits the next line; there is no polling.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

use super::{HandlerSlot, Transport, TransportHandler};
use crate::error::TransportError;

/// A newline-framed transport over a reader/writer pair.
pub struct StdioTransport<R = tokio::io::Stdin, W = tokio::io::Stdout> {
    /// Taken by the read loop on start.
    reader: Mutex<Option<R>>,
    writer: tokio::sync::Mutex<W>,
    slot: Arc<HandlerSlot>,
    shutdown: CancellationToken,
}

impl StdioTransport {
    /// Creates a transport over the process's stdin and stdout.
    #[must_use]
    pub fn new() -> Self {
        Self::with_streams(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl<R, W> StdioTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Creates a transport over arbitrary streams.
    #[must_use]
    pub fn with_streams(reader: R, writer: W) -> Self {
        Self {
            reader: Mutex::new(Some(reader)),
            writer: tokio::sync::Mutex::new(writer),
            slot: Arc::new(HandlerSlot::default()),
            shutdown: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl<R, W> Transport for StdioTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn start(&self, handler: Arc<dyn TransportHandler>) -> Result<(), TransportError> {
        self.slot.install(Arc::clone(&handler))?;
        let reader = self
            .reader
            .lock()
            .take()
            .ok_or(TransportError::AlreadyStarted)?;

        tokio::spawn(read_loop(
            reader,
            Arc::clone(&self.slot),
            handler,
            self.shutdown.clone(),
        ));

        tracing::debug!("stdio transport started");
        Ok(())
    }

    async fn write_message(&self, message: &str) -> Result<(), TransportError> {
        if self.slot.is_closed() {
            return Err(TransportError::Closed);
        }
        if message.contains('\n') {
            return Err(TransportError::InvalidMessage(
                "message contains an embedded newline".to_string(),
            ));
        }

        let mut writer = self.writer.lock().await;
        writer.write_all(message.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        tracing::trace!(bytes = message.len(), "stdio frame written");
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.shutdown.cancel();
        self.slot.fire_close().await;
        Ok(())
    }
}

/// Reads newline-terminated frames until EOF, a read error, or shutdown.
async fn read_loop<R>(
    reader: R,
    slot: Arc<HandlerSlot>,
    handler: Arc<dyn TransportHandler>,
    shutdown: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = tokio::select! {
            () = shutdown.cancelled() => return,
            read = reader.read_until(b'\n', &mut buf) => read,
        };

        match read {
            Ok(0) => {
                tracing::debug!("stdio reached EOF");
                break;
            }
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                }
                if buf.is_empty() {
                    continue;
                }
                match String::from_utf8(std::mem::take(&mut buf)) {
                    Ok(line) => handler.on_message(line).await,
                    Err(e) => {
                        let error = TransportError::InvalidMessage(format!("not UTF-8: {e}"));
                        tracing::warn!(error = %error, "dropping stdio frame");
                        handler.on_error(&error).await;
                    }
                }
            }
            Err(e) => {
                let error = TransportError::Io(e);
                tracing::error!(error = %error, "stdio read failed");
                handler.on_error(&error).await;
                break;
            }
        }
    }

    slot.fire_close().await;
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{Event, RecordingHandler};
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn delivers_lines_in_order_and_closes_on_eof() {
        let reader = tokio_test::io::Builder::new()
            .read(b"{\"a\":1}\n\n{\"b\"")
            .read(b":2}\r\n")
            .build();
        let (writer, _peer) = tokio::io::duplex(64);
        let transport = StdioTransport::with_streams(reader, writer);

        let (handler, mut rx) = RecordingHandler::new();
        transport.start(handler).await.unwrap();

        assert_eq!(rx.recv().await, Some(Event::Message(r#"{"a":1}"#.to_string())));
        assert_eq!(rx.recv().await, Some(Event::Message(r#"{"b":2}"#.to_string())));
        assert_eq!(rx.recv().await, Some(Event::Closed));
    }

    #[tokio::test]
    async fn writes_are_newline_terminated() {
        let (reader, _reader_peer) = tokio::io::duplex(64);
        let (writer, mut peer) = tokio::io::duplex(64);
        let transport = StdioTransport::with_streams(reader, writer);
        let (handler, _rx) = RecordingHandler::new();
        transport.start(handler).await.unwrap();

        transport.write_message(r#"{"x":1}"#).await.unwrap();

        let mut buf = [0u8; 8];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"{\"x\":1}\n");
    }

    #[tokio::test]
    async fn rejects_embedded_newlines() {
        let (reader, _reader_peer) = tokio::io::duplex(64);
        let (writer, _peer) = tokio::io::duplex(64);
        let transport = StdioTransport::with_streams(reader, writer);

        let result = transport.write_message("{\n}").await;
        assert!(matches!(result, Err(TransportError::InvalidMessage(_))));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (reader, _reader_peer) = tokio::io::duplex(64);
        let (writer, _peer) = tokio::io::duplex(64);
        let transport = StdioTransport::with_streams(reader, writer);
        let (handler, mut rx) = RecordingHandler::new();
        transport.start(handler).await.unwrap();

        transport.close().await.unwrap();
        transport.close().await.unwrap();

        assert_eq!(rx.recv().await, Some(Event::Closed));
        assert!(rx.try_recv().is_err());
        assert!(matches!(
            transport.write_message("{}").await,
            Err(TransportError::Closed)
        ));
    }
}
