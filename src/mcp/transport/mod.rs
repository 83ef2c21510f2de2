//! Transport abstraction for MCP.
//!
//! A [`Transport`] moves complete JSON-RPC message strings between peers.
//! Inbound traffic is pushed into a [`TransportHandler`] supplied at
//! [`Transport::start`]; the protocol engine is the usual handler.
//!
//! Contract shared by every implementation:
//!
//! - messages reach `on_message` whole and in wire order
//! - `close()` is idempotent and `on_close` fires at most once
//! - faults are reported through `on_error`; transports never retry
//!
//! # Implementations
//!
//! - [`StdioTransport`]: newline-framed messages over stdin/stdout
//! - [`SseClientTransport`]: streaming GET for inbound, POST for outbound
//! - [`SseServerTransport`]: SSE event stream outbound, POST bodies inbound

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::TransportError;

pub mod sse_client;
pub mod sse_server;
pub mod stdio;

pub use sse_client::{SseClientTransport, SseDecoder, SseEvent};
pub use sse_server::SseServerTransport;
pub use stdio::StdioTransport;

/// Receives inbound traffic and lifecycle events from a transport.
#[async_trait]
pub trait TransportHandler: Send + Sync {
    /// A complete message arrived.
    async fn on_message(&self, message: String);

    /// The transport closed. Called at most once.
    async fn on_close(&self);

    /// The transport hit a fault.
    async fn on_error(&self, error: &TransportError);
}

/// A bidirectional message channel.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Begins inbound delivery to `handler`.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport was already started or closed, or
    /// if the underlying connection could not be established.
    async fn start(&self, handler: Arc<dyn TransportHandler>) -> Result<(), TransportError>;

    /// Sends one complete message.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport is closed or the write fails.
    async fn write_message(&self, message: &str) -> Result<(), TransportError>;

    /// Closes the transport. Repeated calls are no-ops.
    ///
    /// # Errors
    ///
    /// Returns an error if releasing the underlying resource fails.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Holds the handler of a started transport and guards the close hook.
#[derive(Default)]
pub(crate) struct HandlerSlot {
    handler: Mutex<Option<Arc<dyn TransportHandler>>>,
    closed: AtomicBool,
}

impl HandlerSlot {
    /// Installs the handler, rejecting a second start or a start after close.
    pub(crate) fn install(&self, handler: Arc<dyn TransportHandler>) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let mut slot = self.handler.lock();
        if slot.is_some() {
            return Err(TransportError::AlreadyStarted);
        }
        *slot = Some(handler);
        Ok(())
    }

    pub(crate) fn get(&self) -> Option<Arc<dyn TransportHandler>> {
        self.handler.lock().clone()
    }

    pub(crate) fn is_started(&self) -> bool {
        self.handler.lock().is_some()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Marks the transport closed and fires `on_close` the first time only.
    pub(crate) async fn fire_close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(handler) = self.get() {
            handler.on_close().await;
        }
    }

    pub(crate) async fn fire_error(&self, error: &TransportError) {
        if let Some(handler) = self.get() {
            handler.on_error(error).await;
        }
    }
}
