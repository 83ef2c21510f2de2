//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mcp_sdk::error::TransportError;
use mcp_sdk::mcp::transport::{Transport, TransportHandler};
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// One end of an in-memory transport pair.
pub struct ChannelTransport {
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    handler: Arc<Mutex<Option<Arc<dyn TransportHandler>>>>,
    closed: Arc<AtomicBool>,
}

/// Two connected transports: what one writes, the other receives.
pub fn pair() -> (Arc<ChannelTransport>, Arc<ChannelTransport>) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        Arc::new(ChannelTransport::new(a_tx, b_rx)),
        Arc::new(ChannelTransport::new(b_tx, a_rx)),
    )
}

impl ChannelTransport {
    fn new(tx: mpsc::UnboundedSender<String>, rx: mpsc::UnboundedReceiver<String>) -> Self {
        Self {
            outbound: Mutex::new(Some(tx)),
            inbound: Mutex::new(Some(rx)),
            handler: Arc::new(Mutex::new(None)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }
}

async fn fire_close(
    closed: &AtomicBool,
    handler: &Mutex<Option<Arc<dyn TransportHandler>>>,
) {
    if closed.swap(true, Ordering::SeqCst) {
        return;
    }
    let handler = handler.lock().clone();
    if let Some(handler) = handler {
        handler.on_close().await;
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn start(&self, handler: Arc<dyn TransportHandler>) -> Result<(), TransportError> {
        let mut rx = self
            .inbound
            .lock()
            .take()
            .ok_or(TransportError::AlreadyStarted)?;
        *self.handler.lock() = Some(Arc::clone(&handler));

        let slot = Arc::clone(&self.handler);
        let closed = Arc::clone(&self.closed);
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                handler.on_message(message).await;
            }
            fire_close(&closed, &slot).await;
        });
        Ok(())
    }

    async fn write_message(&self, message: &str) -> Result<(), TransportError> {
        let outbound = self.outbound.lock();
        let tx = outbound.as_ref().ok_or(TransportError::Closed)?;
        tx.send(message.to_string())
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.outbound.lock().take();
        fire_close(&self.closed, &self.handler).await;
        Ok(())
    }
}

/// Polls `condition` until it holds, failing the test after one second.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 1s");
}
