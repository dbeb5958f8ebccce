//! Channel-backed transport for driving sessions in-process.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{EventSink, InboundStream};
use crate::error::TransportError;
use crate::protocol::{ServerMessage, SubscribeMessage};

/// Create a connected sink/inbound pair plus the subscriber's end of it.
/// `capacity` bounds the messages the subscriber has not read yet.
pub fn memory_transport(capacity: usize) -> (MemorySink, MemoryInbound, MemoryClient) {
    let (outbound_tx, outbound_rx) = mpsc::channel(capacity.max(1));
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    (
        MemorySink {
            tx: Some(outbound_tx),
        },
        MemoryInbound { rx: inbound_rx },
        MemoryClient {
            inbound: Some(inbound_tx),
            outbound: outbound_rx,
        },
    )
}

pub struct MemorySink {
    tx: Option<mpsc::Sender<ServerMessage>>,
}

#[async_trait]
impl EventSink for MemorySink {
    async fn send(&mut self, message: ServerMessage) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(message).await.map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx.take();
        Ok(())
    }
}

pub struct MemoryInbound {
    rx: mpsc::UnboundedReceiver<Result<String, TransportError>>,
}

#[async_trait]
impl InboundStream for MemoryInbound {
    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        self.rx.recv().await
    }
}

/// The subscriber side of a [`memory_transport`]
pub struct MemoryClient {
    inbound: Option<mpsc::UnboundedSender<Result<String, TransportError>>>,
    outbound: mpsc::Receiver<ServerMessage>,
}

impl MemoryClient {
    pub fn send_text(&self, text: impl Into<String>) {
        if let Some(tx) = &self.inbound {
            let _ = tx.send(Ok(text.into()));
        }
    }

    pub fn subscribe(&self, message: &SubscribeMessage) {
        if let Ok(text) = serde_json::to_string(message) {
            self.send_text(text);
        }
    }

    /// Simulate a broken connection on the read side
    pub fn fail(&self, error: TransportError) {
        if let Some(tx) = &self.inbound {
            let _ = tx.send(Err(error));
        }
    }

    /// Close the subscriber's side of the connection
    pub fn disconnect(&mut self) {
        self.inbound.take();
    }

    /// Stop reading while keeping the connection open: later writes fail
    pub fn stop_reading(&mut self) {
        self.outbound.close();
    }

    /// Next outbound message. `None` once the session closed the connection.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.outbound.recv().await
    }

    /// Read until the session closes the connection
    pub async fn collect(&mut self) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Some(message) = self.outbound.recv().await {
            messages.push(message);
        }
        messages
    }
}
