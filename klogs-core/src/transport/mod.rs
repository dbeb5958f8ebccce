mod memory;

pub use memory::{memory_transport, MemoryClient, MemoryInbound, MemorySink};

use async_trait::async_trait;

use crate::error::TransportError;
use crate::protocol::ServerMessage;

/// Outbound half of a subscriber connection
#[async_trait]
pub trait EventSink: Send {
    async fn send(&mut self, message: ServerMessage) -> Result<(), TransportError>;

    /// Close the connection. Called once, when the session ends.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Inbound half of a subscriber connection
#[async_trait]
pub trait InboundStream: Send {
    /// Next text message. `None` once the subscriber closed the connection.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;
}
