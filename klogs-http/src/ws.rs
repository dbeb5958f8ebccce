//! Session transport over an axum WebSocket.

use async_trait::async_trait;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use klogs_core::{EventSink, InboundStream, ServerMessage, TransportError};

/// Split an upgraded socket into the session's outbound and inbound halves
pub fn split(socket: WebSocket) -> (WsSink, WsInbound) {
    let (tx, rx) = socket.split();
    (WsSink { tx, closed: false }, WsInbound { rx })
}

pub struct WsSink {
    tx: SplitSink<WebSocket, Message>,
    closed: bool,
}

#[async_trait]
impl EventSink for WsSink {
    async fn send(&mut self, message: ServerMessage) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let text =
            serde_json::to_string(&message).map_err(|e| TransportError::Encode(e.to_string()))?;
        self.tx
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let frame = CloseFrame {
            code: close_code::NORMAL,
            reason: String::new().into(),
        };
        self.tx
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        self.tx
            .close()
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }
}

pub struct WsInbound {
    rx: SplitStream<WebSocket>,
}

#[async_trait]
impl InboundStream for WsInbound {
    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        while let Some(message) = self.rx.next().await {
            match message {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Binary(bytes)) => {
                    return Some(Ok(String::from_utf8_lossy(&bytes).into_owned()))
                }
                Ok(Message::Close(_)) => return None,
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                Err(e) => return Some(Err(TransportError::Io(e.to_string()))),
            }
        }
        None
    }
}
