//! WebSocket transport built on tokio-tungstenite.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message,
};

use super::{Connector, Transport};
use crate::error::TransportError;
use crate::infrastructure::dto::websocket::{
    ClientFrame, ServerFrame, decode_server_frame, encode_client_frame,
};

/// Connects to a `ws://` or `wss://` endpoint
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Transport>, TransportError> {
        let (ws_stream, response) = connect_async(endpoint)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        tracing::debug!(
            "WebSocket handshake with {} completed (HTTP {})",
            endpoint,
            response.status()
        );
        Ok(Box::new(WebSocketTransport::new(ws_stream)))
    }
}

/// An open websocket carrying JSON text frames
pub struct WebSocketTransport {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

impl WebSocketTransport {
    pub fn new(ws: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Self {
        Self { ws, closed: false }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, frame: ClientFrame) -> Result<(), TransportError> {
        let text = encode_client_frame(&frame)?;
        tracing::trace!("→ {}", text);
        self.ws
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<ServerFrame, TransportError>> {
        if self.closed {
            return None;
        }
        loop {
            match self.ws.next().await? {
                Ok(Message::Text(text)) => {
                    tracing::trace!("← {}", text.as_str());
                    match decode_server_frame(text.as_str()) {
                        Ok(Some(frame)) => return Some(Ok(frame)),
                        Ok(None) => continue,
                        Err(e) => return Some(Err(e.into())),
                    }
                }
                Ok(Message::Binary(data)) => {
                    tracing::debug!("Ignoring {} bytes of binary data", data.len());
                }
                Ok(Message::Close(_)) => {
                    tracing::info!("Server closed the connection");
                    self.closed = true;
                    return None;
                }
                // tungstenite answers websocket-level pings itself
                Ok(_) => {}
                Err(e) => {
                    self.closed = true;
                    return Some(Err(TransportError::Receive(e.to_string())));
                }
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.ws.close(None).await {
            tracing::debug!("Error while closing websocket: {}", e);
        }
    }
}
