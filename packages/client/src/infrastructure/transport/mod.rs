//! Message-oriented duplex transports.
//!
//! The runtime only sees these traits; `websocket` is the production
//! implementation and `memory` lets tests play the backend in-process.

use async_trait::async_trait;

use crate::error::TransportError;
use crate::infrastructure::dto::websocket::{ClientFrame, ServerFrame};

pub mod memory;
pub mod websocket;

pub use memory::{BackendConnection, MemoryBackend, MemoryConnector};
pub use websocket::{WebSocketConnector, WebSocketTransport};

/// One open connection to the backend
#[async_trait]
pub trait Transport: Send {
    /// Send one frame
    async fn send(&mut self, frame: ClientFrame) -> Result<(), TransportError>;

    /// Receive the next frame.
    ///
    /// Returns `None` once the peer closed the connection. Must be cancel
    /// safe: dropping the future must not lose a frame.
    async fn recv(&mut self) -> Option<Result<ServerFrame, TransportError>>;

    /// Close the connection; further calls are no-ops
    async fn close(&mut self);
}

/// Factory for transports, used again for every reconnection attempt
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Transport>, TransportError>;
}
