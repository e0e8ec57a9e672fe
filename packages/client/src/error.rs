//! Error types for the Kaiwa sync core.

use thiserror::Error;

use crate::domain::DomainError;

/// A wire payload that does not match its declared shape
#[derive(Debug, Error)]
pub enum FrameError {
    /// Not valid JSON, or JSON that does not fit the frame/payload type
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A field decoded but failed domain validation
    #[error("invalid {field}: {source}")]
    InvalidField {
        field: &'static str,
        source: DomainError,
    },

    /// Structurally valid JSON with an unexpected layout
    #[error("unexpected payload shape: {0}")]
    Shape(String),
}

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// Handshake with the endpoint failed
    #[error("connection failed: {0}")]
    Connect(String),

    /// Writing a frame failed
    #[error("send failed: {0}")]
    Send(String),

    /// Reading from the connection failed
    #[error("receive failed: {0}")]
    Receive(String),

    /// A frame could not be encoded or decoded
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Failure of a single method call.
///
/// `Clone` so one transport loss can be fanned out to every outstanding call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// The connection dropped while the call was outstanding
    #[error("connection lost before the call completed")]
    ConnectionLost,

    /// The call was issued while no connection was being established
    #[error("not connected")]
    NotConnected,

    /// The backend rejected the call
    #[error("call rejected ({code}): {reason}")]
    Rejected { code: String, reason: String },

    /// The backend answered with a result of the wrong shape
    #[error("could not decode result: {0}")]
    Decode(String),

    /// The runtime stopped before the call completed
    #[error("client runtime has shut down")]
    Shutdown,
}

impl From<FrameError> for RpcError {
    fn from(error: FrameError) -> Self {
        RpcError::Decode(error.to_string())
    }
}

/// Errors surfaced by the consumer-facing client handle
#[derive(Debug, Error)]
pub enum ClientError {
    /// The runtime task is gone; every further command fails
    #[error("client runtime has shut down")]
    RuntimeGone,

    /// An argument failed domain validation
    #[error("invalid argument: {0}")]
    InvalidArgument(#[from] DomainError),

    /// A method call failed
    #[error(transparent)]
    Rpc(#[from] RpcError),
}
