//! Client-side sync core for Kaiwa.
//!
//! One websocket carries request/response method calls and topic pushes.
//! On top of it this crate keeps the connection alive, replays
//! subscriptions after reconnects, bootstraps the room list from cache and
//! then from the backend, and keeps a bounded, scroll-stable window of
//! history per open room. Consumers observe everything through
//! [`event::EventHandler`] and drive the core through [`ChatClient`].

// layers
pub mod domain;
pub mod infrastructure;

// sync core
pub mod bootstrap;
pub mod connection;
pub mod history;
pub mod method;
pub mod rpc;
pub mod subscription;
pub mod timer;

// runtime and consumer surface
pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod formatter;
pub mod liveness;
mod runtime;

pub use client::ChatClient;
pub use config::ClientConfig;
pub use connection::{ConnectionState, ConnectionStatus};
pub use error::{ClientError, RpcError};
pub use event::{ChannelEventHandler, ChatEvent, EventHandler};
