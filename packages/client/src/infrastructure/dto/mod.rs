//! Data Transfer Objects (DTOs) for the backend protocol.
//!
//! - `websocket`: frame envelopes and payload shapes as they appear on the wire
//! - `conversion`: validated conversion from payload DTOs to domain entities

pub mod conversion;
pub mod websocket;
