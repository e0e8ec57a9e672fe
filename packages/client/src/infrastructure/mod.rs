//! Infrastructure layer: wire DTOs and the transports that carry them.

pub mod dto;
pub mod transport;
