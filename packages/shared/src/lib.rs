//! Utilities shared by the Kaiwa client library and its binaries.

pub mod logger;
pub mod time;
