//! Domain types shared by every layer of the sync core.
//!
//! Nothing in here knows about the wire format; DTOs are converted into these
//! types at the infrastructure boundary.

pub mod entity;
pub mod value_object;

pub use entity::{Attachment, CustomFields, Message, RoomSummary, Sender, Setting, UnreadCount};
pub use value_object::{CallId, Credentials, DomainError, MessageId, RoomId, Timestamp, UserId};
