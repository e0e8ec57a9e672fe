//! Entities reconciled by the sync core and handed to the consumer.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::value_object::{MessageId, RoomId, Timestamp, UserId};

/// Author of a message
#[derive(Debug, Clone, PartialEq)]
pub struct Sender {
    pub id: UserId,
    pub username: String,
    /// Display name; falls back to the username when the backend omits it
    pub name: String,
}

/// File or media attached to a message
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Attachment {
    pub title: Option<String>,
    pub url: Option<String>,
    pub mime_type: Option<String>,
}

/// A chat message
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    pub timestamp: Timestamp,
    pub sender: Sender,
    pub body: String,
    pub attachments: Vec<Attachment>,
    /// Set on a locally echoed message whose send failed.
    pub error: bool,
}

/// Institution-specific room fields.
///
/// The core only carries these; it never derives anything from them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CustomFields {
    pub project_accepted: bool,
    pub soft_close: Option<DateTime<Utc>>,
    /// Every other field, kept verbatim
    pub extra: Map<String, Value>,
}

/// Summary of a room as shown in a room list
#[derive(Debug, Clone, PartialEq)]
pub struct RoomSummary {
    pub id: RoomId,
    pub name: String,
    pub unread: u32,
    pub messages_count: u64,
    pub last_message: Option<Message>,
    pub updated_at: Option<Timestamp>,
    pub custom_fields: CustomFields,
}

/// Unread counter for one room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadCount {
    pub room_id: RoomId,
    pub unread: u32,
}

/// One server-side setting
#[derive(Debug, Clone, PartialEq)]
pub struct Setting {
    pub id: String,
    pub value: Value,
}
