//! WebSocket frame and payload DTOs.
//!
//! The protocol is DDP-style JSON: every frame is an object tagged by `msg`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::FrameError;

/// Protocol version announced in the `connect` frame
pub const PROTOCOL_VERSION: &str = "1";

/// Frames sent by the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "lowercase")]
pub enum ClientFrame {
    /// Transport-level handshake
    Connect {
        version: String,
        support: Vec<String>,
    },
    /// Method call (RPC request)
    Method {
        id: String,
        method: String,
        params: Vec<Value>,
    },
    /// Subscription intent
    Sub {
        id: String,
        name: String,
        params: Vec<Value>,
    },
    /// Subscription withdrawal
    Unsub { id: String },
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
}

impl ClientFrame {
    /// The handshake frame for [`PROTOCOL_VERSION`]
    pub fn connect() -> Self {
        ClientFrame::Connect {
            version: PROTOCOL_VERSION.to_string(),
            support: vec![PROTOCOL_VERSION.to_string()],
        }
    }
}

/// Error object carried by `result` and `nosub` frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodErrorDto {
    /// Error code; the backend sends either a number or a string
    #[serde(default)]
    pub error: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Frames received from the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "lowercase")]
pub enum ServerFrame {
    Connected {
        session: String,
    },
    Failed {
        #[serde(default)]
        version: Option<String>,
    },
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// Result of a method call
    Result {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<MethodErrorDto>,
    },
    Ready {
        subs: Vec<String>,
    },
    Nosub {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<MethodErrorDto>,
    },
    Added {
        collection: String,
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fields: Option<Map<String, Value>>,
    },
    Changed {
        collection: String,
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fields: Option<Map<String, Value>>,
    },
    Removed {
        collection: String,
        id: String,
    },
    Updated {
        methods: Vec<String>,
    },
}

/// Decode one text frame.
///
/// Objects without a `msg` tag (the backend's initial `server_id` greeting)
/// are not protocol frames and decode to `None`.
pub fn decode_server_frame(text: &str) -> Result<Option<ServerFrame>, FrameError> {
    let value: Value = serde_json::from_str(text)?;
    if value.get("msg").is_none() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_value(value)?))
}

/// Encode one client frame as JSON text
pub fn encode_client_frame(frame: &ClientFrame) -> Result<String, FrameError> {
    Ok(serde_json::to_string(frame)?)
}

// ========================================
// Payload DTOs
// ========================================

/// `{"$date": millis}` as used by the backend for timestamps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateDto {
    #[serde(rename = "$date")]
    pub date: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDto {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AttachmentDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDto {
    #[serde(rename = "_id")]
    pub id: String,
    pub rid: String,
    #[serde(default)]
    pub msg: String,
    pub ts: DateDto,
    pub u: UserDto,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentDto>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CustomFieldsDto {
    #[serde(rename = "projectAccepted", default)]
    pub project_accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub softclose: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomDto {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "roomName", alias = "fname", default)]
    pub name: String,
    #[serde(default)]
    pub unread: u32,
    #[serde(rename = "messagesCount", alias = "msgs", default)]
    pub messages_count: u64,
    #[serde(rename = "lastMessage", default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<MessageDto>,
    #[serde(rename = "_updatedAt", default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateDto>,
    #[serde(rename = "customFields", default)]
    pub custom_fields: CustomFieldsDto,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnreadDto {
    pub rid: String,
    #[serde(default)]
    pub unread: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryDto {
    #[serde(default)]
    pub messages: Vec<MessageDto>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomInfoDto {
    #[serde(rename = "customFields", default)]
    pub custom_fields: CustomFieldsDto,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingDto {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub value: Value,
}

/// Parameter object of the `sendMessage` method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMessageDto {
    #[serde(rename = "_id")]
    pub id: String,
    pub rid: String,
    pub msg: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentDto>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_frame_serializes_with_msg_tag() {
        // テスト項目: メソッド呼び出しフレームが msg タグ付きでシリアライズされる
        // given (前提条件):
        let frame = ClientFrame::Method {
            id: "7".to_string(),
            method: "rooms/get".to_string(),
            params: vec![],
        };

        // when (操作):
        let value = serde_json::to_value(&frame).unwrap();

        // then (期待する結果):
        assert_eq!(
            value,
            json!({"msg": "method", "id": "7", "method": "rooms/get", "params": []})
        );
    }

    #[test]
    fn test_ping_without_id_omits_field() {
        // テスト項目: id のない ping/pong では id フィールドが出力されない
        // given (前提条件):
        let frame = ClientFrame::Pong { id: None };

        // when (操作):
        let text = encode_client_frame(&frame).unwrap();

        // then (期待する結果):
        assert_eq!(text, r#"{"msg":"pong"}"#);
    }

    #[test]
    fn test_decode_result_with_error() {
        // テスト項目: エラー付きの result フレームがデコードされる
        // given (前提条件):
        let text = r#"{"msg":"result","id":"3","error":{"error":403,"reason":"forbidden"}}"#;

        // when (操作):
        let frame = decode_server_frame(text).unwrap();

        // then (期待する結果):
        match frame {
            Some(ServerFrame::Result { id, result, error }) => {
                assert_eq!(id, "3");
                assert!(result.is_none());
                let error = error.unwrap();
                assert_eq!(error.error, json!(403));
                assert_eq!(error.reason.as_deref(), Some("forbidden"));
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_decode_greeting_without_msg_is_ignored() {
        // テスト項目: msg を持たない挨拶フレームは None になる
        // given (前提条件):
        let text = r#"{"server_id":"0"}"#;

        // when (操作):
        let frame = decode_server_frame(text).unwrap();

        // then (期待する結果):
        assert!(frame.is_none());
    }

    #[test]
    fn test_decode_unknown_msg_is_rejected() {
        // テスト項目: 未知の msg タグはデコードエラーになる
        // given (前提条件):
        let text = r#"{"msg":"teleport","id":"1"}"#;

        // when (操作):
        let result = decode_server_frame(text);

        // then (期待する結果):
        assert!(matches!(result, Err(FrameError::Malformed(_))));
    }

    #[test]
    fn test_room_dto_accepts_aliases_and_custom_fields() {
        // テスト項目: RoomDto が別名フィールドとカスタムフィールドを受け付ける
        // given (前提条件):
        let value = json!({
            "_id": "r1",
            "fname": "Project One",
            "msgs": 12,
            "customFields": {"projectAccepted": true, "cmId": "cm-9"}
        });

        // when (操作):
        let room: RoomDto = serde_json::from_value(value).unwrap();

        // then (期待する結果):
        assert_eq!(room.name, "Project One");
        assert_eq!(room.messages_count, 12);
        assert_eq!(room.unread, 0);
        assert!(room.custom_fields.project_accepted);
        assert_eq!(room.custom_fields.extra.get("cmId"), Some(&json!("cm-9")));
    }
}
