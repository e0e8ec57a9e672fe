//! Typed method catalogue.
//!
//! Each operation the core performs over the RPC layer is one `MethodCall`
//! variant; the decoders turn raw results back into domain types.

use serde_json::{Value, json};

use crate::domain::{CustomFields, Message, RoomId, RoomSummary, Setting, Timestamp, UnreadCount};
use crate::error::FrameError;
use crate::infrastructure::dto::conversion::{decode_list, decode_payload};
use crate::infrastructure::dto::websocket::{
    HistoryDto, MessageDto, OutgoingMessageDto, RoomDto, RoomInfoDto, SettingDto, UnreadDto,
};

/// An outgoing method call with its parameters
#[derive(Debug, Clone, PartialEq)]
pub enum MethodCall {
    Login { token: String },
    RoomList,
    CachedRoomList,
    Unreads,
    LoadHistory {
        room_id: RoomId,
        before: Option<Timestamp>,
        limit: usize,
    },
    SendMessage(OutgoingMessageDto),
    MarkRead(RoomId),
    RoomInfo(RoomId),
    PublicSettings,
    Presence { online: bool },
    /// Any other method, issued through the generic `call`
    Raw { method: String, params: Vec<Value> },
}

impl MethodCall {
    pub fn name(&self) -> &str {
        match self {
            MethodCall::Login { .. } => "login",
            MethodCall::RoomList => "rooms/get",
            MethodCall::CachedRoomList => "rooms/getCached",
            MethodCall::Unreads => "subscriptions/get",
            MethodCall::LoadHistory { .. } => "loadHistory",
            MethodCall::SendMessage(_) => "sendMessage",
            MethodCall::MarkRead(_) => "readMessages",
            MethodCall::RoomInfo(_) => "rooms/info",
            MethodCall::PublicSettings => "public-settings/get",
            MethodCall::Presence { online: true } => "UserPresence:online",
            MethodCall::Presence { online: false } => "UserPresence:away",
            MethodCall::Raw { method, .. } => method,
        }
    }

    pub fn params(&self) -> Vec<Value> {
        match self {
            MethodCall::Login { token } => vec![json!({ "resume": token })],
            MethodCall::LoadHistory {
                room_id,
                before,
                limit,
            } => vec![
                json!(room_id.as_str()),
                before.map_or(Value::Null, |ts| json!({ "$date": ts.value() })),
                json!(limit),
                Value::Null,
            ],
            MethodCall::SendMessage(message) => {
                vec![serde_json::to_value(message).unwrap_or(Value::Null)]
            }
            MethodCall::MarkRead(room_id) | MethodCall::RoomInfo(room_id) => {
                vec![json!(room_id.as_str())]
            }
            MethodCall::Raw { params, .. } => params.clone(),
            MethodCall::RoomList
            | MethodCall::CachedRoomList
            | MethodCall::Unreads
            | MethodCall::PublicSettings
            | MethodCall::Presence { .. } => Vec::new(),
        }
    }

    pub fn is_login(&self) -> bool {
        matches!(self, MethodCall::Login { .. })
    }
}

// ========================================
// Result decoders
// ========================================

pub fn decode_room_list(result: Value) -> Result<Vec<RoomSummary>, FrameError> {
    decode_list::<RoomDto, RoomSummary>(result)
}

pub fn decode_unreads(result: Value) -> Result<Vec<UnreadCount>, FrameError> {
    decode_list::<UnreadDto, UnreadCount>(result)
}

pub fn decode_settings(result: Value) -> Result<Vec<Setting>, FrameError> {
    decode_list::<SettingDto, Setting>(result)
}

/// Messages of a history page, oldest first
pub fn decode_history(result: Value) -> Result<Vec<Message>, FrameError> {
    let page = decode_payload::<HistoryDto>(result)?;
    let mut messages = page
        .messages
        .into_iter()
        .map(Message::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    messages.sort_by_key(|message| message.timestamp);
    Ok(messages)
}

pub fn decode_room_info(result: Value) -> Result<CustomFields, FrameError> {
    Ok(decode_payload::<RoomInfoDto>(result)?.custom_fields.into())
}

pub fn decode_sent_message(result: Value) -> Result<Message, FrameError> {
    Message::try_from(decode_payload::<MessageDto>(result)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_params_carry_resume_token() {
        // テスト項目: ログインはトークンを resume パラメータで送る
        // given (前提条件):
        let call = MethodCall::Login {
            token: "t0k3n".to_string(),
        };

        // when (操作):
        let params = call.params();

        // then (期待する結果):
        assert_eq!(call.name(), "login");
        assert_eq!(params, vec![json!({"resume": "t0k3n"})]);
    }

    #[test]
    fn test_load_history_params_layout() {
        // テスト項目: 履歴取得のパラメータは [rid, before, limit, null] の順
        // given (前提条件):
        let call = MethodCall::LoadHistory {
            room_id: RoomId::new("r1").unwrap(),
            before: Some(Timestamp::new(1000)),
            limit: 20,
        };

        // when (操作):
        let params = call.params();

        // then (期待する結果):
        assert_eq!(
            params,
            vec![json!("r1"), json!({"$date": 1000}), json!(20), Value::Null]
        );
    }

    #[test]
    fn test_presence_method_names() {
        // テスト項目: プレゼンスはオンライン/離席で別メソッドになる
        // given (前提条件):
        let online = MethodCall::Presence { online: true };
        let away = MethodCall::Presence { online: false };

        // when (操作):
        let names = (online.name().to_string(), away.name().to_string());

        // then (期待する結果):
        assert_eq!(
            names,
            (
                "UserPresence:online".to_string(),
                "UserPresence:away".to_string()
            )
        );
    }

    #[test]
    fn test_decode_history_sorts_oldest_first() {
        // テスト項目: 履歴ページは古い順に並べ替えられる
        // given (前提条件):
        let result = json!({"messages": [
            {"_id": "m2", "rid": "r1", "msg": "b", "ts": {"$date": 20}, "u": {"_id": "u1", "username": "a"}},
            {"_id": "m1", "rid": "r1", "msg": "a", "ts": {"$date": 10}, "u": {"_id": "u1", "username": "a"}}
        ]});

        // when (操作):
        let messages = decode_history(result).unwrap();

        // then (期待する結果):
        let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
    }

    #[test]
    fn test_decode_room_info_defaults_missing_fields() {
        // テスト項目: customFields がない場合は空のカスタムフィールドになる
        // given (前提条件):
        let result = json!({});

        // when (操作):
        let fields = decode_room_info(result).unwrap();

        // then (期待する結果):
        assert_eq!(fields, CustomFields::default());
    }
}
