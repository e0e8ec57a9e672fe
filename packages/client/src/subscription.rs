//! Push subscriptions: identity keys, the desired set, and push routing.
//!
//! A subscription is a declared intent. It is kept across reconnects and
//! re-issued on every login with the same key and the same wire id.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::domain::{RoomId, UserId};
use crate::domain::{Message, RoomSummary, UnreadCount};
use crate::error::FrameError;
use crate::infrastructure::dto::conversion::decode_payload;
use crate::infrastructure::dto::websocket::{ClientFrame, MessageDto, RoomDto, ServerFrame, UnreadDto};

const ROOM_MESSAGES_STREAM: &str = "stream-room-messages";
const NOTIFY_USER_STREAM: &str = "stream-notify-user";
const ROOMS_CHANGED: &str = "rooms-changed";
const SUBSCRIPTIONS_CHANGED: &str = "subscriptions-changed";

/// Identity of a push feed: stream name plus parameters
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey {
    pub name: String,
    pub params: Vec<String>,
}

impl SubscriptionKey {
    pub fn new(name: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }
}

/// The feeds this core knows how to interpret
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topic {
    /// New messages for one room
    RoomMessages(RoomId),
    /// Rooms inserted, updated or removed for a user
    UserRooms(UserId),
    /// Unread counters and membership for a user
    UserSubscriptions(UserId),
}

impl Topic {
    pub fn key(&self) -> SubscriptionKey {
        match self {
            Topic::RoomMessages(room_id) => {
                SubscriptionKey::new(ROOM_MESSAGES_STREAM, vec![room_id.to_string()])
            }
            Topic::UserRooms(user_id) => SubscriptionKey::new(
                NOTIFY_USER_STREAM,
                vec![format!("{}/{}", user_id, ROOMS_CHANGED)],
            ),
            Topic::UserSubscriptions(user_id) => SubscriptionKey::new(
                NOTIFY_USER_STREAM,
                vec![format!("{}/{}", user_id, SUBSCRIPTIONS_CHANGED)],
            ),
        }
    }

    /// Recognize a key; `None` for feeds subscribed generically by the consumer
    pub fn from_key(key: &SubscriptionKey) -> Option<Self> {
        let [param] = key.params.as_slice() else {
            return None;
        };
        match key.name.as_str() {
            ROOM_MESSAGES_STREAM => RoomId::new(param.as_str()).ok().map(Topic::RoomMessages),
            NOTIFY_USER_STREAM => {
                let (user, event) = param.split_once('/')?;
                let user_id = UserId::new(user).ok()?;
                match event {
                    ROOMS_CHANGED => Some(Topic::UserRooms(user_id)),
                    SUBSCRIPTIONS_CHANGED => Some(Topic::UserSubscriptions(user_id)),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

/// One desired subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub key: SubscriptionKey,
    /// Wire id, assigned once and reused on every re-issue
    pub sub_id: String,
    pub active: bool,
}

impl Subscription {
    fn frame(&self) -> ClientFrame {
        let mut params: Vec<Value> = self
            .key
            .params
            .iter()
            .map(|p| Value::String(p.clone()))
            .collect();
        // Stream subscriptions take a trailing "use collection" flag
        params.push(Value::Bool(false));
        ClientFrame::Sub {
            id: self.sub_id.clone(),
            name: self.key.name.clone(),
            params,
        }
    }
}

/// The set of desired subscriptions.
///
/// Subscriptions are only active while logged in; everything declared before
/// login or during an outage goes out in the next `on_logged_in` batch.
#[derive(Debug, Default)]
pub struct SubscriptionMultiplexer {
    entries: BTreeMap<SubscriptionKey, Subscription>,
    live: bool,
}

impl SubscriptionMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a subscription. Idempotent: an existing key yields no frame.
    pub fn subscribe(&mut self, key: SubscriptionKey) -> Option<ClientFrame> {
        if self.entries.contains_key(&key) {
            tracing::debug!("Already subscribed to {:?}", key);
            return None;
        }
        let subscription = Subscription {
            key: key.clone(),
            sub_id: Uuid::new_v4().to_string(),
            active: self.live,
        };
        let frame = self.live.then(|| subscription.frame());
        self.entries.insert(key, subscription);
        frame
    }

    /// Withdraw a subscription; yields an `unsub` frame if it was active
    pub fn unsubscribe(&mut self, key: &SubscriptionKey) -> Option<ClientFrame> {
        let subscription = self.entries.remove(key)?;
        (subscription.active && self.live).then_some(ClientFrame::Unsub {
            id: subscription.sub_id,
        })
    }

    /// Re-issue every desired subscription against a fresh login
    pub fn on_logged_in(&mut self) -> Vec<ClientFrame> {
        self.live = true;
        self.entries
            .values_mut()
            .map(|subscription| {
                subscription.active = true;
                subscription.frame()
            })
            .collect()
    }

    /// Every subscription goes inactive with the transport
    pub fn on_connection_lost(&mut self) {
        self.live = false;
        for subscription in self.entries.values_mut() {
            subscription.active = false;
        }
    }

    /// The backend ended a subscription; it stays desired and is re-issued
    /// on the next login
    pub fn on_nosub(&mut self, sub_id: &str) -> Option<&SubscriptionKey> {
        let subscription = self
            .entries
            .values_mut()
            .find(|subscription| subscription.sub_id == sub_id)?;
        subscription.active = false;
        Some(&subscription.key)
    }

    /// The active subscription a push belongs to, if any
    pub fn route(&self, key: &SubscriptionKey) -> Option<&Subscription> {
        self.entries.get(key).filter(|subscription| subscription.active)
    }

    pub fn get(&self, key: &SubscriptionKey) -> Option<&Subscription> {
        self.entries.get(key)
    }

    pub fn is_active(&self, key: &SubscriptionKey) -> bool {
        self.route(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &SubscriptionKey> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ========================================
// Push frames
// ========================================

/// A push frame reduced to its subscription key and arguments
#[derive(Debug, Clone, PartialEq)]
pub struct Push {
    pub key: SubscriptionKey,
    pub args: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushFields {
    event_name: String,
    #[serde(default)]
    args: Vec<Value>,
}

/// Extract the push carried by a data frame.
///
/// Returns `None` for frames that are not pushes at all.
pub fn push_from_frame(frame: ServerFrame) -> Option<Result<Push, FrameError>> {
    let (collection, fields) = match frame {
        ServerFrame::Added {
            collection, fields, ..
        }
        | ServerFrame::Changed {
            collection, fields, ..
        } => (collection, fields),
        ServerFrame::Removed { collection, .. } => (collection, None),
        _ => return None,
    };
    let Some(fields) = fields else {
        return Some(Err(FrameError::Shape(format!(
            "push on {} without fields",
            collection
        ))));
    };
    Some(
        decode_payload::<PushFields>(Value::Object(fields)).map(|fields| Push {
            key: SubscriptionKey::new(collection, vec![fields.event_name]),
            args: fields.args,
        }),
    )
}

/// A push decoded against the topic it arrived on
#[derive(Debug, Clone, PartialEq)]
pub enum TopicEvent {
    Messages(Vec<Message>),
    RoomInserted(RoomSummary),
    RoomUpdated(RoomSummary),
    RoomRemoved(RoomId),
    UnreadChanged(UnreadCount),
    SubscriptionRemoved(RoomId),
}

fn split_action(args: Vec<Value>) -> Result<(String, Value), FrameError> {
    let mut args = args.into_iter();
    match (args.next(), args.next()) {
        (Some(Value::String(action)), Some(payload)) => Ok((action, payload)),
        _ => Err(FrameError::Shape(
            "expected [action, payload] arguments".to_string(),
        )),
    }
}

fn room_id_of(payload: &Value, field: &'static str) -> Result<RoomId, FrameError> {
    let raw = payload
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| FrameError::Shape(format!("missing {}", field)))?;
    RoomId::new(raw).map_err(|source| FrameError::InvalidField { field, source })
}

/// Decode push arguments for a known topic
pub fn decode_topic_event(topic: &Topic, args: Vec<Value>) -> Result<TopicEvent, FrameError> {
    match topic {
        Topic::RoomMessages(_) => {
            let messages = args
                .into_iter()
                .map(|arg| decode_payload::<MessageDto>(arg).and_then(Message::try_from))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(TopicEvent::Messages(messages))
        }
        Topic::UserRooms(_) => {
            let (action, payload) = split_action(args)?;
            if action == "removed" {
                return Ok(TopicEvent::RoomRemoved(room_id_of(&payload, "_id")?));
            }
            let room = RoomSummary::try_from(decode_payload::<RoomDto>(payload)?)?;
            match action.as_str() {
                "inserted" => Ok(TopicEvent::RoomInserted(room)),
                _ => Ok(TopicEvent::RoomUpdated(room)),
            }
        }
        Topic::UserSubscriptions(_) => {
            let (action, payload) = split_action(args)?;
            if action == "removed" {
                return Ok(TopicEvent::SubscriptionRemoved(room_id_of(&payload, "rid")?));
            }
            let unread = UnreadCount::try_from(decode_payload::<UnreadDto>(payload)?)?;
            Ok(TopicEvent::UnreadChanged(unread))
        }
    }
}

/// Build a push frame the way the backend sends it (used by tests and the
/// in-memory backend)
pub fn push_frame(key: &SubscriptionKey, args: Vec<Value>) -> ServerFrame {
    let mut fields = Map::new();
    fields.insert(
        "eventName".to_string(),
        Value::String(key.params.first().cloned().unwrap_or_default()),
    );
    fields.insert("args".to_string(), Value::Array(args));
    ServerFrame::Changed {
        collection: key.name.clone(),
        id: "id".to_string(),
        fields: Some(fields),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn room(id: &str) -> RoomId {
        RoomId::new(id).unwrap()
    }

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    fn sub_ids(frames: &[ClientFrame]) -> Vec<String> {
        frames
            .iter()
            .filter_map(|frame| match frame {
                ClientFrame::Sub { id, .. } => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_topic_key_round_trip() {
        // テスト項目: トピックからキーを作り、キーからトピックを復元できる
        // given (前提条件):
        let topics = vec![
            Topic::RoomMessages(room("r1")),
            Topic::UserRooms(user("u1")),
            Topic::UserSubscriptions(user("u1")),
        ];

        // when (操作):
        let restored: Vec<Option<Topic>> =
            topics.iter().map(|t| Topic::from_key(&t.key())).collect();

        // then (期待する結果):
        assert_eq!(restored, topics.into_iter().map(Some).collect::<Vec<_>>());
        assert_eq!(
            Topic::UserRooms(user("u1")).key().params,
            vec!["u1/rooms-changed".to_string()]
        );
    }

    #[test]
    fn test_subscribe_before_login_is_deferred() {
        // テスト項目: ログイン前の購読はフレームを送らず、ログイン時にまとめて送られる
        // given (前提条件):
        let mut multiplexer = SubscriptionMultiplexer::new();

        // when (操作):
        let immediate = multiplexer.subscribe(Topic::RoomMessages(room("r1")).key());
        let batch = multiplexer.on_logged_in();

        // then (期待する結果):
        assert!(immediate.is_none());
        assert_eq!(batch.len(), 1);
        assert!(multiplexer.is_active(&Topic::RoomMessages(room("r1")).key()));
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        // テスト項目: 同じキーの再購読は何もしない
        // given (前提条件):
        let mut multiplexer = SubscriptionMultiplexer::new();
        multiplexer.on_logged_in();
        let key = Topic::RoomMessages(room("r1")).key();

        // when (操作):
        let first = multiplexer.subscribe(key.clone());
        let second = multiplexer.subscribe(key);

        // then (期待する結果):
        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(multiplexer.len(), 1);
    }

    #[test]
    fn test_resubscribe_reuses_ids_after_reconnect() {
        // テスト項目: 再接続後の再購読は同じキー・同じ ID で一度だけ送られる
        // given (前提条件):
        let mut multiplexer = SubscriptionMultiplexer::new();
        multiplexer.subscribe(Topic::UserRooms(user("u1")).key());
        multiplexer.subscribe(Topic::RoomMessages(room("r1")).key());
        let before = sub_ids(&multiplexer.on_logged_in());

        // when (操作):
        multiplexer.on_connection_lost();
        let inactive = multiplexer.is_active(&Topic::RoomMessages(room("r1")).key());
        let after = sub_ids(&multiplexer.on_logged_in());

        // then (期待する結果):
        assert!(!inactive);
        assert_eq!(before, after);
        assert_eq!(after.len(), 2);
    }

    #[test]
    fn test_unsubscribe_emits_unsub_only_when_active() {
        // テスト項目: アクティブな購読の解除のみ unsub フレームを送る
        // given (前提条件):
        let mut multiplexer = SubscriptionMultiplexer::new();
        let key = Topic::RoomMessages(room("r1")).key();
        multiplexer.subscribe(key.clone());

        // when (操作):
        let offline = multiplexer.unsubscribe(&key);
        multiplexer.on_logged_in();
        multiplexer.subscribe(key.clone());
        let online = multiplexer.unsubscribe(&key);

        // then (期待する結果):
        assert!(offline.is_none());
        assert!(matches!(online, Some(ClientFrame::Unsub { .. })));
        assert!(multiplexer.is_empty());
    }

    #[test]
    fn test_route_ignores_unknown_key() {
        // テスト項目: 未知のキーへのプッシュはルーティングされない
        // given (前提条件):
        let mut multiplexer = SubscriptionMultiplexer::new();
        multiplexer.on_logged_in();
        multiplexer.subscribe(Topic::RoomMessages(room("r1")).key());

        // when (操作):
        let routed = multiplexer.route(&Topic::RoomMessages(room("r2")).key());

        // then (期待する結果):
        assert!(routed.is_none());
    }

    #[test]
    fn test_push_from_frame_extracts_key_and_args() {
        // テスト項目: プッシュフレームからキーと引数を取り出せる
        // given (前提条件):
        let key = Topic::RoomMessages(room("r1")).key();
        let frame = push_frame(&key, vec![json!({"x": 1})]);

        // when (操作):
        let push = push_from_frame(frame).unwrap().unwrap();

        // then (期待する結果):
        assert_eq!(push.key, key);
        assert_eq!(push.args, vec![json!({"x": 1})]);
    }

    #[test]
    fn test_push_from_frame_skips_non_push_frames() {
        // テスト項目: プッシュ以外のフレームは対象外
        // given (前提条件):
        let frame = ServerFrame::Ready { subs: vec![] };

        // when (操作):
        let push = push_from_frame(frame);

        // then (期待する結果):
        assert!(push.is_none());
    }

    #[test]
    fn test_decode_rooms_changed_actions() {
        // テスト項目: rooms-changed の各アクションが対応するイベントになる
        // given (前提条件):
        let topic = Topic::UserRooms(user("u1"));
        let room_payload = json!({"_id": "r9", "roomName": "新規"});

        // when (操作):
        let inserted =
            decode_topic_event(&topic, vec![json!("inserted"), room_payload.clone()]).unwrap();
        let updated = decode_topic_event(&topic, vec![json!("updated"), room_payload]).unwrap();
        let removed =
            decode_topic_event(&topic, vec![json!("removed"), json!({"_id": "r9"})]).unwrap();

        // then (期待する結果):
        assert!(matches!(inserted, TopicEvent::RoomInserted(ref r) if r.name == "新規"));
        assert!(matches!(updated, TopicEvent::RoomUpdated(_)));
        assert_eq!(removed, TopicEvent::RoomRemoved(room("r9")));
    }

    #[test]
    fn test_decode_subscriptions_changed() {
        // テスト項目: subscriptions-changed は未読数更新または削除になる
        // given (前提条件):
        let topic = Topic::UserSubscriptions(user("u1"));

        // when (操作):
        let changed =
            decode_topic_event(&topic, vec![json!("updated"), json!({"rid": "r1", "unread": 3})])
                .unwrap();
        let removed =
            decode_topic_event(&topic, vec![json!("removed"), json!({"rid": "r1"})]).unwrap();

        // then (期待する結果):
        assert_eq!(
            changed,
            TopicEvent::UnreadChanged(UnreadCount {
                room_id: room("r1"),
                unread: 3,
            })
        );
        assert_eq!(removed, TopicEvent::SubscriptionRemoved(room("r1")));
    }

    #[test]
    fn test_decode_rejects_missing_action() {
        // テスト項目: アクションのない引数は形式エラー
        // given (前提条件):
        let topic = Topic::UserRooms(user("u1"));

        // when (操作):
        let result = decode_topic_event(&topic, vec![json!({"_id": "r1"})]);

        // then (期待する結果):
        assert!(matches!(result, Err(FrameError::Shape(_))));
    }
}
