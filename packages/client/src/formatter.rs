//! Text rendering of client events for the terminal demo.

use kaiwa_shared::time::timestamp_to_local_rfc3339;

use crate::bootstrap::RoomListSource;
use crate::connection::ConnectionStatus;
use crate::domain::{Message, RoomId, RoomSummary, Timestamp};
use crate::error::RpcError;
use crate::event::ChatEvent;
use crate::history::WindowSnapshot;

const RULE: &str = "============================================================";
const THIN_RULE: &str = "------------------------------------------------------------";

/// Event formatter for terminal display
pub struct EventFormatter;

impl EventFormatter {
    /// Format any event the demo prints.
    ///
    /// Returns `None` for events that carry nothing worth printing
    /// (scroll commands or partial upload progress).
    pub fn format_event(event: &ChatEvent) -> Option<String> {
        let text = match event {
            ChatEvent::ConnectionStateChanged(status) => Self::format_connection_status(status),
            ChatEvent::RoomListLoaded { rooms, source } => Self::format_room_list(rooms, *source),
            ChatEvent::UnreadsLoaded(unreads) => {
                let total: u32 = unreads.iter().map(|u| u.unread).sum();
                format!("\n{} unread message(s) across {} room(s)\n", total, unreads.len())
            }
            ChatEvent::RoomAdded(room) => format!("\n+ room {} ({})\n", room.name, room.id),
            ChatEvent::RoomDeleted(room_id) => format!("\n- room {}\n", room_id),
            ChatEvent::MessagesReceived { messages, .. } => messages
                .iter()
                .map(Self::format_message)
                .collect::<String>(),
            ChatEvent::SendFailed { message, error } => Self::format_send_failed(message, error),
            ChatEvent::HistoryLoaded { room_id, messages } => {
                format!("\n{} older message(s) loaded in {}\n", messages.len(), room_id)
            }
            ChatEvent::LastMessageUpdated { .. } => return None,
            ChatEvent::SettingsLoaded(settings) => {
                format!("\n{} public setting(s) loaded\n", settings.len())
            }
            ChatEvent::UnreadUpdated { room_id, unread } => {
                format!("\n{}: {} unread\n", room_id, unread)
            }
            ChatEvent::UploadProgress { percent, .. } if *percent < 100 => return None,
            ChatEvent::UploadProgress { room_id, .. } => format!("\nupload to {} done\n", room_id),
            ChatEvent::WindowChanged { room_id, window } => Self::format_window(room_id, window),
            ChatEvent::ScrollCommand { .. } => return None,
        };
        Some(text)
    }

    /// Format a connection state change
    ///
    /// # Arguments
    ///
    /// * `status` - The published connection status
    ///
    /// # Returns
    ///
    /// A one-line status notice, with a reconnecting hint when retries pile up
    pub fn format_connection_status(status: &ConnectionStatus) -> String {
        if status.reconnecting {
            format!(
                "\n* connection: {:?} (reconnecting, attempt {})\n",
                status.state, status.retry_count
            )
        } else {
            format!("\n* connection: {:?}\n", status.state)
        }
    }

    /// Format the room list
    ///
    /// # Arguments
    ///
    /// * `rooms` - Rooms to list
    /// * `source` - Whether the list came from the cache or the backend
    ///
    /// # Returns
    ///
    /// A framed list of rooms with unread counts
    pub fn format_room_list(rooms: &[RoomSummary], source: RoomListSource) -> String {
        let mut output = String::new();
        output.push_str("\n\n");
        output.push_str(RULE);
        output.push('\n');
        let label = match source {
            RoomListSource::Cached => "Rooms (cached):",
            RoomListSource::Fresh => "Rooms:",
        };
        output.push_str(label);
        output.push('\n');

        if rooms.is_empty() {
            output.push_str("(No rooms)\n");
        } else {
            for room in rooms {
                let unread = if room.unread > 0 {
                    format!(" [{} unread]", room.unread)
                } else {
                    String::new()
                };
                output.push_str(&format!("{} - {}{}\n", room.id, room.name, unread));
            }
        }

        output.push_str(RULE);
        output.push('\n');
        output
    }

    /// Format a chat message
    ///
    /// # Arguments
    ///
    /// * `message` - The message to render
    ///
    /// # Returns
    ///
    /// A framed message with sender and send time
    pub fn format_message(message: &Message) -> String {
        let failed = if message.error { " (failed)" } else { "" };
        format!(
            "\n{}\n@{}: {}{}\nsent at {}\n{}\n",
            THIN_RULE,
            message.sender.username,
            message.body,
            failed,
            Self::format_timestamp(message.timestamp),
            THIN_RULE
        )
    }

    /// Format a failed send
    ///
    /// # Arguments
    ///
    /// * `message` - The local echo that failed
    /// * `error` - Why the call failed
    ///
    /// # Returns
    ///
    /// A one-line failure notice
    pub fn format_send_failed(message: &Message, error: &RpcError) -> String {
        format!("\n! could not send \"{}\": {}\n", message.body, error)
    }

    /// Format the visible window of a room
    pub fn format_window(room_id: &RoomId, window: &WindowSnapshot) -> String {
        let mut output = String::new();
        output.push_str(&format!("\n{}\n[{}]", RULE, room_id));
        if window.has_older {
            output.push_str(" (older messages available, /more)");
        }
        if !window.attached {
            output.push_str(" (viewing history)");
        }
        output.push('\n');
        for message in &window.messages {
            let marker = if window.highlighted.as_ref() == Some(&message.id) {
                ">> "
            } else {
                ""
            };
            output.push_str(&format!(
                "{}{} @{}: {}\n",
                marker,
                Self::format_timestamp(message.timestamp),
                message.sender.username,
                message.body
            ));
        }
        output.push_str(RULE);
        output.push('\n');
        output
    }

    fn format_timestamp(timestamp: Timestamp) -> String {
        timestamp_to_local_rfc3339(timestamp.value())
            .unwrap_or_else(|| timestamp.value().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionState;
    use crate::domain::{MessageId, Sender, UserId};

    // 2023-01-01T12:00:00Z, the same calendar day in every common offset
    const NOON: i64 = 1672574400000;

    fn message(id: &str, body: &str) -> Message {
        Message {
            id: MessageId::new(id).unwrap(),
            room_id: RoomId::new("r1").unwrap(),
            timestamp: Timestamp::new(NOON),
            sender: Sender {
                id: UserId::new("u1").unwrap(),
                username: "alice".to_string(),
                name: "Alice".to_string(),
            },
            body: body.to_string(),
            attachments: vec![],
            error: false,
        }
    }

    #[test]
    fn test_format_room_list_with_no_rooms() {
        // テスト項目: ルームが空の場合、適切なメッセージが表示される
        // given (前提条件):
        let rooms = vec![];

        // when (操作):
        let result = EventFormatter::format_room_list(&rooms, RoomListSource::Fresh);

        // then (期待する結果):
        assert!(result.contains("Rooms:"));
        assert!(result.contains("(No rooms)"));
        assert!(result.contains(RULE));
    }

    #[test]
    fn test_format_room_list_marks_cache_and_unread() {
        // テスト項目: キャッシュ由来の一覧と未読数が表示される
        // given (前提条件):
        let rooms = vec![RoomSummary {
            id: RoomId::new("r1").unwrap(),
            name: "general".to_string(),
            unread: 3,
            messages_count: 10,
            last_message: None,
            updated_at: None,
            custom_fields: Default::default(),
        }];

        // when (操作):
        let result = EventFormatter::format_room_list(&rooms, RoomListSource::Cached);

        // then (期待する結果):
        assert!(result.contains("Rooms (cached):"));
        assert!(result.contains("r1 - general [3 unread]"));
    }

    #[test]
    fn test_format_message() {
        // テスト項目: チャットメッセージが正しくフォーマットされる
        // given (前提条件):
        let message = message("m1", "Hello, world!");

        // when (操作):
        let result = EventFormatter::format_message(&message);

        // then (期待する結果):
        assert!(result.contains("@alice: Hello, world!"));
        assert!(result.contains("sent at"));
        assert!(result.contains("2023-01-01"));
        assert!(!result.contains("(failed)"));
    }

    #[test]
    fn test_format_window_marks_highlight() {
        // テスト項目: ハイライト対象のメッセージに印が付く
        // given (前提条件):
        let window = WindowSnapshot {
            messages: vec![message("m1", "first"), message("m2", "second")],
            highlighted: Some(MessageId::new("m2").unwrap()),
            attached: false,
            has_older: true,
        };

        // when (操作):
        let result = EventFormatter::format_window(&RoomId::new("r1").unwrap(), &window);

        // then (期待する結果):
        assert!(result.contains(">> "));
        assert!(result.contains("(viewing history)"));
        assert!(result.contains("/more"));
        assert_eq!(result.matches(">> ").count(), 1);
    }

    #[test]
    fn test_format_connection_status_reconnecting() {
        // テスト項目: 再接続中は試行回数が表示される
        // given (前提条件):
        let status = ConnectionStatus {
            state: ConnectionState::Connecting,
            retry_count: 3,
            reconnecting: true,
        };

        // when (操作):
        let result = EventFormatter::format_connection_status(&status);

        // then (期待する結果):
        assert!(result.contains("Connecting"));
        assert!(result.contains("attempt 3"));
    }

    #[test]
    fn test_format_event_skips_scroll_commands() {
        // テスト項目: スクロール指示は表示対象外
        // given (前提条件):
        let event = ChatEvent::ScrollCommand {
            room_id: RoomId::new("r1").unwrap(),
            command: crate::history::ScrollCommand::ToBottom,
        };

        // when (操作):
        let result = EventFormatter::format_event(&event);

        // then (期待する結果):
        assert!(result.is_none());
    }
}
