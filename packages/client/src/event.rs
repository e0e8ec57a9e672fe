//! Event Dispatch: the hooks through which the core talks to its consumer.
//!
//! The consumer hands an `EventHandler` to the client at construction. The
//! core never holds anything else of the consumer's; every domain event
//! travels through exactly one hook.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::bootstrap::RoomListSource;
use crate::connection::{ConnectionState, ConnectionStatus};
use crate::domain::{Message, RoomId, RoomSummary, Setting, UnreadCount};
use crate::error::RpcError;
use crate::history::{ScrollCommand, WindowSnapshot};

/// Consumer hooks. Every method defaults to a no-op.
#[cfg_attr(test, mockall::automock)]
pub trait EventHandler: Send + Sync {
    fn on_connection_state_changed(&self, _status: ConnectionStatus) {}

    fn on_room_list_loaded(&self, _rooms: &[RoomSummary], _source: RoomListSource) {}

    fn on_unreads_loaded(&self, _unreads: &[UnreadCount]) {}

    fn on_room_added(&self, _room: &RoomSummary) {}

    fn on_room_deleted(&self, _room_id: &RoomId) {}

    fn on_messages_received(&self, _room_id: &RoomId, _messages: &[Message]) {}

    /// A send failed; `message` is the local echo with `error` set
    fn on_send_failed(&self, _message: &Message, _error: &RpcError) {}

    fn on_history_loaded(&self, _room_id: &RoomId, _messages: &[Message]) {}

    fn on_last_message_updated(&self, _room_id: &RoomId, _message: &Message) {}

    fn on_settings_loaded(&self, _settings: &[Setting]) {}

    fn on_unread_updated(&self, _room_id: &RoomId, _unread: u32) {}

    /// Attachment transfer progress in percent
    fn on_upload_progress(&self, _room_id: &RoomId, _percent: u8) {}

    fn on_window_changed(&self, _room_id: &RoomId, _window: &WindowSnapshot) {}

    fn on_scroll_command(&self, _room_id: &RoomId, _command: &ScrollCommand) {}
}

/// Owned form of every hook invocation
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    ConnectionStateChanged(ConnectionStatus),
    RoomListLoaded {
        rooms: Vec<RoomSummary>,
        source: RoomListSource,
    },
    UnreadsLoaded(Vec<UnreadCount>),
    RoomAdded(RoomSummary),
    RoomDeleted(RoomId),
    MessagesReceived {
        room_id: RoomId,
        messages: Vec<Message>,
    },
    SendFailed {
        message: Message,
        error: RpcError,
    },
    HistoryLoaded {
        room_id: RoomId,
        messages: Vec<Message>,
    },
    LastMessageUpdated {
        room_id: RoomId,
        message: Message,
    },
    SettingsLoaded(Vec<Setting>),
    UnreadUpdated {
        room_id: RoomId,
        unread: u32,
    },
    UploadProgress {
        room_id: RoomId,
        percent: u8,
    },
    WindowChanged {
        room_id: RoomId,
        window: WindowSnapshot,
    },
    ScrollCommand {
        room_id: RoomId,
        command: ScrollCommand,
    },
}

/// Forwards every hook into a channel as a `ChatEvent`.
///
/// Lets a consumer (or a test) process events in its own task.
#[derive(Debug, Clone)]
pub struct ChannelEventHandler {
    tx: mpsc::UnboundedSender<ChatEvent>,
}

impl ChannelEventHandler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ChatEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: ChatEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("Event receiver dropped; discarding event");
        }
    }
}

impl EventHandler for ChannelEventHandler {
    fn on_connection_state_changed(&self, status: ConnectionStatus) {
        self.forward(ChatEvent::ConnectionStateChanged(status));
    }

    fn on_room_list_loaded(&self, rooms: &[RoomSummary], source: RoomListSource) {
        self.forward(ChatEvent::RoomListLoaded {
            rooms: rooms.to_vec(),
            source,
        });
    }

    fn on_unreads_loaded(&self, unreads: &[UnreadCount]) {
        self.forward(ChatEvent::UnreadsLoaded(unreads.to_vec()));
    }

    fn on_room_added(&self, room: &RoomSummary) {
        self.forward(ChatEvent::RoomAdded(room.clone()));
    }

    fn on_room_deleted(&self, room_id: &RoomId) {
        self.forward(ChatEvent::RoomDeleted(room_id.clone()));
    }

    fn on_messages_received(&self, room_id: &RoomId, messages: &[Message]) {
        self.forward(ChatEvent::MessagesReceived {
            room_id: room_id.clone(),
            messages: messages.to_vec(),
        });
    }

    fn on_send_failed(&self, message: &Message, error: &RpcError) {
        self.forward(ChatEvent::SendFailed {
            message: message.clone(),
            error: error.clone(),
        });
    }

    fn on_history_loaded(&self, room_id: &RoomId, messages: &[Message]) {
        self.forward(ChatEvent::HistoryLoaded {
            room_id: room_id.clone(),
            messages: messages.to_vec(),
        });
    }

    fn on_last_message_updated(&self, room_id: &RoomId, message: &Message) {
        self.forward(ChatEvent::LastMessageUpdated {
            room_id: room_id.clone(),
            message: message.clone(),
        });
    }

    fn on_settings_loaded(&self, settings: &[Setting]) {
        self.forward(ChatEvent::SettingsLoaded(settings.to_vec()));
    }

    fn on_unread_updated(&self, room_id: &RoomId, unread: u32) {
        self.forward(ChatEvent::UnreadUpdated {
            room_id: room_id.clone(),
            unread,
        });
    }

    fn on_upload_progress(&self, room_id: &RoomId, percent: u8) {
        self.forward(ChatEvent::UploadProgress {
            room_id: room_id.clone(),
            percent,
        });
    }

    fn on_window_changed(&self, room_id: &RoomId, window: &WindowSnapshot) {
        self.forward(ChatEvent::WindowChanged {
            room_id: room_id.clone(),
            window: window.clone(),
        });
    }

    fn on_scroll_command(&self, room_id: &RoomId, command: &ScrollCommand) {
        self.forward(ChatEvent::ScrollCommand {
            room_id: room_id.clone(),
            command: command.clone(),
        });
    }
}

/// Routes `ChatEvent`s to the consumer's hooks.
///
/// Connection state changes are deduplicated: a state re-entered by a race is
/// reported once.
pub struct Dispatcher {
    handler: Arc<dyn EventHandler>,
    last_state: Option<ConnectionState>,
}

impl Dispatcher {
    pub fn new(handler: Arc<dyn EventHandler>) -> Self {
        Self {
            handler,
            last_state: None,
        }
    }

    pub fn dispatch(&mut self, event: ChatEvent) {
        let handler = self.handler.as_ref();
        match event {
            ChatEvent::ConnectionStateChanged(status) => {
                if self.last_state == Some(status.state) {
                    return;
                }
                self.last_state = Some(status.state);
                handler.on_connection_state_changed(status);
            }
            ChatEvent::RoomListLoaded { rooms, source } => {
                tracing::debug!("Room list loaded ({:?}, {} rooms)", source, rooms.len());
                handler.on_room_list_loaded(&rooms, source);
            }
            ChatEvent::UnreadsLoaded(unreads) => handler.on_unreads_loaded(&unreads),
            ChatEvent::RoomAdded(room) => handler.on_room_added(&room),
            ChatEvent::RoomDeleted(room_id) => handler.on_room_deleted(&room_id),
            ChatEvent::MessagesReceived { room_id, messages } => {
                handler.on_messages_received(&room_id, &messages)
            }
            ChatEvent::SendFailed { message, error } => {
                tracing::warn!("Send of {} failed: {}", message.id, error);
                handler.on_send_failed(&message, &error);
            }
            ChatEvent::HistoryLoaded { room_id, messages } => {
                handler.on_history_loaded(&room_id, &messages)
            }
            ChatEvent::LastMessageUpdated { room_id, message } => {
                handler.on_last_message_updated(&room_id, &message)
            }
            ChatEvent::SettingsLoaded(settings) => handler.on_settings_loaded(&settings),
            ChatEvent::UnreadUpdated { room_id, unread } => {
                handler.on_unread_updated(&room_id, unread)
            }
            ChatEvent::UploadProgress { room_id, percent } => {
                handler.on_upload_progress(&room_id, percent)
            }
            ChatEvent::WindowChanged { room_id, window } => {
                handler.on_window_changed(&room_id, &window)
            }
            ChatEvent::ScrollCommand { room_id, command } => {
                handler.on_scroll_command(&room_id, &command)
            }
        }
    }
}
