//! The client runtime: one task owning every piece of client state.
//!
//! Commands from the `ChatClient` handle, frames from the transport, timer
//! firings and liveness hints are all handled on this single control flow.
//! Handlers are synchronous and queue outgoing frames in an outbox; the loop
//! flushes it between events, so the only suspension points are the
//! transport, the connect attempt and the wait for the next event.

use std::collections::HashMap;
use std::sync::Arc;

use kaiwa_shared::time::Clock;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use crate::bootstrap::{BootstrapOrchestrator, RoomListSource};
use crate::config::ClientConfig;
use crate::connection::{ConnectionManager, ConnectionState, ConnectionStatus};
use crate::domain::{
    Attachment, CallId, Credentials, CustomFields, Message, MessageId, RoomId, RoomSummary,
    Sender, Timestamp, UnreadCount,
};
use crate::error::{RpcError, TransportError};
use crate::event::{ChatEvent, Dispatcher};
use crate::history::{RoomView, ScrollMetrics, ViewAction};
use crate::infrastructure::dto::websocket::{ClientFrame, OutgoingMessageDto, ServerFrame};
use crate::infrastructure::transport::{Connector, Transport};
use crate::liveness::LivenessSource;
use crate::method::{self, MethodCall};
use crate::rpc::{PendingCalls, call_outcome};
use crate::subscription::{
    SubscriptionKey, SubscriptionMultiplexer, Topic, TopicEvent, decode_topic_event,
    push_from_frame,
};
use crate::timer::{ScopedTimer, TimerFired, TimerIds, is_current};

pub(crate) type Reply<T> = oneshot::Sender<Result<T, RpcError>>;

/// Requests from the handle
pub(crate) enum Command {
    Open(Option<Credentials>),
    Reconnect,
    SetLiveness(bool),
    SetLivenessSource(Box<dyn LivenessSource>),
    Call {
        method: String,
        params: Vec<Value>,
        reply: Reply<Value>,
    },
    Subscribe(SubscriptionKey),
    Unsubscribe(SubscriptionKey),
    OpenRoomView(RoomId),
    CloseRoomView(RoomId),
    RequestHistoryPage(RoomId),
    RequestHighlight {
        room_id: RoomId,
        message_id: MessageId,
    },
    ReportScroll {
        room_id: RoomId,
        metrics: ScrollMetrics,
    },
    LayoutSettled {
        room_id: RoomId,
        height: f64,
    },
    JumpToLatest(RoomId),
    SendMessage {
        room_id: RoomId,
        body: String,
        attachments: Vec<Attachment>,
        reply: Reply<Message>,
    },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TimerKind {
    Reconnect,
    HighlightRetry(RoomId),
    HighlightGrace(RoomId),
}

/// Calls the runtime issues on its own behalf
#[derive(Debug)]
enum InternalCall {
    Login,
    RoomList(RoomListSource),
    Unreads,
    Settings,
    History { room_id: RoomId, limit: usize },
    RoomInfo(RoomSummary),
    MarkRead(RoomId),
    Presence(bool),
}

/// What happens when a call completes
enum CallTag {
    External(Reply<Value>),
    Internal(InternalCall),
    Send { echo: Message, reply: Reply<Message> },
}

struct ViewSlot {
    view: RoomView,
    retry_timer: Option<ScopedTimer>,
    grace_timer: Option<ScopedTimer>,
}

impl ViewSlot {
    fn new(view: RoomView) -> Self {
        Self {
            view,
            retry_timer: None,
            grace_timer: None,
        }
    }
}

pub(crate) struct Runtime {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    clock: Arc<dyn Clock>,
    dispatcher: Dispatcher,
    connection: ConnectionManager,
    transport: Option<Box<dyn Transport>>,
    /// Transport taken out of service, closed on the next flush
    retired: Option<Box<dyn Transport>>,
    outbox: Vec<ClientFrame>,
    send_failed: bool,
    calls: PendingCalls<CallTag>,
    subscriptions: SubscriptionMultiplexer,
    bootstrap: BootstrapOrchestrator,
    views: HashMap<RoomId, ViewSlot>,
    focused: Option<RoomId>,
    online: bool,
    liveness: Option<Box<dyn LivenessSource>>,
    reconnect_timer: Option<ScopedTimer>,
    timer_ids: TimerIds,
    timer_tx: mpsc::UnboundedSender<TimerFired<TimerKind>>,
    timer_rx: mpsc::UnboundedReceiver<TimerFired<TimerKind>>,
    commands: mpsc::UnboundedReceiver<Command>,
    status_tx: watch::Sender<ConnectionStatus>,
}

async fn recv_frame(
    transport: &mut Option<Box<dyn Transport>>,
) -> Option<Result<ServerFrame, TransportError>> {
    match transport {
        Some(transport) => transport.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_hint(source: &mut Option<Box<dyn LivenessSource>>) -> Option<bool> {
    match source {
        Some(source) => source.next_hint().await,
        None => std::future::pending().await,
    }
}

impl Runtime {
    pub(crate) fn new(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        clock: Arc<dyn Clock>,
        dispatcher: Dispatcher,
        commands: mpsc::UnboundedReceiver<Command>,
        status_tx: watch::Sender<ConnectionStatus>,
    ) -> Self {
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        Self {
            connection: ConnectionManager::new(config.endpoint.clone(), config.reconnect_policy()),
            config,
            connector,
            clock,
            dispatcher,
            transport: None,
            retired: None,
            outbox: Vec::new(),
            send_failed: false,
            calls: PendingCalls::new(),
            subscriptions: SubscriptionMultiplexer::new(),
            bootstrap: BootstrapOrchestrator::new(),
            views: HashMap::new(),
            focused: None,
            online: true,
            liveness: None,
            reconnect_timer: None,
            timer_ids: TimerIds::default(),
            timer_tx,
            timer_rx,
            commands,
            status_tx,
        }
    }

    pub(crate) async fn run(mut self) {
        tracing::info!("Client runtime started for {}", self.connection.endpoint());
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                frame = recv_frame(&mut self.transport) => self.handle_incoming(frame),
                Some(fired) = self.timer_rx.recv() => self.handle_timer(fired).await,
                hint = next_hint(&mut self.liveness) => match hint {
                    Some(online) => self.set_liveness(online),
                    None => {
                        tracing::debug!("Liveness source ended");
                        self.liveness = None;
                    }
                },
            }
            self.flush().await;
        }
        self.shutdown().await;
    }

    // ========================================
    // IO
    // ========================================

    fn send(&mut self, frame: ClientFrame) {
        if self.transport.is_some() {
            self.outbox.push(frame);
        }
    }

    async fn flush(&mut self) {
        if let Some(mut retired) = self.retired.take() {
            retired.close().await;
        }
        loop {
            if std::mem::take(&mut self.send_failed) {
                self.on_transport_lost();
            }
            if self.outbox.is_empty() {
                break;
            }
            let frames = std::mem::take(&mut self.outbox);
            let Some(transport) = self.transport.as_mut() else {
                break;
            };
            for frame in frames {
                tracing::debug!("→ {:?}", frame);
                if let Err(e) = transport.send(frame).await {
                    tracing::warn!("Failed to send frame: {}", e);
                    self.send_failed = true;
                    break;
                }
            }
        }
    }

    async fn establish(&mut self) {
        if let Some(mut stale) = self.transport.take() {
            tracing::warn!("Retiring a transport still held before reconnecting");
            stale.close().await;
            self.outbox.clear();
            self.subscriptions.on_connection_lost();
            for call in self.calls.drain_sent() {
                self.complete(call.tag, Err(RpcError::ConnectionLost));
            }
        }
        let endpoint = self.connection.endpoint().to_string();
        tracing::info!(
            "Connecting to {} (retry {})",
            endpoint,
            self.connection.retry_count()
        );
        let attempt =
            tokio::time::timeout(self.config.connect_timeout, self.connector.connect(&endpoint))
                .await;
        match attempt {
            Ok(Ok(mut transport)) => match transport.send(ClientFrame::connect()).await {
                Ok(()) => self.transport = Some(transport),
                Err(e) => {
                    tracing::warn!("Handshake failed: {}", e);
                    self.on_transport_lost();
                }
            },
            Ok(Err(e)) => {
                tracing::warn!("Connection attempt failed: {}", e);
                self.on_transport_lost();
            }
            Err(_) => {
                tracing::warn!("Connection attempt timed out");
                self.on_transport_lost();
            }
        }
    }

    fn publish_status(&mut self) {
        let status = self.connection.status();
        self.dispatcher
            .dispatch(ChatEvent::ConnectionStateChanged(status));
        self.status_tx.send_replace(status);
    }

    // ========================================
    // Commands
    // ========================================

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Open(credentials) => self.open(credentials).await,
            Command::Reconnect => self.manual_reconnect().await,
            Command::SetLiveness(online) => self.set_liveness(online),
            Command::SetLivenessSource(source) => self.liveness = Some(source),
            Command::Call {
                method,
                params,
                reply,
            } => self.issue(MethodCall::Raw { method, params }, CallTag::External(reply)),
            Command::Subscribe(key) => {
                if let Some(frame) = self.subscriptions.subscribe(key) {
                    self.send(frame);
                }
            }
            Command::Unsubscribe(key) => {
                if let Some(frame) = self.subscriptions.unsubscribe(&key) {
                    self.send(frame);
                }
            }
            Command::OpenRoomView(room_id) => self.open_room_view(room_id),
            Command::CloseRoomView(room_id) => self.close_room_view(&room_id),
            Command::RequestHistoryPage(room_id) => {
                self.with_open_view(&room_id, |view| view.request_page())
            }
            Command::RequestHighlight {
                room_id,
                message_id,
            } => self.with_open_view(&room_id, |view| view.request_highlight(message_id)),
            Command::ReportScroll { room_id, metrics } => {
                self.with_open_view(&room_id, |view| view.on_scroll(metrics))
            }
            Command::LayoutSettled { room_id, height } => {
                self.with_open_view(&room_id, |view| view.on_layout_settled(height))
            }
            Command::JumpToLatest(room_id) => {
                self.with_open_view(&room_id, |view| view.jump_to_latest())
            }
            Command::SendMessage {
                room_id,
                body,
                attachments,
                reply,
            } => self.send_message(room_id, body, attachments, reply),
            Command::Shutdown => {}
        }
    }

    async fn open(&mut self, credentials: Option<Credentials>) {
        let Some(credentials) = credentials else {
            tracing::info!("No credentials available; not connecting");
            self.end_session();
            self.forget_user_topics();
            if self.connection.set_credentials(None).is_some() {
                self.publish_status();
            }
            return;
        };
        if self.connection.credentials() != Some(&credentials) {
            if self.connection.has_session() {
                tracing::info!("Credentials changed; restarting the session");
                self.end_session();
                if self.connection.end_session().is_some() {
                    self.publish_status();
                }
            }
            if self
                .connection
                .credentials()
                .is_some_and(|current| current.user_id != credentials.user_id)
            {
                self.forget_user_topics();
                self.bootstrap = BootstrapOrchestrator::new();
            }
        } else if self.connection.has_session() {
            tracing::warn!("Open ignored while {:?}", self.connection.state());
            return;
        }
        let user_id = credentials.user_id.clone();
        self.connection.set_credentials(Some(credentials));
        for topic in [
            Topic::UserRooms(user_id.clone()),
            Topic::UserSubscriptions(user_id),
        ] {
            if let Some(frame) = self.subscriptions.subscribe(topic.key()) {
                self.send(frame);
            }
        }
        if self.connection.begin_connect().is_none() {
            return;
        }
        self.reconnect_timer = None;
        self.publish_status();
        if self.config.use_cache && self.bootstrap.begin_cache() {
            self.issue(
                MethodCall::CachedRoomList,
                CallTag::Internal(InternalCall::RoomList(RoomListSource::Cached)),
            );
        }
        self.establish().await;
    }

    async fn manual_reconnect(&mut self) {
        self.reconnect_timer = None;
        if !self.connection.manual_reconnect() {
            tracing::debug!(
                "Manual reconnect ignored while {:?}",
                self.connection.state()
            );
            return;
        }
        if self.connection.begin_connect().is_some() {
            self.publish_status();
            self.establish().await;
        }
    }

    fn set_liveness(&mut self, online: bool) {
        self.online = online;
        if self.connection.is_logged_in() {
            self.issue(
                MethodCall::Presence { online },
                CallTag::Internal(InternalCall::Presence(online)),
            );
        }
    }

    fn send_message(
        &mut self,
        room_id: RoomId,
        body: String,
        attachments: Vec<Attachment>,
        reply: Reply<Message>,
    ) {
        let Some(credentials) = self.connection.credentials() else {
            let _ = reply.send(Err(RpcError::NotConnected));
            return;
        };
        let sender = Sender {
            id: credentials.user_id.clone(),
            username: credentials.user_id.to_string(),
            name: credentials.user_id.to_string(),
        };
        let Ok(id) = MessageId::new(Uuid::new_v4().to_string()) else {
            let _ = reply.send(Err(RpcError::NotConnected));
            return;
        };
        let echo = Message {
            id,
            room_id: room_id.clone(),
            timestamp: Timestamp::new(self.clock.now_millis()),
            sender,
            body,
            attachments,
            error: false,
        };
        if !echo.attachments.is_empty() {
            self.dispatcher.dispatch(ChatEvent::UploadProgress {
                room_id: room_id.clone(),
                percent: 0,
            });
        }
        self.update_view(&room_id, |view| view.clear_highlight());
        self.issue(
            MethodCall::SendMessage(OutgoingMessageDto::from(&echo)),
            CallTag::Send { echo, reply },
        );
    }

    // ========================================
    // Calls
    // ========================================

    fn issue(&mut self, call: MethodCall, tag: CallTag) {
        let state = self.connection.state();
        let sendable = self.connection.is_logged_in()
            || (call.is_login() && state == ConnectionState::Open);
        if !sendable && !self.connection.is_establishing() {
            tracing::debug!("Rejecting {} while {:?}", call.name(), state);
            self.complete(tag, Err(RpcError::NotConnected));
            return;
        }
        let id = self.calls.issue(call.name(), call.params(), tag);
        if sendable {
            if let Some(frame) = self.calls.send_now(id) {
                self.send(frame);
            }
        } else {
            tracing::debug!("Queued {} (call {}) until login", call.name(), id);
        }
    }

    fn fail_outstanding(&mut self, error: RpcError) {
        let outstanding = self.calls.drain();
        if !outstanding.is_empty() {
            tracing::warn!("Failing {} outstanding calls: {}", outstanding.len(), error);
        }
        for call in outstanding {
            self.complete(call.tag, Err(error.clone()));
        }
    }

    fn complete(&mut self, tag: CallTag, outcome: Result<Value, RpcError>) {
        match tag {
            CallTag::External(reply) => {
                if reply.send(outcome).is_err() {
                    tracing::debug!("Caller went away before its result arrived");
                }
            }
            CallTag::Send { echo, reply } => self.complete_send(echo, reply, outcome),
            CallTag::Internal(call) => self.complete_internal(call, outcome),
        }
    }

    fn complete_send(&mut self, echo: Message, reply: Reply<Message>, outcome: Result<Value, RpcError>) {
        let room_id = echo.room_id.clone();
        match outcome {
            Ok(value) => {
                let confirmed = method::decode_sent_message(value).unwrap_or_else(|e| {
                    tracing::debug!("Keeping local echo; send result not a message: {}", e);
                    echo.clone()
                });
                if !echo.attachments.is_empty() {
                    self.dispatcher.dispatch(ChatEvent::UploadProgress {
                        room_id: room_id.clone(),
                        percent: 100,
                    });
                }
                self.update_view(&room_id, |view| view.on_live_messages(vec![confirmed.clone()]));
                let _ = reply.send(Ok(confirmed));
            }
            Err(error) => {
                let mut failed = echo;
                failed.error = true;
                self.dispatcher.dispatch(ChatEvent::SendFailed {
                    message: failed.clone(),
                    error: error.clone(),
                });
                self.update_view(&room_id, |view| view.on_live_messages(vec![failed]));
                let _ = reply.send(Err(error));
            }
        }
    }

    fn complete_internal(&mut self, call: InternalCall, outcome: Result<Value, RpcError>) {
        match call {
            InternalCall::Login => match outcome {
                Ok(_) => self.on_logged_in(),
                Err(error) => {
                    tracing::warn!("Login rejected: {}", error);
                    self.on_login_rejected();
                }
            },
            InternalCall::RoomList(source) => {
                match outcome.and_then(|v| method::decode_room_list(v).map_err(RpcError::from)) {
                    Ok(rooms) => self.on_room_list(source, rooms),
                    Err(e) => tracing::warn!("Failed to load {:?} room list: {}", source, e),
                }
            }
            InternalCall::Unreads => {
                match outcome.and_then(|v| method::decode_unreads(v).map_err(RpcError::from)) {
                    Ok(unreads) => self.dispatcher.dispatch(ChatEvent::UnreadsLoaded(unreads)),
                    Err(e) => tracing::warn!("Failed to load unread counts: {}", e),
                }
            }
            InternalCall::Settings => {
                match outcome.and_then(|v| method::decode_settings(v).map_err(RpcError::from)) {
                    Ok(settings) => self.dispatcher.dispatch(ChatEvent::SettingsLoaded(settings)),
                    Err(e) => tracing::warn!("Failed to load settings: {}", e),
                }
            }
            InternalCall::History { room_id, limit } => {
                match outcome.and_then(|v| method::decode_history(v).map_err(RpcError::from)) {
                    Ok(messages) => {
                        self.dispatcher.dispatch(ChatEvent::HistoryLoaded {
                            room_id: room_id.clone(),
                            messages: messages.clone(),
                        });
                        self.update_view(&room_id, |view| view.on_history_page(messages, limit));
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load history for {}: {}", room_id, e);
                        if let Some(slot) = self.views.get_mut(&room_id) {
                            slot.view.on_history_failed();
                        }
                    }
                }
            }
            InternalCall::RoomInfo(mut room) => {
                room.custom_fields = outcome
                    .and_then(|v| method::decode_room_info(v).map_err(RpcError::from))
                    .unwrap_or_else(|e| {
                        tracing::warn!("Room info for {} unavailable: {}", room.id, e);
                        CustomFields::default()
                    });
                self.dispatcher.dispatch(ChatEvent::RoomAdded(room));
            }
            InternalCall::MarkRead(room_id) => {
                if let Err(e) = outcome {
                    tracing::warn!("Failed to mark {} read: {}", room_id, e);
                }
            }
            InternalCall::Presence(online) => {
                if let Err(e) = outcome {
                    tracing::debug!("Presence update (online={}) failed: {}", online, e);
                }
            }
        }
    }

    // ========================================
    // Connection lifecycle
    // ========================================

    fn on_transport_lost(&mut self) {
        self.transport = None;
        self.outbox.clear();
        self.subscriptions.on_connection_lost();
        let scheduled = self.connection.transport_lost();
        if scheduled.is_some() {
            self.publish_status();
        }
        self.fail_outstanding(RpcError::ConnectionLost);
        if let Some((_, delay)) = scheduled {
            tracing::info!(
                "Reconnecting in {:?} (retry {})",
                delay,
                self.connection.retry_count()
            );
            let id = self.timer_ids.next_id();
            self.reconnect_timer = Some(ScopedTimer::once(
                id,
                delay,
                self.timer_tx.clone(),
                TimerKind::Reconnect,
            ));
        }
    }

    /// Retire the transport of a session the consumer ended. Outstanding
    /// calls fail and no retry is scheduled.
    fn end_session(&mut self) {
        self.reconnect_timer = None;
        if let Some(transport) = self.transport.take() {
            self.retired = Some(transport);
        }
        self.outbox.clear();
        self.subscriptions.on_connection_lost();
        self.fail_outstanding(RpcError::ConnectionLost);
    }

    fn forget_user_topics(&mut self) {
        let Some(user_id) = self.connection.credentials().map(|c| c.user_id.clone()) else {
            return;
        };
        for topic in [
            Topic::UserRooms(user_id.clone()),
            Topic::UserSubscriptions(user_id),
        ] {
            if let Some(frame) = self.subscriptions.unsubscribe(&topic.key()) {
                self.send(frame);
            }
        }
    }

    fn on_login_rejected(&mut self) {
        if self.connection.login_rejected().is_some() {
            self.publish_status();
        }
        self.retired = self.transport.take();
        self.outbox.clear();
        self.subscriptions.on_connection_lost();
        self.fail_outstanding(RpcError::NotConnected);
    }

    fn on_logged_in(&mut self) {
        if self.connection.login_succeeded().is_none() {
            return;
        }
        self.publish_status();

        for frame in self.subscriptions.on_logged_in() {
            self.send(frame);
        }
        for frame in self.calls.take_unsent() {
            self.send(frame);
        }

        let fresh_in_flight = self.calls.any(|tag| {
            matches!(
                tag,
                CallTag::Internal(InternalCall::RoomList(RoomListSource::Fresh))
            )
        });
        if !fresh_in_flight {
            self.bootstrap.begin_fresh();
            self.issue(
                MethodCall::RoomList,
                CallTag::Internal(InternalCall::RoomList(RoomListSource::Fresh)),
            );
        }
        self.issue(MethodCall::Unreads, CallTag::Internal(InternalCall::Unreads));
        self.issue(
            MethodCall::PublicSettings,
            CallTag::Internal(InternalCall::Settings),
        );
        let online = self.online;
        self.issue(
            MethodCall::Presence { online },
            CallTag::Internal(InternalCall::Presence(online)),
        );

        let starving: Vec<RoomId> = self
            .views
            .iter()
            .filter(|(_, slot)| slot.view.needs_initial_page())
            .map(|(room_id, _)| room_id.clone())
            .collect();
        for room_id in starving {
            self.update_view(&room_id, |view| view.request_page());
        }
    }

    fn on_room_list(&mut self, source: RoomListSource, mut rooms: Vec<RoomSummary>) {
        if !self.bootstrap.accept(source) {
            return;
        }
        if let Some(focused) = self.focused.clone()
            && let Some(room) = rooms.iter_mut().find(|room| room.id == focused)
        {
            if room.unread != 0 {
                room.unread = 0;
                self.issue(
                    MethodCall::MarkRead(focused.clone()),
                    CallTag::Internal(InternalCall::MarkRead(focused.clone())),
                );
            }
            if self.connection.is_logged_in() && room.messages_count > 0 {
                self.update_view(&focused, |view| {
                    if view.needs_initial_page() {
                        view.request_page()
                    } else {
                        Vec::new()
                    }
                });
                if let Some(frame) = self
                    .subscriptions
                    .subscribe(Topic::RoomMessages(focused).key())
                {
                    self.send(frame);
                }
            }
        }
        self.dispatcher
            .dispatch(ChatEvent::RoomListLoaded { rooms, source });
    }

    // ========================================
    // Incoming frames
    // ========================================

    fn handle_incoming(&mut self, frame: Option<Result<ServerFrame, TransportError>>) {
        match frame {
            None => {
                tracing::info!("Server closed the connection");
                self.on_transport_lost();
            }
            Some(Err(TransportError::Frame(e))) => {
                tracing::warn!("Dropping undecodable frame: {}", e);
            }
            Some(Err(e)) => {
                tracing::warn!("Connection lost: {}", e);
                self.on_transport_lost();
            }
            Some(Ok(frame)) => self.handle_frame(frame),
        }
    }

    fn handle_frame(&mut self, frame: ServerFrame) {
        tracing::debug!("← {:?}", frame);
        match frame {
            ServerFrame::Connected { session } => {
                if self.connection.transport_opened().is_none() {
                    return;
                }
                tracing::info!("Session {} established", session);
                self.publish_status();
                let Some(token) = self.connection.credentials().map(|c| c.token.clone()) else {
                    return;
                };
                self.issue(
                    MethodCall::Login { token },
                    CallTag::Internal(InternalCall::Login),
                );
            }
            ServerFrame::Failed { version } => {
                tracing::error!(
                    "Server refused protocol version (suggested {:?})",
                    version
                );
                self.on_transport_lost();
            }
            ServerFrame::Ping { id } => self.send(ClientFrame::Pong { id }),
            ServerFrame::Pong { .. } | ServerFrame::Updated { .. } => {}
            ServerFrame::Ready { subs } => {
                tracing::debug!("Subscriptions ready: {:?}", subs);
            }
            ServerFrame::Nosub { id, error } => {
                if let Some(key) = self.subscriptions.on_nosub(&id) {
                    tracing::warn!("Subscription {:?} ended by server: {:?}", key, error);
                }
            }
            ServerFrame::Result { id, result, error } => {
                let Some(call) = CallId::parse(&id).and_then(|id| self.calls.complete(id)) else {
                    tracing::debug!("Dropping result for unknown call {}", id);
                    return;
                };
                self.complete(call.tag, call_outcome(result, error));
            }
            push @ (ServerFrame::Added { .. }
            | ServerFrame::Changed { .. }
            | ServerFrame::Removed { .. }) => self.handle_push(push),
        }
    }

    fn handle_push(&mut self, frame: ServerFrame) {
        let push = match push_from_frame(frame) {
            Some(Ok(push)) => push,
            Some(Err(e)) => {
                tracing::warn!("Dropping malformed push: {}", e);
                return;
            }
            None => return,
        };
        if self.subscriptions.route(&push.key).is_none() {
            tracing::debug!("Dropping push for stale subscription {:?}", push.key);
            return;
        }
        let Some(topic) = Topic::from_key(&push.key) else {
            tracing::debug!("No handler for push on {:?}", push.key);
            return;
        };
        match decode_topic_event(&topic, push.args) {
            Ok(event) => self.handle_topic_event(topic, event),
            Err(e) => tracing::warn!("Dropping push on {:?}: {}", push.key, e),
        }
    }

    fn handle_topic_event(&mut self, topic: Topic, event: TopicEvent) {
        match event {
            TopicEvent::Messages(messages) => {
                let Topic::RoomMessages(room_id) = topic else {
                    return;
                };
                if messages.is_empty() {
                    return;
                }
                self.dispatcher.dispatch(ChatEvent::MessagesReceived {
                    room_id: room_id.clone(),
                    messages: messages.clone(),
                });
                self.update_view(&room_id, |view| view.on_live_messages(messages));
            }
            TopicEvent::RoomInserted(room) => {
                if let Some(frame) = self
                    .subscriptions
                    .subscribe(Topic::RoomMessages(room.id.clone()).key())
                {
                    self.send(frame);
                }
                self.issue(
                    MethodCall::RoomInfo(room.id.clone()),
                    CallTag::Internal(InternalCall::RoomInfo(room)),
                );
            }
            TopicEvent::RoomUpdated(room) => {
                if let Some(message) = room.last_message {
                    self.dispatcher.dispatch(ChatEvent::LastMessageUpdated {
                        room_id: room.id,
                        message,
                    });
                }
            }
            TopicEvent::RoomRemoved(room_id) | TopicEvent::SubscriptionRemoved(room_id) => {
                if let Some(frame) = self
                    .subscriptions
                    .unsubscribe(&Topic::RoomMessages(room_id.clone()).key())
                {
                    self.send(frame);
                }
                self.dispatcher.dispatch(ChatEvent::RoomDeleted(room_id));
            }
            TopicEvent::UnreadChanged(UnreadCount { room_id, unread }) => {
                let focused = self.focused.as_ref() == Some(&room_id);
                let unread = if focused && unread != 0 {
                    self.issue(
                        MethodCall::MarkRead(room_id.clone()),
                        CallTag::Internal(InternalCall::MarkRead(room_id.clone())),
                    );
                    0
                } else {
                    unread
                };
                self.dispatcher
                    .dispatch(ChatEvent::UnreadUpdated { room_id, unread });
            }
        }
    }

    // ========================================
    // Room views
    // ========================================

    fn open_room_view(&mut self, room_id: RoomId) {
        tracing::info!("Opening room view {}", room_id);
        self.focused = Some(room_id.clone());
        let view_config = self.config.view_config();
        self.views
            .entry(room_id.clone())
            .or_insert_with(|| ViewSlot::new(RoomView::new(room_id.clone(), view_config)));
        if let Some(frame) = self
            .subscriptions
            .subscribe(Topic::RoomMessages(room_id.clone()).key())
        {
            self.send(frame);
        }
        self.update_view(&room_id, |view| {
            if view.needs_initial_page() {
                view.request_page()
            } else {
                vec![ViewAction::WindowChanged]
            }
        });
    }

    fn close_room_view(&mut self, room_id: &RoomId) {
        if self.views.remove(room_id).is_some() {
            tracing::info!("Closed room view {}", room_id);
        }
        if self.focused.as_ref() == Some(room_id) {
            self.focused = None;
        }
    }

    fn with_open_view(
        &mut self,
        room_id: &RoomId,
        f: impl FnOnce(&mut RoomView) -> Vec<ViewAction>,
    ) {
        if !self.views.contains_key(room_id) {
            tracing::warn!("No open view for room {}", room_id);
            return;
        }
        self.update_view(room_id, f);
    }

    fn update_view(&mut self, room_id: &RoomId, f: impl FnOnce(&mut RoomView) -> Vec<ViewAction>) {
        let Some(slot) = self.views.get_mut(room_id) else {
            return;
        };
        let actions = f(&mut slot.view);
        self.apply_view_actions(room_id, actions);
    }

    fn apply_view_actions(&mut self, room_id: &RoomId, actions: Vec<ViewAction>) {
        for action in actions {
            match action {
                ViewAction::WindowChanged => {
                    let Some(slot) = self.views.get(room_id) else {
                        continue;
                    };
                    let window = slot.view.snapshot();
                    self.dispatcher.dispatch(ChatEvent::WindowChanged {
                        room_id: room_id.clone(),
                        window,
                    });
                }
                ViewAction::Scroll(command) => {
                    self.dispatcher.dispatch(ChatEvent::ScrollCommand {
                        room_id: room_id.clone(),
                        command,
                    });
                }
                ViewAction::LoadOlder { before, limit } => self.issue(
                    MethodCall::LoadHistory {
                        room_id: room_id.clone(),
                        before,
                        limit,
                    },
                    CallTag::Internal(InternalCall::History {
                        room_id: room_id.clone(),
                        limit,
                    }),
                ),
                ViewAction::StartHighlightRetry => {
                    let timer = ScopedTimer::interval(
                        self.timer_ids.next_id(),
                        self.config.highlight_retry_interval,
                        self.timer_tx.clone(),
                        TimerKind::HighlightRetry(room_id.clone()),
                    );
                    if let Some(slot) = self.views.get_mut(room_id) {
                        slot.retry_timer = Some(timer);
                    }
                }
                ViewAction::StopHighlightRetry => {
                    if let Some(slot) = self.views.get_mut(room_id) {
                        slot.retry_timer = None;
                    }
                }
                ViewAction::StartHighlightGrace => {
                    let timer = ScopedTimer::once(
                        self.timer_ids.next_id(),
                        self.config.highlight_grace,
                        self.timer_tx.clone(),
                        TimerKind::HighlightGrace(room_id.clone()),
                    );
                    if let Some(slot) = self.views.get_mut(room_id) {
                        slot.grace_timer = Some(timer);
                    }
                }
            }
        }
    }

    // ========================================
    // Timers
    // ========================================

    async fn handle_timer(&mut self, fired: TimerFired<TimerKind>) {
        match fired.kind {
            TimerKind::Reconnect => {
                if !is_current(&self.reconnect_timer, fired.id) {
                    tracing::debug!("Ignoring stale reconnect timer");
                    return;
                }
                self.reconnect_timer = None;
                if self.connection.begin_connect().is_some() {
                    self.publish_status();
                    self.establish().await;
                }
            }
            TimerKind::HighlightRetry(room_id) => {
                let current = self
                    .views
                    .get(&room_id)
                    .is_some_and(|slot| is_current(&slot.retry_timer, fired.id));
                if current {
                    self.update_view(&room_id, |view| view.on_highlight_tick());
                }
            }
            TimerKind::HighlightGrace(room_id) => {
                let Some(slot) = self.views.get_mut(&room_id) else {
                    return;
                };
                if is_current(&slot.grace_timer, fired.id) {
                    slot.grace_timer = None;
                    slot.view.on_highlight_grace_elapsed();
                }
            }
        }
    }

    async fn shutdown(&mut self) {
        tracing::info!("Client runtime shutting down");
        self.reconnect_timer = None;
        self.views.clear();
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
        if let Some(mut retired) = self.retired.take() {
            retired.close().await;
        }
        self.outbox.clear();
        self.subscriptions.on_connection_lost();
        if self.connection.shutdown().is_some() {
            self.publish_status();
        }
        self.fail_outstanding(RpcError::Shutdown);
    }
}
