//! Consumer-facing handle to the client runtime.

use std::sync::Arc;

use kaiwa_shared::time::{Clock, SystemClock};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};

use crate::config::ClientConfig;
use crate::connection::{ConnectionState, ConnectionStatus};
use crate::domain::{
    Attachment, Credentials, CustomFields, Message, MessageId, RoomId, RoomSummary, Setting,
    Timestamp, UnreadCount,
};
use crate::error::{ClientError, RpcError};
use crate::event::{Dispatcher, EventHandler};
use crate::history::ScrollMetrics;
use crate::infrastructure::transport::{Connector, WebSocketConnector};
use crate::liveness::LivenessSource;
use crate::method::{self, MethodCall};
use crate::runtime::{Command, Reply, Runtime};
use crate::subscription::SubscriptionKey;

/// Cloneable handle; the runtime stops once every handle is dropped or
/// `shutdown` is called.
#[derive(Clone)]
pub struct ChatClient {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
}

impl ChatClient {
    /// Spawn a runtime talking to `config.endpoint` over a websocket
    pub fn connect_websocket(config: ClientConfig, handler: Arc<dyn EventHandler>) -> Self {
        Self::spawn(config, Arc::new(WebSocketConnector), handler)
    }

    /// Spawn a runtime on the current tokio runtime
    pub fn spawn(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        Self::spawn_with_clock(config, connector, handler, Arc::new(SystemClock))
    }

    pub fn spawn_with_clock(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        handler: Arc<dyn EventHandler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus {
            state: ConnectionState::Disconnected,
            retry_count: 0,
            reconnecting: false,
        });
        let runtime = Runtime::new(
            config,
            connector,
            clock,
            Dispatcher::new(handler),
            commands_rx,
            status_tx,
        );
        tokio::spawn(runtime.run());
        Self {
            commands: commands_tx,
            status: status_rx,
        }
    }

    fn command(&self, command: Command) -> Result<(), ClientError> {
        self.commands
            .send(command)
            .map_err(|_| ClientError::RuntimeGone)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.command(make(tx))?;
        let outcome = rx.await.map_err(|_| ClientError::RuntimeGone)?;
        Ok(outcome?)
    }

    // ========================================
    // Connection
    // ========================================

    /// Start connecting with the given credentials; `None` means no
    /// credentials are available and the connection is not attempted
    pub fn open(&self, credentials: Option<Credentials>) -> Result<(), ClientError> {
        self.command(Command::Open(credentials))
    }

    /// Retry now, cancelling any scheduled retry and resetting the backoff
    pub fn reconnect(&self) -> Result<(), ClientError> {
        self.command(Command::Reconnect)
    }

    /// Propagated to the backend as online/away presence
    pub fn set_liveness(&self, online: bool) -> Result<(), ClientError> {
        self.command(Command::SetLiveness(online))
    }

    pub fn set_liveness_source(
        &self,
        source: impl LivenessSource + 'static,
    ) -> Result<(), ClientError> {
        self.command(Command::SetLivenessSource(Box::new(source)))
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Wait until the connection reaches `state`
    pub async fn wait_for_state(
        &self,
        state: ConnectionState,
    ) -> Result<ConnectionStatus, ClientError> {
        let mut status = self.status.clone();
        let reached = status
            .wait_for(|status| status.state == state)
            .await
            .map_err(|_| ClientError::RuntimeGone)?;
        Ok(*reached)
    }

    pub fn shutdown(&self) -> Result<(), ClientError> {
        self.command(Command::Shutdown)
    }

    // ========================================
    // RPC and subscriptions
    // ========================================

    /// Generic method call
    pub async fn call(
        &self,
        method: impl Into<String>,
        params: Vec<Value>,
    ) -> Result<Value, ClientError> {
        let method = method.into();
        self.request(|reply| Command::Call {
            method,
            params,
            reply,
        })
        .await
    }

    async fn call_method(&self, call: MethodCall) -> Result<Value, ClientError> {
        self.call(call.name().to_string(), call.params()).await
    }

    pub fn subscribe(&self, key: SubscriptionKey) -> Result<(), ClientError> {
        self.command(Command::Subscribe(key))
    }

    pub fn unsubscribe(&self, key: SubscriptionKey) -> Result<(), ClientError> {
        self.command(Command::Unsubscribe(key))
    }

    pub async fn fetch_rooms(&self) -> Result<Vec<RoomSummary>, ClientError> {
        let result = self.call_method(MethodCall::RoomList).await?;
        Ok(method::decode_room_list(result).map_err(RpcError::from)?)
    }

    pub async fn fetch_cached_rooms(&self) -> Result<Vec<RoomSummary>, ClientError> {
        let result = self.call_method(MethodCall::CachedRoomList).await?;
        Ok(method::decode_room_list(result).map_err(RpcError::from)?)
    }

    pub async fn fetch_unreads(&self) -> Result<Vec<UnreadCount>, ClientError> {
        let result = self.call_method(MethodCall::Unreads).await?;
        Ok(method::decode_unreads(result).map_err(RpcError::from)?)
    }

    /// One page of history older than `before`, oldest first
    pub async fn fetch_history(
        &self,
        room_id: &RoomId,
        before: Option<Timestamp>,
        limit: usize,
    ) -> Result<Vec<Message>, ClientError> {
        let result = self
            .call_method(MethodCall::LoadHistory {
                room_id: room_id.clone(),
                before,
                limit,
            })
            .await?;
        Ok(method::decode_history(result).map_err(RpcError::from)?)
    }

    pub async fn mark_read(&self, room_id: &RoomId) -> Result<(), ClientError> {
        self.call_method(MethodCall::MarkRead(room_id.clone()))
            .await
            .map(|_| ())
    }

    pub async fn fetch_room_info(&self, room_id: &RoomId) -> Result<CustomFields, ClientError> {
        let result = self
            .call_method(MethodCall::RoomInfo(room_id.clone()))
            .await?;
        Ok(method::decode_room_info(result).map_err(RpcError::from)?)
    }

    pub async fn fetch_settings(&self) -> Result<Vec<Setting>, ClientError> {
        let result = self.call_method(MethodCall::PublicSettings).await?;
        Ok(method::decode_settings(result).map_err(RpcError::from)?)
    }

    /// Optimistic send: the local echo is flagged errored on failure
    pub async fn send_message(
        &self,
        room_id: &RoomId,
        body: impl Into<String>,
        attachments: Vec<Attachment>,
    ) -> Result<Message, ClientError> {
        let room_id = room_id.clone();
        let body = body.into();
        self.request(|reply| Command::SendMessage {
            room_id,
            body,
            attachments,
            reply,
        })
        .await
    }

    // ========================================
    // Room views
    // ========================================

    /// Open (and focus) a room view; its first history page is requested
    pub fn open_room_view(&self, room_id: &RoomId) -> Result<(), ClientError> {
        self.command(Command::OpenRoomView(room_id.clone()))
    }

    pub fn close_room_view(&self, room_id: &RoomId) -> Result<(), ClientError> {
        self.command(Command::CloseRoomView(room_id.clone()))
    }

    pub fn request_history_page(&self, room_id: &RoomId) -> Result<(), ClientError> {
        self.command(Command::RequestHistoryPage(room_id.clone()))
    }

    pub fn request_highlight(
        &self,
        room_id: &RoomId,
        message_id: &MessageId,
    ) -> Result<(), ClientError> {
        self.command(Command::RequestHighlight {
            room_id: room_id.clone(),
            message_id: message_id.clone(),
        })
    }

    pub fn report_scroll(&self, room_id: &RoomId, metrics: ScrollMetrics) -> Result<(), ClientError> {
        self.command(Command::ReportScroll {
            room_id: room_id.clone(),
            metrics,
        })
    }

    /// Layout reflects the last window change; `height` is the new scroll height
    pub fn layout_settled(&self, room_id: &RoomId, height: f64) -> Result<(), ClientError> {
        self.command(Command::LayoutSettled {
            room_id: room_id.clone(),
            height,
        })
    }

    pub fn jump_to_latest(&self, room_id: &RoomId) -> Result<(), ClientError> {
        self.command(Command::JumpToLatest(room_id.clone()))
    }
}
