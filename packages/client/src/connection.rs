//! Connection state machine and reconnection policy.
//!
//! `ConnectionManager` is the only writer of connection state. It performs no
//! IO: the runtime asks it for a transition and acts on the answer.

use std::time::Duration;

use crate::domain::Credentials;

/// Lifecycle state of the single backend connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection has been requested yet
    Disconnected,
    /// Transport handshake in progress
    Connecting,
    /// Transport is up, authentication not done yet
    Open,
    /// Authenticated; calls and subscriptions flow
    LoggedIn,
    /// Authentication rejected; waits for the consumer
    LoginFail,
    /// Transport dropped; a retry is scheduled
    Closed,
    /// No credentials available, connection intentionally not attempted
    NotApplicable,
}

/// A state change that actually happened (`from != to`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

/// Snapshot of the connection as seen by the consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub retry_count: u32,
    /// Whether a "reconnecting" notice should be shown
    pub reconnecting: bool,
}

/// Exponential backoff with a ceiling, plus the notice threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// The reconnecting notice shows once the retry counter exceeds this
    pub notice_threshold: u32,
}

impl ReconnectPolicy {
    /// Delay before the `step`-th consecutive retry (1-based)
    pub fn delay_for(&self, step: u32) -> Duration {
        let exponent = step.saturating_sub(1).min(16);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            notice_threshold: 1,
        }
    }
}

/// Owns the connection state, the retry counter and the credentials
#[derive(Debug)]
pub struct ConnectionManager {
    endpoint: String,
    state: ConnectionState,
    retry_count: u32,
    backoff_step: u32,
    credentials: Option<Credentials>,
    policy: ReconnectPolicy,
}

impl ConnectionManager {
    pub fn new(endpoint: impl Into<String>, policy: ReconnectPolicy) -> Self {
        Self {
            endpoint: endpoint.into(),
            state: ConnectionState::Disconnected,
            retry_count: 0,
            backoff_step: 0,
            credentials: None,
            policy,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn is_logged_in(&self) -> bool {
        self.state == ConnectionState::LoggedIn
    }

    /// Whether the connection is being established (calls may be queued)
    pub fn is_establishing(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Open
        )
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            state: self.state,
            retry_count: self.retry_count,
            reconnecting: self.state != ConnectionState::LoggedIn
                && self.retry_count > self.policy.notice_threshold,
        }
    }

    fn transition(&mut self, to: ConnectionState) -> Option<StateChange> {
        if self.state == to {
            return None;
        }
        let change = StateChange {
            from: self.state,
            to,
        };
        tracing::info!("Connection state {:?} → {:?}", change.from, change.to);
        self.state = to;
        Some(change)
    }

    /// Store the credentials supplied by the consumer.
    ///
    /// Missing credentials move the connection to `NotApplicable`.
    pub fn set_credentials(&mut self, credentials: Option<Credentials>) -> Option<StateChange> {
        match credentials {
            Some(credentials) => {
                self.credentials = Some(credentials);
                None
            }
            None => {
                self.credentials = None;
                self.transition(ConnectionState::NotApplicable)
            }
        }
    }

    /// Start a connection attempt.
    ///
    /// Returns `None` when no attempt may start: credentials are missing or a
    /// connection is already being established or logged in.
    pub fn begin_connect(&mut self) -> Option<StateChange> {
        if self.credentials.is_none() {
            return None;
        }
        match self.state {
            ConnectionState::Disconnected
            | ConnectionState::Closed
            | ConnectionState::LoginFail
            | ConnectionState::NotApplicable => self.transition(ConnectionState::Connecting),
            ConnectionState::Connecting | ConnectionState::Open | ConnectionState::LoggedIn => {
                None
            }
        }
    }

    /// Transport handshake completed
    pub fn transport_opened(&mut self) -> Option<StateChange> {
        if self.state != ConnectionState::Connecting {
            tracing::warn!("Ignoring transport open while {:?}", self.state);
            return None;
        }
        self.transition(ConnectionState::Open)
    }

    /// Authentication accepted; resets the retry counter and the backoff
    pub fn login_succeeded(&mut self) -> Option<StateChange> {
        if self.state != ConnectionState::Open {
            tracing::warn!("Ignoring login success while {:?}", self.state);
            return None;
        }
        self.retry_count = 0;
        self.backoff_step = 0;
        self.transition(ConnectionState::LoggedIn)
    }

    /// Authentication rejected
    pub fn login_rejected(&mut self) -> Option<StateChange> {
        match self.state {
            ConnectionState::Open | ConnectionState::Connecting => {
                self.transition(ConnectionState::LoginFail)
            }
            _ => None,
        }
    }

    /// Transport dropped (or a connection attempt failed).
    ///
    /// Returns the change and the delay before the automatic retry. `LoginFail`
    /// is sticky: losing its transport schedules nothing.
    pub fn transport_lost(&mut self) -> Option<(StateChange, Duration)> {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Open | ConnectionState::LoggedIn => {
                self.retry_count = self.retry_count.saturating_add(1);
                self.backoff_step = self.backoff_step.saturating_add(1);
                let delay = self.policy.delay_for(self.backoff_step);
                let change = self.transition(ConnectionState::Closed)?;
                Some((change, delay))
            }
            _ => None,
        }
    }

    /// Manual retry requested by the consumer; resets the backoff.
    ///
    /// Returns whether a connection attempt should start now.
    pub fn manual_reconnect(&mut self) -> bool {
        self.backoff_step = 0;
        self.credentials.is_some()
            && matches!(
                self.state,
                ConnectionState::Disconnected
                    | ConnectionState::Closed
                    | ConnectionState::LoginFail
            )
    }

    /// Session ended by the consumer (credentials removed or replaced).
    ///
    /// Unlike a transport loss this schedules no retry and starts the retry
    /// counter over.
    pub fn end_session(&mut self) -> Option<StateChange> {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Open | ConnectionState::LoggedIn => {
                self.retry_count = 0;
                self.backoff_step = 0;
                self.transition(ConnectionState::Closed)
            }
            _ => None,
        }
    }

    /// Whether a transport is connecting, open or logged in
    pub fn has_session(&self) -> bool {
        self.is_establishing() || self.is_logged_in()
    }

    /// Tear down for good
    pub fn shutdown(&mut self) -> Option<StateChange> {
        self.transition(ConnectionState::Disconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ConnectionManager {
        ConnectionManager::new("ws://test/websocket", ReconnectPolicy::default())
    }

    fn credentials() -> Option<Credentials> {
        Credentials::from_parts("u1", "token")
    }

    fn logged_in_manager() -> ConnectionManager {
        let mut manager = manager();
        manager.set_credentials(credentials());
        manager.begin_connect();
        manager.transport_opened();
        manager.login_succeeded();
        manager
    }

    #[test]
    fn test_missing_credentials_is_not_applicable() {
        // テスト項目: 認証情報がない場合、NotApplicable に遷移し接続しない
        // given (前提条件):
        let mut manager = manager();

        // when (操作):
        let change = manager.set_credentials(None);
        let connect = manager.begin_connect();

        // then (期待する結果):
        assert_eq!(
            change,
            Some(StateChange {
                from: ConnectionState::Disconnected,
                to: ConnectionState::NotApplicable,
            })
        );
        assert!(connect.is_none());
        assert_eq!(manager.state(), ConnectionState::NotApplicable);
    }

    #[test]
    fn test_happy_path_reaches_logged_in() {
        // テスト項目: 接続、オープン、ログインの順に遷移する
        // given (前提条件):
        let mut manager = manager();
        manager.set_credentials(credentials());

        // when (操作):
        let steps = [
            manager.begin_connect(),
            manager.transport_opened(),
            manager.login_succeeded(),
        ];

        // then (期待する結果):
        let targets: Vec<ConnectionState> = steps.iter().map(|c| c.unwrap().to).collect();
        assert_eq!(
            targets,
            vec![
                ConnectionState::Connecting,
                ConnectionState::Open,
                ConnectionState::LoggedIn,
            ]
        );
        assert!(!manager.status().reconnecting);
    }

    #[test]
    fn test_reentering_same_state_reports_no_change() {
        // テスト項目: 同じ状態への再遷移は変更として報告されない
        // given (前提条件):
        let mut manager = manager();
        manager.set_credentials(credentials());
        manager.begin_connect();

        // when (操作):
        let again = manager.begin_connect();

        // then (期待する結果):
        assert!(again.is_none());
        assert_eq!(manager.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_transport_lost_increments_retry_and_backs_off() {
        // テスト項目: 切断のたびにリトライ回数が増え、待機時間が倍になる
        // given (前提条件):
        let mut manager = logged_in_manager();

        // when (操作):
        let (first, first_delay) = manager.transport_lost().unwrap();
        manager.begin_connect();
        let (_, second_delay) = manager.transport_lost().unwrap();

        // then (期待する結果):
        assert_eq!(first.to, ConnectionState::Closed);
        assert_eq!(manager.retry_count(), 2);
        assert_eq!(first_delay, Duration::from_secs(1));
        assert_eq!(second_delay, Duration::from_secs(2));
    }

    #[test]
    fn test_reconnecting_notice_only_after_threshold() {
        // テスト項目: リトライ回数がしきい値を超えてから再接続中表示になる
        // given (前提条件):
        let mut manager = logged_in_manager();

        // when (操作):
        manager.transport_lost();
        let after_one = manager.status();
        manager.begin_connect();
        manager.transport_lost();
        let after_two = manager.status();

        // then (期待する結果):
        assert!(!after_one.reconnecting);
        assert!(after_two.reconnecting);
    }

    #[test]
    fn test_login_success_resets_retry_counter() {
        // テスト項目: ログイン成功でリトライ回数がリセットされる
        // given (前提条件):
        let mut manager = logged_in_manager();
        manager.transport_lost();
        manager.begin_connect();
        manager.transport_lost();

        // when (操作):
        manager.begin_connect();
        manager.transport_opened();
        manager.login_succeeded();

        // then (期待する結果):
        assert_eq!(manager.retry_count(), 0);
        let (_, delay) = manager.transport_lost().unwrap();
        assert_eq!(delay, Duration::from_secs(1));
    }

    #[test]
    fn test_login_fail_is_sticky_on_transport_loss() {
        // テスト項目: LoginFail 中のトランスポート切断では自動リトライしない
        // given (前提条件):
        let mut manager = manager();
        manager.set_credentials(credentials());
        manager.begin_connect();
        manager.transport_opened();
        manager.login_rejected();

        // when (操作):
        let lost = manager.transport_lost();

        // then (期待する結果):
        assert!(lost.is_none());
        assert_eq!(manager.state(), ConnectionState::LoginFail);
        assert!(manager.manual_reconnect());
    }

    #[test]
    fn test_manual_reconnect_resets_backoff() {
        // テスト項目: 手動再接続でバックオフがリセットされる
        // given (前提条件):
        let mut manager = logged_in_manager();
        manager.transport_lost();
        manager.begin_connect();
        manager.transport_lost();

        // when (操作):
        let should_connect = manager.manual_reconnect();
        manager.begin_connect();
        let (_, delay) = manager.transport_lost().unwrap();

        // then (期待する結果):
        assert!(should_connect);
        assert_eq!(delay, Duration::from_secs(1));
    }

    #[test]
    fn test_manual_reconnect_while_logged_in_is_noop() {
        // テスト項目: ログイン済みの場合、手動再接続は何もしない
        // given (前提条件):
        let mut manager = logged_in_manager();

        // when (操作):
        let should_connect = manager.manual_reconnect();

        // then (期待する結果):
        assert!(!should_connect);
    }

    #[test]
    fn test_end_session_closes_without_retry() {
        // テスト項目: 利用者によるセッション終了は再接続を予約せず、再試行回数もリセットされる
        // given (前提条件):
        let mut manager = logged_in_manager();
        manager.transport_lost();
        manager.begin_connect();

        // when (操作):
        let change = manager.end_session();

        // then (期待する結果):
        assert_eq!(change.unwrap().to, ConnectionState::Closed);
        assert_eq!(manager.retry_count(), 0);
        assert!(!manager.has_session());
        assert!(manager.transport_lost().is_none());
        assert!(manager.end_session().is_none());
    }

    #[test]
    fn test_backoff_is_capped() {
        // テスト項目: 待機時間は上限を超えない
        // given (前提条件):
        let policy = ReconnectPolicy::default();

        // when (操作):
        let delay = policy.delay_for(40);

        // then (期待する結果):
        assert_eq!(delay, Duration::from_secs(30));
    }
}
