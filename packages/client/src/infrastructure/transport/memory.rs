//! In-process transport: the test (or a simulator) plays the backend.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Connector, Transport};
use crate::error::TransportError;
use crate::infrastructure::dto::websocket::{ClientFrame, ServerFrame};

/// Connector whose connections surface on the paired [`MemoryBackend`]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<BackendConnection>,
    accepting: Arc<AtomicBool>,
}

/// Backend side: yields one [`BackendConnection`] per connect attempt
pub struct MemoryBackend {
    accept_rx: mpsc::UnboundedReceiver<BackendConnection>,
    accepting: Arc<AtomicBool>,
}

impl MemoryConnector {
    /// Create a connector and the backend end that accepts its connections
    pub fn pair() -> (Self, MemoryBackend) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let accepting = Arc::new(AtomicBool::new(true));
        (
            Self {
                accept_tx,
                accepting: accepting.clone(),
            },
            MemoryBackend {
                accept_rx,
                accepting,
            },
        )
    }
}

impl MemoryBackend {
    /// Wait for the next client connection
    pub async fn accept(&mut self) -> Option<BackendConnection> {
        self.accept_rx.recv().await
    }

    /// Like [`accept`](Self::accept) but gives up after `timeout`
    pub async fn accept_timeout(&mut self, timeout: Duration) -> Option<BackendConnection> {
        tokio::time::timeout(timeout, self.accept_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Refuse (or accept again) future connection attempts
    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Transport>, TransportError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(TransportError::Connect(format!(
                "{} refused the connection",
                endpoint
            )));
        }
        let (to_backend, from_client) = mpsc::unbounded_channel();
        let (to_client, from_backend) = mpsc::unbounded_channel();
        self.accept_tx
            .send(BackendConnection {
                from_client,
                to_client,
            })
            .map_err(|_| TransportError::Connect("backend is gone".to_string()))?;
        Ok(Box::new(MemoryTransport {
            outgoing: to_backend,
            incoming: from_backend,
        }))
    }
}

/// Backend end of one in-memory connection; dropping it drops the connection
pub struct BackendConnection {
    from_client: mpsc::UnboundedReceiver<ClientFrame>,
    to_client: mpsc::UnboundedSender<ServerFrame>,
}

impl BackendConnection {
    /// Next frame sent by the client, `None` once the client closed
    pub async fn recv(&mut self) -> Option<ClientFrame> {
        self.from_client.recv().await
    }

    /// Like [`recv`](Self::recv) but gives up after `timeout`
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<ClientFrame> {
        tokio::time::timeout(timeout, self.from_client.recv())
            .await
            .ok()
            .flatten()
    }

    /// Push a frame to the client; returns `false` if the client is gone
    pub fn send(&self, frame: ServerFrame) -> bool {
        self.to_client.send(frame).is_ok()
    }
}

struct MemoryTransport {
    outgoing: mpsc::UnboundedSender<ClientFrame>,
    incoming: mpsc::UnboundedReceiver<ServerFrame>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, frame: ClientFrame) -> Result<(), TransportError> {
        self.outgoing
            .send(frame)
            .map_err(|_| TransportError::Send("backend closed the connection".to_string()))
    }

    async fn recv(&mut self) -> Option<Result<ServerFrame, TransportError>> {
        self.incoming.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.incoming.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        // テスト項目: クライアントとバックエンドの間でフレームが双方向に流れる
        // given (前提条件):
        let (connector, mut backend) = MemoryConnector::pair();
        let mut transport = connector.connect("memory://test").await.unwrap();
        let mut connection = backend.accept().await.unwrap();

        // when (操作):
        transport.send(ClientFrame::connect()).await.unwrap();
        connection.send(ServerFrame::Connected {
            session: "s1".to_string(),
        });

        // then (期待する結果):
        assert_eq!(connection.recv().await, Some(ClientFrame::connect()));
        assert!(matches!(
            transport.recv().await,
            Some(Ok(ServerFrame::Connected { .. }))
        ));
    }

    #[tokio::test]
    async fn test_dropping_backend_connection_closes_transport() {
        // テスト項目: バックエンド側を破棄するとクライアントの受信が終了する
        // given (前提条件):
        let (connector, mut backend) = MemoryConnector::pair();
        let mut transport = connector.connect("memory://test").await.unwrap();
        let connection = backend.accept().await.unwrap();

        // when (操作):
        drop(connection);

        // then (期待する結果):
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_refused_connection() {
        // テスト項目: 接続を拒否する設定の場合、接続エラーになる
        // given (前提条件):
        let (connector, backend) = MemoryConnector::pair();
        backend.set_accepting(false);

        // when (操作):
        let result = connector.connect("memory://test").await;

        // then (期待する結果):
        assert!(matches!(result, Err(TransportError::Connect(_))));
    }
}
