//! Platform liveness source.
//!
//! Whatever tracks "is the user here" (page visibility, network online state,
//! terminal focus) feeds hints through this trait; the runtime turns each
//! hint into a presence call.

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

#[async_trait]
pub trait LivenessSource: Send {
    /// Next liveness hint, `None` once the source is exhausted.
    ///
    /// Must be cancel safe.
    async fn next_hint(&mut self) -> Option<bool>;
}

#[async_trait]
impl LivenessSource for watch::Receiver<bool> {
    async fn next_hint(&mut self) -> Option<bool> {
        self.changed().await.ok()?;
        Some(*self.borrow_and_update())
    }
}

#[async_trait]
impl LivenessSource for mpsc::UnboundedReceiver<bool> {
    async fn next_hint(&mut self) -> Option<bool> {
        self.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_watch_source_yields_changes() {
        // テスト項目: watch チャネルの変更がヒントとして届く
        // given (前提条件):
        let (tx, mut rx) = watch::channel(true);

        // when (操作):
        tx.send(false).unwrap();
        let hint = rx.next_hint().await;
        drop(tx);
        let end = rx.next_hint().await;

        // then (期待する結果):
        assert_eq!(hint, Some(false));
        assert_eq!(end, None);
    }

    #[tokio::test]
    async fn test_mpsc_source_ends_when_sender_dropped() {
        // テスト項目: 送信側が閉じるとソースは終了する
        // given (前提条件):
        let (tx, mut rx) = mpsc::unbounded_channel();

        // when (操作):
        tx.send(true).unwrap();
        drop(tx);

        // then (期待する結果):
        assert_eq!(rx.next_hint().await, Some(true));
        assert_eq!(rx.next_hint().await, None);
    }
}
