//! Request/response correlation for method calls.
//!
//! Every call gets a `CallId` from a counter that never resets, so a late
//! result from a previous connection can never complete a newer call.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::domain::CallId;
use crate::error::RpcError;
use crate::infrastructure::dto::websocket::{ClientFrame, MethodErrorDto};

/// One outstanding call and whatever must happen when it completes
#[derive(Debug)]
pub struct PendingCall<T> {
    pub id: CallId,
    pub method: String,
    pub params: Vec<Value>,
    /// Whether the frame went out on the current transport
    pub sent: bool,
    pub tag: T,
}

impl<T> PendingCall<T> {
    /// The wire frame for this call
    pub fn frame(&self) -> ClientFrame {
        ClientFrame::Method {
            id: self.id.to_string(),
            method: self.method.clone(),
            params: self.params.clone(),
        }
    }
}

/// Table of outstanding calls keyed by correlation id.
///
/// Ordered by id, which is issue order; queued calls are flushed in the order
/// they were made.
#[derive(Debug)]
pub struct PendingCalls<T> {
    next_id: u64,
    calls: BTreeMap<CallId, PendingCall<T>>,
}

impl<T> Default for PendingCalls<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PendingCalls<T> {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            calls: BTreeMap::new(),
        }
    }

    /// Register a new call, not yet sent
    pub fn issue(&mut self, method: impl Into<String>, params: Vec<Value>, tag: T) -> CallId {
        let id = CallId::new(self.next_id);
        self.next_id += 1;
        let previous = self.calls.insert(
            id,
            PendingCall {
                id,
                method: method.into(),
                params,
                sent: false,
                tag,
            },
        );
        debug_assert!(previous.is_none(), "correlation id reused");
        id
    }

    /// Frames of every call not yet sent, in issue order, marking them sent
    pub fn take_unsent(&mut self) -> Vec<ClientFrame> {
        self.calls
            .values_mut()
            .filter(|call| !call.sent)
            .map(|call| {
                call.sent = true;
                call.frame()
            })
            .collect()
    }

    /// Mark a single call as sent and return its frame
    pub fn send_now(&mut self, id: CallId) -> Option<ClientFrame> {
        let call = self.calls.get_mut(&id)?;
        call.sent = true;
        Some(call.frame())
    }

    /// Remove the call matching a result. `None` for unknown or already
    /// completed ids, which callers drop silently.
    pub fn complete(&mut self, id: CallId) -> Option<PendingCall<T>> {
        self.calls.remove(&id)
    }

    /// Remove every outstanding call, in issue order
    pub fn drain(&mut self) -> Vec<PendingCall<T>> {
        std::mem::take(&mut self.calls).into_values().collect()
    }

    /// Remove the calls already sent on the current transport, in issue
    /// order; queued calls stay
    pub fn drain_sent(&mut self) -> Vec<PendingCall<T>> {
        let sent: Vec<CallId> = self
            .calls
            .values()
            .filter(|call| call.sent)
            .map(|call| call.id)
            .collect();
        sent.into_iter()
            .filter_map(|id| self.calls.remove(&id))
            .collect()
    }

    pub fn any(&self, predicate: impl Fn(&T) -> bool) -> bool {
        self.calls.values().any(|call| predicate(&call.tag))
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

/// Turn the two optional halves of a `result` frame into an outcome.
///
/// A result with neither half is a successful call returning nothing.
pub fn call_outcome(result: Option<Value>, error: Option<MethodErrorDto>) -> Result<Value, RpcError> {
    match error {
        Some(error) => {
            let code = match &error.error {
                Value::String(code) => code.clone(),
                Value::Null => "unknown".to_string(),
                other => other.to_string(),
            };
            let reason = error
                .reason
                .or(error.message)
                .unwrap_or_else(|| code.clone());
            Err(RpcError::Rejected { code, reason })
        }
        None => Ok(result.unwrap_or(Value::Null)),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_ids_are_unique_and_increasing() {
        // テスト項目: 相関 ID は一意で単調増加する
        // given (前提条件):
        let mut calls: PendingCalls<()> = PendingCalls::new();

        // when (操作):
        let first = calls.issue("a", vec![], ());
        let second = calls.issue("b", vec![], ());
        calls.complete(first);
        let third = calls.issue("c", vec![], ());

        // then (期待する結果):
        assert!(first < second && second < third);
        assert_eq!(calls.len(), 2);
    }

    #[test]
    fn test_complete_fires_once() {
        // テスト項目: 同じ ID の結果は一度しか完了しない
        // given (前提条件):
        let mut calls = PendingCalls::new();
        let id = calls.issue("rooms/get", vec![], "tag");

        // when (操作):
        let first = calls.complete(id);
        let second = calls.complete(id);

        // then (期待する結果):
        assert_eq!(first.map(|call| call.tag), Some("tag"));
        assert!(second.is_none());
    }

    #[test]
    fn test_take_unsent_preserves_issue_order() {
        // テスト項目: 未送信の呼び出しは発行順に送信され、二重送信されない
        // given (前提条件):
        let mut calls: PendingCalls<()> = PendingCalls::new();
        let first = calls.issue("first", vec![], ());
        calls.issue("second", vec![json!("p")], ());

        // when (操作):
        calls.send_now(first);
        let frames = calls.take_unsent();
        let again = calls.take_unsent();

        // then (期待する結果):
        assert_eq!(
            frames,
            vec![ClientFrame::Method {
                id: "2".to_string(),
                method: "second".to_string(),
                params: vec![json!("p")],
            }]
        );
        assert!(again.is_empty());
    }

    #[test]
    fn test_drain_empties_table() {
        // テスト項目: drain で全ての未完了呼び出しが取り出される
        // given (前提条件):
        let mut calls = PendingCalls::new();
        calls.issue("a", vec![], 1);
        calls.issue("b", vec![], 2);

        // when (操作):
        let drained: Vec<i32> = calls.drain().into_iter().map(|call| call.tag).collect();

        // then (期待する結果):
        assert_eq!(drained, vec![1, 2]);
        assert!(calls.is_empty());
    }

    #[test]
    fn test_drain_sent_keeps_queued_calls() {
        // テスト項目: 送信済みの呼び出しだけが取り出され、未送信のものは残る
        // given (前提条件):
        let mut calls = PendingCalls::new();
        let sent = calls.issue("a", vec![], 1);
        calls.issue("b", vec![], 2);
        calls.send_now(sent);

        // when (操作):
        let drained: Vec<i32> = calls.drain_sent().into_iter().map(|call| call.tag).collect();

        // then (期待する結果):
        assert_eq!(drained, vec![1]);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls.take_unsent().len(), 1);
    }

    #[test]
    fn test_call_outcome_maps_error_to_rejected() {
        // テスト項目: エラー付きの結果は Rejected になる
        // given (前提条件):
        let error = MethodErrorDto {
            error: json!(403),
            reason: Some("forbidden".to_string()),
            message: None,
        };

        // when (操作):
        let outcome = call_outcome(None, Some(error));

        // then (期待する結果):
        assert_eq!(
            outcome,
            Err(RpcError::Rejected {
                code: "403".to_string(),
                reason: "forbidden".to_string(),
            })
        );
    }

    #[test]
    fn test_call_outcome_without_result_is_null() {
        // テスト項目: 結果のない成功は null として扱われる
        // given (前提条件):
        let result = None;

        // when (操作):
        let outcome = call_outcome(result, None);

        // then (期待する結果):
        assert_eq!(outcome, Ok(Value::Null));
    }
}
