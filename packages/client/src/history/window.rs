//! Per-room message log and the bounded window over it.
//!
//! The window is stored relative to the tail of the log (`len` messages ending
//! `tail_gap` messages before the newest), so prepending older history never
//! moves it.

use std::ops::Range;

use crate::domain::{Message, MessageId, Timestamp};

/// How a live message landed in the log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveInsert {
    /// Newest message, appended at the tail
    Appended,
    /// Older than the tail, inserted in timestamp order
    Inserted,
    /// Same id as a known message, replaced in place
    Replaced,
}

/// Every known message of one room, oldest first, unique by id
#[derive(Debug, Default)]
pub struct MessageLog {
    messages: Vec<Message>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn as_slice(&self) -> &[Message] {
        &self.messages
    }

    pub fn position(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|message| &message.id == id)
    }

    pub fn oldest_timestamp(&self) -> Option<Timestamp> {
        self.messages.first().map(|message| message.timestamp)
    }

    /// Merge a history page; returns how many messages were new
    pub fn merge_page(&mut self, page: Vec<Message>) -> usize {
        let mut inserted = 0;
        for message in page {
            match self.position(&message.id) {
                Some(index) => self.messages[index] = message,
                None => {
                    self.messages.push(message);
                    inserted += 1;
                }
            }
        }
        self.messages.sort_by_key(|message| message.timestamp);
        inserted
    }

    pub fn push_live(&mut self, message: Message) -> LiveInsert {
        if let Some(index) = self.position(&message.id) {
            self.messages[index] = message;
            return LiveInsert::Replaced;
        }
        let is_newest = self
            .messages
            .last()
            .is_none_or(|last| last.timestamp <= message.timestamp);
        if is_newest {
            self.messages.push(message);
            LiveInsert::Appended
        } else {
            let index = self
                .messages
                .partition_point(|known| known.timestamp <= message.timestamp);
            self.messages.insert(index, message);
            LiveInsert::Inserted
        }
    }
}

/// The visible slice of a `MessageLog`.
///
/// Never longer than `2 × page_size` once an operation returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryWindow {
    page_size: usize,
    len: usize,
    tail_gap: usize,
}

impl HistoryWindow {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            len: 0,
            tail_gap: 0,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn max_len(&self) -> usize {
        self.page_size * 2
    }

    /// Whether the window ends at the newest message
    pub fn is_attached(&self) -> bool {
        self.tail_gap == 0
    }

    pub fn range(&self, log_len: usize) -> Range<usize> {
        let end = log_len.saturating_sub(self.tail_gap);
        let start = end.saturating_sub(self.len);
        start..end
    }

    pub fn len(&self, log_len: usize) -> usize {
        self.range(log_len).len()
    }

    pub fn contains(&self, index: usize, log_len: usize) -> bool {
        self.range(log_len).contains(&index)
    }

    /// Whether older messages are known but outside the window
    pub fn has_hidden_older(&self, log_len: usize) -> bool {
        self.range(log_len).start > 0
    }

    /// One live message was appended to the log.
    ///
    /// An attached window grows with it, dropping its oldest message past the
    /// bound; a detached window keeps its position.
    pub fn on_live_append(&mut self, log_len: usize) -> bool {
        if !self.is_attached() {
            self.tail_gap += 1;
            return false;
        }
        self.len = (self.len + 1).min(self.max_len()).min(log_len);
        true
    }

    /// Older messages were merged into the log.
    ///
    /// Returns whether the window changed: a window still holding less than a
    /// page (cold start) takes the newest page.
    pub fn on_page_merged(&mut self, log_len: usize) -> bool {
        if self.len >= self.page_size || !self.is_attached() {
            return false;
        }
        let len = log_len.min(self.page_size);
        let changed = len != self.len;
        self.len = len;
        changed
    }

    /// Prepend up to one page of already-known older messages.
    ///
    /// Returns how many were taken; trimming back to the bound detaches the
    /// window from the tail.
    pub fn grow_backward(&mut self, log_len: usize) -> usize {
        let start = self.range(log_len).start;
        let take = start.min(self.page_size);
        if take == 0 {
            return 0;
        }
        self.len += take;
        if self.len > self.max_len() {
            let excess = self.len - self.max_len();
            self.len = self.max_len();
            self.tail_gap += excess;
        }
        take
    }

    /// Re-center the window so that `index` shows with `context` messages
    /// above it
    pub fn focus(&mut self, index: usize, context: usize, log_len: usize) {
        let start = index.saturating_sub(context);
        let end = log_len.min(start + self.max_len());
        self.len = end - start;
        self.tail_gap = log_len - end;
    }

    /// Show the newest page again
    pub fn reattach(&mut self, log_len: usize) {
        self.tail_gap = 0;
        self.len = log_len.min(self.page_size);
    }
}
