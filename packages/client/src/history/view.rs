//! One open room view: log, window, highlight and the scroll contract.
//!
//! `RoomView` never does IO. Every input returns the `ViewAction`s the runtime
//! must carry out (dispatch, issue a page load, arm or stop a timer).

use crate::domain::{Message, MessageId, RoomId, Timestamp};

use super::highlight::{HighlightTracker, RetryStep};
use super::window::{HistoryWindow, LiveInsert, MessageLog};

/// Tunables of a room view
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewConfig {
    pub page_size: usize,
    /// `scroll_top` at or below this counts as "near the top"
    pub near_top_px: f64,
    /// Subtracted from the height delta after a backward merge
    pub scroll_correction_px: f64,
    /// Messages shown above a highlighted message
    pub highlight_context: usize,
    pub highlight_retry_ceiling: u32,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            page_size: 20,
            near_top_px: 100.0,
            scroll_correction_px: 100.0,
            highlight_context: 5,
            highlight_retry_ceiling: 10,
        }
    }
}

/// Scroll position reported by the consumer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollMetrics {
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
}

/// Instruction for the consumer's scroll container
#[derive(Debug, Clone, PartialEq)]
pub enum ScrollCommand {
    ToBottom,
    ToOffset(f64),
    CenterOn(MessageId),
}

/// What the consumer renders for a room
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSnapshot {
    pub messages: Vec<Message>,
    pub highlighted: Option<MessageId>,
    /// Whether the window ends at the newest message
    pub attached: bool,
    /// Whether older messages exist (loaded or not)
    pub has_older: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewAction {
    WindowChanged,
    Scroll(ScrollCommand),
    LoadOlder {
        before: Option<Timestamp>,
        limit: usize,
    },
    StartHighlightRetry,
    StopHighlightRetry,
    StartHighlightGrace,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum PagePurpose {
    Initial,
    /// Scroll-driven growth; carries the pre-merge scroll height
    Growth { anchor: Option<f64> },
    Highlight,
}

#[derive(Debug)]
pub struct RoomView {
    room_id: RoomId,
    config: ViewConfig,
    log: MessageLog,
    window: HistoryWindow,
    highlight: HighlightTracker,
    page_in_flight: Option<PagePurpose>,
    exhausted: bool,
    awaiting_layout: bool,
    merge_anchor: Option<f64>,
    last_metrics: Option<ScrollMetrics>,
}

impl RoomView {
    pub fn new(room_id: RoomId, config: ViewConfig) -> Self {
        Self {
            room_id,
            window: HistoryWindow::new(config.page_size),
            highlight: HighlightTracker::new(config.highlight_retry_ceiling),
            config,
            log: MessageLog::new(),
            page_in_flight: None,
            exhausted: false,
            awaiting_layout: false,
            merge_anchor: None,
            last_metrics: None,
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn window(&self) -> &HistoryWindow {
        &self.window
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    pub fn window_messages(&self) -> &[Message] {
        &self.log.as_slice()[self.window.range(self.log.len())]
    }

    pub fn is_loading(&self) -> bool {
        self.page_in_flight.is_some()
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Nothing loaded and nothing on the way
    pub fn needs_initial_page(&self) -> bool {
        self.log.is_empty() && self.page_in_flight.is_none() && !self.exhausted
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        WindowSnapshot {
            messages: self.window_messages().to_vec(),
            highlighted: self.highlight.target().cloned(),
            attached: self.window.is_attached(),
            has_older: self.window.has_hidden_older(self.log.len()) || !self.exhausted,
        }
    }

    fn load_older(&mut self, purpose: PagePurpose) -> Vec<ViewAction> {
        if self.page_in_flight.is_some() || self.exhausted {
            return Vec::new();
        }
        self.page_in_flight = Some(purpose);
        vec![ViewAction::LoadOlder {
            before: self.log.oldest_timestamp(),
            limit: self.config.page_size,
        }]
    }

    fn grow_local(&mut self, anchor: Option<f64>) -> Vec<ViewAction> {
        if self.window.grow_backward(self.log.len()) == 0 {
            return Vec::new();
        }
        if !self.highlight.is_pending() {
            self.highlight.clear();
        }
        self.awaiting_layout = true;
        self.merge_anchor = anchor;
        vec![ViewAction::WindowChanged]
    }

    fn can_autoscroll(&self) -> bool {
        self.window.is_attached()
            && !self.highlight.pins_scroll()
            && !self.awaiting_layout
            && !matches!(self.page_in_flight, Some(PagePurpose::Growth { .. }))
    }

    /// Consumer asked for more history: reveal known older messages, or
    /// fetch the next page from the backend
    pub fn request_page(&mut self) -> Vec<ViewAction> {
        let anchor = self.last_metrics.map(|m| m.scroll_height);
        if self.window.has_hidden_older(self.log.len()) {
            return self.grow_local(anchor);
        }
        if self.log.is_empty() {
            self.load_older(PagePurpose::Initial)
        } else {
            self.load_older(PagePurpose::Growth { anchor })
        }
    }

    pub fn on_scroll(&mut self, metrics: ScrollMetrics) -> Vec<ViewAction> {
        self.last_metrics = Some(metrics);
        if self.awaiting_layout
            || metrics.scroll_top > self.config.near_top_px
            || self.page_in_flight.is_some()
            || self.highlight.is_pending()
        {
            return Vec::new();
        }
        self.request_page()
    }

    /// Layout reflects the last window change; apply the anchor correction
    pub fn on_layout_settled(&mut self, height: f64) -> Vec<ViewAction> {
        if !self.awaiting_layout {
            return Vec::new();
        }
        self.awaiting_layout = false;
        match self.merge_anchor.take() {
            Some(anchor) => {
                let offset = (height - anchor - self.config.scroll_correction_px).max(0.0);
                vec![ViewAction::Scroll(ScrollCommand::ToOffset(offset))]
            }
            None => Vec::new(),
        }
    }

    pub fn on_history_page(&mut self, page: Vec<Message>, limit: usize) -> Vec<ViewAction> {
        let purpose = self.page_in_flight.take();
        if page.len() < limit {
            self.exhausted = true;
        }
        let inserted = self.log.merge_page(page);
        tracing::debug!(
            "Room {} merged {} new messages ({} known)",
            self.room_id,
            inserted,
            self.log.len()
        );

        if let Some(target) = self.highlight.pending_target() {
            if let Some(index) = self.log.position(target) {
                return self.resolve_at(index);
            }
            if self.exhausted {
                return self.abandon_highlight();
            }
            return self.cold_merge();
        }

        match purpose {
            Some(PagePurpose::Growth { anchor }) => {
                if self.window.on_page_merged(self.log.len()) {
                    self.awaiting_layout = true;
                    self.merge_anchor = anchor;
                    vec![ViewAction::WindowChanged]
                } else if inserted > 0 {
                    self.grow_local(anchor)
                } else {
                    Vec::new()
                }
            }
            Some(PagePurpose::Initial) | Some(PagePurpose::Highlight) | None => {
                let mut actions = self.cold_merge();
                if !actions.is_empty() && self.can_autoscroll() {
                    actions.push(ViewAction::Scroll(ScrollCommand::ToBottom));
                }
                actions
            }
        }
    }

    fn cold_merge(&mut self) -> Vec<ViewAction> {
        if self.window.on_page_merged(self.log.len()) {
            vec![ViewAction::WindowChanged]
        } else {
            Vec::new()
        }
    }

    pub fn on_history_failed(&mut self) {
        self.page_in_flight = None;
    }

    /// Live messages pushed by the backend (or a local echo)
    pub fn on_live_messages(&mut self, messages: Vec<Message>) -> Vec<ViewAction> {
        let mut visible = false;
        for message in messages {
            let id = message.id.clone();
            match self.log.push_live(message) {
                LiveInsert::Appended | LiveInsert::Inserted => {
                    visible |= self.window.on_live_append(self.log.len());
                }
                LiveInsert::Replaced => {
                    visible |= self
                        .log
                        .position(&id)
                        .is_some_and(|index| self.window.contains(index, self.log.len()));
                }
            }
        }
        if !visible {
            return Vec::new();
        }
        let mut actions = vec![ViewAction::WindowChanged];
        if self.can_autoscroll() {
            actions.push(ViewAction::Scroll(ScrollCommand::ToBottom));
        }
        actions
    }

    /// Bring a message into view, paging backward until it shows up
    pub fn request_highlight(&mut self, target: MessageId) -> Vec<ViewAction> {
        self.highlight.request(target.clone());
        if let Some(index) = self.log.position(&target) {
            return self.resolve_at(index);
        }
        if self.exhausted {
            return self.abandon_highlight();
        }
        let mut actions = vec![ViewAction::StartHighlightRetry];
        actions.extend(self.load_older(PagePurpose::Highlight));
        actions
    }

    pub fn on_highlight_tick(&mut self) -> Vec<ViewAction> {
        match self.highlight.on_retry_tick(self.page_in_flight.is_some()) {
            RetryStep::LoadOlder if self.exhausted => self.abandon_highlight(),
            RetryStep::LoadOlder => self.load_older(PagePurpose::Highlight),
            RetryStep::Wait => Vec::new(),
            RetryStep::Abandon => self.abandon_highlight(),
            RetryStep::Idle => vec![ViewAction::StopHighlightRetry],
        }
    }

    pub fn on_highlight_grace_elapsed(&mut self) {
        self.highlight.settle();
    }

    pub fn clear_highlight(&mut self) -> Vec<ViewAction> {
        if self.highlight.target().is_none() {
            return Vec::new();
        }
        self.highlight.clear();
        vec![ViewAction::StopHighlightRetry, ViewAction::WindowChanged]
    }

    fn resolve_at(&mut self, index: usize) -> Vec<ViewAction> {
        let log_len = self.log.len();
        if !self.window.contains(index, log_len) {
            self.window
                .focus(index, self.config.highlight_context, log_len);
        }
        self.highlight.resolve();
        let mut actions = vec![ViewAction::StopHighlightRetry, ViewAction::WindowChanged];
        if let Some(target) = self.highlight.target() {
            actions.push(ViewAction::Scroll(ScrollCommand::CenterOn(target.clone())));
        }
        actions.push(ViewAction::StartHighlightGrace);
        actions
    }

    fn abandon_highlight(&mut self) -> Vec<ViewAction> {
        self.highlight.clear();
        self.window.reattach(self.log.len());
        vec![
            ViewAction::StopHighlightRetry,
            ViewAction::WindowChanged,
            ViewAction::Scroll(ScrollCommand::ToBottom),
        ]
    }

    /// Reattach to the newest messages
    pub fn jump_to_latest(&mut self) -> Vec<ViewAction> {
        self.highlight.clear();
        self.awaiting_layout = false;
        self.merge_anchor = None;
        self.window.reattach(self.log.len());
        vec![
            ViewAction::StopHighlightRetry,
            ViewAction::WindowChanged,
            ViewAction::Scroll(ScrollCommand::ToBottom),
        ]
    }
}
