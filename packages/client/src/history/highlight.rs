//! Deep-link highlight tracking.

use crate::domain::MessageId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HighlightState {
    Idle,
    /// Target not loaded yet; backward pages are being fetched
    Pending { target: MessageId, attempts: u32 },
    /// Target brought into view; live auto-scroll stays off until the grace
    /// delay elapses
    Resolved { target: MessageId, settled: bool },
}

/// Outcome of one retry tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryStep {
    /// Issue another backward page load
    LoadOlder,
    /// A load is still in flight; wait for the next tick
    Wait,
    /// Ceiling reached; fall back to bottom-anchored behavior
    Abandon,
    /// Nothing pending
    Idle,
}

#[derive(Debug)]
pub struct HighlightTracker {
    state: HighlightState,
    retry_ceiling: u32,
}

impl HighlightTracker {
    pub fn new(retry_ceiling: u32) -> Self {
        Self {
            state: HighlightState::Idle,
            retry_ceiling,
        }
    }

    pub fn state(&self) -> &HighlightState {
        &self.state
    }

    pub fn request(&mut self, target: MessageId) {
        self.state = HighlightState::Pending {
            target,
            attempts: 0,
        };
    }

    pub fn pending_target(&self) -> Option<&MessageId> {
        match &self.state {
            HighlightState::Pending { target, .. } => Some(target),
            _ => None,
        }
    }

    /// The message to mark visually, pending or resolved
    pub fn target(&self) -> Option<&MessageId> {
        match &self.state {
            HighlightState::Pending { target, .. } | HighlightState::Resolved { target, .. } => {
                Some(target)
            }
            HighlightState::Idle => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, HighlightState::Pending { .. })
    }

    /// Whether live appends must not scroll to the bottom
    pub fn pins_scroll(&self) -> bool {
        match self.state {
            HighlightState::Pending { .. } => true,
            HighlightState::Resolved { settled, .. } => !settled,
            HighlightState::Idle => false,
        }
    }

    pub fn resolve(&mut self) {
        if let HighlightState::Pending { target, .. } =
            std::mem::replace(&mut self.state, HighlightState::Idle)
        {
            self.state = HighlightState::Resolved {
                target,
                settled: false,
            };
        }
    }

    /// Grace delay elapsed after resolution
    pub fn settle(&mut self) {
        if let HighlightState::Resolved { settled, .. } = &mut self.state {
            *settled = true;
        }
    }

    pub fn on_retry_tick(&mut self, load_in_flight: bool) -> RetryStep {
        let HighlightState::Pending { attempts, .. } = &mut self.state else {
            return RetryStep::Idle;
        };
        *attempts += 1;
        if *attempts >= self.retry_ceiling {
            tracing::info!("Highlight target not found after {} attempts", attempts);
            self.state = HighlightState::Idle;
            return RetryStep::Abandon;
        }
        if load_in_flight {
            RetryStep::Wait
        } else {
            RetryStep::LoadOlder
        }
    }

    pub fn clear(&mut self) {
        self.state = HighlightState::Idle;
    }
}
