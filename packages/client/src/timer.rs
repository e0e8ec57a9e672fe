//! Scoped timers that deliver their firing into the runtime's event loop.
//!
//! A `ScopedTimer` aborts its task when dropped, so replacing or dropping the
//! owning field cancels it. Each timer carries an id; a firing already queued
//! when its timer was replaced is recognized as stale by comparing ids.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Shortest period an interval timer runs with
pub const MIN_TIMER_PERIOD: Duration = Duration::from_millis(1);

/// A timer firing as seen by the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerFired<K> {
    pub id: u64,
    pub kind: K,
}

#[derive(Debug)]
pub struct ScopedTimer {
    id: u64,
    handle: JoinHandle<()>,
}

impl ScopedTimer {
    /// Fire once after `delay`
    pub fn once<K: Send + 'static>(
        id: u64,
        delay: Duration,
        tx: mpsc::UnboundedSender<TimerFired<K>>,
        kind: K,
    ) -> Self {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(TimerFired { id, kind });
        });
        Self { id, handle }
    }

    /// Fire every `period` until dropped
    pub fn interval<K: Clone + Send + 'static>(
        id: u64,
        period: Duration,
        tx: mpsc::UnboundedSender<TimerFired<K>>,
        kind: K,
    ) -> Self {
        // interval_at panics on a zero period
        let period = period.max(MIN_TIMER_PERIOD);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if tx
                    .send(TimerFired {
                        id,
                        kind: kind.clone(),
                    })
                    .is_err()
                {
                    break;
                }
            }
        });
        Self { id, handle }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Hands out timer ids that are never reused
#[derive(Debug, Default)]
pub struct TimerIds {
    next: u64,
}

impl TimerIds {
    pub fn next_id(&mut self) -> u64 {
        self.next += 1;
        self.next
    }
}

/// Whether a firing belongs to the timer currently held in `slot`
pub fn is_current(slot: &Option<ScopedTimer>, id: u64) -> bool {
    slot.as_ref().is_some_and(|timer| timer.id() == id)
}
