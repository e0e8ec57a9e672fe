//! History Window Reconciler.
//!
//! Merges paginated and live messages into a bounded, scroll-stable,
//! highlight-addressable window per open room view.

pub mod highlight;
pub mod view;
pub mod window;

pub use highlight::{HighlightState, HighlightTracker, RetryStep};
pub use view::{RoomView, ScrollCommand, ScrollMetrics, ViewAction, ViewConfig, WindowSnapshot};
pub use window::{HistoryWindow, LiveInsert, MessageLog};
