//! Client configuration.

use std::time::Duration;

use crate::connection::ReconnectPolicy;
use crate::history::ViewConfig;
use crate::timer::MIN_TIMER_PERIOD;

pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:3000/websocket";

/// Messages per history page (`OFFSET`)
pub const DEFAULT_PAGE_SIZE: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub endpoint: String,
    pub page_size: usize,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    /// The reconnecting notice shows once the retry counter exceeds this
    pub reconnect_notice_threshold: u32,
    pub connect_timeout: Duration,
    /// Request a cached room-list snapshot at startup
    pub use_cache: bool,
    pub highlight_retry_interval: Duration,
    pub highlight_retry_ceiling: u32,
    pub highlight_grace: Duration,
    pub near_top_px: f64,
    pub scroll_correction_px: f64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
            reconnect_notice_threshold: 1,
            connect_timeout: Duration::from_secs(10),
            use_cache: true,
            highlight_retry_interval: Duration::from_millis(1500),
            highlight_retry_ceiling: 10,
            highlight_grace: Duration::from_millis(2000),
            near_top_px: 100.0,
            scroll_correction_px: 100.0,
        }
    }
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_reconnect_delays(mut self, base: Duration, max: Duration) -> Self {
        self.reconnect_base_delay = base;
        self.reconnect_max_delay = max.max(base);
        self
    }

    pub fn with_reconnect_notice_threshold(mut self, threshold: u32) -> Self {
        self.reconnect_notice_threshold = threshold;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn with_highlight_retry(mut self, interval: Duration, ceiling: u32) -> Self {
        self.highlight_retry_interval = interval.max(MIN_TIMER_PERIOD);
        self.highlight_retry_ceiling = ceiling.max(1);
        self
    }

    pub fn with_highlight_grace(mut self, grace: Duration) -> Self {
        self.highlight_grace = grace;
        self
    }

    pub fn with_scroll_thresholds(mut self, near_top_px: f64, correction_px: f64) -> Self {
        self.near_top_px = near_top_px;
        self.scroll_correction_px = correction_px;
        self
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: self.reconnect_base_delay,
            max_delay: self.reconnect_max_delay,
            notice_threshold: self.reconnect_notice_threshold,
        }
    }

    pub fn view_config(&self) -> ViewConfig {
        ViewConfig {
            page_size: self.page_size,
            near_top_px: self.near_top_px,
            scroll_correction_px: self.scroll_correction_px,
            highlight_retry_ceiling: self.highlight_retry_ceiling,
            ..ViewConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        // テスト項目: 既定値が設定されている
        // given (前提条件):
        let config = ClientConfig::default();

        // when (操作):
        let view = config.view_config();

        // then (期待する結果):
        assert_eq!(config.page_size, 20);
        assert_eq!(config.highlight_retry_interval, Duration::from_millis(1500));
        assert_eq!(view.page_size, 20);
        assert_eq!(view.scroll_correction_px, 100.0);
    }

    #[test]
    fn test_builders_clamp_values() {
        // テスト項目: 不正な値は補正される
        // given (前提条件):
        let config = ClientConfig::new("ws://example/websocket");

        // when (操作):
        let config = config
            .with_page_size(0)
            .with_reconnect_delays(Duration::from_secs(5), Duration::from_secs(1));

        // then (期待する結果):
        assert_eq!(config.page_size, 1);
        assert_eq!(config.reconnect_policy().max_delay, Duration::from_secs(5));
        assert_eq!(config.endpoint, "ws://example/websocket");
    }

    #[test]
    fn test_highlight_retry_interval_is_never_zero() {
        // テスト項目: ハイライト再試行の間隔 0 は最小値に補正される
        // given (前提条件):
        let config = ClientConfig::default();

        // when (操作):
        let config = config.with_highlight_retry(Duration::ZERO, 0);

        // then (期待する結果):
        assert_eq!(config.highlight_retry_interval, MIN_TIMER_PERIOD);
        assert_eq!(config.highlight_retry_ceiling, 1);
    }
}
