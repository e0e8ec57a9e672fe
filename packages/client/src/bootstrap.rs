//! Startup race between a cached room-list snapshot and the fresh load.
//!
//! Freshness wins once it lands: a cached snapshot arriving after a fresh list
//! is discarded, whatever order the calls were issued in.

/// Where a room list came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomListSource {
    /// Fast, possibly stale snapshot
    Cached,
    /// Authoritative load
    Fresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BootstrapState {
    Idle,
    LoadingCache,
    LoadedCache,
    LoadingFresh,
    LoadedFresh,
}

#[derive(Debug)]
pub struct BootstrapOrchestrator {
    state: BootstrapState,
}

impl Default for BootstrapOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl BootstrapOrchestrator {
    pub fn new() -> Self {
        Self {
            state: BootstrapState::Idle,
        }
    }

    pub fn state(&self) -> BootstrapState {
        self.state
    }

    pub fn fresh_landed(&self) -> bool {
        self.state == BootstrapState::LoadedFresh
    }

    /// A cached snapshot was requested.
    ///
    /// Returns `false` (and requests nothing) once fresh data is in.
    pub fn begin_cache(&mut self) -> bool {
        if self.fresh_landed() {
            return false;
        }
        self.state = BootstrapState::LoadingCache;
        true
    }

    /// A fresh load was requested. A refresh after the first fresh load keeps
    /// `LoadedFresh` so late cached snapshots stay discarded.
    pub fn begin_fresh(&mut self) {
        if !self.fresh_landed() {
            self.state = BootstrapState::LoadingFresh;
        }
    }

    /// A room list arrived; returns whether the consumer should see it
    pub fn accept(&mut self, source: RoomListSource) -> bool {
        match source {
            RoomListSource::Cached if self.fresh_landed() => {
                tracing::info!("Discarding cached room list; fresh list already loaded");
                false
            }
            RoomListSource::Cached => {
                self.state = BootstrapState::LoadedCache;
                true
            }
            RoomListSource::Fresh => {
                self.state = BootstrapState::LoadedFresh;
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_then_fresh_both_delivered() {
        // テスト項目: キャッシュが先に届いた場合、両方とも利用者に届く
        // given (前提条件):
        let mut bootstrap = BootstrapOrchestrator::new();
        bootstrap.begin_cache();
        bootstrap.begin_fresh();

        // when (操作):
        let cached = bootstrap.accept(RoomListSource::Cached);
        let state_after_cache = bootstrap.state();
        let fresh = bootstrap.accept(RoomListSource::Fresh);

        // then (期待する結果):
        assert!(cached && fresh);
        assert_eq!(state_after_cache, BootstrapState::LoadedCache);
        assert_eq!(bootstrap.state(), BootstrapState::LoadedFresh);
    }

    #[test]
    fn test_cache_after_fresh_is_discarded() {
        // テスト項目: 最新データ取得後に届いたキャッシュは破棄される
        // given (前提条件):
        let mut bootstrap = BootstrapOrchestrator::new();
        bootstrap.begin_cache();
        bootstrap.begin_fresh();
        bootstrap.accept(RoomListSource::Fresh);

        // when (操作):
        let cached = bootstrap.accept(RoomListSource::Cached);

        // then (期待する結果):
        assert!(!cached);
        assert_eq!(bootstrap.state(), BootstrapState::LoadedFresh);
    }

    #[test]
    fn test_refresh_keeps_loaded_fresh() {
        // テスト項目: 再取得の開始で LoadedFresh から戻らない
        // given (前提条件):
        let mut bootstrap = BootstrapOrchestrator::new();
        bootstrap.begin_fresh();
        bootstrap.accept(RoomListSource::Fresh);

        // when (操作):
        bootstrap.begin_fresh();
        let cache_requested = bootstrap.begin_cache();

        // then (期待する結果):
        assert_eq!(bootstrap.state(), BootstrapState::LoadedFresh);
        assert!(!cache_requested);
    }
}
