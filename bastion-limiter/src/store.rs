//! Shared counter store abstraction.
//!
//! The limiter needs exactly one primitive from its store: increment a key
//! and read the post-increment value, setting the key's expiry on the first
//! increment of a window. Both implementations do this atomically per key.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::StoreError;

/// Post-increment state of one fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Requests counted in the current window, this one included.
    pub count: u64,
    /// Time until the window resets.
    pub ttl: Duration,
}

/// Atomic increment-with-expiry over a shared key space.
///
/// # Cancel Safety
/// Dropping an `increment` future may or may not have counted the request;
/// the limiter only drops it on timeout, where it fails open anyway.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Increment `key`, starting a new window of length `window` if the key is
    /// absent or its previous window has elapsed.
    ///
    /// # Errors
    /// Returns [`StoreError`] if the store cannot be reached or replies with
    /// something unexpected.
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError>;

    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Drop windows that have elapsed. Returns how many were removed.
    ///
    /// Stores with native expiry have nothing to do.
    fn purge_expired(&self) -> usize {
        0
    }
}

#[derive(Debug, Clone, Copy)]
struct MemoryWindow {
    count: u64,
    expires_at: Instant,
}

/// In-process store for single-instance deployments and tests.
///
/// Each key is updated under its `DashMap` shard lock, so increments on the
/// same key never interleave.
#[derive(Debug, Default)]
pub struct MemoryQuotaStore {
    windows: DashMap<String, MemoryWindow>,
}

impl MemoryQuotaStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys, elapsed or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[async_trait]
impl QuotaStore for MemoryQuotaStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        let now = Instant::now();
        let mut entry = self
            .windows
            .entry(key.to_owned())
            .or_insert(MemoryWindow { count: 0, expires_at: now + window });

        if now >= entry.expires_at {
            *entry = MemoryWindow { count: 0, expires_at: now + window };
        }
        entry.count = entry.count.saturating_add(1);

        Ok(WindowCount { count: entry.count, ttl: entry.expires_at - now })
    }

    fn name(&self) -> &'static str {
        "memory"
    }

    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, w| w.expires_at > now);
        before.saturating_sub(self.windows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    async fn bump(store: &MemoryQuotaStore, key: &str) -> WindowCount {
        match store.increment(key, WINDOW).await {
            Ok(c) => c,
            Err(e) => panic!("memory store cannot fail: {e}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn counts_up_within_a_window() {
        let store = MemoryQuotaStore::new();
        assert_eq!(bump(&store, "k").await.count, 1);
        assert_eq!(bump(&store, "k").await.count, 2);
        let third = bump(&store, "k").await;
        assert_eq!(third.count, 3);
        assert_eq!(third.ttl, WINDOW, "paused clock: no time has passed");
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_independent() {
        let store = MemoryQuotaStore::new();
        bump(&store, "a").await;
        bump(&store, "a").await;
        assert_eq!(bump(&store, "b").await.count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn window_resets_at_boundary() {
        let store = MemoryQuotaStore::new();
        bump(&store, "k").await;
        tokio::time::advance(Duration::from_secs(59)).await;
        let late = bump(&store, "k").await;
        assert_eq!(late.count, 2);
        assert_eq!(late.ttl, Duration::from_secs(1));

        tokio::time::advance(Duration::from_secs(1)).await;
        let fresh = bump(&store, "k").await;
        assert_eq!(fresh.count, 1, "boundary request sees a fresh counter");
        assert_eq!(fresh.ttl, WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_forgets_idle_windows() {
        let store = MemoryQuotaStore::new();
        bump(&store, "idle").await;
        tokio::time::advance(Duration::from_secs(30)).await;
        bump(&store, "busy").await;
        tokio::time::advance(Duration::from_secs(31)).await;

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
    }
}
