//! Bounded, time-limited cache of verified claims keyed by raw token.

use std::num::NonZeroUsize;
use std::time::Duration;

use bastion_core::VerifiedClaims;
use lru::LruCache;
use parking_lot::Mutex;
use tokio::time::Instant;

struct CacheEntry {
    claims: VerifiedClaims,
    expires_at: Instant,
}

/// LRU of verified claims.
///
/// Entries are immutable once written and re-validating a token produces an
/// equivalent entry, so concurrent writers simply race and the last one wins.
/// The lock is held only for the map operation itself.
pub struct ClaimsCache {
    inner: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
}

impl ClaimsCache {
    /// Create a cache holding at most `capacity` entries for at most `ttl` each.
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self { inner: Mutex::new(LruCache::new(capacity)), ttl }
    }

    /// Configured upper bound on entry lifetime.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh claims for `token`, dropping the entry if it has aged out.
    pub fn get(&self, token: &str) -> Option<VerifiedClaims> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let found = inner.get(token).map(|e| (e.expires_at > now, e.claims.clone()));
        match found {
            Some((true, claims)) => Some(claims),
            Some((false, _)) => {
                inner.pop(token);
                None
            }
            None => None,
        }
    }

    /// Store `claims` for at most `min(ttl, remaining)`.
    pub fn insert(&self, token: &str, claims: VerifiedClaims, remaining: Duration) {
        let lifetime = self.ttl.min(remaining);
        if lifetime.is_zero() {
            return;
        }
        let entry = CacheEntry { claims, expires_at: Instant::now() + lifetime };
        self.inner.lock().put(token.to_owned(), entry);
    }

    /// Drop the entry for `token`, if present.
    pub fn remove(&self, token: &str) {
        self.inner.lock().pop(token);
    }

    /// Drop every aged-out entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let stale: Vec<String> = inner
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(token, _)| token.clone())
            .collect();
        for token in &stale {
            inner.pop(token);
        }
        stale.len()
    }

    /// Number of resident entries, fresh or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// `true` if no entries are resident.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use bastion_core::{Subject, TokenId};
    use chrono::Utc;

    use super::*;

    fn claims(jti: &str) -> VerifiedClaims {
        let now = Utc::now();
        VerifiedClaims::new(
            Subject::new("alice"),
            "issuer".to_owned(),
            now,
            now + chrono::Duration::hours(1),
            vec![],
            TokenId::new(jti),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn entry_expires_after_ttl() {
        let cache = ClaimsCache::new(8, Duration::from_secs(60));
        cache.insert("tok", claims("a"), Duration::from_secs(3600));
        assert!(cache.get("tok").is_some());
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get("tok").is_none(), "entry must age out after ttl");
        assert!(cache.is_empty(), "aged-out entry is dropped on read");
    }

    #[tokio::test(start_paused = true)]
    async fn lifetime_never_exceeds_token_remaining() {
        let cache = ClaimsCache::new(8, Duration::from_secs(300));
        cache.insert("tok", claims("a"), Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(cache.get("tok").is_none());
    }

    #[test]
    fn capacity_bounds_resident_entries() {
        let cache = ClaimsCache::new(2, Duration::from_secs(60));
        for i in 0..5 {
            cache.insert(&format!("tok-{i}"), claims("x"), Duration::from_secs(60));
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.get("tok-4").is_some(), "most recent entry must survive");
        assert!(cache.get("tok-0").is_none(), "oldest entry must be evicted");
    }

    #[test]
    fn zero_remaining_is_not_cached() {
        let cache = ClaimsCache::new(2, Duration::from_secs(60));
        cache.insert("tok", claims("x"), Duration::ZERO);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn purge_removes_only_stale_entries() {
        let cache = ClaimsCache::new(8, Duration::from_secs(60));
        cache.insert("short", claims("a"), Duration::from_secs(5));
        cache.insert("long", claims("b"), Duration::from_secs(600));
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.get("long").is_some());
    }
}
