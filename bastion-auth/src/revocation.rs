//! Revoked token identifiers.

use bastion_core::TokenId;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Token identifiers invalidated before their natural expiry.
///
/// Append-only during normal operation; entries are purged once the original
/// token would have expired anyway.
#[derive(Debug, Default)]
pub struct RevocationList {
    entries: DashMap<TokenId, DateTime<Utc>>,
}

impl RevocationList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `jti` revoked until `expires_at`.
    pub fn revoke(&self, jti: TokenId, expires_at: DateTime<Utc>) {
        tracing::info!(jti = %jti, %expires_at, "token revoked");
        self.entries.insert(jti, expires_at);
    }

    /// `true` if `jti` has been revoked.
    #[must_use]
    pub fn is_revoked(&self, jti: &TokenId) -> bool {
        self.entries.contains_key(jti)
    }

    /// Forget entries whose token expired at or before `now`.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| *expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn revoked_token_is_reported() {
        let list = RevocationList::new();
        let jti = TokenId::new("abc");
        assert!(!list.is_revoked(&jti));
        list.revoke(jti.clone(), Utc::now() + Duration::hours(1));
        assert!(list.is_revoked(&jti));
        assert!(!list.is_revoked(&TokenId::new("other")));
    }

    #[test]
    fn purge_drops_only_past_expiry() {
        let list = RevocationList::new();
        let now = Utc::now();
        list.revoke(TokenId::new("old"), now - Duration::minutes(1));
        list.revoke(TokenId::new("live"), now + Duration::minutes(10));
        assert_eq!(list.purge_expired(now), 1);
        assert_eq!(list.len(), 1);
        assert!(list.is_revoked(&TokenId::new("live")));
    }

    #[test]
    fn concurrent_revocations_all_land() {
        let list = std::sync::Arc::new(RevocationList::new());
        let expires = Utc::now() + Duration::hours(1);
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let list = list.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        list.revoke(TokenId::new(format!("{t}-{i}")), expires);
                    }
                })
            })
            .collect();
        for h in handles {
            if let Err(e) = h.join() {
                panic!("revoker thread panicked: {e:?}");
            }
        }
        assert_eq!(list.len(), 800);
    }
}
