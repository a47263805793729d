//! Which ceiling applies to a caller on a given path.

use std::collections::BTreeMap;
use std::time::Duration;

use bastion_core::{Identity, Role};
use serde::{Deserialize, Serialize};

/// Window length and ceilings, usually the `quota` section of the gateway
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct QuotaPolicy {
    /// Fixed window (refill interval) in seconds.
    pub window_secs: u64,
    /// Ceiling for authenticated callers whose roles carry none.
    pub default_ceiling: u64,
    /// Ceiling for anonymous callers, keyed by network address.
    pub anonymous_ceiling: u64,
    /// Per-role ceilings; a caller gets the highest among its roles.
    pub role_ceilings: BTreeMap<Role, u64>,
    /// How long to wait for the store before failing open, in milliseconds.
    pub store_timeout_ms: u64,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            window_secs: 60,
            default_ceiling: 100,
            anonymous_ceiling: 30,
            role_ceilings: BTreeMap::new(),
            store_timeout_ms: 100,
        }
    }
}

impl QuotaPolicy {
    /// Builder: window length.
    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window_secs = window.as_secs().max(1);
        self
    }

    /// Builder: ceilings for authenticated and anonymous callers.
    #[must_use]
    pub fn with_ceilings(mut self, default_ceiling: u64, anonymous_ceiling: u64) -> Self {
        self.default_ceiling = default_ceiling;
        self.anonymous_ceiling = anonymous_ceiling;
        self
    }

    /// Builder: ceiling for callers holding `role`.
    #[must_use]
    pub fn with_role_ceiling(mut self, role: impl Into<Role>, ceiling: u64) -> Self {
        self.role_ceilings.insert(role.into(), ceiling);
        self
    }

    /// Builder: store timeout.
    #[must_use]
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs.max(1))
    }

    #[must_use]
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Ceiling granted by the caller's roles alone.
    #[must_use]
    pub fn role_ceiling(&self, identity: &Identity) -> u64 {
        match identity {
            Identity::Anonymous => self.anonymous_ceiling,
            Identity::Authenticated(claims) => claims
                .roles
                .iter()
                .filter_map(|r| self.role_ceilings.get(r))
                .max()
                .copied()
                .unwrap_or(self.default_ceiling),
        }
    }

    /// Effective ceiling: the role ceiling, lowered to the path ceiling when
    /// the route sets one.
    #[must_use]
    pub fn ceiling_for(&self, identity: &Identity, path_ceiling: Option<u64>) -> u64 {
        let role = self.role_ceiling(identity);
        path_ceiling.map_or(role, |path| role.min(path))
    }
}

#[cfg(test)]
mod tests {
    use bastion_core::{Subject, TokenId, VerifiedClaims};
    use chrono::Utc;

    use super::*;

    fn caller(roles: &[&str]) -> Identity {
        let now = Utc::now();
        Identity::Authenticated(VerifiedClaims::new(
            Subject::new("u"),
            "iss".to_owned(),
            now,
            now + chrono::Duration::minutes(1),
            roles.iter().map(|r| Role::new(*r)).collect(),
            TokenId::new("t"),
        ))
    }

    fn policy() -> QuotaPolicy {
        QuotaPolicy::default()
            .with_ceilings(100, 20)
            .with_role_ceiling("premium", 1_000)
            .with_role_ceiling("admin", 5_000)
    }

    #[test]
    fn highest_role_ceiling_wins() {
        assert_eq!(policy().role_ceiling(&caller(&["premium", "admin"])), 5_000);
        assert_eq!(policy().role_ceiling(&caller(&["premium", "customer"])), 1_000);
    }

    #[test]
    fn roles_without_ceiling_fall_back_to_default() {
        assert_eq!(policy().role_ceiling(&caller(&["customer"])), 100);
        assert_eq!(policy().role_ceiling(&caller(&[])), 100);
    }

    #[test]
    fn anonymous_uses_anonymous_ceiling() {
        assert_eq!(policy().role_ceiling(&Identity::Anonymous), 20);
    }

    #[test]
    fn path_ceiling_lowers_but_never_raises() {
        let admin = caller(&["admin"]);
        assert_eq!(policy().ceiling_for(&admin, Some(10)), 10);
        assert_eq!(policy().ceiling_for(&Identity::Anonymous, Some(10_000)), 20);
        assert_eq!(policy().ceiling_for(&admin, None), 5_000);
    }

    #[test]
    fn deserializes_partial_document() {
        let policy: QuotaPolicy = match serde_json::from_str(
            r#"{"window_secs": 10, "role_ceilings": {"premium": 500}}"#,
        ) {
            Ok(p) => p,
            Err(e) => panic!("parse failed: {e}"),
        };
        assert_eq!(policy.window(), Duration::from_secs(10));
        assert_eq!(policy.default_ceiling, 100);
        assert_eq!(policy.role_ceilings.get(&Role::new("premium")), Some(&500));
    }
}
