//! Fixed-window admission.
//!
//! Admission is one atomic increment-and-read against the store. A store
//! that errors or exceeds its timeout admits the request (fail open) and
//! records a `degraded` decision instead of surfacing an error.

use std::sync::Arc;
use std::time::Duration;

use bastion_core::{GatewayMetrics, Identity, RouteDescriptor};

use crate::client::ClientKey;
use crate::policy::QuotaPolicy;
use crate::store::{QuotaStore, WindowCount};
use crate::StoreError;

/// Quota state reported back to the caller in response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaSnapshot {
    /// Effective ceiling for this window.
    pub limit: u64,
    /// Requests left in this window.
    pub remaining: u64,
    /// Time until the window resets.
    pub reset_after: Duration,
}

impl QuotaSnapshot {
    /// Reset hint in whole seconds, rounded up.
    #[must_use]
    pub fn reset_secs(&self) -> u64 {
        let secs = self.reset_after.as_secs();
        if self.reset_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }
}

/// Outcome of [`RateLimiter::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Within quota, or the store was unavailable (`degraded`).
    Admitted { quota: QuotaSnapshot, degraded: bool },
    /// Ceiling exceeded for this window.
    Rejected { quota: QuotaSnapshot, retry_after_secs: u64 },
}

impl RateDecision {
    #[must_use]
    pub fn quota(&self) -> &QuotaSnapshot {
        match self {
            RateDecision::Admitted { quota, .. } | RateDecision::Rejected { quota, .. } => quota,
        }
    }

    #[must_use]
    pub fn is_admitted(&self) -> bool {
        matches!(self, RateDecision::Admitted { .. })
    }

    /// Counter label for this decision.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            RateDecision::Admitted { degraded: false, .. } => "admitted",
            RateDecision::Admitted { degraded: true, .. } => "degraded",
            RateDecision::Rejected { .. } => "rejected",
        }
    }
}

/// Distributed rate limiter over a [`QuotaStore`].
pub struct RateLimiter {
    store: Arc<dyn QuotaStore>,
    policy: QuotaPolicy,
    metrics: GatewayMetrics,
}

impl RateLimiter {
    #[must_use]
    pub fn new(store: Arc<dyn QuotaStore>, policy: QuotaPolicy, metrics: GatewayMetrics) -> Self {
        Self { store, policy, metrics }
    }

    #[must_use]
    pub fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }

    /// Decide whether `client` may make one more request on `route`.
    ///
    /// The quota key is `(client, route prefix)`; the ceiling is the
    /// caller's role ceiling lowered to the route's ceiling.
    pub async fn admit(&self, identity: &Identity, client: &ClientKey, route: &RouteDescriptor) -> RateDecision {
        let limit = self.policy.ceiling_for(identity, route.rate_ceiling);
        let key = client.quota_key(&route.prefix);

        let decision = match self.increment(&key).await {
            Ok(window) => judge(limit, window),
            Err(e) => {
                tracing::warn!(
                    store = self.store.name(),
                    path_class = %route.prefix,
                    error = %e,
                    "quota store unavailable; admitting in degraded mode"
                );
                RateDecision::Admitted {
                    quota: QuotaSnapshot { limit, remaining: limit, reset_after: self.policy.window() },
                    degraded: true,
                }
            }
        };

        if let RateDecision::Rejected { retry_after_secs, .. } = decision {
            tracing::info!(
                client = %client,
                path_class = %route.prefix,
                limit,
                retry_after_secs,
                "rate limit exceeded"
            );
        }
        self.metrics.record_ratelimit(decision.label());
        decision
    }

    async fn increment(&self, key: &str) -> Result<WindowCount, StoreError> {
        let timeout = self.policy.store_timeout();
        tokio::time::timeout(timeout, self.store.increment(key, self.policy.window()))
            .await
            .map_err(|_| StoreError::Timeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            })?
    }

    /// Drop elapsed windows from stores without native expiry.
    pub fn sweep(&self) -> usize {
        self.store.purge_expired()
    }
}

fn judge(limit: u64, window: WindowCount) -> RateDecision {
    if window.count <= limit {
        RateDecision::Admitted {
            quota: QuotaSnapshot {
                limit,
                remaining: limit - window.count,
                reset_after: window.ttl,
            },
            degraded: false,
        }
    } else {
        let quota = QuotaSnapshot { limit, remaining: 0, reset_after: window.ttl };
        RateDecision::Rejected { quota, retry_after_secs: quota.reset_secs().max(1) }
    }
}
