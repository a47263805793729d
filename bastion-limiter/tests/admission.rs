//! Integration test: admission decisions over the in-memory store, window
//! resets on a paused clock, concurrency bounds and fail-open behaviour.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bastion_core::{GatewayMetrics, Identity, RouteDescriptor};
use bastion_limiter::{
    ClientKey, MemoryQuotaStore, QuotaPolicy, QuotaStore, RateDecision, RateLimiter, StoreError,
    WindowCount,
};
use http::HeaderMap;

fn metrics() -> GatewayMetrics {
    match GatewayMetrics::new() {
        Ok(m) => m,
        Err(e) => panic!("metrics: {e}"),
    }
}

fn anonymous_client(addr: &str) -> ClientKey {
    let peer = addr.parse().ok();
    ClientKey::derive(&Identity::Anonymous, &HeaderMap::new(), peer)
}

fn limiter(store: Arc<dyn QuotaStore>, anonymous_ceiling: u64) -> (RateLimiter, GatewayMetrics) {
    let metrics = metrics();
    let policy = QuotaPolicy::default()
        .with_window(Duration::from_secs(60))
        .with_ceilings(1_000, anonymous_ceiling)
        .with_store_timeout(Duration::from_millis(50));
    (RateLimiter::new(store, policy, metrics.clone()), metrics)
}

#[tokio::test(start_paused = true)]
async fn hundred_and_first_request_is_rejected() {
    let (limiter, metrics) = limiter(Arc::new(MemoryQuotaStore::new()), 100);
    let route = RouteDescriptor::new("/api/v1/catalog", "catalog");
    let client = anonymous_client("203.0.113.7");

    for n in 1..=100u64 {
        let decision = limiter.admit(&Identity::Anonymous, &client, &route).await;
        assert!(decision.is_admitted(), "request {n} must be admitted");
        assert_eq!(decision.quota().remaining, 100 - n);
    }

    match limiter.admit(&Identity::Anonymous, &client, &route).await {
        RateDecision::Rejected { quota, retry_after_secs } => {
            assert_eq!(quota.limit, 100);
            assert_eq!(quota.remaining, 0);
            assert!(retry_after_secs > 0);
        }
        other => panic!("101st request must be rejected, got {other:?}"),
    }
    assert_eq!(metrics.ratelimit_count("admitted"), 100);
    assert_eq!(metrics.ratelimit_count("rejected"), 1);
}

#[tokio::test(start_paused = true)]
async fn rejection_is_monotone_within_a_window() {
    let (limiter, _) = limiter(Arc::new(MemoryQuotaStore::new()), 3);
    let route = RouteDescriptor::new("/api/v1/catalog", "catalog");
    let client = anonymous_client("203.0.113.7");

    for _ in 0..3 {
        assert!(limiter.admit(&Identity::Anonymous, &client, &route).await.is_admitted());
    }
    for _ in 0..5 {
        assert!(!limiter.admit(&Identity::Anonymous, &client, &route).await.is_admitted());
    }
}

#[tokio::test(start_paused = true)]
async fn window_boundary_starts_fresh_counter() {
    let (limiter, _) = limiter(Arc::new(MemoryQuotaStore::new()), 2);
    let route = RouteDescriptor::new("/api/v1/catalog", "catalog");
    let client = anonymous_client("203.0.113.7");

    limiter.admit(&Identity::Anonymous, &client, &route).await;
    limiter.admit(&Identity::Anonymous, &client, &route).await;
    let rejected = limiter.admit(&Identity::Anonymous, &client, &route).await;
    assert!(!rejected.is_admitted());

    tokio::time::advance(Duration::from_secs(60)).await;
    let fresh = limiter.admit(&Identity::Anonymous, &client, &route).await;
    assert!(fresh.is_admitted());
    assert_eq!(fresh.quota().remaining, 1, "only the post-boundary request is counted");
}

#[tokio::test(start_paused = true)]
async fn clients_and_path_classes_have_separate_counters() {
    let (limiter, _) = limiter(Arc::new(MemoryQuotaStore::new()), 1);
    let catalog = RouteDescriptor::new("/api/v1/catalog", "catalog");
    let auth = RouteDescriptor::new("/api/v1/auth", "auth");
    let a = anonymous_client("203.0.113.7");
    let b = anonymous_client("203.0.113.8");

    assert!(limiter.admit(&Identity::Anonymous, &a, &catalog).await.is_admitted());
    assert!(limiter.admit(&Identity::Anonymous, &a, &auth).await.is_admitted());
    assert!(limiter.admit(&Identity::Anonymous, &b, &catalog).await.is_admitted());
    assert!(!limiter.admit(&Identity::Anonymous, &a, &catalog).await.is_admitted());
}

#[tokio::test(start_paused = true)]
async fn path_ceiling_caps_generous_role() {
    let (limiter, _) = limiter(Arc::new(MemoryQuotaStore::new()), 1_000);
    let route = RouteDescriptor::new("/api/v1/payments", "payments").with_rate_ceiling(2);
    let client = anonymous_client("203.0.113.7");

    let first = limiter.admit(&Identity::Anonymous, &client, &route).await;
    assert_eq!(first.quota().limit, 2);
    limiter.admit(&Identity::Anonymous, &client, &route).await;
    assert!(!limiter.admit(&Identity::Anonymous, &client, &route).await.is_admitted());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_admissions_never_exceed_ceiling() {
    const CEILING: u64 = 10;
    const CALLERS: usize = 64;

    let (limiter, _) = limiter(Arc::new(MemoryQuotaStore::new()), CEILING);
    let limiter = Arc::new(limiter);
    let route = Arc::new(RouteDescriptor::new("/api/v1/catalog", "catalog"));
    let client = anonymous_client("203.0.113.7");

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..CALLERS {
        let limiter = Arc::clone(&limiter);
        let route = Arc::clone(&route);
        let client = client.clone();
        tasks.spawn(async move { limiter.admit(&Identity::Anonymous, &client, &route).await.is_admitted() });
    }

    let mut admitted = 0u64;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(true) => admitted += 1,
            Ok(false) => {}
            Err(e) => panic!("task failed: {e}"),
        }
    }
    assert_eq!(admitted, CEILING, "atomic store admits exactly the ceiling");
}

struct BrokenStore;

#[async_trait]
impl QuotaStore for BrokenStore {
    async fn increment(&self, _key: &str, _window: Duration) -> Result<WindowCount, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_owned()))
    }

    fn name(&self) -> &'static str {
        "broken"
    }
}

struct StalledStore;

#[async_trait]
impl QuotaStore for StalledStore {
    async fn increment(&self, _key: &str, _window: Duration) -> Result<WindowCount, StoreError> {
        tokio::time::sleep(Duration::from_secs(3_600)).await;
        Ok(WindowCount { count: 1, ttl: Duration::from_secs(60) })
    }

    fn name(&self) -> &'static str {
        "stalled"
    }
}

#[tokio::test]
async fn store_outage_fails_open() {
    let (limiter, metrics) = limiter(Arc::new(BrokenStore), 1);
    let route = RouteDescriptor::new("/api/v1/catalog", "catalog");
    let client = anonymous_client("203.0.113.7");

    for _ in 0..5 {
        match limiter.admit(&Identity::Anonymous, &client, &route).await {
            RateDecision::Admitted { degraded, quota } => {
                assert!(degraded);
                assert_eq!(quota.limit, 1);
            }
            other => panic!("outage must fail open, got {other:?}"),
        }
    }
    assert_eq!(metrics.ratelimit_count("degraded"), 5);
    assert_eq!(metrics.ratelimit_count("rejected"), 0);
}

#[tokio::test(start_paused = true)]
async fn store_timeout_fails_open() {
    let (limiter, metrics) = limiter(Arc::new(StalledStore), 1);
    let route = RouteDescriptor::new("/api/v1/catalog", "catalog");
    let client = anonymous_client("203.0.113.7");

    let decision = limiter.admit(&Identity::Anonymous, &client, &route).await;
    assert!(matches!(decision, RateDecision::Admitted { degraded: true, .. }));
    assert_eq!(metrics.ratelimit_count("degraded"), 1);
}

#[tokio::test(start_paused = true)]
async fn sweep_clears_idle_windows() {
    let store = Arc::new(MemoryQuotaStore::new());
    let (limiter, _) = limiter(store.clone(), 5);
    let route = RouteDescriptor::new("/api/v1/catalog", "catalog");
    limiter.admit(&Identity::Anonymous, &anonymous_client("203.0.113.7"), &route).await;
    assert_eq!(store.len(), 1);

    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(limiter.sweep(), 1);
    assert!(store.is_empty());
}
