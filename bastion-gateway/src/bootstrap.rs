//! Assemble a [`Pipeline`] from configuration.

use std::sync::Arc;

use bastion_auth::{ClaimsResolver, RevocationList, StaticTrustProvider, TrustedKey};
use bastion_core::GatewayMetrics;
use bastion_limiter::{MemoryQuotaStore, QuotaStore, RateLimiter, RedisQuotaStore};
use bastion_router::{BreakerTable, HyperUpstream, RoutingEngine, Upstream};

use crate::config::{ConfigError, GatewayConfig, RuntimeEnv};
use crate::pipeline::Pipeline;

/// Build the production pipeline: keys from the environment, Redis counters
/// when `BASTION_REDIS_URL` is set, and the pooled hyper client.
///
/// # Errors
/// Returns [`ConfigError`] if keys are missing or unusable, or Redis is
/// unreachable.
pub async fn from_env(config: &GatewayConfig, env: &RuntimeEnv, metrics: GatewayMetrics) -> Result<Pipeline, ConfigError> {
    let keys = env.trusted_keys()?;
    let store: Arc<dyn QuotaStore> = match &env.redis_url {
        Some(url) => {
            let store = RedisQuotaStore::connect(url).await?;
            tracing::info!("quota counters shared through redis");
            Arc::new(store)
        }
        None => {
            tracing::warn!("BASTION_REDIS_URL unset; quota counters are local to this instance");
            Arc::new(MemoryQuotaStore::new())
        }
    };
    assemble(config, keys, store, Arc::new(HyperUpstream::new()), metrics).await
}

/// Build a pipeline from explicit parts.
///
/// # Errors
/// Returns [`ConfigError`] if the configuration is inconsistent or the
/// trust material does not compile.
pub async fn assemble(
    config: &GatewayConfig,
    keys: Vec<TrustedKey>,
    store: Arc<dyn QuotaStore>,
    upstream: Arc<dyn Upstream>,
    metrics: GatewayMetrics,
) -> Result<Pipeline, ConfigError> {
    config.validate()?;

    let provider = Arc::new(StaticTrustProvider::new(config.trust_material(keys)));
    let resolver = ClaimsResolver::new(
        provider,
        config.resolver_settings(),
        Arc::new(RevocationList::new()),
        metrics.clone(),
    )
    .await?;

    let limiter = RateLimiter::new(store, config.quota.clone(), metrics.clone());
    let breakers = BreakerTable::new(config.breaker.clone(), metrics.clone());
    let engine = RoutingEngine::new(Arc::new(config.discovery()?), upstream, breakers, metrics.clone())
        .with_default_timeout(config.upstream.default_timeout());

    tracing::info!(
        routes = config.routes.len(),
        backends = config.backends.len(),
        "pipeline assembled"
    );
    Ok(Pipeline::new(
        Arc::new(resolver),
        config.auth.public_paths.clone(),
        config.routes.clone(),
        Arc::new(limiter),
        Arc::new(engine),
        metrics,
    )
    .with_max_body_bytes(config.upstream.max_body_bytes)
    .with_logout_path(config.auth.logout_path.clone()))
}
