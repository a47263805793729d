//! Redis-backed quota store shared by every gateway instance.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;

use crate::store::{QuotaStore, WindowCount};
use crate::StoreError;

/// Namespace for quota keys.
const KEY_PREFIX: &str = "bastion:quota:";

/// INCR and PEXPIRE in one round trip.
///
/// The expiry is set on the first increment only, so the window length is
/// fixed from the first request. A key left without a TTL (e.g. after a
/// partial write) is given one instead of living forever.
const INCREMENT_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {count, ttl}
";

/// Quota counters in Redis, incremented through a Lua script.
#[derive(Clone)]
pub struct RedisQuotaStore {
    connection: ConnectionManager,
    script: Script,
}

impl RedisQuotaStore {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379`).
    ///
    /// # Errors
    /// Returns [`StoreError::Redis`] if the URL is invalid or the first
    /// connection fails.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        tracing::info!("connected to redis quota store");
        Ok(Self { connection, script: Script::new(INCREMENT_SCRIPT) })
    }
}

impl std::fmt::Debug for RedisQuotaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisQuotaStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl QuotaStore for RedisQuotaStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(1);
        let mut connection = self.connection.clone();
        let (count, ttl_ms): (i64, i64) = self
            .script
            .key(format!("{KEY_PREFIX}{key}"))
            .arg(window_ms)
            .invoke_async(&mut connection)
            .await?;

        let count = u64::try_from(count)
            .map_err(|_| StoreError::Protocol(format!("negative count {count}")))?;
        let ttl = Duration::from_millis(u64::try_from(ttl_ms).unwrap_or(0));
        Ok(WindowCount { count, ttl })
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_rejects_invalid_url() {
        let result = RedisQuotaStore::connect("not a url").await;
        assert!(matches!(result, Err(StoreError::Redis(_))));
    }

    #[tokio::test]
    #[ignore = "requires a Redis server at BASTION_TEST_REDIS_URL"]
    async fn redis_window_counts_and_expires() {
        let Ok(url) = std::env::var("BASTION_TEST_REDIS_URL") else {
            panic!("BASTION_TEST_REDIS_URL not set");
        };
        let store = match RedisQuotaStore::connect(&url).await {
            Ok(s) => s,
            Err(e) => panic!("connect failed: {e}"),
        };
        let key = format!("test:{}", std::process::id());
        let window = Duration::from_millis(500);

        for expected in 1..=3 {
            match store.increment(&key, window).await {
                Ok(c) => {
                    assert_eq!(c.count, expected);
                    assert!(c.ttl <= window);
                }
                Err(e) => panic!("increment failed: {e}"),
            }
        }

        tokio::time::sleep(Duration::from_millis(600)).await;
        match store.increment(&key, window).await {
            Ok(c) => assert_eq!(c.count, 1, "expired key starts a new window"),
            Err(e) => panic!("increment failed: {e}"),
        }
    }
}
