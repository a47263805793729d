//! Error types for the quota stores.

/// Failures talking to the shared counter store.
///
/// None of these reach the caller: the limiter fails open on every variant.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The store did not answer within the configured timeout.
    #[error("quota store timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// The store is unreachable or refused the operation.
    #[error("quota store unavailable: {0}")]
    Unavailable(String),

    /// The store answered with something that is not a window count.
    #[error("unexpected quota store reply: {0}")]
    Protocol(String),

    /// Underlying Redis error.
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
}
