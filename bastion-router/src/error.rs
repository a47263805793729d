//! Error types for the routing engine.

use std::time::Duration;

/// Errors that can occur while forwarding a request.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RoutingError {
    /// Service discovery knows no instance of the backend.
    #[error("no instance registered for backend {backend}")]
    NoBackend { backend: String },

    /// The breaker is short-circuiting; `message` is the route's fallback.
    #[error("circuit {breaker} is open")]
    CircuitOpen {
        breaker: String,
        message: String,
        retry_in: Duration,
    },

    /// Every permitted attempt failed with a 5xx or a connection error.
    #[error("backend {backend} failed after {attempts} attempt(s): {reason}")]
    RetriesExhausted {
        backend: String,
        attempts: u32,
        reason: String,
    },

    /// The last attempt exceeded its deadline.
    #[error("backend {backend} timed out after {timeout_ms} ms")]
    Timeout { backend: String, timeout_ms: u64 },

    /// The outbound request could not be built.
    #[error("invalid upstream request: {0}")]
    InvalidRequest(String),
}

/// A single failed exchange with a backend instance.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum UpstreamError {
    /// Connecting or sending failed.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The response body could not be read.
    #[error("reading response body: {0}")]
    Body(String),
}
