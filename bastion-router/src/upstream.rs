//! Outbound HTTP abstraction.
//!
//! The engine talks to backends through [`Upstream`] so tests can swap in a
//! scripted backend. [`HyperUpstream`] is the production client.

use async_trait::async_trait;
use http::{HeaderMap, Method, Request, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::UpstreamError;

/// A fully buffered request, replayable across retries.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    /// Absolute URI once the engine has resolved the backend; origin-form
    /// (path and query) on the way in.
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl UpstreamRequest {
    #[must_use]
    pub fn new(method: Method, uri: Uri) -> Self {
        Self { method, uri, headers: HeaderMap::new(), body: Bytes::new() }
    }

    /// Builder: replace the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

/// A fully buffered backend response.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl UpstreamResponse {
    #[must_use]
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self { status, headers: HeaderMap::new(), body: body.into() }
    }
}

/// Sends one request to one backend instance.
///
/// Implementations must not retry or apply timeouts; the engine owns both.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Send `request` and buffer the response.
    ///
    /// # Errors
    /// Returns [`UpstreamError`] if no response was received.
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError>;
}

/// Pooled HTTP/1 client built on `hyper-util`.
#[derive(Clone)]
pub struct HyperUpstream {
    client: Client<HttpConnector, Full<Bytes>>,
}

impl HyperUpstream {
    #[must_use]
    pub fn new() -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        Self { client: Client::builder(TokioExecutor::new()).build(connector) }
    }
}

impl Default for HyperUpstream {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HyperUpstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperUpstream").finish_non_exhaustive()
    }
}

#[async_trait]
impl Upstream for HyperUpstream {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        let mut outbound = Request::builder()
            .method(request.method)
            .uri(request.uri)
            .body(Full::new(request.body))
            .map_err(|e| UpstreamError::Connect(format!("build request: {e}")))?;
        *outbound.headers_mut() = request.headers;

        let response = self
            .client
            .request(outbound)
            .await
            .map_err(|e| UpstreamError::Connect(e.to_string()))?;

        let (parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| UpstreamError::Body(e.to_string()))?
            .to_bytes();

        Ok(UpstreamResponse { status: parts.status, headers: parts.headers, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_backend_is_connect_error() {
        let upstream = HyperUpstream::new();
        let uri: Uri = match "http://127.0.0.1:1/health".parse() {
            Ok(u) => u,
            Err(e) => panic!("uri: {e}"),
        };
        let result = upstream.send(UpstreamRequest::new(Method::GET, uri)).await;
        assert!(matches!(result, Err(UpstreamError::Connect(_))), "got {result:?}");
    }
}
