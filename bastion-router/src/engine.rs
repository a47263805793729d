//! Routing and failure isolation.
//!
//! For an admitted request the engine resolves the route's backend, forwards
//! the buffered request and applies the retry budget. Each attempt needs a
//! permit from the route's breaker; an open breaker ends the request with
//! the route's fallback instead of contacting the backend.

use std::sync::Arc;
use std::time::Duration;

use bastion_core::{GatewayMetrics, RequestId, RouteDescriptor, Subject};
use http::header::{self, HeaderName, HeaderValue};
use http::HeaderMap;
use tokio::time::Instant;

use crate::circuit::{BreakerTable, Outcome};
use crate::discovery::ServiceDiscovery;
use crate::upstream::{Upstream, UpstreamRequest, UpstreamResponse};
use crate::RoutingError;

/// Header carrying the gateway's request id downstream.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Header carrying the authenticated subject downstream.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Per-attempt timeout when the route sets none.
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause before retry `n` is `n` times this.
const RETRY_BACKOFF: Duration = Duration::from_millis(25);

/// Connection-scoped headers never forwarded in either direction.
static HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    HeaderName::from_static("keep-alive"),
];

/// Who is calling, as far as the backend needs to know.
#[derive(Debug, Clone)]
pub struct ForwardContext {
    pub request_id: RequestId,
    /// `None` for anonymous callers; any client-supplied `x-user-id` is removed.
    pub subject: Option<Subject>,
}

enum Failure {
    Status(http::StatusCode),
    Transport(String),
    Timeout,
}

/// Forwards admitted requests with retries and circuit breaking.
pub struct RoutingEngine {
    discovery: Arc<dyn ServiceDiscovery>,
    upstream: Arc<dyn Upstream>,
    breakers: BreakerTable,
    metrics: GatewayMetrics,
    default_timeout: Duration,
}

impl RoutingEngine {
    #[must_use]
    pub fn new(
        discovery: Arc<dyn ServiceDiscovery>,
        upstream: Arc<dyn Upstream>,
        breakers: BreakerTable,
        metrics: GatewayMetrics,
    ) -> Self {
        Self { discovery, upstream, breakers, metrics, default_timeout: DEFAULT_UPSTREAM_TIMEOUT }
    }

    /// Builder: timeout for routes without their own.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    #[must_use]
    pub fn breakers(&self) -> &BreakerTable {
        &self.breakers
    }

    /// Forward `request` along `route`.
    ///
    /// `request.uri` is the inbound origin-form URI; it is rebased onto the
    /// resolved instance for every attempt. Backend responses below 500 are
    /// returned as-is.
    ///
    /// # Errors
    /// - [`RoutingError::CircuitOpen`] when the breaker refuses an attempt.
    /// - [`RoutingError::NoBackend`] when discovery has no instance.
    /// - [`RoutingError::RetriesExhausted`] or [`RoutingError::Timeout`] when
    ///   every permitted attempt failed.
    pub async fn route(
        &self,
        route: &RouteDescriptor,
        mut request: UpstreamRequest,
        ctx: &ForwardContext,
    ) -> Result<UpstreamResponse, RoutingError> {
        let backend = route.backend.as_str();
        let breaker = route.breaker_name();
        let timeout = route.timeout().unwrap_or(self.default_timeout);
        let retries = route.retries_for(request.method.as_str());
        let path_and_query = request.uri.path_and_query().cloned();

        prepare_headers(&mut request.headers, ctx)?;
        self.metrics.record_route(backend);
        tracing::debug!(
            request_id = %ctx.request_id,
            backend,
            prefix = %route.prefix,
            retries,
            "routing request"
        );

        let mut last = Failure::Transport("no attempt made".to_owned());
        let mut attempts = 0u32;
        for attempt in 0..=retries {
            if attempt > 0 {
                self.metrics.record_retry(backend);
                tracing::info!(
                    request_id = %ctx.request_id,
                    backend,
                    attempt,
                    reason = %describe(&last),
                    "retrying upstream call"
                );
                tokio::time::sleep(RETRY_BACKOFF * attempt).await;
            }

            let endpoint = self.discovery.resolve(backend).await?;
            let mut outbound = request.clone();
            outbound.uri = endpoint.uri_for(path_and_query.as_ref())?;
            if let Ok(host) = HeaderValue::from_str(endpoint.authority().as_str()) {
                outbound.headers.insert(header::HOST, host);
            }

            let permit = match self.breakers.acquire(breaker) {
                Ok(permit) => permit,
                Err(open) => {
                    tracing::warn!(request_id = %ctx.request_id, breaker, "circuit open; serving fallback");
                    return Err(RoutingError::CircuitOpen {
                        breaker: breaker.to_owned(),
                        message: route.fallback_message(),
                        retry_in: open.retry_in,
                    });
                }
            };

            attempts += 1;
            let started = Instant::now();
            let result = tokio::time::timeout(timeout, self.upstream.send(outbound)).await;
            self.metrics.observe_upstream(backend, started.elapsed().as_secs_f64());

            last = match result {
                Ok(Ok(response)) if !response.status.is_server_error() => {
                    self.breakers.record(breaker, permit, Outcome::Success);
                    return Ok(strip_response(response));
                }
                Ok(Ok(response)) => Failure::Status(response.status),
                Ok(Err(e)) => Failure::Transport(e.to_string()),
                Err(_) => Failure::Timeout,
            };
            self.breakers.record(breaker, permit, Outcome::Failure);
        }

        tracing::warn!(
            request_id = %ctx.request_id,
            backend,
            attempts,
            reason = %describe(&last),
            "upstream unavailable"
        );
        Err(match last {
            Failure::Timeout => RoutingError::Timeout {
                backend: backend.to_owned(),
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            },
            other => RoutingError::RetriesExhausted {
                backend: backend.to_owned(),
                attempts,
                reason: describe(&other),
            },
        })
    }
}

fn describe(failure: &Failure) -> String {
    match failure {
        Failure::Status(status) => format!("status {status}"),
        Failure::Transport(e) => e.clone(),
        Failure::Timeout => "timeout".to_owned(),
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Gateway-owned headers overwrite whatever the client sent.
fn prepare_headers(headers: &mut HeaderMap, ctx: &ForwardContext) -> Result<(), RoutingError> {
    strip_hop_by_hop(headers);
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);

    let request_id = HeaderValue::from_str(&ctx.request_id.to_string())
        .map_err(|e| RoutingError::InvalidRequest(e.to_string()))?;
    headers.insert(REQUEST_ID_HEADER, request_id);

    match &ctx.subject {
        Some(subject) => {
            let value = HeaderValue::from_str(subject.as_str())
                .map_err(|e| RoutingError::InvalidRequest(format!("subject header: {e}")))?;
            headers.insert(USER_ID_HEADER, value);
        }
        None => {
            headers.remove(USER_ID_HEADER);
        }
    }
    Ok(())
}

fn strip_response(mut response: UpstreamResponse) -> UpstreamResponse {
    strip_hop_by_hop(&mut response.headers);
    response
}
