//! The per-request pipeline.
//!
//! Stages run in the fixed order of [`Pipeline::STAGES`]; any stage may end
//! the request with a [`GatewayError`]. Only the route stage produces a
//! backend response.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, request::Parts, HeaderValue, Request};
use axum::response::{IntoResponse, Response};
use bastion_auth::{authorize, AuthError, ClaimsResolver, Decision, PublicPaths};
use bastion_core::{GatewayMetrics, Identity, RequestId, RouteDescriptor, RouteTable};
use bastion_limiter::{ClientKey, QuotaSnapshot, RateDecision, RateLimiter};
use bastion_router::{ForwardContext, RoutingEngine, UpstreamRequest, UpstreamResponse, REQUEST_ID_HEADER};
use http_body_util::LengthLimitError;

use crate::error::{apply_quota_headers, GatewayError};

/// One step of request processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Resolve the bearer credential, or admit anonymously on a public path.
    Authenticate,
    /// Match the route and check the caller's roles.
    Authorize,
    /// Count the request against the caller's quota.
    RateLimit,
    /// Forward to the backend with retries and circuit breaking.
    Route,
}

impl Stage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Authenticate => "authenticate",
            Stage::Authorize => "authorize",
            Stage::RateLimit => "rate_limit",
            Stage::Route => "route",
        }
    }
}

/// What the stages have learned about one request so far.
///
/// The body is kept out of here: it is not `Sync`, and stages hold shared
/// borrows of the exchange across awaits.
struct Exchange<'p> {
    request_id: RequestId,
    parts: Parts,
    peer: Option<SocketAddr>,
    identity: Identity,
    route: Option<&'p RouteDescriptor>,
    quota: Option<QuotaSnapshot>,
}

impl Exchange<'_> {
    fn path(&self) -> &str {
        self.parts.uri.path()
    }
}

/// The composed request pipeline. Shared state is injected at construction.
pub struct Pipeline {
    resolver: Arc<ClaimsResolver>,
    public_paths: PublicPaths,
    routes: RouteTable,
    limiter: Arc<RateLimiter>,
    engine: Arc<RoutingEngine>,
    metrics: GatewayMetrics,
    max_body_bytes: usize,
    logout_path: Option<String>,
}

impl Pipeline {
    /// Processing order for every request.
    pub const STAGES: [Stage; 4] = [Stage::Authenticate, Stage::Authorize, Stage::RateLimit, Stage::Route];

    #[must_use]
    pub fn new(
        resolver: Arc<ClaimsResolver>,
        public_paths: PublicPaths,
        routes: RouteTable,
        limiter: Arc<RateLimiter>,
        engine: Arc<RoutingEngine>,
        metrics: GatewayMetrics,
    ) -> Self {
        Self {
            resolver,
            public_paths,
            routes,
            limiter,
            engine,
            metrics,
            max_body_bytes: 1024 * 1024,
            logout_path: None,
        }
    }

    /// Builder: largest request body buffered for forwarding.
    #[must_use]
    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    /// Builder: revoke the caller's credential after a successful call to `path`.
    #[must_use]
    pub fn with_logout_path(mut self, path: Option<String>) -> Self {
        self.logout_path = path;
        self
    }

    #[must_use]
    pub fn resolver(&self) -> &Arc<ClaimsResolver> {
        &self.resolver
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<RoutingEngine> {
        &self.engine
    }

    /// Purge expired revocations, cached claims and quota windows.
    pub fn sweep(&self) {
        let (revoked, cached) = self.resolver.sweep();
        let windows = self.limiter.sweep();
        tracing::debug!(revoked, cached, windows, "sweep complete");
    }

    /// Run `request` through every stage and produce the response.
    pub async fn handle(&self, request: Request<Body>, peer: Option<SocketAddr>) -> Response {
        let (parts, body) = request.into_parts();
        let mut exchange = Exchange {
            request_id: RequestId::new(),
            parts,
            peer,
            identity: Identity::Anonymous,
            route: None,
            quota: None,
        };

        let mut response = match self.run(&mut exchange, body).await {
            Ok(response) => response,
            Err(e) => {
                tracing::info!(
                    request_id = %exchange.request_id,
                    method = %exchange.parts.method,
                    path = %exchange.path(),
                    status = e.status().as_u16(),
                    error = e.class(),
                    detail = %e,
                    "request refused"
                );
                e.into_response()
            }
        };

        let headers = response.headers_mut();
        if let Some(quota) = &exchange.quota {
            apply_quota_headers(headers, quota);
        }
        if let Ok(id) = HeaderValue::from_str(&exchange.request_id.to_string()) {
            headers.insert(REQUEST_ID_HEADER, id);
        }
        response
    }

    async fn run<'p>(&'p self, exchange: &mut Exchange<'p>, body: Body) -> Result<Response, GatewayError> {
        canonicalize(&mut exchange.parts)?;
        let mut body = Some(body);
        for stage in Self::STAGES {
            if let Some(response) = self.step(stage, exchange, &mut body).await? {
                return Ok(response);
            }
        }
        Err(GatewayError::Internal("pipeline finished without a response".to_owned()))
    }

    async fn step<'p>(
        &'p self,
        stage: Stage,
        exchange: &mut Exchange<'p>,
        body: &mut Option<Body>,
    ) -> Result<Option<Response>, GatewayError> {
        tracing::trace!(request_id = %exchange.request_id, stage = stage.as_str(), "entering stage");
        match stage {
            Stage::Authenticate => {
                exchange.identity = self.authenticate(exchange)?;
                Ok(None)
            }
            Stage::Authorize => {
                exchange.route = Some(self.authorize(exchange)?);
                Ok(None)
            }
            Stage::RateLimit => {
                let quota = self.rate_limit(exchange).await?;
                exchange.quota = Some(quota);
                Ok(None)
            }
            Stage::Route => {
                let body = body.take().unwrap_or_else(Body::empty);
                self.forward(exchange, body).await.map(Some)
            }
        }
    }

    fn authenticate(&self, exchange: &Exchange<'_>) -> Result<Identity, GatewayError> {
        if self.public_paths.is_public(exchange.path()) {
            return Ok(Identity::Anonymous);
        }
        let raw = match exchange.parts.headers.get(header::AUTHORIZATION) {
            Some(value) => Some(
                value
                    .to_str()
                    .map_err(|_| AuthError::Malformed("authorization header is not ASCII".to_owned()))?,
            ),
            None => None,
        };
        let claims = self.resolver.resolve(raw)?;
        Ok(Identity::Authenticated(claims))
    }

    fn authorize<'p>(&'p self, exchange: &Exchange<'_>) -> Result<&'p RouteDescriptor, GatewayError> {
        match authorize(&exchange.identity, &self.routes, exchange.path(), exchange.parts.method.as_str()) {
            Decision::Allow(route) => {
                self.metrics.record_authz("allow");
                Ok(route)
            }
            Decision::Deny(reason) => {
                self.metrics.record_authz(reason.label());
                Err(GatewayError::Denied(reason))
            }
        }
    }

    async fn rate_limit(&self, exchange: &Exchange<'_>) -> Result<QuotaSnapshot, GatewayError> {
        let route = exchange.route.ok_or_else(|| GatewayError::Internal("rate limit before authorize".to_owned()))?;
        let client = ClientKey::derive(&exchange.identity, &exchange.parts.headers, exchange.peer.map(|p| p.ip()));
        match self.limiter.admit(&exchange.identity, &client, route).await {
            RateDecision::Admitted { quota, .. } => Ok(quota),
            RateDecision::Rejected { quota, retry_after_secs } => {
                Err(GatewayError::RateLimited { quota, retry_after_secs })
            }
        }
    }

    async fn forward(&self, exchange: &Exchange<'_>, body: Body) -> Result<Response, GatewayError> {
        let route = exchange
            .route
            .cloned()
            .ok_or_else(|| GatewayError::Internal("route before authorize".to_owned()))?;
        let body = self.buffer(&exchange.parts, body).await?;

        let uri = exchange
            .parts
            .uri
            .path_and_query()
            .cloned()
            .map_or_else(|| http::Uri::from_static("/"), http::Uri::from);
        let mut request = UpstreamRequest::new(exchange.parts.method.clone(), uri).with_body(body);
        request.headers = exchange.parts.headers.clone();

        let ctx = ForwardContext {
            request_id: exchange.request_id,
            subject: exchange.identity.subject().cloned(),
        };

        // Runs detached: a client disconnect must not cancel the backend call.
        let engine = Arc::clone(&self.engine);
        let task = tokio::spawn(async move { engine.route(&route, request, &ctx).await });
        let upstream = task.await.map_err(|e| GatewayError::Internal(format!("routing task: {e}")))??;

        if upstream.status.is_success() {
            self.revoke_on_logout(exchange);
        }
        Ok(into_response(upstream))
    }

    async fn buffer(&self, parts: &Parts, body: Body) -> Result<axum::body::Bytes, GatewayError> {
        let limit = self.max_body_bytes;
        let declared = parts
            .headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared.is_some_and(|len| len > limit) {
            return Err(GatewayError::PayloadTooLarge { limit });
        }
        axum::body::to_bytes(body, limit).await.map_err(|e| {
            let inner = e.into_inner();
            if inner.is::<LengthLimitError>() {
                GatewayError::PayloadTooLarge { limit }
            } else {
                GatewayError::InvalidRequest(format!("cannot read body: {inner}"))
            }
        })
    }

    fn revoke_on_logout(&self, exchange: &Exchange<'_>) {
        let Some(logout) = self.logout_path.as_deref() else {
            return;
        };
        if exchange.path() != logout {
            return;
        }
        if let Some(claims) = exchange.identity.claims() {
            self.resolver.revoke(claims);
            tracing::info!(
                request_id = %exchange.request_id,
                subject = %claims.subject,
                "credential revoked on logout"
            );
        }
    }
}

/// Rewrite the request path into canonical form before any stage sees it.
///
/// Repeated slashes collapse. Dot segments and percent-encoded `.`, `/` or
/// `\` are refused, so prefix matching and the backend see the same path.
fn canonicalize(parts: &mut Parts) -> Result<(), GatewayError> {
    let path = canonical_path(parts.uri.path())?;
    if path == parts.uri.path() {
        return Ok(());
    }
    let target = match parts.uri.query() {
        Some(query) => format!("{path}?{query}"),
        None => path,
    };
    parts.uri = target
        .parse()
        .map_err(|e| GatewayError::InvalidRequest(format!("invalid request path: {e}")))?;
    Ok(())
}

fn canonical_path(path: &str) -> Result<String, GatewayError> {
    let lowered = path.to_ascii_lowercase();
    if ["%2e", "%2f", "%5c"].iter().any(|encoded| lowered.contains(encoded)) {
        return Err(GatewayError::InvalidRequest("encoded separator in request path".to_owned()));
    }
    if path.contains('\\') {
        return Err(GatewayError::InvalidRequest("backslash in request path".to_owned()));
    }

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.iter().any(|s| *s == "." || *s == "..") {
        return Err(GatewayError::InvalidRequest("dot segment in request path".to_owned()));
    }

    let mut canonical = String::with_capacity(path.len());
    for segment in &segments {
        canonical.push('/');
        canonical.push_str(segment);
    }
    if canonical.is_empty() || (path.ends_with('/') && !segments.is_empty()) {
        canonical.push('/');
    }
    Ok(canonical)
}

fn into_response(upstream: UpstreamResponse) -> Response {
    let mut response = Response::new(Body::from(upstream.body));
    *response.status_mut() = upstream.status;
    *response.headers_mut() = upstream.headers;
    response
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("routes", &self.routes.len())
            .field("max_body_bytes", &self.max_body_bytes)
            .finish_non_exhaustive()
    }
}
