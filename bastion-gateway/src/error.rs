//! Error types for the gateway crate.
//!
//! Every terminal pipeline outcome that is not a backend response becomes a
//! [`GatewayError`], rendered as `{"error", "message", "retry_after_secs"?}`.

use axum::{
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bastion_auth::{AuthError, DenyReason};
use bastion_limiter::QuotaSnapshot;
use bastion_router::RoutingError;
use serde_json::json;

/// Header set on circuit-open fallback responses.
pub const FALLBACK_HEADER: &str = "x-bastion-fallback";

/// Errors that terminate the request pipeline.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum GatewayError {
    /// The credential is missing or did not validate.
    #[error(transparent)]
    Unauthenticated(#[from] AuthError),

    /// Authorization refused the request.
    #[error(transparent)]
    Denied(#[from] DenyReason),

    /// The caller exhausted its quota for this window.
    #[error("rate limit of {} requests exceeded", .quota.limit)]
    RateLimited { quota: QuotaSnapshot, retry_after_secs: u64 },

    /// Forwarding failed or was short-circuited.
    #[error(transparent)]
    Routing(#[from] RoutingError),

    /// The request body exceeds the buffering limit.
    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    /// The request could not be read.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Something inside the gateway failed.
    #[error("internal gateway error")]
    Internal(String),
}

impl GatewayError {
    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Denied(DenyReason::NotFound) => StatusCode::NOT_FOUND,
            GatewayError::Denied(_) => StatusCode::FORBIDDEN,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Routing(RoutingError::CircuitOpen { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Routing(RoutingError::InvalidRequest(_)) | GatewayError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::Routing(_) => StatusCode::BAD_GATEWAY,
            GatewayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable error class for the response body.
    #[must_use]
    pub fn class(&self) -> &'static str {
        match self {
            GatewayError::Unauthenticated(_) => "unauthenticated",
            GatewayError::Denied(DenyReason::NotFound) => "not_found",
            GatewayError::Denied(_) => "forbidden",
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::Routing(RoutingError::CircuitOpen { .. }) => "service_unavailable",
            GatewayError::Routing(RoutingError::InvalidRequest(_)) | GatewayError::InvalidRequest(_) => {
                "invalid_request"
            }
            GatewayError::Routing(_) => "upstream_unavailable",
            GatewayError::PayloadTooLarge { .. } => "payload_too_large",
            GatewayError::Internal(_) => "internal",
        }
    }

    /// Caller-facing message; never includes backend names or error detail.
    fn message(&self) -> String {
        match self {
            GatewayError::Routing(RoutingError::CircuitOpen { message, .. }) => message.clone(),
            GatewayError::Routing(RoutingError::InvalidRequest(_)) => "request cannot be forwarded".to_owned(),
            GatewayError::Routing(_) => "upstream service unavailable".to_owned(),
            GatewayError::Denied(DenyReason::NotFound) => "no route for this path".to_owned(),
            GatewayError::Unauthenticated(e) => match e {
                AuthError::MissingCredential => "missing bearer credential",
                AuthError::Expired => "credential has expired",
                AuthError::Revoked => "credential has been revoked",
                _ => "credential is not valid",
            }
            .to_owned(),
            other => other.to_string(),
        }
    }

    fn retry_after_secs(&self) -> Option<u64> {
        match self {
            GatewayError::RateLimited { retry_after_secs, .. } => Some(*retry_after_secs),
            GatewayError::Routing(RoutingError::CircuitOpen { retry_in, .. }) => {
                Some(retry_in.as_secs().max(1))
            }
            _ => None,
        }
    }
}

/// Write `x-ratelimit-*` headers for `quota`.
pub fn apply_quota_headers(headers: &mut HeaderMap, quota: &QuotaSnapshot) {
    headers.insert("x-ratelimit-limit", HeaderValue::from(quota.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(quota.remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(quota.reset_secs()));
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_after = self.retry_after_secs();
        let mut body = json!({"error": self.class(), "message": self.message()});
        if let Some(secs) = retry_after {
            body["retry_after_secs"] = json!(secs);
        }

        let mut response = (status, Json(body)).into_response();
        let headers = response.headers_mut();
        if let Some(secs) = retry_after {
            headers.insert(axum::http::header::RETRY_AFTER, HeaderValue::from(secs));
        }
        match &self {
            GatewayError::RateLimited { quota, .. } => apply_quota_headers(headers, quota),
            GatewayError::Routing(RoutingError::CircuitOpen { .. }) => {
                headers.insert(FALLBACK_HEADER, HeaderValue::from_static("circuit-open"));
            }
            _ => {}
        }
        if matches!(self, GatewayError::Unauthenticated(_)) {
            headers.insert(axum::http::header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}
