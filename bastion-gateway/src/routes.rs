//! Axum router for the gateway.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tower_http::trace::TraceLayer;

use crate::pipeline::Pipeline;

/// Build the application router. Everything except `/health` goes through
/// the pipeline.
pub fn create_router(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .route("/health", get(health))
        .fallback(proxy)
        .with_state(pipeline)
        .layer(TraceLayer::new_for_http())
}

/// `GET /health`: liveness check.
pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
}

/// Catch-all: run the request through the pipeline.
pub async fn proxy(State(pipeline): State<Arc<Pipeline>>, request: Request) -> Response {
    let peer = request.extensions().get::<ConnectInfo<SocketAddr>>().map(|info| info.0);
    pipeline.handle(request, peer).await
}
