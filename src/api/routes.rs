//! API Routes
//!
//! Assembles the proxy router and the standalone metrics router.

use axum::{
    extract::Request,
    middleware::from_fn_with_state,
    routing::get,
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{info_span, Level, Span};

use super::handlers::{
    health_handler, proxy_handler, ready_handler, stats_handler, AppState, StatsState,
};
use super::middleware::{metrics_middleware, rate_limit_middleware};

const X_REQUEST_ID: &str = "x-request-id";

/// Creates the proxy router.
///
/// # Endpoints
/// - `GET /health` - Liveness probe
/// - `GET /ready` - Readiness probe
/// - everything else - Cache lookup, then upstream dispatch
///
/// # Middleware
/// Outermost first: request id, request tracing, metrics, rate limiting.
/// Health probes pass through the same chain.
pub fn create_router(state: AppState) -> Router {
    let pipeline = ServiceBuilder::new()
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(request_span)
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(from_fn_with_state(state.clone(), metrics_middleware))
        .layer(from_fn_with_state(state.clone(), rate_limit_middleware));

    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .fallback(proxy_handler)
        .layer(pipeline)
        .with_state(state)
}

/// Creates the router serving the Prometheus exposition at `path`.
pub fn create_metrics_router(path: &str, state: StatsState) -> Router {
    Router::new()
        .route(path, get(stats_handler))
        .with_state(state)
}

fn request_span(request: &Request) -> Span {
    let request_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");

    info_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
        request_id = %request_id,
    )
}
