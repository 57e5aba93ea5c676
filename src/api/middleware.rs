//! Request pipeline middleware
//!
//! Metrics accounting and rate limit admission, run in that order ahead
//! of the proxy handler.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::HttpBody,
    extract::{ConnectInfo, Request, State},
    http::header::CONTENT_LENGTH,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use super::handlers::AppState;
use crate::error::ProxyError;
use crate::metrics::MetricsSink;
use crate::ratelimit::ClientInfo;

/// Keeps the active connection gauge balanced even when the request
/// future is dropped mid-flight.
struct ActiveConnection(Arc<dyn MetricsSink>);

impl ActiveConnection {
    fn open(metrics: Arc<dyn MetricsSink>) -> Self {
        metrics.inc_active_connections();
        Self(metrics)
    }
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        self.0.dec_active_connections();
    }
}

/// Records status, latency and sizes for every request, including those
/// rejected further down the pipeline.
pub async fn metrics_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let _active = ActiveConnection::open(state.metrics.clone());
    let started = Instant::now();

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_size = request
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);

    let response = next.run(request).await;

    let response_size = response.body().size_hint().exact().unwrap_or(0);
    state.metrics.record_request(
        &method,
        &path,
        response.status(),
        started.elapsed(),
        request_size,
        response_size,
    );

    response
}

/// Admits or rejects a request against the caller's token bucket.
///
/// Denied requests get 429 with `Retry-After` and never reach the cache
/// or the upstream.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(rate_limit) = &state.rate_limit else {
        return next.run(request).await;
    };

    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_default();
    let key = rate_limit.key_extractor.extract(&ClientInfo {
        headers: request.headers(),
        remote_addr: &remote_addr,
    });

    if rate_limit.limiter.allow(&key) {
        return next.run(request).await;
    }

    let wait = rate_limit.limiter.wait(&key);
    warn!(
        key = %key,
        path = %request.uri().path(),
        retry_after_ms = wait.as_millis() as u64,
        "Rate limit exceeded"
    );
    state.metrics.record_rate_limit_drop();

    ProxyError::RateLimited {
        retry_after_secs: wait.as_secs_f64().round() as u64,
    }
    .into_response()
}
