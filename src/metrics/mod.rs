//! Metrics Module
//!
//! The sink the request pipeline reports into. Sinks are injected through
//! the application state; there is no global registry.

mod stats;

use std::time::Duration;

use axum::http::{Method, StatusCode};

pub use stats::ProxyMetrics;

// == Metrics Sink ==
/// Receives request pipeline events. Calls are fire-and-forget.
pub trait MetricsSink: Send + Sync {
    fn record_request(
        &self,
        method: &Method,
        path: &str,
        status: StatusCode,
        duration: Duration,
        request_size: u64,
        response_size: u64,
    );

    fn record_cache_hit(&self, method: &Method, path: &str);

    fn record_cache_miss(&self, method: &Method, path: &str);

    fn record_rate_limit_drop(&self);

    fn inc_active_connections(&self);

    fn dec_active_connections(&self);
}

/// Sink used when metrics are disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_request(&self, _: &Method, _: &str, _: StatusCode, _: Duration, _: u64, _: u64) {}

    fn record_cache_hit(&self, _: &Method, _: &str) {}

    fn record_cache_miss(&self, _: &Method, _: &str) {}

    fn record_rate_limit_drop(&self) {}

    fn inc_active_connections(&self) {}

    fn dec_active_connections(&self) {}
}
