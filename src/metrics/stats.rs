//! Proxy Statistics Module
//!
//! Prometheus collectors for requests, cache effectiveness and rate
//! limiting, held in a registry owned by the sink.

use std::time::Duration;

use axum::http::{Method, StatusCode};
use prometheus::{
    exponential_buckets, register_histogram_vec_with_registry,
    register_int_counter_vec_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    Registry, TextEncoder,
};
use tracing::trace;

use super::MetricsSink;

/// Latency buckets in seconds
const DURATION_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

// == Proxy Metrics ==
/// Metrics sink exporting the Prometheus text format.
#[derive(Clone)]
pub struct ProxyMetrics {
    registry: Registry,
    requests_total: IntCounterVec,
    request_duration: HistogramVec,
    request_size: HistogramVec,
    response_size: HistogramVec,
    cache_hits: IntCounterVec,
    cache_misses: IntCounterVec,
    rate_limit_dropped: IntCounter,
    active_connections: IntGauge,
    cache_entries: IntGauge,
    cache_size: IntGauge,
}

impl ProxyMetrics {
    // == Constructor ==
    /// Creates a sink with its own registry and every collector at zero.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        let size_buckets = exponential_buckets(100.0, 10.0, 8)?;

        Ok(Self {
            requests_total: register_int_counter_vec_with_registry!(
                "http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"],
                registry,
            )?,
            request_duration: register_histogram_vec_with_registry!(
                "http_request_duration_seconds",
                "HTTP request latency in seconds",
                &["method", "path", "status"],
                DURATION_BUCKETS.to_vec(),
                registry,
            )?,
            request_size: register_histogram_vec_with_registry!(
                "http_request_size_bytes",
                "HTTP request size in bytes",
                &["method", "path"],
                size_buckets.clone(),
                registry,
            )?,
            response_size: register_histogram_vec_with_registry!(
                "http_response_size_bytes",
                "HTTP response size in bytes",
                &["method", "path"],
                size_buckets,
                registry,
            )?,
            cache_hits: register_int_counter_vec_with_registry!(
                "cache_hits_total",
                "Total number of cache hits",
                &["method", "path"],
                registry,
            )?,
            cache_misses: register_int_counter_vec_with_registry!(
                "cache_misses_total",
                "Total number of cache misses",
                &["method", "path"],
                registry,
            )?,
            rate_limit_dropped: register_int_counter_with_registry!(
                "rate_limit_dropped_total",
                "Total number of requests dropped by rate limiter",
                registry,
            )?,
            active_connections: register_int_gauge_with_registry!(
                "active_connections",
                "Number of active connections",
                registry,
            )?,
            cache_entries: register_int_gauge_with_registry!(
                "cache_entries",
                "Entries held by the response cache, including expired ones not yet read",
                registry,
            )?,
            cache_size: register_int_gauge_with_registry!(
                "cache_size_bytes",
                "Accounted size of the response cache in bytes",
                registry,
            )?,
            registry,
        })
    }

    /// Publishes the current cache occupancy.
    pub fn observe_cache(&self, entries: usize, size_bytes: u64) {
        self.cache_entries
            .set(i64::try_from(entries).unwrap_or(i64::MAX));
        self.cache_size
            .set(i64::try_from(size_bytes).unwrap_or(i64::MAX));
    }

    // == Exposition ==
    /// Encodes every collector in the Prometheus text format.
    pub fn render(&self) -> prometheus::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

impl MetricsSink for ProxyMetrics {
    fn record_request(
        &self,
        method: &Method,
        path: &str,
        status: StatusCode,
        duration: Duration,
        request_size: u64,
        response_size: u64,
    ) {
        let method = method.as_str();
        let status = status.as_str();

        self.requests_total
            .with_label_values(&[method, path, status])
            .inc();
        self.request_duration
            .with_label_values(&[method, path, status])
            .observe(duration.as_secs_f64());
        self.request_size
            .with_label_values(&[method, path])
            .observe(request_size as f64);
        self.response_size
            .with_label_values(&[method, path])
            .observe(response_size as f64);

        trace!(method, path, status, "Recorded request");
    }

    fn record_cache_hit(&self, method: &Method, path: &str) {
        self.cache_hits
            .with_label_values(&[method.as_str(), path])
            .inc();
    }

    fn record_cache_miss(&self, method: &Method, path: &str) {
        self.cache_misses
            .with_label_values(&[method.as_str(), path])
            .inc();
    }

    fn record_rate_limit_drop(&self) {
        self.rate_limit_dropped.inc();
    }

    fn inc_active_connections(&self) {
        self.active_connections.inc();
    }

    fn dec_active_connections(&self) {
        self.active_connections.dec();
    }
}
