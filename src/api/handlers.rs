//! API Handlers
//!
//! The cache+proxy handler that fronts the upstream, plus health,
//! readiness and statistics endpoints.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{
        header::{CONTENT_TYPE, ETAG, IF_NONE_MATCH},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use tracing::warn;

use crate::cache::{
    cache_key, generate_etag, is_cacheable, is_cacheable_method, parse_ttl, policy::vary_values,
    Cache, CacheEntry, X_CACHE,
};
use crate::config::CacheConfig;
use crate::metrics::{MetricsSink, NoopMetrics, ProxyMetrics};
use crate::error::Result;
use crate::models::HealthResponse;
use crate::ratelimit::{IpKeyExtractor, KeyExtractor, Limiter};
use crate::upstream::Upstream;

const HIT: &str = "HIT";
const MISS: &str = "MISS";

/// Rate limiter paired with the extractor choosing its keys.
#[derive(Clone)]
pub struct RateLimiting {
    pub limiter: Arc<dyn Limiter>,
    pub key_extractor: Arc<dyn KeyExtractor>,
}

/// Application state shared across all handlers and middleware.
///
/// Every component is constructed once at startup and shared by
/// reference; disabled features are `None`.
#[derive(Clone)]
pub struct AppState {
    /// Response cache, `None` when caching is disabled
    pub cache: Option<Arc<dyn Cache>>,
    /// TTL for responses without freshness headers
    pub default_ttl: Duration,
    /// Request headers participating in the cache key
    pub vary_headers: Arc<[String]>,
    /// Admission control, `None` when rate limiting is disabled
    pub rate_limit: Option<RateLimiting>,
    pub metrics: Arc<dyn MetricsSink>,
    pub upstream: Arc<dyn Upstream>,
}

impl AppState {
    /// Creates a state that proxies straight through: no cache, no rate
    /// limiting, no metrics.
    pub fn new(upstream: Arc<dyn Upstream>) -> Self {
        let defaults = CacheConfig::default();
        Self {
            cache: None,
            default_ttl: defaults.default_ttl(),
            vary_headers: Arc::from(defaults.vary_headers),
            rate_limit: None,
            metrics: Arc::new(NoopMetrics),
            upstream,
        }
    }

    /// Enables caching with the given store and policy settings.
    pub fn with_cache(mut self, cache: Arc<dyn Cache>, config: &CacheConfig) -> Self {
        self.cache = Some(cache);
        self.default_ttl = config.default_ttl();
        self.vary_headers = Arc::from(config.vary_headers.clone());
        self
    }

    /// Enables rate limiting.
    pub fn with_rate_limit(
        mut self,
        limiter: Arc<dyn Limiter>,
        key_extractor: Arc<dyn KeyExtractor>,
    ) -> Self {
        self.rate_limit = Some(RateLimiting {
            limiter,
            key_extractor,
        });
        self
    }

    /// Rate limits by client address.
    pub fn with_limiter(self, limiter: Arc<dyn Limiter>) -> Self {
        self.with_rate_limit(limiter, Arc::new(IpKeyExtractor))
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }
}

/// Fallback handler: serves from cache or forwards upstream.
///
/// # Sequence
/// 1. For GET/HEAD with caching enabled, derive the cache key
/// 2. Matching `If-None-Match` on a cached entry answers 304
/// 3. Any other cached entry is replayed verbatim with `X-Cache: HIT`
/// 4. Otherwise the upstream response is buffered in full
/// 5. Cacheable responses are stored and tagged `X-Cache: MISS` + `ETag`
pub async fn proxy_handler(State(state): State<AppState>, request: Request) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let lookup = state
        .cache
        .as_ref()
        .filter(|_| is_cacheable_method(&method))
        .map(|cache| {
            let vary = vary_values(request.headers(), &state.vary_headers);
            let key = cache_key(
                &method,
                &path,
                request.uri().query().unwrap_or(""),
                &vary,
            );
            (cache, key)
        });

    if let Some((cache, key)) = &lookup {
        if let Some(entry) = cache.get(key) {
            state.metrics.record_cache_hit(&method, &path);

            if if_none_match(request.headers()) == Some(entry.etag.as_str()) {
                return not_modified(&entry);
            }
            return cached_response(&entry);
        }
        state.metrics.record_cache_miss(&method, &path);
    }

    let captured = match state.upstream.dispatch(request).await {
        Ok(captured) => captured,
        Err(err) => {
            warn!(%method, path = %path, error = %err, "Upstream dispatch failed");
            let mut response = err.into_response();
            if state.cache.is_some() {
                response
                    .headers_mut()
                    .insert(X_CACHE, HeaderValue::from_static(MISS));
            }
            return response;
        }
    };

    let Some(cache) = &state.cache else {
        return captured.into_response();
    };

    let mut etag = None;
    if let Some((_, key)) = lookup {
        if is_cacheable(&method, captured.status, &captured.headers) {
            let ttl = parse_ttl(&captured.headers, state.default_ttl);
            let tag = generate_etag(&captured.body);

            cache.set(
                key,
                CacheEntry::new(
                    captured.status,
                    captured.headers.clone(),
                    captured.body.clone(),
                    tag.clone(),
                    ttl,
                ),
            );
            etag = Some(tag);
        }
    }

    let mut response = captured.into_response();
    let headers = response.headers_mut();
    headers.insert(X_CACHE, HeaderValue::from_static(MISS));
    if let Some(value) = etag.and_then(|tag| HeaderValue::from_str(&tag).ok()) {
        headers.insert(ETAG, value);
    }
    response
}

fn if_none_match(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

/// Replays a stored entry with its original status, headers and body.
fn cached_response(entry: &CacheEntry) -> Response {
    let mut response = Response::new(Body::from(entry.body.clone()));
    *response.status_mut() = entry.status;

    let headers = response.headers_mut();
    for (name, value) in entry.headers.iter() {
        headers.append(name.clone(), value.clone());
    }
    tag_hit(headers, entry);

    response
}

fn not_modified(entry: &CacheEntry) -> Response {
    let mut response = StatusCode::NOT_MODIFIED.into_response();
    tag_hit(response.headers_mut(), entry);
    response
}

fn tag_hit(headers: &mut HeaderMap, entry: &CacheEntry) {
    headers.insert(X_CACHE, HeaderValue::from_static(HIT));
    if let Ok(value) = HeaderValue::from_str(&entry.etag) {
        if !entry.etag.is_empty() {
            headers.insert(ETAG, value);
        }
    }
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

/// Handler for GET /ready
pub async fn ready_handler() -> Json<HealthResponse> {
    Json(HealthResponse::ready())
}

/// State of the metrics listener.
#[derive(Clone)]
pub struct StatsState {
    pub metrics: Arc<ProxyMetrics>,
    pub cache: Option<Arc<dyn Cache>>,
}

/// Handler for the metrics endpoint.
///
/// Cache gauges are refreshed from the live store on every scrape and may
/// include entries that have expired but not been looked up since.
pub async fn stats_handler(State(state): State<StatsState>) -> Result<Response> {
    if let Some(cache) = &state.cache {
        state.metrics.observe_cache(cache.len(), cache.size());
    }

    let body = state.metrics.render()?;
    Ok(([(CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response())
}
