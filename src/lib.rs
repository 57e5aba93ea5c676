//! Cache Proxy - A caching, rate-limiting HTTP reverse proxy
//!
//! Serves repeat GET/HEAD responses from a size-bounded LRU cache with
//! TTL expiry and ETag revalidation, and admits requests through per-key
//! token buckets.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod ratelimit;
pub mod tasks;
pub mod upstream;

pub use api::{create_metrics_router, create_router, AppState, StatsState};
pub use config::Config;
pub use error::{ProxyError, Result};
pub use tasks::spawn_sweep_task;
