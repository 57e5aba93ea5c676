//! API Module
//!
//! The request pipeline in front of the upstream.
//!
//! # Endpoints
//! - `GET /health` - Liveness probe
//! - `GET /ready` - Readiness probe
//! - any other method and path - Served from cache or proxied upstream
//!
//! The Prometheus exposition is served by a separate router bound to its
//! own listener.

pub mod handlers;
pub mod middleware;
pub mod routes;

pub use handlers::*;
pub use routes::{create_metrics_router, create_router};
