//! Error types for the proxy
//!
//! Provides unified error handling using thiserror. The cache and the rate
//! limiter never fail; these errors come from configuration, the upstream
//! dispatch layer and admission denial.

use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ErrorResponse;

// == Proxy Error Enum ==
/// Unified error type for the proxy.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Invalid or unreadable configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Upstream did not answer within the configured timeout
    #[error("Upstream request timed out")]
    UpstreamTimeout,

    /// Transport failure talking to the upstream
    #[error("Upstream request failed: {0}")]
    Upstream(String),

    /// Caller exhausted its token bucket
    #[error("rate limit exceeded")]
    RateLimited {
        /// Whole seconds until a token accrues
        retry_after_secs: u64,
    },

    /// Socket or file failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metric registration or encoding failure
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProxyError::UpstreamTimeout
        } else {
            ProxyError::Upstream(err.to_string())
        }
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = match &self {
            ProxyError::Config(_) | ProxyError::Io(_) | ProxyError::Metrics(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ProxyError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ProxyError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        };

        let body = Json(ErrorResponse::new(self.to_string()));

        let mut response = (status, body).into_response();

        if let ProxyError::RateLimited { retry_after_secs } = self {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }

        response
    }
}

// == Result Type Alias ==
/// Convenience Result type for the proxy.
pub type Result<T> = std::result::Result<T, ProxyError>;
