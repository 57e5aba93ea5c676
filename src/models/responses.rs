//! Response DTOs for the proxy's own endpoints
//!
//! Defines the structure of outgoing JSON bodies.

use serde::Serialize;

/// Response body for the probe endpoints (GET /health, GET /ready)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Probe status ("healthy" or "ready")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    fn with_status(status: &str) -> Self {
        Self {
            status: status.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Creates a liveness response with the current timestamp
    pub fn healthy() -> Self {
        Self::with_status("healthy")
    }

    /// Creates a readiness response with the current timestamp
    pub fn ready() -> Self {
        Self::with_status("ready")
    }
}

/// Error response body for all error conditions
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error message describing what went wrong
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
