//! Response models for the proxy's own endpoints
//!
//! JSON bodies produced by the proxy itself, as opposed to the upstream
//! payloads it relays.

pub mod responses;

pub use responses::{ErrorResponse, HealthResponse};
