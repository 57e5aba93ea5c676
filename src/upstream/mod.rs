//! Upstream Module
//!
//! The dispatch capability the proxy handler forwards cache misses to,
//! and the buffered recording of what the upstream answered.

mod client;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::Request,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;

use crate::error::Result;

pub use client::HttpUpstream;

// == Captured Response ==
/// A fully buffered upstream response.
///
/// The body is held in memory so the same bytes can be both returned to
/// the client and stored in the cache.
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CapturedResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }
}

impl IntoResponse for CapturedResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

// == Upstream Trait ==
/// Forwards a request to the upstream service.
///
/// Transport failures are reported as errors whose response status is
/// decided here (502 or 504), not by the caller.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn dispatch(&self, request: Request) -> Result<CapturedResponse>;
}
