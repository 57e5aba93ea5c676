//! Cache Entry Module
//!
//! Defines the snapshot of an upstream response held by the cache.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;

// == Cache Entry ==
/// A cached HTTP response with validation and expiry metadata.
///
/// Entries are immutable once inserted; the store only ever replaces
/// them wholesale.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Upstream status code
    pub status: StatusCode,
    /// Upstream response headers, order-preserving and multi-valued
    pub headers: HeaderMap,
    /// Full response body
    pub body: Bytes,
    /// Quoted ETag, may be empty
    pub etag: String,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// Expiration timestamp (Unix milliseconds)
    pub expires_at: u64,
    /// Accounted size in bytes
    pub size: u64,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates an entry that expires `ttl` from now.
    ///
    /// The accounted size is the body length plus the bytes of every
    /// header name and value.
    ///
    /// # Arguments
    /// * `status` - Upstream status code
    /// * `headers` - Upstream response headers
    /// * `body` - Buffered response body
    /// * `etag` - Precomputed ETag for the body
    /// * `ttl` - Freshness lifetime
    pub fn new(
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
        etag: String,
        ttl: Duration,
    ) -> Self {
        let now = current_timestamp_ms();
        let size = body.len() as u64 + header_bytes(&headers);

        Self {
            status,
            headers,
            body,
            etag,
            created_at: now,
            expires_at: now.saturating_add(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)),
            size,
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// An entry is expired once the current time reaches `expires_at`,
    /// so a zero TTL entry is never served.
    pub fn is_expired(&self) -> bool {
        current_timestamp_ms() >= self.expires_at
    }

    // == Time To Live ==
    /// Returns remaining freshness in milliseconds, `0` once expired.
    #[cfg(test)]
    pub fn ttl_remaining_ms(&self) -> u64 {
        self.expires_at.saturating_sub(current_timestamp_ms())
    }
}

fn header_bytes(headers: &HeaderMap) -> u64 {
    headers
        .iter()
        .map(|(name, value)| (name.as_str().len() + value.len()) as u64)
        .sum()
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
