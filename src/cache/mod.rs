//! Cache Module
//!
//! Provides the HTTP response cache: caching policy, LRU tracking and the
//! size-bounded store with lazy TTL expiration.

mod entry;
mod lru;
pub mod policy;
mod store;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use entry::{current_timestamp_ms, CacheEntry};
pub use lru::LruTracker;
pub use policy::{cache_key, generate_etag, is_cacheable, is_cacheable_method, parse_ttl};
pub use store::{Cache, MemoryCache};

// == Public Constants ==
/// Response header reporting whether the cache served the response
pub const X_CACHE: &str = "x-cache";

/// Default cache capacity in bytes
pub const DEFAULT_MAX_SIZE: u64 = 100 * 1024 * 1024; // 100 MB
