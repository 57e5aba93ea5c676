//! Rate Limit Module
//!
//! Per-key token bucket admission control and the extractors that pick
//! the key for a request.

mod bucket;
mod extractor;

use std::time::Duration;

pub use bucket::{Limiter, TokenBucketLimiter};
pub use extractor::{
    ApiKeyExtractor, ClientInfo, CompositeKeyExtractor, IpKeyExtractor, KeyExtractor,
    KeyStrategy,
};

// == Public Constants ==
/// How often idle buckets are swept
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Buckets untouched for longer than this are reclaimed
pub const IDLE_THRESHOLD: Duration = Duration::from_secs(5 * 60);
