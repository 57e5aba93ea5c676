//! Bucket Sweep Task
//!
//! Background task that periodically reclaims idle rate limiter buckets,
//! bounding memory under high key cardinality.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::ratelimit::TokenBucketLimiter;

/// Spawns a background task that periodically removes idle buckets.
///
/// The first sweep runs one `interval` after spawning. The task exits as
/// soon as `shutdown` is cancelled.
///
/// # Arguments
/// * `limiter` - Limiter whose buckets are swept
/// * `interval` - Time between sweeps
/// * `idle` - Buckets not refilled for longer than this are removed
/// * `shutdown` - Cancellation signal
///
/// # Example
/// ```ignore
/// let limiter = Arc::new(TokenBucketLimiter::new(100.0, 200));
/// let token = CancellationToken::new();
/// let handle = spawn_sweep_task(limiter, SWEEP_INTERVAL, IDLE_THRESHOLD, token.clone());
/// // Later, during shutdown:
/// token.cancel();
/// ```
pub fn spawn_sweep_task(
    limiter: Arc<TokenBucketLimiter>,
    interval: Duration,
    idle: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "Starting bucket sweep task with interval of {:?}, idle threshold {:?}",
            interval, idle
        );

        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Bucket sweep task stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let removed = limiter.reclaim_idle(idle);

                    if removed > 0 {
                        info!("Bucket sweep: removed {} idle buckets", removed);
                    } else {
                        debug!("Bucket sweep: no idle buckets found");
                    }
                }
            }
        }
    })
}
