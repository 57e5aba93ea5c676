//! Background Tasks Module
//!
//! Contains background tasks that run periodically during server operation.
//!
//! # Tasks
//! - Bucket sweep: reclaims idle rate limiter buckets at a fixed interval

mod sweep;

pub use sweep::spawn_sweep_task;
