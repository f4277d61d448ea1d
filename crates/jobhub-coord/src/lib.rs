//! # jobhub-coord
//!
//! Coordination between scheduler instances. Supports three lock modes:
//!
//! - **redis**: leases in a shared Redis, safe for any number of processes
//! - **memory**: leases in a [dashmap](https://crates.io/crates/dashmap), one process only
//! - **none**: every acquisition succeeds; a single-instance deployment hazard
//!
//! The mode is selected at runtime from configuration. The Redis backend
//! also provides a pub/sub [`TransitionNotifier`](jobhub_core::traits::TransitionNotifier).

pub mod keys;
#[cfg(feature = "memory")]
pub mod memory;
#[cfg(feature = "redis-backend")]
pub mod redis;
pub mod service;

pub use service::DistributedLockService;
