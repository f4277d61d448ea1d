//! Lease-based lock store trait.

use std::time::Duration;

use async_trait::async_trait;

use crate::result::AppResult;

/// Backend holding time-bounded leases keyed by string.
///
/// Every lease expires on its own, so a crashed holder never wedges a key.
/// `release` and `extend` only act when `owner` still holds the lease; a
/// lease that expired and was re-acquired by someone else is left alone.
#[async_trait]
pub trait LockStore: Send + Sync + std::fmt::Debug + 'static {
    /// Take the lease if nobody holds it. Never blocks waiting for the holder.
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> AppResult<bool>;

    /// Drop the lease if `owner` holds it. Returns whether anything was removed.
    async fn release(&self, key: &str, owner: &str) -> AppResult<bool>;

    /// Reset the lease to expire `extra` from now if `owner` holds it.
    async fn extend(&self, key: &str, owner: &str, extra: Duration) -> AppResult<bool>;

    /// Whether any owner currently holds an unexpired lease on `key`.
    async fn is_locked(&self, key: &str) -> AppResult<bool>;

    /// Check that the backend is reachable.
    async fn health_check(&self) -> AppResult<bool>;

    /// Drop expired leases. Backends that expire keys themselves keep the default.
    async fn purge_expired(&self) -> AppResult<usize> {
        Ok(0)
    }
}
