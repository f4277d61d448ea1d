//! Lease table backed by a [`DashMap`].

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::Instant;

use jobhub_core::result::AppResult;
use jobhub_core::traits::lock::LockStore;

#[derive(Debug, Clone)]
struct Lease {
    owner: String,
    expires_at: Instant,
}

impl Lease {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Leases held in this process only.
///
/// Expiry is checked on access; an expired lease is treated as absent and
/// replaced by the next acquirer.
#[derive(Debug, Default)]
pub struct MemoryLockStore {
    leases: DashMap<String, Lease>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries in the table, expired ones included.
    pub fn lease_count(&self) -> usize {
        self.leases.len()
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> AppResult<bool> {
        let now = Instant::now();
        let lease = Lease {
            owner: owner.to_string(),
            expires_at: now + ttl,
        };
        match self.leases.entry(key.to_string()) {
            Entry::Occupied(mut held) => {
                if held.get().is_live(now) {
                    Ok(false)
                } else {
                    held.insert(lease);
                    Ok(true)
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(lease);
                Ok(true)
            }
        }
    }

    async fn release(&self, key: &str, owner: &str) -> AppResult<bool> {
        let now = Instant::now();
        Ok(self
            .leases
            .remove_if(key, |_, lease| lease.owner == owner && lease.is_live(now))
            .is_some())
    }

    async fn extend(&self, key: &str, owner: &str, extra: Duration) -> AppResult<bool> {
        let now = Instant::now();
        match self.leases.get_mut(key) {
            Some(mut lease) if lease.owner == owner && lease.is_live(now) => {
                lease.expires_at = now + extra;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn is_locked(&self, key: &str) -> AppResult<bool> {
        let now = Instant::now();
        Ok(self.leases.get(key).is_some_and(|lease| lease.is_live(now)))
    }

    async fn health_check(&self) -> AppResult<bool> {
        Ok(true)
    }

    async fn purge_expired(&self) -> AppResult<usize> {
        let now = Instant::now();
        let before = self.leases.len();
        self.leases.retain(|_, lease| lease.is_live(now));
        Ok(before.saturating_sub(self.leases.len()))
    }
}
