//! Lock service selected from configuration.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use jobhub_core::config::lock::LockConfig;
use jobhub_core::error::AppError;
use jobhub_core::result::AppResult;
use jobhub_core::traits::lock::LockStore;

/// Named lease locks shared by every scheduler instance.
///
/// Without a backing store the service runs in single-instance mode: every
/// acquisition succeeds and nothing is held. Two processes in that mode
/// will both fire the same schedule.
#[derive(Debug, Clone)]
pub struct DistributedLockService {
    store: Option<Arc<dyn LockStore>>,
}

impl DistributedLockService {
    /// Build the service for `config.provider` (`redis`, `memory`, or `none`).
    pub async fn from_config(config: &LockConfig) -> AppResult<Self> {
        match config.provider.as_str() {
            #[cfg(feature = "redis-backend")]
            "redis" => {
                info!("Initializing Redis lock store");
                let client = crate::redis::RedisClient::connect(&config.redis).await?;
                Ok(Self::new(Arc::new(crate::redis::RedisLockStore::new(client))))
            }
            #[cfg(feature = "memory")]
            "memory" => {
                info!("Initializing in-memory lock store");
                Ok(Self::new(Arc::new(crate::memory::MemoryLockStore::new())))
            }
            "none" => Ok(Self::single_instance()),
            other => Err(AppError::configuration(format!(
                "Unknown lock provider: '{other}'. Supported: redis, memory, none"
            ))),
        }
    }

    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self { store: Some(store) }
    }

    /// No lock store: acquisitions always succeed.
    pub fn single_instance() -> Self {
        warn!(
            "No lock store configured; running in single-instance mode. \
             Do not start more than one scheduler against the same database"
        );
        Self { store: None }
    }

    pub fn is_single_instance(&self) -> bool {
        self.store.is_none()
    }

    /// Take the lease on `key` for `ttl`. `false` means another owner holds it.
    pub async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> AppResult<bool> {
        match &self.store {
            Some(store) => store.try_acquire(key, owner, ttl).await,
            None => Ok(true),
        }
    }

    /// Release the lease if `owner` still holds it.
    pub async fn release(&self, key: &str, owner: &str) -> AppResult<bool> {
        match &self.store {
            Some(store) => store.release(key, owner).await,
            None => Ok(true),
        }
    }

    pub async fn extend(&self, key: &str, owner: &str, extra: Duration) -> AppResult<bool> {
        match &self.store {
            Some(store) => store.extend(key, owner, extra).await,
            None => Ok(true),
        }
    }

    pub async fn is_locked(&self, key: &str) -> AppResult<bool> {
        match &self.store {
            Some(store) => store.is_locked(key).await,
            None => Ok(false),
        }
    }

    pub async fn health_check(&self) -> AppResult<bool> {
        match &self.store {
            Some(store) => store.health_check().await,
            None => Ok(true),
        }
    }

    /// Drop expired leases from backends that keep them until touched.
    pub async fn purge_expired(&self) -> AppResult<usize> {
        match &self.store {
            Some(store) => store.purge_expired().await,
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn test_single_instance_always_grants() {
        let locks = DistributedLockService::single_instance();
        assert!(locks.is_single_instance());
        assert!(locks.try_acquire("schedule:x", "a", TTL).await.expect("acquire"));
        assert!(locks.try_acquire("schedule:x", "b", TTL).await.expect("acquire"));
        assert!(!locks.is_locked("schedule:x").await.expect("is_locked"));
        assert!(locks.release("schedule:x", "c").await.expect("release"));
    }

    #[cfg(feature = "memory")]
    #[tokio::test]
    async fn test_memory_provider_is_exclusive() {
        let config = LockConfig::default();
        let locks = DistributedLockService::from_config(&config).await.expect("memory store");
        assert!(!locks.is_single_instance());
        assert!(locks.try_acquire("k", "a", TTL).await.expect("acquire"));
        assert!(!locks.try_acquire("k", "b", TTL).await.expect("acquire"));
        assert!(locks.health_check().await.expect("health"));
    }

    #[tokio::test]
    async fn test_unknown_provider_is_rejected() {
        let config = LockConfig {
            provider: "zookeeper".into(),
            ..LockConfig::default()
        };
        let err = DistributedLockService::from_config(&config)
            .await
            .expect_err("unknown provider");
        assert_eq!(err.kind, jobhub_core::error::ErrorKind::Configuration);
    }
}
