//! Distributed lock store configuration.

use serde::{Deserialize, Serialize};

/// Lock store configuration.
///
/// `provider` selects the backend:
/// - `"redis"`: shared Redis instance, safe for any number of scheduler processes
/// - `"memory"`: in-process leases, correct for a single process only
/// - `"none"`: every acquisition succeeds; single-instance deployments only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Lock provider type: `"redis"`, `"memory"`, or `"none"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    /// How often expired in-process leases are dropped.
    #[serde(default = "default_purge_interval")]
    pub purge_interval_seconds: u64,
    /// Redis-specific settings.
    #[serde(default)]
    pub redis: RedisLockConfig,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            purge_interval_seconds: default_purge_interval(),
            redis: RedisLockConfig::default(),
        }
    }
}

impl LockConfig {
    /// Whether the configured provider coordinates across processes.
    pub fn is_shared(&self) -> bool {
        self.provider == "redis"
    }
}

/// Redis lock backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisLockConfig {
    /// Redis connection URL.
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Key prefix for all JobHub lock keys.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for RedisLockConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_provider() -> String {
    "memory".to_string()
}

fn default_purge_interval() -> u64 {
    300
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_key_prefix() -> String {
    "jobhub:lock:".to_string()
}
