//! Lease locks in Redis.
//!
//! Acquisition is `SET key owner NX PX ttl`. Release and extension compare
//! the stored owner inside a Lua script so a lease that expired and was
//! taken by another instance is never touched.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use jobhub_core::error::{AppError, ErrorKind};
use jobhub_core::result::AppResult;
use jobhub_core::traits::lock::LockStore;

use super::client::RedisClient;

/// KEYS[1] = lock key, ARGV[1] = owner. Returns 1 when deleted.
const RELEASE_SCRIPT: &str = r#"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return redis.call('DEL', KEYS[1])
    end
    return 0
"#;

/// KEYS[1] = lock key, ARGV[1] = owner, ARGV[2] = ttl in ms. Returns 1 when extended.
const EXTEND_SCRIPT: &str = r#"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return redis.call('PEXPIRE', KEYS[1], ARGV[2])
    end
    return 0
"#;

#[derive(Debug, Clone)]
pub struct RedisLockStore {
    client: RedisClient,
}

impl RedisLockStore {
    pub fn new(client: RedisClient) -> Self {
        Self { client }
    }

    fn map_err(e: redis::RedisError) -> AppError {
        AppError::with_source(ErrorKind::Lock, format!("Redis lock error: {e}"), e)
    }
}

/// Milliseconds for `PX`/`PEXPIRE`; Redis rejects zero.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> AppResult<bool> {
        let full_key = self.client.prefixed_key(key);
        let mut conn = self.client.conn_mut();
        let reply: Option<String> = redis::cmd("SET")
            .arg(&full_key)
            .arg(owner)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        let acquired = reply.is_some();
        debug!(key = %full_key, owner = %owner, acquired, "Lock acquisition attempted");
        Ok(acquired)
    }

    async fn release(&self, key: &str, owner: &str) -> AppResult<bool> {
        let full_key = self.client.prefixed_key(key);
        let mut conn = self.client.conn_mut();
        let removed: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(&full_key)
            .arg(owner)
            .invoke_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        if removed == 0 {
            warn!(key = %full_key, owner = %owner, "Lock release skipped: not held by owner");
        }
        Ok(removed > 0)
    }

    async fn extend(&self, key: &str, owner: &str, extra: Duration) -> AppResult<bool> {
        let full_key = self.client.prefixed_key(key);
        let mut conn = self.client.conn_mut();
        let extended: i64 = redis::Script::new(EXTEND_SCRIPT)
            .key(&full_key)
            .arg(owner)
            .arg(ttl_millis(extra))
            .invoke_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        Ok(extended > 0)
    }

    async fn is_locked(&self, key: &str) -> AppResult<bool> {
        let full_key = self.client.prefixed_key(key);
        let mut conn = self.client.conn_mut();
        let exists: bool = redis::cmd("EXISTS")
            .arg(&full_key)
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        Ok(exists)
    }

    async fn health_check(&self) -> AppResult<bool> {
        let mut conn = self.client.conn_mut();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        Ok(pong == "PONG")
    }
}
