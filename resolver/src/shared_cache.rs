use crate::config::RedisConfig;
use async_trait::async_trait;
use deadpool_redis::{Pool, PoolConfig, Runtime};
use redis::AsyncCommands;
use std::time::Duration;
use thiserror::Error;

/// Keys written by this service share a prefix so the routing table can
/// coexist with unrelated data in the same Redis.
const KEY_PREFIX: &str = "route:";

#[derive(Error, Debug)]
pub enum SharedCacheError {
    /// The shared tier has no entry for the key. Expected, not a fault.
    #[error("no shared-cache entry for key")]
    NotFound,

    /// Transport or timeout failure. Transient; the operation may have
    /// partially applied and is safe to retry.
    #[error("shared cache unavailable: {0}")]
    Unavailable(String),
}

impl From<deadpool_redis::PoolError> for SharedCacheError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        SharedCacheError::Unavailable(e.to_string())
    }
}

impl From<redis::RedisError> for SharedCacheError {
    fn from(e: redis::RedisError) -> Self {
        SharedCacheError::Unavailable(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for SharedCacheError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        SharedCacheError::Unavailable("operation timed out".into())
    }
}

/// Second tier of the resolution cache, shared by every router instance.
///
/// Entries carry no expiration of their own: the tier's lifetime is
/// governed by sync-cycle overwrites and explicit deletes.
#[async_trait]
pub trait SharedCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<String, SharedCacheError>;

    async fn set(&self, key: &str, project: &str) -> Result<(), SharedCacheError>;

    /// Upsert many keys to the same project in one pipelined round trip.
    /// The pipeline is not transactional: on failure some keys may have
    /// been written already, so the result is indeterminate and the call
    /// must be retried rather than reasoned about.
    async fn set_batch(&self, keys: &[String], project: &str) -> Result<(), SharedCacheError>;

    /// Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), SharedCacheError>;

    /// Liveness probe, used at startup and by health reporting.
    async fn ping(&self) -> Result<(), SharedCacheError>;
}

/// Pool-level connection counters. Observability only, never consulted
/// for correctness.
#[derive(Clone, Copy, Debug)]
pub struct PoolStats {
    pub connections: usize,
    pub idle: usize,
    pub max_size: usize,
}

/// Pooled Redis client for the shared tier.
///
/// Every operation is bounded by the configured deadline, both while
/// waiting for a pooled connection and on the wire; on expiry the call
/// fails with [`SharedCacheError::Unavailable`] instead of blocking its
/// caller.
pub struct RedisCache {
    pool: Pool,
    op_timeout: Duration,
}

impl RedisCache {
    /// Build the pooled client. Connections are opened lazily; call
    /// [`ping`](SharedCache::ping) to probe liveness at startup.
    pub fn new(config: &RedisConfig) -> Result<Self, SharedCacheError> {
        let timeout = Duration::from_millis(config.timeout_ms);

        let mut cfg = deadpool_redis::Config::from_url(&config.url);
        let mut pool_cfg = PoolConfig::new(config.pool_size);
        pool_cfg.timeouts.wait = Some(timeout);
        pool_cfg.timeouts.create = Some(timeout);
        pool_cfg.timeouts.recycle = Some(timeout);
        cfg.pool = Some(pool_cfg);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| SharedCacheError::Unavailable(e.to_string()))?;

        Ok(RedisCache {
            pool,
            op_timeout: timeout,
        })
    }

    /// Open `min_idle` connections up front so the first requests after
    /// boot do not pay connection setup.
    pub async fn warm(&self, min_idle: usize) -> Result<(), SharedCacheError> {
        let mut conns = Vec::with_capacity(min_idle);
        for _ in 0..min_idle {
            conns.push(self.pool.get().await?);
        }
        // Dropping the handles returns them to the pool as idle.
        Ok(())
    }

    pub fn stats(&self) -> PoolStats {
        let status = self.pool.status();
        PoolStats {
            connections: status.size,
            idle: status.available,
            max_size: status.max_size,
        }
    }

    fn namespaced(key: &str) -> String {
        format!("{KEY_PREFIX}{key}")
    }
}

#[async_trait]
impl SharedCache for RedisCache {
    async fn get(&self, key: &str) -> Result<String, SharedCacheError> {
        let mut conn = self.pool.get().await?;
        let value: Option<String> =
            tokio::time::timeout(self.op_timeout, conn.get(Self::namespaced(key))).await??;
        value.ok_or(SharedCacheError::NotFound)
    }

    async fn set(&self, key: &str, project: &str) -> Result<(), SharedCacheError> {
        let mut conn = self.pool.get().await?;
        tokio::time::timeout(
            self.op_timeout,
            conn.set::<_, _, ()>(Self::namespaced(key), project),
        )
        .await??;
        Ok(())
    }

    async fn set_batch(&self, keys: &[String], project: &str) -> Result<(), SharedCacheError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.pool.get().await?;
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.set(Self::namespaced(key), project).ignore();
        }
        tokio::time::timeout(self.op_timeout, pipe.query_async::<()>(&mut conn)).await??;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), SharedCacheError> {
        let mut conn = self.pool.get().await?;
        tokio::time::timeout(self.op_timeout, conn.del::<_, ()>(Self::namespaced(key))).await??;
        Ok(())
    }

    async fn ping(&self) -> Result<(), SharedCacheError> {
        let mut conn = self.pool.get().await?;
        tokio::time::timeout(
            self.op_timeout,
            redis::cmd("PING").query_async::<()>(&mut conn),
        )
        .await??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_namespacing() {
        assert_eq!(RedisCache::namespaced("tenant.example.com"), "route:tenant.example.com");
    }

    #[tokio::test]
    async fn test_unreachable_redis_is_unavailable() {
        // Pool creation is lazy; the failure surfaces on first use.
        let cache = RedisCache::new(&RedisConfig {
            url: "redis://127.0.0.1:1".into(),
            pool_size: 2,
            min_idle: 0,
            timeout_ms: 200,
        })
        .unwrap();

        assert!(matches!(
            cache.ping().await,
            Err(SharedCacheError::Unavailable(_))
        ));
        assert!(matches!(
            cache.get("k").await,
            Err(SharedCacheError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_stats_reflect_pool_bounds() {
        let cache = RedisCache::new(&RedisConfig {
            url: "redis://127.0.0.1:1".into(),
            pool_size: 7,
            min_idle: 0,
            timeout_ms: 200,
        })
        .unwrap();

        let stats = cache.stats();
        assert_eq!(stats.max_size, 7);
        assert_eq!(stats.connections, 0);
    }
}
