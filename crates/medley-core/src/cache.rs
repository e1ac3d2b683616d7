//! Key-value cache used for derived aggregates.
//!
//! A miss (`Ok(None)`) and a transport failure (`Err`) are distinct
//! outcomes: callers fall back to the durable store on both, but only the
//! latter is an incident worth logging.

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache operation timed out")]
    Timeout,
    #[error("cache transport error: {0}")]
    Redis(#[from] redis::RedisError),
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the value for `key`, or `None` when the key is absent.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Unconditionally overwrites `key`.
    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError>;

    /// Removes `key`. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// Redis-backed [`CacheStore`] over a shared multiplexed connection.
///
/// The connection manager is safe for concurrent use and reconnects on
/// its own; every operation is bounded by `op_timeout` so a wedged cache
/// degrades into an error instead of a hang.
pub struct RedisCache {
    conn: ConnectionManager,
    ttl_seconds: u64,
    op_timeout: Duration,
}

impl RedisCache {
    pub async fn connect(
        url: &str,
        ttl_seconds: u64,
        op_timeout: Duration,
    ) -> Result<Self, CacheError> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;

        info!(url = %url, ttl_seconds, "connected to cache");

        Ok(Self {
            conn,
            ttl_seconds,
            op_timeout,
        })
    }

    async fn bounded<F, T>(&self, fut: F) -> Result<T, CacheError>
    where
        F: std::future::Future<Output = Result<T, redis::RedisError>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result.map_err(CacheError::from),
            Err(_) => Err(CacheError::Timeout),
        }
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = self.bounded(conn.get(key)).await?;
        debug!(key = %key, hit = value.is_some(), "cache get");
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = self
            .bounded(conn.set_ex(key, value, self.ttl_seconds))
            .await?;
        debug!(key = %key, "cache set");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = self.bounded(conn.del(key)).await?;
        debug!(key = %key, "cache delete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Integration tests require Redis running, e.g.
    // REDIS_URL=redis://localhost:6379 cargo test -- --ignored

    fn redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
    }

    #[tokio::test]
    #[ignore]
    async fn set_get_delete_roundtrip() {
        let cache = RedisCache::connect(&redis_url(), 60, Duration::from_millis(500))
            .await
            .expect("connect to redis");

        cache.set("medley-test:roundtrip", "17").await.unwrap();
        let value = cache.get("medley-test:roundtrip").await.unwrap();
        assert_eq!(value.as_deref(), Some("17"));

        cache.delete("medley-test:roundtrip").await.unwrap();
        let value = cache.get("medley-test:roundtrip").await.unwrap();
        assert_eq!(value, None);
    }

    #[tokio::test]
    #[ignore]
    async fn delete_of_absent_key_is_ok() {
        let cache = RedisCache::connect(&redis_url(), 60, Duration::from_millis(500))
            .await
            .expect("connect to redis");

        cache.delete("medley-test:never-set").await.unwrap();
    }

    #[test]
    fn timeout_error_is_distinguishable() {
        let err = CacheError::Timeout;
        assert_eq!(err.to_string(), "cache operation timed out");
    }
}
