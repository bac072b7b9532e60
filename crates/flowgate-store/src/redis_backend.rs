//! Redis backend over a `deadpool-redis` connection pool.
//!
//! ## Commands
//!
//! | Capability | Redis command |
//! |------------|---------------|
//! | set-with-ttl | `SET key value EX ttl` |
//! | get | `GET` |
//! | delete | `DEL k1 k2 ...` |
//! | list-keys-by-pattern | cursor `SCAN ... MATCH ... COUNT` |
//! | set-ttl | `EXPIRE` |
//! | check-exists | `EXISTS` |
//! | take | `GETDEL` (atomic, Redis >= 6.2) |
//!
//! Every command runs under the configured timeout. A timed-out command is
//! reported as [`StoreError::Timeout`] and is not retried.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use crate::backend::KeyValueBackend;
use crate::error::StoreError;
use crate::StoreResult;

const SCAN_BATCH: usize = 200;

/// Redis connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Per-command and connection timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}

impl RedisConfig {
    /// The configured timeout as a [`Duration`].
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Creates a Redis connection pool and verifies that a connection can be
/// obtained.
///
/// The returned pool is owned by the caller and may be shared by any number
/// of [`RedisBackend`]s.
pub async fn create_redis_pool(config: &RedisConfig) -> StoreResult<Pool> {
    tracing::info!(url = %config.url, "Connecting to Redis");

    let timeout = config.timeout();
    let mut redis_config = deadpool_redis::Config::from_url(&config.url);
    let mut pool_config = deadpool_redis::PoolConfig::new(config.pool_size);
    pool_config.timeouts.wait = Some(timeout);
    pool_config.timeouts.create = Some(timeout);
    pool_config.timeouts.recycle = Some(timeout);
    redis_config.pool = Some(pool_config);

    let pool = redis_config
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .map_err(|e| StoreError::connection(format!("failed to create Redis pool: {e}")))?;

    // Fail fast on a bad URL or unreachable server.
    pool.get().await?;
    tracing::info!("Connected to Redis");

    Ok(pool)
}

/// [`KeyValueBackend`] adapter for Redis.
#[derive(Clone)]
pub struct RedisBackend {
    pool: Pool,
    timeout: Duration,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RedisBackend {
    /// Wraps an existing pool. The pool is not closed when the backend drops.
    #[must_use]
    pub fn new(pool: Pool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    /// Builds a pool from `config` and wraps it.
    pub async fn connect(config: &RedisConfig) -> StoreResult<Self> {
        let pool = create_redis_pool(config).await?;
        Ok(Self::new(pool, config.timeout()))
    }

    /// Returns the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    async fn conn(&self) -> StoreResult<Connection> {
        match tokio::time::timeout(self.timeout, self.pool.get()).await {
            Ok(conn) => Ok(conn?),
            Err(_) => Err(StoreError::timeout("CONNECT", self.timeout)),
        }
    }

    /// Runs one command future under the timeout, tagging failures with
    /// `operation`.
    async fn run<T, F>(&self, operation: &'static str, fut: F) -> StoreResult<T>
    where
        F: std::future::Future<Output = redis::RedisResult<T>> + Send,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::warn!(operation, error = %e, "Redis command failed");
                Err(StoreError::command(operation, e.to_string()))
            }
            Err(_) => {
                tracing::warn!(operation, timeout = ?self.timeout, "Redis command timed out");
                Err(StoreError::timeout(operation, self.timeout))
            }
        }
    }
}

#[async_trait]
impl KeyValueBackend for RedisBackend {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl_seconds: u64) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        self.run("SET", conn.set_ex::<_, _, ()>(key, value, ttl_seconds))
            .await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn().await?;
        self.run("GET", conn.get::<_, Option<String>>(key)).await
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        self.run("DEL", conn.del::<_, u64>(keys)).await
    }

    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn().await?;
        let mut cursor: u64 = 0;
        let mut found = Vec::new();
        loop {
            let mut cmd = redis::cmd("SCAN");
            cmd.arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH);
            let (next, batch): (u64, Vec<String>) =
                self.run("SCAN", cmd.query_async(&mut conn)).await?;
            found.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        // SCAN may return a key more than once across iterations.
        found.sort_unstable();
        found.dedup();
        Ok(found)
    }

    async fn expire(&self, key: &str, ttl_seconds: u64) -> StoreResult<bool> {
        let seconds = i64::try_from(ttl_seconds)
            .map_err(|_| StoreError::command("EXPIRE", "ttl out of range"))?;
        let mut conn = self.conn().await?;
        self.run("EXPIRE", conn.expire::<_, bool>(key, seconds)).await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        self.run("EXISTS", conn.exists::<_, bool>(key)).await
    }

    async fn take(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn().await?;
        let mut cmd = redis::cmd("GETDEL");
        cmd.arg(key);
        self.run("GETDEL", cmd.query_async(&mut conn)).await
    }

    fn atomic_take(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
