use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, Client};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::cli::config::{SeenSetBackend, SeenSetSettings};

/// Failure of the store behind a seen-set
#[derive(Debug, Error)]
pub enum SeenSetError {
    #[error("redis seen-set failed: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Set of opaque keys with an atomic insert-if-absent
#[async_trait]
pub trait SeenSet: Send + Sync {
    /// Check whether `key` has been inserted
    async fn contains(&self, key: &str) -> Result<bool, SeenSetError>;

    /// Insert `key`, returning `true` if it was not present before
    async fn insert(&self, key: &str) -> Result<bool, SeenSetError>;

    /// Number of keys stored
    async fn len(&self) -> Result<usize, SeenSetError>;
}

/// Factory for creating a SeenSet implementation
pub struct SeenSetFactory;

impl SeenSetFactory {
    /// Create the seen-set configured for a crawl
    pub async fn create(settings: &SeenSetSettings, crawl_id: &str) -> Result<Arc<dyn SeenSet>> {
        match settings.backend {
            SeenSetBackend::Memory => Ok(Arc::new(MemorySeenSet::new())),
            SeenSetBackend::Redis => {
                let set = RedisSeenSet::new(settings, crawl_id).await?;
                Ok(Arc::new(set))
            }
        }
    }
}

/// In-process seen-set
#[derive(Debug, Default)]
pub struct MemorySeenSet {
    keys: Mutex<HashSet<String>>,
}

impl MemorySeenSet {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SeenSet for MemorySeenSet {
    async fn contains(&self, key: &str) -> Result<bool, SeenSetError> {
        Ok(self.keys.lock().await.contains(key))
    }

    async fn insert(&self, key: &str) -> Result<bool, SeenSetError> {
        Ok(self.keys.lock().await.insert(key.to_string()))
    }

    async fn len(&self) -> Result<usize, SeenSetError> {
        Ok(self.keys.lock().await.len())
    }
}

/// Seen-set stored in a Redis set, shareable between crawler processes
pub struct RedisSeenSet {
    /// Key of the Redis set
    set_key: String,

    /// Connection pool
    conn_pool: Arc<Mutex<MultiplexedConnection>>,
}

impl RedisSeenSet {
    /// Connect to Redis and scope the set to `crawl_id`
    pub async fn new(settings: &SeenSetSettings, crawl_id: &str) -> Result<Self> {
        let client = Client::open(settings.redis_url.clone())
            .context(format!("Failed to connect to Redis at {}", settings.redis_url))?;

        let conn = client.get_multiplexed_async_connection().await
            .context("Failed to get Redis connection")?;

        let set_key = format!("{}:seen:{}", settings.key_prefix, crawl_id);
        debug!("Using Redis seen-set {}", set_key);

        Ok(Self {
            set_key,
            conn_pool: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl SeenSet for RedisSeenSet {
    async fn contains(&self, key: &str) -> Result<bool, SeenSetError> {
        let mut conn = self.conn_pool.lock().await;

        let present: bool = redis::cmd("SISMEMBER")
            .arg(&self.set_key)
            .arg(key)
            .query_async(&mut *conn)
            .await?;

        Ok(present)
    }

    async fn insert(&self, key: &str) -> Result<bool, SeenSetError> {
        let mut conn = self.conn_pool.lock().await;

        // SADD reports how many members were added, which makes it a test-and-set
        let added: i64 = redis::cmd("SADD")
            .arg(&self.set_key)
            .arg(key)
            .query_async(&mut *conn)
            .await?;

        Ok(added == 1)
    }

    async fn len(&self) -> Result<usize, SeenSetError> {
        let mut conn = self.conn_pool.lock().await;

        let count: usize = redis::cmd("SCARD")
            .arg(&self.set_key)
            .query_async(&mut *conn)
            .await?;

        Ok(count)
    }
}
