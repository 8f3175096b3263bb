use crate::cache::{PersistedStore, StoredObject};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

const KEY_PREFIX: &str = "citywalk:";

/// Redis-backed persisted tier. `ConnectionManager` is `Arc`-based
/// internally, so `.clone()` per call is a cheap atomic increment.
pub struct RedisStore {
    connection: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| AppError::CacheIo(format!("Failed to create Redis client: {}", e)))?;

        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| AppError::CacheIo(format!("Failed to connect to Redis: {}", e)))?;

        tracing::info!("Redis cache connection established");

        Ok(RedisStore { connection })
    }

    fn full_key(key: &str) -> String {
        format!("{}{}", KEY_PREFIX, key)
    }
}

fn redis_err(op: &str, key: &str, e: redis::RedisError) -> AppError {
    AppError::CacheIo(format!("Redis {} failed for {}: {}", op, key, e))
}

#[async_trait]
impl PersistedStore for RedisStore {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection.clone();
        conn.get(Self::full_key(key))
            .await
            .map_err(|e| redis_err("GET", key, e))
    }

    async fn write(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let mut conn = self.connection.clone();
        conn.set(Self::full_key(key), bytes)
            .await
            .map_err(|e| redis_err("SET", key, e))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        conn.del(Self::full_key(key))
            .await
            .map_err(|e| redis_err("DEL", key, e))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<StoredObject>> {
        let mut conn = self.connection.clone();
        let pattern = format!("{}{}/*", KEY_PREFIX, prefix);
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(&pattern)
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_err("KEYS", &pattern, e))?;

        let mut objects = Vec::with_capacity(keys.len());
        for full in keys {
            let size: u64 = redis::cmd("STRLEN")
                .arg(&full)
                .query_async(&mut conn)
                .await
                .map_err(|e| redis_err("STRLEN", &full, e))?;
            if let Some(key) = full.strip_prefix(KEY_PREFIX) {
                objects.push(StoredObject {
                    key: key.to_string(),
                    size_bytes: size,
                });
            }
        }
        Ok(objects)
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
