//! Version-marker cache keyed by source file identifier.

use crate::error::CacheError;
use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashMap;
use tokio::sync::RwLock;

const KEY_PREFIX: &str = "registry:etag:";

#[async_trait]
pub trait VersionCache: Send + Sync {
    async fn get(&self, source_id: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, source_id: &str, marker: &str) -> Result<(), CacheError>;

    /// Forget the markers of the given sources so the next filtered run re-ingests them.
    async fn clear(&self, source_ids: &[String]) -> Result<(), CacheError>;
}

/// Shared Redis-backed cache, used when several processes ingest.
#[derive(Clone)]
pub struct RedisCache {
    conn: redis::aio::MultiplexedConnection,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn })
    }

    fn key(source_id: &str) -> String {
        format!("{}{}", KEY_PREFIX, source_id)
    }
}

#[async_trait]
impl VersionCache for RedisCache {
    async fn get(&self, source_id: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        let marker: Option<String> = conn.get(Self::key(source_id)).await?;
        Ok(marker)
    }

    async fn set(&self, source_id: &str, marker: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(Self::key(source_id), marker).await?;
        Ok(())
    }

    async fn clear(&self, source_ids: &[String]) -> Result<(), CacheError> {
        if source_ids.is_empty() {
            return Ok(());
        }
        let keys: Vec<String> = source_ids.iter().map(|id| Self::key(id)).collect();
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(keys).await?;
        Ok(())
    }
}

/// In-process cache for single-process deployments and tests.
#[derive(Default)]
pub struct MemoryCache {
    markers: RwLock<HashMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VersionCache for MemoryCache {
    async fn get(&self, source_id: &str) -> Result<Option<String>, CacheError> {
        Ok(self.markers.read().await.get(source_id).cloned())
    }

    async fn set(&self, source_id: &str, marker: &str) -> Result<(), CacheError> {
        self.markers
            .write()
            .await
            .insert(source_id.to_string(), marker.to_string());
        Ok(())
    }

    async fn clear(&self, source_ids: &[String]) -> Result<(), CacheError> {
        let mut markers = self.markers.write().await;
        for id in source_ids {
            markers.remove(id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_cache_roundtrip() {
        let cache = MemoryCache::new();
        assert_eq!(cache.get("ABC-3xx").await.unwrap(), None);
        cache.set("ABC-3xx", "\"abc\"").await.unwrap();
        assert_eq!(cache.get("ABC-3xx").await.unwrap().as_deref(), Some("\"abc\""));
        cache.set("ABC-3xx", "\"def\"").await.unwrap();
        assert_eq!(cache.get("ABC-3xx").await.unwrap().as_deref(), Some("\"def\""));
    }

    #[tokio::test]
    async fn test_memory_cache_clear_only_named_keys() {
        let cache = MemoryCache::new();
        cache.set("ABC-3xx", "a").await.unwrap();
        cache.set("DEF-9xx", "b").await.unwrap();
        cache.clear(&["ABC-3xx".to_string()]).await.unwrap();
        assert_eq!(cache.get("ABC-3xx").await.unwrap(), None);
        assert_eq!(cache.get("DEF-9xx").await.unwrap().as_deref(), Some("b"));
    }

    #[test]
    fn test_redis_key_prefix() {
        assert_eq!(RedisCache::key("ABC-8xx"), "registry:etag:ABC-8xx");
    }
}
