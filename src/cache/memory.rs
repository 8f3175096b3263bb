use crate::cache::CacheEntry;
use moka::future::Cache;
use std::sync::Arc;

/// In-process tier backed by moka with bounded capacity.
/// Expiry is per entry (TTL lives in [`CacheEntry`]), so moka only handles
/// size-based eviction. All methods are `&self`.
pub struct MemoryTier {
    entries: Cache<String, Arc<CacheEntry>>,
}

impl MemoryTier {
    pub fn new(max_capacity: u64) -> Self {
        let entries = Cache::builder().max_capacity(max_capacity).build();
        MemoryTier { entries }
    }

    pub async fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
        self.entries.get(key).await
    }

    pub async fn insert(&self, key: &str, entry: CacheEntry) {
        self.entries.insert(key.to_string(), Arc::new(entry)).await;
    }

    pub async fn invalidate(&self, key: &str) {
        self.entries.invalidate(key).await;
    }

    /// Remove every entry whose TTL elapsed before `now_ms`
    pub async fn purge_expired(&self, now_ms: i64) -> usize {
        let expired: Vec<Arc<String>> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now_ms))
            .map(|(key, _)| key)
            .collect();

        for key in &expired {
            self.entries.invalidate(key.as_str()).await;
        }
        expired.len()
    }

    pub async fn entry_count(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn roundtrip() {
        let tier = MemoryTier::new(100);
        assert!(tier.get("k").await.is_none());

        tier.insert("k", CacheEntry::new("k", json!("v"), Duration::from_secs(60)))
            .await;
        let entry = tier.get("k").await.unwrap();
        assert_eq!(entry.payload, json!("v"));
        assert_eq!(tier.entry_count().await, 1);
    }

    #[tokio::test]
    async fn purge_only_removes_expired() {
        let tier = MemoryTier::new(100);
        let short = CacheEntry::new("short", json!(1), Duration::from_secs(1));
        let long = CacheEntry::new("long", json!(2), Duration::from_secs(3600));
        let later = short.created_at_ms + 5_000;

        tier.insert("short", short).await;
        tier.insert("long", long).await;

        assert_eq!(tier.purge_expired(later).await, 1);
        assert!(tier.get("short").await.is_none());
        assert!(tier.get("long").await.is_some());
    }
}
