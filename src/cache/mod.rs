mod memory;
mod redis;
mod store;

pub use self::memory::MemoryTier;
pub use self::redis::RedisStore;
pub use self::store::{FsStore, PersistedStore, StoredObject};

use crate::config::CacheConfig;
use crate::constants::{LEG_KEY_PRECISION, PLACE_QUERY_KEY_PRECISION, PLACE_QUERY_RADIUS_BUCKET_M};
use crate::models::{Coordinates, PlaceCategory};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Independent key spaces with their own TTL defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheNamespace {
    PlaceQuery,
    Leg,
}

impl CacheNamespace {
    pub const ALL: [CacheNamespace; 2] = [CacheNamespace::PlaceQuery, CacheNamespace::Leg];

    /// Directory / key prefix in the persisted tier
    pub fn prefix(&self) -> &'static str {
        match self {
            CacheNamespace::PlaceQuery => "places",
            CacheNamespace::Leg => "legs",
        }
    }
}

/// One cached value with its expiry bookkeeping. Timestamps are unix ms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Value,
    pub created_at_ms: i64,
    pub ttl_ms: i64,
    pub last_access_ms: i64,
}

impl CacheEntry {
    pub fn new(key: &str, payload: Value, ttl: Duration) -> Self {
        let now = now_ms();
        CacheEntry {
            key: key.to_string(),
            payload,
            created_at_ms: now,
            ttl_ms: ttl.as_millis().min(i64::MAX as u128) as i64,
            last_access_ms: now,
        }
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.created_at_ms.saturating_add(self.ttl_ms)
    }
}

/// Result of a cache read
#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub payload: Option<Value>,
    pub hit: bool,
}

impl CacheLookup {
    fn hit(payload: Value) -> Self {
        CacheLookup {
            payload: Some(payload),
            hit: true,
        }
    }

    fn miss() -> Self {
        CacheLookup {
            payload: None,
            hit: false,
        }
    }
}

/// Cache statistics for monitoring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    /// Entries held in the in-process tier
    pub size: u64,
    /// Bytes held in the persisted tier
    pub disk_bytes: u64,
    pub persisted_backend: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MaintenanceReport {
    pub expired_removed: usize,
    pub evicted_for_budget: usize,
    pub disk_bytes: u64,
}

/// Two-tier cache: moka in front, a [`PersistedStore`] behind.
///
/// The persisted tier is the source of truth across restarts; the memory
/// tier is read-through/write-through. Persisted-tier failures are logged
/// and swallowed, so callers only ever observe hits and misses.
pub struct CacheManager {
    places: MemoryTier,
    legs: MemoryTier,
    store: Option<Arc<dyn PersistedStore>>,
    place_ttl: Duration,
    leg_ttl: Duration,
    disk_budget_bytes: u64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheManager {
    pub fn new(config: &CacheConfig, store: Option<Arc<dyn PersistedStore>>) -> Self {
        CacheManager {
            places: MemoryTier::new(config.memory_capacity),
            legs: MemoryTier::new(config.memory_capacity),
            store,
            place_ttl: Duration::from_secs(config.place_ttl_secs),
            leg_ttl: Duration::from_secs(config.leg_ttl_secs),
            disk_budget_bytes: config.disk_budget_bytes,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn memory_only(config: &CacheConfig) -> Self {
        Self::new(config, None)
    }

    /// Build the manager with the configured persisted tier: Redis when a URL
    /// is set, otherwise the file store. Falls back to memory-only on failure.
    pub async fn open(config: &CacheConfig) -> Self {
        let store: Option<Arc<dyn PersistedStore>> = if let Some(ref url) = config.redis_url {
            match RedisStore::connect(url).await {
                Ok(store) => Some(Arc::new(store)),
                Err(e) => {
                    tracing::warn!(
                        "Failed to open Redis cache tier: {}. Continuing with in-process cache only.",
                        e
                    );
                    None
                }
            }
        } else {
            match FsStore::open(&config.cache_dir).await {
                Ok(store) => Some(Arc::new(store)),
                Err(e) => {
                    tracing::warn!(
                        "Failed to open disk cache tier at {}: {}. Continuing with in-process cache only.",
                        config.cache_dir,
                        e
                    );
                    None
                }
            }
        };

        if let Some(ref s) = store {
            tracing::info!(backend = s.backend_name(), "Persisted cache tier ready");
        }

        Self::new(config, store)
    }

    fn tier(&self, ns: CacheNamespace) -> &MemoryTier {
        match ns {
            CacheNamespace::PlaceQuery => &self.places,
            CacheNamespace::Leg => &self.legs,
        }
    }

    fn persisted_key(ns: CacheNamespace, key: &str) -> String {
        format!("{}/{}", ns.prefix(), key)
    }

    pub fn ttl_for(&self, ns: CacheNamespace) -> Duration {
        match ns {
            CacheNamespace::PlaceQuery => self.place_ttl,
            CacheNamespace::Leg => self.leg_ttl,
        }
    }

    pub async fn get(&self, ns: CacheNamespace, key: &str) -> CacheLookup {
        let now = now_ms();
        let tier = self.tier(ns);

        if let Some(entry) = tier.get(key).await {
            if !entry.is_expired(now) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Memory cache hit ({}): {}", ns.prefix(), key);
                return CacheLookup::hit(entry.payload.clone());
            }
            tier.invalidate(key).await;
        }

        if let Some(entry) = self.read_persisted(ns, key, now).await {
            tier.insert(key, entry.clone()).await;
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Disk cache hit ({}): {}", ns.prefix(), key);
            return CacheLookup::hit(entry.payload);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Cache miss ({}): {}", ns.prefix(), key);
        CacheLookup::miss()
    }

    /// Read from the persisted tier. Corrupt or expired entries are removed
    /// and reported as absent.
    async fn read_persisted(&self, ns: CacheNamespace, key: &str, now: i64) -> Option<CacheEntry> {
        let store = self.store.as_ref()?;
        let persisted_key = Self::persisted_key(ns, key);

        let bytes = match store.read(&persisted_key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Persisted cache read failed for {}: {}", persisted_key, e);
                return None;
            }
        };

        let mut entry: CacheEntry = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Discarding corrupt cache entry {}: {}", persisted_key, e);
                self.remove_persisted(store.as_ref(), &persisted_key).await;
                return None;
            }
        };

        if entry.is_expired(now) {
            self.remove_persisted(store.as_ref(), &persisted_key).await;
            return None;
        }

        entry.last_access_ms = now;
        self.write_persisted(ns, &entry).await;
        Some(entry)
    }

    async fn write_persisted(&self, ns: CacheNamespace, entry: &CacheEntry) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        let persisted_key = Self::persisted_key(ns, &entry.key);
        let bytes = match serde_json::to_vec(entry) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!("Failed to serialize cache entry {}: {}", persisted_key, e);
                return;
            }
        };
        if let Err(e) = store.write(&persisted_key, bytes).await {
            tracing::warn!("Persisted cache write failed for {}: {}", persisted_key, e);
        }
    }

    async fn remove_persisted(&self, store: &dyn PersistedStore, persisted_key: &str) {
        if let Err(e) = store.remove(persisted_key).await {
            tracing::warn!("Persisted cache remove failed for {}: {}", persisted_key, e);
        }
    }

    pub async fn put(&self, ns: CacheNamespace, key: &str, payload: Value, ttl: Duration) {
        let entry = CacheEntry::new(key, payload, ttl);
        self.tier(ns).insert(key, entry.clone()).await;
        self.write_persisted(ns, &entry).await;
        tracing::debug!(
            "Cached {} entry with TTL {}s: {}",
            ns.prefix(),
            ttl.as_secs(),
            key
        );
    }

    /// Typed read; a payload that no longer deserializes counts as a miss
    pub async fn get_json<T: DeserializeOwned>(&self, ns: CacheNamespace, key: &str) -> Option<T> {
        let payload = self.get(ns, key).await.payload?;
        match serde_json::from_value(payload) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Cached {} payload for {} is unreadable: {}", ns.prefix(), key, e);
                self.tier(ns).invalidate(key).await;
                None
            }
        }
    }

    /// Typed write using the namespace's default TTL
    pub async fn put_json<T: Serialize>(&self, ns: CacheNamespace, key: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(payload) => self.put(ns, key, payload, self.ttl_for(ns)).await,
            Err(e) => tracing::warn!("Failed to serialize {} payload for cache: {}", ns.prefix(), e),
        }
    }

    /// Drop expired entries from both tiers. Returns how many were removed.
    pub async fn evict_expired(&self) -> usize {
        let now = now_ms();
        let mut removed = 0;
        for ns in CacheNamespace::ALL {
            removed += self.tier(ns).purge_expired(now).await;
        }
        removed + self.prune_persisted(now, false).await.expired_removed
    }

    /// Full maintenance pass: expiry in both tiers plus LRU pruning of the
    /// persisted tier down to the disk budget.
    pub async fn maintain(&self) -> MaintenanceReport {
        let now = now_ms();
        let mut memory_removed = 0;
        for ns in CacheNamespace::ALL {
            memory_removed += self.tier(ns).purge_expired(now).await;
        }
        let mut report = self.prune_persisted(now, true).await;
        report.expired_removed += memory_removed;

        tracing::info!(
            expired = report.expired_removed,
            evicted = report.evicted_for_budget,
            disk_bytes = report.disk_bytes,
            "Cache maintenance: {} expired, {} evicted for budget, {} bytes on disk",
            report.expired_removed,
            report.evicted_for_budget,
            report.disk_bytes
        );
        report
    }

    async fn prune_persisted(&self, now: i64, enforce_budget: bool) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();
        let Some(store) = self.store.as_ref() else {
            return report;
        };

        // (last_access_ms, persisted_key, size)
        let mut live: Vec<(i64, String, u64)> = Vec::new();

        for ns in CacheNamespace::ALL {
            let objects = match store.list(ns.prefix()).await {
                Ok(objects) => objects,
                Err(e) => {
                    tracing::warn!("Failed to list persisted {} entries: {}", ns.prefix(), e);
                    continue;
                }
            };

            for object in objects {
                let entry = match store.read(&object.key).await {
                    Ok(Some(bytes)) => serde_json::from_slice::<CacheEntry>(&bytes).ok(),
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!("Failed to read {} during maintenance: {}", object.key, e);
                        continue;
                    }
                };

                match entry {
                    Some(entry) if !entry.is_expired(now) => {
                        live.push((entry.last_access_ms, object.key, object.size_bytes));
                    }
                    _ => {
                        self.remove_persisted(store.as_ref(), &object.key).await;
                        report.expired_removed += 1;
                    }
                }
            }
        }

        let mut total: u64 = live.iter().map(|(_, _, size)| size).sum();

        if enforce_budget && total > self.disk_budget_bytes {
            live.sort_by_key(|(last_access, _, _)| *last_access);
            for (_, key, size) in live {
                if total <= self.disk_budget_bytes {
                    break;
                }
                self.remove_persisted(store.as_ref(), &key).await;
                if let Some((prefix, raw_key)) = key.split_once('/') {
                    if let Some(ns) = CacheNamespace::ALL.iter().find(|ns| ns.prefix() == prefix) {
                        self.tier(*ns).invalidate(raw_key).await;
                    }
                }
                total = total.saturating_sub(size);
                report.evicted_for_budget += 1;
            }
        }

        report.disk_bytes = total;
        report
    }

    /// Run [`maintain`](Self::maintain) on a fixed interval until cancelled
    pub fn spawn_maintenance(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("Cache maintenance stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.maintain().await;
                    }
                }
            }
        })
    }

    pub async fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let hit_rate = if hits + misses > 0 {
            (hits as f64 / (hits + misses) as f64) * 100.0
        } else {
            0.0
        };

        let size = self.places.entry_count().await + self.legs.entry_count().await;

        let mut disk_bytes = 0;
        if let Some(store) = self.store.as_ref() {
            for ns in CacheNamespace::ALL {
                match store.list(ns.prefix()).await {
                    Ok(objects) => disk_bytes += objects.iter().map(|o| o.size_bytes).sum::<u64>(),
                    Err(e) => tracing::warn!("Failed to size persisted cache: {}", e),
                }
            }
        }

        CacheStats {
            hits,
            misses,
            hit_rate,
            size,
            disk_bytes,
            persisted_backend: self.store.as_ref().map(|s| s.backend_name().to_string()),
        }
    }

    pub fn persisted_backend(&self) -> Option<&'static str> {
        self.store.as_ref().map(|s| s.backend_name())
    }
}

pub fn now_ms() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Key for place-provider queries.
/// Origin rounded to 3 decimals (~100m), radius in 100m buckets, categories
/// order-independent.
pub fn place_query_cache_key(
    origin: &Coordinates,
    radius_m: f64,
    categories: &[PlaceCategory],
) -> String {
    let mut hasher = DefaultHasher::new();

    origin.key_fragment(PLACE_QUERY_KEY_PRECISION).hash(&mut hasher);
    let radius_bucket = (radius_m / PLACE_QUERY_RADIUS_BUCKET_M).ceil() as i64;
    radius_bucket.hash(&mut hasher);

    let mut cats: Vec<String> = categories.iter().map(|c| c.to_string()).collect();
    cats.sort();
    cats.dedup();
    cats.hash(&mut hasher);

    format!("{:016x}", hasher.finish())
}

/// Key for walking legs. Coordinates rounded to ~1m and ordered so that
/// A→B and B→A share an entry.
pub fn leg_cache_key(a: &Coordinates, b: &Coordinates) -> String {
    let mut ends = [
        a.key_fragment(LEG_KEY_PRECISION),
        b.key_fragment(LEG_KEY_PRECISION),
    ];
    ends.sort();

    let mut hasher = DefaultHasher::new();
    ends.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> CacheConfig {
        CacheConfig {
            memory_capacity: 100,
            ..CacheConfig::default()
        }
    }

    #[test]
    fn test_leg_key_is_direction_insensitive() {
        let a = Coordinates::new(48.8566, 2.3522).unwrap();
        let b = Coordinates::new(48.8606, 2.3376).unwrap();
        assert_eq!(leg_cache_key(&a, &b), leg_cache_key(&b, &a));

        let c = Coordinates::new(48.8610, 2.3376).unwrap();
        assert_ne!(leg_cache_key(&a, &b), leg_cache_key(&a, &c));
    }

    #[test]
    fn test_place_query_key_category_order_independence() {
        let origin = Coordinates::new(48.8566, 2.3522).unwrap();
        let key1 = place_query_cache_key(
            &origin,
            2000.0,
            &[PlaceCategory::Museum, PlaceCategory::Park],
        );
        let key2 = place_query_cache_key(
            &origin,
            2000.0,
            &[PlaceCategory::Park, PlaceCategory::Museum],
        );
        assert_eq!(key1, key2);
    }

    #[test]
    fn test_place_query_key_coordinate_precision() {
        // Within ~100m of each other: same key
        let a = Coordinates::new(48.8566, 2.3522).unwrap();
        let b = Coordinates::new(48.8567, 2.3523).unwrap();
        assert_eq!(
            place_query_cache_key(&a, 2000.0, &[]),
            place_query_cache_key(&b, 2000.0, &[])
        );
        assert_ne!(
            place_query_cache_key(&a, 2000.0, &[]),
            place_query_cache_key(&a, 2500.0, &[])
        );
    }

    #[test]
    fn test_entry_expiry() {
        let entry = CacheEntry::new("k", json!(1), Duration::from_secs(10));
        assert!(!entry.is_expired(entry.created_at_ms + 9_999));
        assert!(entry.is_expired(entry.created_at_ms + 10_000));
    }

    #[tokio::test]
    async fn test_memory_only_roundtrip_and_stats() {
        let cache = CacheManager::memory_only(&config());

        assert!(!cache.get(CacheNamespace::Leg, "missing").await.hit);

        cache
            .put(CacheNamespace::Leg, "k1", json!({"d": 5}), Duration::from_secs(60))
            .await;
        let lookup = cache.get(CacheNamespace::Leg, "k1").await;
        assert!(lookup.hit);
        assert_eq!(lookup.payload, Some(json!({"d": 5})));

        // Namespaces are independent
        assert!(!cache.get(CacheNamespace::PlaceQuery, "k1").await.hit);

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.size, 1);
        assert_eq!(stats.disk_bytes, 0);
        assert!(stats.persisted_backend.is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let cache = CacheManager::memory_only(&config());
        cache
            .put(CacheNamespace::PlaceQuery, "k", json!([1, 2]), Duration::from_millis(30))
            .await;
        assert!(cache.get(CacheNamespace::PlaceQuery, "k").await.hit);

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(!cache.get(CacheNamespace::PlaceQuery, "k").await.hit);
    }

    #[tokio::test]
    async fn test_get_json_type_mismatch_is_miss() {
        let cache = CacheManager::memory_only(&config());
        cache.put_json(CacheNamespace::Leg, "k", &"text").await;
        let value: Option<Vec<u32>> = cache.get_json(CacheNamespace::Leg, "k").await;
        assert!(value.is_none());
    }
}
