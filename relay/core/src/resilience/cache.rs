//! Tagged TTL Cache with LRU Eviction
//!
//! A bounded key/value store used for adapter results:
//! - Every entry expires (`expires_at >= created_at` always holds)
//! - Expired entries are evicted on read and reported as misses
//! - Inserting into a full cache evicts least recently used entries first,
//!   so the entry count never exceeds `max_size`, even transiently
//! - Entries carry tags for bulk invalidation
//!
//! # Thread Safety
//!
//! Each [`Cache`] guards its table with a single mutex that is never held
//! across an await point. Hit/miss counters are atomics. Stats are for
//! reporting only; correctness never depends on them.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::time::Instant;

// ============================================================================
// Configuration
// ============================================================================

/// Storage tier of a cache
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheLevel {
    Memory,
    Disk,
    Distributed,
}

impl CacheLevel {
    /// Lookup order, fastest first
    pub const ALL: [CacheLevel; 3] = [Self::Memory, Self::Disk, Self::Distributed];
}

impl std::fmt::Display for CacheLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Memory => "memory",
            Self::Disk => "disk",
            Self::Distributed => "distributed",
        })
    }
}

/// Bounds for one cache level
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheLevelConfig {
    /// Whether this level participates in lookups
    pub enabled: bool,

    /// Maximum number of live entries
    pub max_size: usize,

    /// TTL applied when `set` is called without one
    pub default_ttl_ms: u64,
}

impl CacheLevelConfig {
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }
}

impl Default for CacheLevelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: 1_000,
            default_ttl_ms: 60 * 60 * 1_000,
        }
    }
}

/// Cache configuration across levels
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Master switch for result caching
    pub enabled: bool,

    pub memory: CacheLevelConfig,

    pub disk: CacheLevelConfig,

    pub distributed: CacheLevelConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            memory: CacheLevelConfig::default(),
            disk: CacheLevelConfig {
                enabled: false,
                max_size: 10_000,
                default_ttl_ms: 24 * 60 * 60 * 1_000,
            },
            distributed: CacheLevelConfig {
                enabled: false,
                max_size: 100_000,
                default_ttl_ms: 7 * 24 * 60 * 60 * 1_000,
            },
        }
    }
}

impl CacheConfig {
    /// Config for one level
    pub fn level(&self, level: CacheLevel) -> &CacheLevelConfig {
        match level {
            CacheLevel::Memory => &self.memory,
            CacheLevel::Disk => &self.disk,
            CacheLevel::Distributed => &self.distributed,
        }
    }
}

// ============================================================================
// Entries
// ============================================================================

/// A cached value and its metadata
#[derive(Clone, Debug)]
pub struct CacheEntry<T> {
    /// The cached payload
    pub data: T,
    /// Key this entry is stored under
    pub key: String,
    /// sha256 of the serialized payload; empty if the payload does not serialize
    pub content_hash: String,
    /// When this entry was created
    pub created_at: Instant,
    /// When this entry was last read
    pub last_accessed_at: Instant,
    /// Number of reads
    pub access_count: u64,
    /// Approximate payload size in bytes
    pub size_estimate: usize,
    /// Invalidation tags
    pub tags: HashSet<String>,
    /// When this entry stops being served
    pub expires_at: Instant,
    /// Recency sequence for LRU ordering
    recency: u64,
}

impl<T> CacheEntry<T> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Cumulative cache statistics
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, 0.0 before any lookup
    pub hit_rate: f64,
    /// Entries currently stored (expired entries not yet evicted included)
    pub entries: usize,
    /// Sum of entry size estimates in bytes
    pub total_size: usize,
    pub evictions: u64,
}

/// sha256 hex digest of arbitrary text, used for cache keys and content hashes
pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

// ============================================================================
// Cache
// ============================================================================

struct Table<T> {
    entries: HashMap<String, CacheEntry<T>>,
    clock: u64,
}

impl<T> Table<T> {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn evict_lru(&mut self) -> Option<String> {
        let key = self
            .entries
            .values()
            .min_by_key(|e| e.recency)
            .map(|e| e.key.clone())?;
        self.entries.remove(&key);
        Some(key)
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        before - self.entries.len()
    }
}

/// Bounded, tagged TTL cache
pub struct Cache<T> {
    name: String,
    config: CacheLevelConfig,
    table: Mutex<Table<T>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<T: Clone + Serialize> Cache<T> {
    /// Create a cache named for logging
    pub fn new(name: impl Into<String>, config: CacheLevelConfig) -> Self {
        Self {
            name: name.into(),
            config,
            table: Mutex::new(Table {
                entries: HashMap::new(),
                clock: 0,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CacheLevelConfig {
        &self.config
    }

    /// Read a value, updating recency
    ///
    /// An expired entry is evicted and reported as a miss.
    pub fn get(&self, key: &str) -> Option<T> {
        let now = Instant::now();
        let mut table = self.table.lock();
        let recency = table.tick();

        let expired = match table.entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.last_accessed_at = now;
                entry.access_count = entry.access_count.saturating_add(1);
                entry.recency = recency;
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.data.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            table.entries.remove(key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(cache = %self.name, key, "Evicted expired cache entry");
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a value with the default TTL and no tags
    pub fn insert(&self, key: impl Into<String>, value: T) {
        self.set(key, value, None, std::iter::empty::<String>());
    }

    /// Store a value
    ///
    /// When the cache is full, expired entries and then least recently used
    /// entries are evicted until there is room, before the new entry goes in.
    pub fn set<I, S>(&self, key: impl Into<String>, value: T, ttl: Option<Duration>, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let key = key.into();
        let now = Instant::now();
        let (hash, size_estimate) = match serde_json::to_string(&value) {
            Ok(serialized) => (content_hash(&serialized), serialized.len()),
            Err(e) => {
                tracing::debug!(
                    cache = %self.name,
                    key = %key,
                    error = %e,
                    "Cache entry stored without content metadata"
                );
                (String::new(), 0)
            }
        };
        let ttl = ttl.unwrap_or_else(|| self.config.default_ttl());

        let mut table = self.table.lock();
        table.entries.remove(&key);

        if table.entries.len() >= self.config.max_size {
            let purged = table.purge_expired(now);
            self.evictions.fetch_add(purged as u64, Ordering::Relaxed);
        }
        while !table.entries.is_empty() && table.entries.len() >= self.config.max_size {
            if let Some(evicted) = table.evict_lru() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(cache = %self.name, key = %evicted, "Evicted LRU cache entry");
            }
        }
        if self.config.max_size == 0 {
            return;
        }

        let recency = table.tick();
        table.entries.insert(
            key.clone(),
            CacheEntry {
                data: value,
                content_hash: hash,
                created_at: now,
                last_accessed_at: now,
                access_count: 0,
                size_estimate,
                tags: tags.into_iter().map(Into::into).collect(),
                expires_at: now + ttl,
                recency,
                key,
            },
        );
    }

    /// Remove one entry
    pub fn delete(&self, key: &str) -> bool {
        self.table.lock().entries.remove(key).is_some()
    }

    /// Remove every entry; cumulative stats are kept
    pub fn clear(&self) {
        self.table.lock().entries.clear();
    }

    /// Whether a live entry exists (does not count as a lookup)
    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        self.table
            .lock()
            .entries
            .get(key)
            .is_some_and(|e| !e.is_expired(now))
    }

    /// Inspect an entry without touching it
    pub fn entry(&self, key: &str) -> Option<CacheEntry<T>> {
        self.table.lock().entries.get(key).cloned()
    }

    /// Remove every entry whose tags intersect `tags`; returns the count removed
    pub fn invalidate_by_tags(&self, tags: &[&str]) -> usize {
        let mut table = self.table.lock();
        let before = table.entries.len();
        table
            .entries
            .retain(|_, e| !tags.iter().any(|t| e.tags.contains(*t)));
        let removed = before - table.entries.len();

        if removed > 0 {
            tracing::debug!(cache = %self.name, removed, ?tags, "Invalidated cache entries by tag");
        }
        removed
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.table.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cumulative statistics
    pub fn get_stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let table = self.table.lock();

        CacheStats {
            hits,
            misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            entries: table.entries.len(),
            total_size: table.entries.values().map(|e| e.size_estimate).sum(),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

impl<T> std::fmt::Debug for Cache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.name)
            .field("max_size", &self.config.max_size)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(max_size: usize, ttl_ms: u64) -> Cache<String> {
        Cache::new(
            "test",
            CacheLevelConfig {
                enabled: true,
                max_size,
                default_ttl_ms: ttl_ms,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_trip_counts_access() {
        let cache = cache(10, 1_000);
        cache.insert("k", "v".to_string());

        assert_eq!(cache.get("k").as_deref(), Some("v"));
        let entry = cache.entry("k").unwrap();
        assert_eq!(entry.access_count, 1);
        assert!(entry.expires_at >= entry.created_at);
        assert_eq!(entry.content_hash, content_hash("\"v\""));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_evicts_on_get() {
        let cache = cache(10, 1_000);
        cache.set("k", "v".to_string(), Some(Duration::from_millis(500)), ["t"]);

        tokio::time::advance(Duration::from_millis(499)).await;
        assert!(cache.has("k"));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(cache.get("k"), None);
        assert!(cache.entry("k").is_none(), "expired entry removed on read");

        let stats = cache.get_stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lru_eviction_before_insert() {
        let cache = cache(2, 60_000);
        cache.insert("a", "1".to_string());
        cache.insert("b", "2".to_string());

        // Touch "a" so "b" becomes least recently used
        assert!(cache.get("a").is_some());
        cache.insert("c", "3".to_string());

        assert_eq!(cache.len(), 2);
        assert!(cache.has("a"));
        assert!(!cache.has("b"));
        assert!(cache.has("c"));
        assert_eq!(cache.get_stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_never_exceeds_bound() {
        let cache = cache(5, 60_000);
        for i in 0..50 {
            cache.insert(format!("k{i}"), format!("v{i}"));
            assert!(cache.len() <= 5);
        }
        // Overwriting an existing key does not evict
        cache.insert("k49", "again".to_string());
        assert_eq!(cache.len(), 5);
        assert!(cache.has("k45"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_reclaimed_first() {
        let cache = cache(2, 60_000);
        cache.set("short", "s".to_string(), Some(Duration::from_millis(10)), Vec::<String>::new());
        cache.insert("long", "l".to_string());

        tokio::time::advance(Duration::from_millis(20)).await;
        cache.insert("new", "n".to_string());

        assert!(cache.has("long"), "live entry kept while an expired one is reclaimed");
        assert!(cache.has("new"));
    }

    #[test]
    fn test_invalidate_by_tags() {
        let cache = cache(10, 60_000);
        cache.set("a", "1".to_string(), None, ["analysis", "goal-review"]);
        cache.set("b", "2".to_string(), None, ["analysis", "habit-tracking"]);
        cache.set("c", "3".to_string(), None, ["other"]);

        assert_eq!(cache.invalidate_by_tags(&["goal-review", "habit-tracking"]), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.invalidate_by_tags(&["missing"]), 0);
    }

    #[test]
    fn test_stats_hit_rate() {
        let cache = cache(10, 60_000);
        cache.insert("a", "1".to_string());
        cache.get("a");
        cache.get("a");
        cache.get("a");
        cache.get("missing");

        let stats = cache.get_stats();
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.75).abs() < f64::EPSILON);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.total_size, 3);
    }

    #[test]
    fn test_unserializable_value_kept_without_metadata() {
        // Non-string map keys cannot be written as JSON
        let cache: Cache<HashMap<(u8, u8), u8>> = Cache::new("memory", CacheLevelConfig::default());
        let value = HashMap::from([((1, 2), 3)]);
        cache.insert("k", value.clone());

        let entry = cache.entry("k").unwrap();
        assert!(entry.content_hash.is_empty());
        assert_eq!(entry.size_estimate, 0);
        assert_eq!(cache.get("k"), Some(value));
    }

    #[test]
    fn test_delete_and_clear() {
        let cache = cache(10, 60_000);
        cache.insert("a", "1".to_string());
        cache.insert("b", "2".to_string());

        assert!(cache.delete("a"));
        assert!(!cache.delete("a"));
        cache.clear();
        assert!(cache.is_empty());
    }
}
