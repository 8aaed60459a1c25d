//! Bounded, expiring result cache.
//!
//! Recency ordering comes from [`lru::LruCache`]: every successful `get` and
//! every `put` moves the entry to the front, so eviction at capacity always
//! drops the least-recently-accessed entry. Each entry also carries its own
//! TTL and is purged the first time it is looked up after expiring.

use lru::LruCache;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

/// Stable key for a cached value: hex SHA-256 over its parts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Hashes the parts in order. Parts are separated by a NUL byte so that
    /// `["ab", "c"]` and `["a", "bc"]` never collide.
    pub fn digest<'a, I>(parts: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        CacheKey(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, or 0 when nothing has been looked up yet.
    pub hit_rate: f64,
    pub evictions: u64,
    pub ttl_secs: u64,
}

struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    last_access: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) > self.ttl
    }
}

struct CacheState<K: Hash + Eq, V> {
    entries: LruCache<K, CacheEntry<V>>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Thread-safe LRU + TTL cache. Values are handed out as clones; entries
/// never leave the cache by reference.
pub struct ResultCache<K: Hash + Eq, V> {
    state: Mutex<CacheState<K, V>>,
    max_size: NonZeroUsize,
    default_ttl: Duration,
    name: &'static str,
}

impl<K, V> ResultCache<K, V>
where
    K: Hash + Eq + Clone + fmt::Debug,
    V: Clone,
{
    /// Creates a cache holding at most `max_size` entries (minimum 1), each
    /// living `default_ttl` unless stored with [`ResultCache::put_with_ttl`].
    pub fn new(name: &'static str, max_size: usize, default_ttl: Duration) -> Self {
        let max_size = NonZeroUsize::new(max_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Mutex::new(CacheState {
                entries: LruCache::new(max_size),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            max_size,
            default_ttl,
            name,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<K, V>> {
        // A panic while holding the lock cannot leave an entry half-written:
        // every mutation is a single LruCache call.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Looks up `key`, counting a hit or a miss. Expired entries are purged
    /// and reported as misses.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut guard = self.lock();
        let state = &mut *guard;

        let expired = match state.entries.get_mut(key) {
            Some(entry) if entry.is_expired(now) => true,
            Some(entry) => {
                entry.last_access = now;
                state.hits += 1;
                debug!(cache = self.name, key = ?key, "cache hit");
                return Some(entry.value.clone());
            }
            None => false,
        };

        if expired {
            state.entries.pop(key);
            debug!(cache = self.name, key = ?key, "cache entry expired");
        } else {
            debug!(cache = self.name, key = ?key, "cache miss");
        }
        state.misses += 1;
        None
    }

    /// Stores `value` with the cache's default TTL.
    pub fn put(&self, key: K, value: V) {
        self.put_with_ttl(key, value, self.default_ttl);
    }

    /// Stores `value` with its own TTL. At capacity, expired entries are
    /// dropped first; if none were expired the least-recently-used entry goes.
    pub fn put_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let now = Instant::now();
        let mut guard = self.lock();
        let state = &mut *guard;

        if state.entries.len() >= self.max_size.get() && !state.entries.contains(&key) {
            purge_expired_locked(&mut state.entries, now);
        }

        let entry = CacheEntry {
            value,
            created_at: now,
            last_access: now,
            ttl,
        };
        if let Some((evicted, _)) = state.entries.push(key.clone(), entry) {
            if evicted != key {
                state.evictions += 1;
                debug!(cache = self.name, key = ?evicted, "evicted least recently used entry");
            }
        }
    }

    /// Checks for a live entry without touching counters or recency.
    pub fn contains(&self, key: &K) -> bool {
        let now = Instant::now();
        self.lock()
            .entries
            .peek(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Time since `key` was last read or written, if present.
    pub fn idle_time(&self, key: &K) -> Option<Duration> {
        self.lock()
            .entries
            .peek(key)
            .map(|entry| entry.last_access.elapsed())
    }

    /// Removes every expired entry, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let removed = purge_expired_locked(&mut self.lock().entries, Instant::now());
        if removed > 0 {
            debug!(cache = self.name, removed, "purged expired entries");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        let lookups = state.hits + state.misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            state.hits as f64 / lookups as f64
        };
        CacheStats {
            size: state.entries.len(),
            max_size: self.max_size.get(),
            hits: state.hits,
            misses: state.misses,
            hit_rate,
            evictions: state.evictions,
            ttl_secs: self.default_ttl.as_secs(),
        }
    }

    /// Drops all entries and resets every counter under one lock.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.hits = 0;
        state.misses = 0;
        state.evictions = 0;
    }
}

fn purge_expired_locked<K: Hash + Eq + Clone, V>(
    entries: &mut LruCache<K, CacheEntry<V>>,
    now: Instant,
) -> usize {
    let expired: Vec<K> = entries
        .iter()
        .filter(|(_, entry)| entry.is_expired(now))
        .map(|(key, _)| key.clone())
        .collect();
    for key in &expired {
        entries.pop(key);
    }
    expired.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn cache(max: usize) -> ResultCache<String, u32> {
        ResultCache::new("test", max, Duration::from_secs(60))
    }

    #[test]
    fn test_key_is_stable_and_order_sensitive() {
        let a = CacheKey::digest(["single_sentiment", "great video"]);
        let b = CacheKey::digest(["single_sentiment", "great video"]);
        let c = CacheKey::digest(["batch_sentiment", "great video"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 64);
        assert_ne!(CacheKey::digest(["ab", "c"]), CacheKey::digest(["a", "bc"]));
    }

    #[test]
    fn test_hit_and_miss_counting() {
        let cache = cache(10);
        assert_eq!(cache.get(&"a".to_string()), None);
        cache.put("a".to_string(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        assert_eq!(cache.get(&"a".to_string()), Some(1));

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_hit_rate_is_zero_without_lookups() {
        let stats = cache(10).stats();
        assert_eq!(stats.hit_rate, 0.0);
        assert_eq!(stats.size, 0);
    }

    #[test]
    fn test_capacity_is_never_exceeded() {
        let cache = cache(3);
        for i in 0..4 {
            cache.put(format!("k{}", i), i);
        }
        assert_eq!(cache.len(), 3);
        assert!(!cache.contains(&"k0".to_string()));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_recently_read_entry_survives_eviction() {
        let cache = cache(3);
        cache.put("a".to_string(), 1);
        cache.put("b".to_string(), 2);
        cache.put("c".to_string(), 3);

        // "a" is the oldest insert but the most recent read.
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        cache.put("d".to_string(), 4);

        assert!(cache.contains(&"a".to_string()));
        assert!(!cache.contains(&"b".to_string()));
        assert!(cache.contains(&"c".to_string()));
        assert!(cache.contains(&"d".to_string()));
    }

    #[test]
    fn test_overwrite_is_not_an_eviction() {
        let cache = cache(2);
        cache.put("a".to_string(), 1);
        cache.put("a".to_string(), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.get(&"a".to_string()), Some(2));
    }

    #[test]
    fn test_expired_entry_is_a_miss_and_purged() {
        let cache: ResultCache<String, u32> =
            ResultCache::new("test", 10, Duration::from_millis(30));
        cache.put("a".to_string(), 1);
        thread::sleep(Duration::from_millis(50));

        assert_eq!(cache.get(&"a".to_string()), None);
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_per_entry_ttl() {
        let cache = cache(10);
        cache.put_with_ttl("short".to_string(), 1, Duration::from_millis(20));
        cache.put("long".to_string(), 2);
        thread::sleep(Duration::from_millis(40));

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.get(&"long".to_string()), Some(2));
    }

    #[test]
    fn test_full_cache_drops_expired_before_live_entries() {
        let cache = cache(2);
        cache.put_with_ttl("stale".to_string(), 1, Duration::from_millis(10));
        cache.put("live".to_string(), 2);
        // Reading "stale" leaves "live" as the least recently used entry.
        assert_eq!(cache.get(&"stale".to_string()), Some(1));
        thread::sleep(Duration::from_millis(30));
        cache.put("other".to_string(), 3);

        assert!(cache.contains(&"live".to_string()));
        assert!(cache.contains(&"other".to_string()));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_clear_resets_storage_and_counters() {
        let cache = cache(10);
        cache.put("a".to_string(), 1);
        cache.get(&"a".to_string());
        cache.get(&"b".to_string());
        cache.clear();

        let stats = cache.stats();
        assert_eq!(stats.size, 0);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
    }

    #[test]
    fn test_get_refreshes_last_access() {
        let cache = cache(10);
        cache.put("a".to_string(), 1);
        thread::sleep(Duration::from_millis(30));
        assert!(cache.idle_time(&"a".to_string()).unwrap() >= Duration::from_millis(30));
        cache.get(&"a".to_string());
        assert!(cache.idle_time(&"a".to_string()).unwrap() < Duration::from_millis(30));
    }

    #[test]
    fn test_contains_does_not_count() {
        let cache = cache(10);
        cache.put("a".to_string(), 1);
        assert!(cache.contains(&"a".to_string()));
        let stats = cache.stats();
        assert_eq!(stats.hits + stats.misses, 0);
    }
}
