//! Bounded capacity+TTL memoization cache for read-side queries.
//!
//! Each logical query family (recommendation, plan, related, top-N) gets
//! its own instance so pressure in one cannot evict another. Eviction is
//! least-recently-used among entries; an entry past its TTL is a miss
//! regardless of recency. State is process-local and rebuilt from misses;
//! no cross-process coherency is attempted.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const DEFAULT_CAPACITY: usize = 160;

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// Fixed-capacity LRU cache with per-entry TTL.
///
/// All operations are O(1) amortized except [`BoundedCache::prune`],
/// which is a linear sweep intended for periodic housekeeping.
pub struct BoundedCache<V> {
    name: &'static str,
    default_ttl: Duration,
    inner: Mutex<LruCache<String, CacheEntry<V>>>,
}

impl<V: Clone> BoundedCache<V> {
    /// Create a cache with a fixed capacity and a default entry TTL.
    pub fn new(name: &'static str, capacity: usize, default_ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .unwrap_or_else(|| NonZeroUsize::new(DEFAULT_CAPACITY).unwrap());
        Self {
            name,
            default_ttl,
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Look up a key, refreshing its recency on a hit.
    ///
    /// An expired entry is removed and reported as a miss even if it was
    /// the most recently touched key.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.lock().unwrap();
        let expired = match inner.get(key) {
            Some(entry) if Instant::now() > entry.expires_at => true,
            Some(entry) => return Some(entry.value.clone()),
            None => return None,
        };
        if expired {
            inner.pop(key);
        }
        None
    }

    /// Insert with the cache's default TTL.
    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.insert_with_ttl(key, value, self.default_ttl);
    }

    /// Insert with an explicit TTL. At capacity, the least-recently-used
    /// entry is evicted first.
    pub fn insert_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.inner.lock().unwrap().put(key.into(), entry);
    }

    /// Remove a key. Returns true if it was present.
    pub fn remove(&self, key: &str) -> bool {
        self.inner.lock().unwrap().pop(key).is_some()
    }

    /// Drop expired entries, returning how many were removed.
    pub fn prune(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        let stale: Vec<String> = inner
            .iter()
            .filter(|(_, entry)| now > entry.expires_at)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            inner.pop(key);
        }
        if !stale.is_empty() {
            tracing::debug!(cache = self.name, pruned = stale.len(), "Pruned expired entries");
        }
        stale.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Build a deterministic cache key from query parameters.
///
/// Pairs are sorted by name so callers do not have to agree on ordering.
pub fn build_cache_key(params: &[(&str, &str)]) -> String {
    let mut sorted: Vec<&(&str, &str)> = params.iter().collect();
    sorted.sort();
    sorted
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn test_cache(capacity: usize) -> BoundedCache<u32> {
        BoundedCache::new("test", capacity, Duration::from_secs(30))
    }

    #[test]
    fn test_get_miss_then_hit() {
        let cache = test_cache(4);
        assert_eq!(cache.get("a"), None);
        cache.insert("a", 1);
        assert_eq!(cache.get("a"), Some(1));
    }

    #[test]
    fn test_capacity_plus_one_evicts_exactly_the_lru_key() {
        let cache = test_cache(3);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("c", 3);

        // Touch "a" so "b" becomes least recently used.
        assert_eq!(cache.get("a"), Some(1));

        cache.insert("d", 4);
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("c"), Some(3));
        assert_eq!(cache.get("d"), Some(4));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_ttl_overrides_recency() {
        let cache = test_cache(4);
        cache.insert_with_ttl("fresh-by-recency", 7, Duration::from_millis(1));
        sleep(Duration::from_millis(5));
        // Most recently inserted, but past its TTL: must be a miss.
        assert_eq!(cache.get("fresh-by-recency"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_reinsert_refreshes_value_and_ttl() {
        let cache = test_cache(4);
        cache.insert_with_ttl("k", 1, Duration::from_millis(1));
        cache.insert_with_ttl("k", 2, Duration::from_secs(30));
        sleep(Duration::from_millis(5));
        assert_eq!(cache.get("k"), Some(2));
    }

    #[test]
    fn test_prune_removes_only_expired() {
        let cache = test_cache(8);
        cache.insert_with_ttl("old", 1, Duration::from_millis(1));
        cache.insert("live", 2);
        sleep(Duration::from_millis(5));
        assert_eq!(cache.prune(), 1);
        assert_eq!(cache.get("live"), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = test_cache(4);
        cache.insert("a", 1);
        assert!(cache.remove("a"));
        assert!(!cache.remove("a"));
        cache.insert("b", 2);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_capacity_falls_back_to_default() {
        let cache = test_cache(0);
        cache.insert("a", 1);
        assert_eq!(cache.get("a"), Some(1));
    }

    #[test]
    fn test_build_cache_key_is_order_independent() {
        let a = build_cache_key(&[("cluster", "c1"), ("limit", "5")]);
        let b = build_cache_key(&[("limit", "5"), ("cluster", "c1")]);
        assert_eq!(a, b);
        assert_eq!(a, "cluster=c1&limit=5");
    }

    #[test]
    fn test_concurrent_get_set() {
        use std::sync::Arc;
        let cache = Arc::new(test_cache(64));
        let mut handles = Vec::new();
        for t in 0..4 {
            let cache = Arc::clone(&cache);
            handles.push(std::thread::spawn(move || {
                for i in 0..200 {
                    let key = format!("k{}", (t * 31 + i) % 50);
                    cache.insert(key.clone(), i);
                    let _ = cache.get(&key);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(cache.len() <= 64);
    }
}
