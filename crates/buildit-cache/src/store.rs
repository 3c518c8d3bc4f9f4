//! Generic LRU-with-age-eviction store shared by the three sub-caches
//! (§4.11). Each sub-cache differs only in what it stores and how it
//! decides an entry is still valid; the bookkeeping (size/age eviction,
//! hit/miss/eviction counters) is identical, so it lives here once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Slot<V> {
    value: V,
    size_bytes: u64,
    inserted_at: Instant,
    last_accessed: Instant,
}

/// Snapshot of a sub-cache's counters (§4.11: "hits, misses, evictions,
/// entry counts, total size").
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheCounters {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entry_count: usize,
    pub total_size_bytes: u64,
}

impl CacheCounters {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// A single coarse lock per sub-cache guards size/eviction bookkeeping
/// (§5 "Shared-resource policy"); reads and writes of individual entries
/// still go through that lock, but the critical sections are short.
pub struct LruStore<V: Clone> {
    entries: Mutex<HashMap<String, Slot<V>>>,
    max_size_bytes: u64,
    max_age: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<V: Clone> LruStore<V> {
    pub fn new(max_size_bytes: u64, max_age: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_size_bytes,
            max_age,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Looks up `key`. `is_valid` re-checks validity against the world
    /// outside the cache (e.g. "does the jar file still exist"); an invalid
    /// hit is evicted and counted as a miss (§4.11 "Reads").
    pub fn get(&self, key: &str, is_valid: impl FnOnce(&V) -> bool) -> Option<V> {
        let mut entries = self.entries.lock().unwrap();
        let expired = match entries.get(key) {
            Some(slot) => slot.inserted_at.elapsed() > self.max_age || !is_valid(&slot.value),
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        if expired {
            entries.remove(key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        let slot = entries.get_mut(key).unwrap();
        slot.last_accessed = Instant::now();
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(slot.value.clone())
    }

    /// Inserts or replaces the entry for `key`, then evicts down to 80% of
    /// `max_size_bytes` if the write pushed the store over the limit
    /// (§4.11 "Eviction").
    pub fn put(&self, key: String, value: V, size_bytes: u64) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key,
            Slot {
                value,
                size_bytes,
                inserted_at: Instant::now(),
                last_accessed: Instant::now(),
            },
        );
        self.evict_locked(&mut entries);
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.entries.lock().unwrap().remove(key).is_some()
    }

    fn evict_locked(&self, entries: &mut HashMap<String, Slot<V>>) {
        let total: u64 = entries.values().map(|s| s.size_bytes).sum();
        if total <= self.max_size_bytes {
            return;
        }
        let target = (self.max_size_bytes as f64 * 0.8) as u64;
        let mut by_age: Vec<(String, Instant)> = entries
            .iter()
            .map(|(k, s)| (k.clone(), s.last_accessed))
            .collect();
        by_age.sort_by_key(|(_, last_accessed)| *last_accessed);

        let mut remaining: u64 = total;
        for (key, _) in by_age {
            if remaining <= target {
                break;
            }
            if let Some(slot) = entries.remove(&key) {
                remaining = remaining.saturating_sub(slot.size_bytes);
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Enforces size/age limits without waiting for a write; the
    /// background cleanup worker calls this every `backgroundCleanupInterval`
    /// (§4.11).
    pub fn enforce_limits(&self) {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        let stale: Vec<String> = entries
            .iter()
            .filter(|(_, s)| now.duration_since(s.inserted_at) > self.max_age)
            .map(|(k, _)| k.clone())
            .collect();
        for key in stale {
            entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        self.evict_locked(&mut entries);
    }

    pub fn counters(&self) -> CacheCounters {
        let entries = self.entries.lock().unwrap();
        CacheCounters {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entry_count: entries.len(),
            total_size_bytes: entries.values().map(|s| s.size_bytes).sum(),
        }
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_then_hit_after_put() {
        let store: LruStore<u64> = LruStore::new(1024, Duration::from_secs(3600));
        assert!(store.get("k", |_| true).is_none());
        store.put("k".to_string(), 42, 8);
        assert_eq!(store.get("k", |_| true), Some(42));
        let counters = store.counters();
        assert_eq!(counters.hits, 1);
        assert_eq!(counters.misses, 1);
    }

    #[test]
    fn invalid_hit_is_evicted_and_counted_as_miss() {
        let store: LruStore<u64> = LruStore::new(1024, Duration::from_secs(3600));
        store.put("k".to_string(), 42, 8);
        assert!(store.get("k", |_| false).is_none());
        assert_eq!(store.counters().evictions, 1);
        assert!(store.get("k", |_| true).is_none());
    }

    #[test]
    fn eviction_keeps_store_under_80_percent_of_limit() {
        let store: LruStore<u64> = LruStore::new(100, Duration::from_secs(3600));
        for i in 0..10 {
            store.put(format!("k{i}"), i, 20);
        }
        let counters = store.counters();
        assert!(counters.total_size_bytes as f64 <= 100.0 * 0.8);
        assert!(counters.evictions > 0);
    }

    #[test]
    fn expired_entries_are_removed_by_enforce_limits() {
        let store: LruStore<u64> = LruStore::new(1024, Duration::from_millis(1));
        store.put("k".to_string(), 1, 1);
        std::thread::sleep(Duration::from_millis(5));
        store.enforce_limits();
        assert_eq!(store.counters().entry_count, 0);
    }
}
