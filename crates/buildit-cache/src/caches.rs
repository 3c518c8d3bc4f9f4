//! The three sub-caches (§3, §4.11), each a thin typed wrapper over
//! [`LruStore`].

use std::time::Duration;

use crate::entries::{CompiledScriptHandle, DependencyGraphEntry, LibraryEntry};
use crate::keys;
use crate::store::{CacheCounters, LruStore};

/// Memoizes compiled-script artifacts, keyed by
/// `sha256(scriptContent || scriptName || sortedDeps)`.
pub struct ScriptCache {
    store: LruStore<CompiledScriptHandle>,
}

impl ScriptCache {
    pub fn new(max_size_bytes: u64, max_age: Duration) -> Self {
        Self {
            store: LruStore::new(max_size_bytes, max_age),
        }
    }

    pub fn key(script_content: &str, script_name: &str, deps: &[String]) -> String {
        keys::script_key(script_content, script_name, deps)
    }

    /// A compiled script is valid for as long as it's in the cache at all —
    /// there's no external staleness check beyond age, unlike library
    /// entries whose backing jar can be deleted out from under the cache.
    pub fn get(&self, key: &str) -> Option<CompiledScriptHandle> {
        self.store.get(key, |_| true)
    }

    pub fn put(&self, key: String, handle: CompiledScriptHandle) {
        let size = handle.size_bytes();
        self.store.put(key, handle, size);
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.store.invalidate(key)
    }

    pub fn counters(&self) -> CacheCounters {
        self.store.counters()
    }

    pub fn enforce_limits(&self) {
        self.store.enforce_limits();
    }

    pub fn clear(&self) {
        self.store.clear();
    }
}

/// Memoizes library build outputs, keyed by `(name, version,
/// sha256(sourcePath))`. A hit is only returned if the referenced jar file
/// still exists and the caller-supplied current source hash still matches
/// (§3 `LibraryEntry` invariant).
pub struct LibraryCache {
    store: LruStore<LibraryEntry>,
}

impl LibraryCache {
    pub fn new(max_size_bytes: u64, max_age: Duration) -> Self {
        Self {
            store: LruStore::new(max_size_bytes, max_age),
        }
    }

    pub fn key(name: &str, version: &str, source_hash: &str) -> String {
        keys::library_key(name, version, source_hash)
    }

    pub fn get(&self, key: &str, current_source_hash: &str) -> Option<LibraryEntry> {
        self.store.get(key, |entry| entry.is_valid(current_source_hash))
    }

    pub fn put(&self, key: String, entry: LibraryEntry) {
        let size = std::fs::metadata(&entry.jar_file).map(|m| m.len()).unwrap_or(0);
        self.store.put(key, entry, size);
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.store.invalidate(key)
    }

    pub fn counters(&self) -> CacheCounters {
        self.store.counters()
    }

    pub fn enforce_limits(&self) {
        self.store.enforce_limits();
    }

    pub fn clear(&self) {
        self.store.clear();
    }
}

/// Memoizes resolved dependency graphs, keyed by the sorted cache-keys of
/// their input configurations.
pub struct DependencyGraphCache {
    store: LruStore<DependencyGraphEntry>,
}

impl DependencyGraphCache {
    pub fn new(max_size_bytes: u64, max_age: Duration) -> Self {
        Self {
            store: LruStore::new(max_size_bytes, max_age),
        }
    }

    pub fn key(input_keys: &[String]) -> String {
        keys::dependency_graph_key(input_keys)
    }

    pub fn get(&self, key: &str) -> Option<DependencyGraphEntry> {
        self.store.get(key, |_| true)
    }

    pub fn put(&self, key: String, entry: DependencyGraphEntry) {
        let size = entry.size_bytes;
        self.store.put(key, entry, size);
    }

    pub fn counters(&self) -> CacheCounters {
        self.store.counters()
    }

    pub fn enforce_limits(&self) {
        self.store.enforce_limits();
    }

    pub fn clear(&self) {
        self.store.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_cache_hit_after_write() {
        let cache = ScriptCache::new(1 << 20, Duration::from_secs(3600));
        let key = ScriptCache::key("echo hi", "x", &["d".to_string()]);
        assert!(cache.get(&key).is_none());
        cache.put(key.clone(), CompiledScriptHandle::new(b"compiled".to_vec()));
        let hit = cache.get(&key);
        assert!(hit.is_some());
        assert_eq!(cache.counters().hits, 1);
        assert_eq!(cache.counters().misses, 1);
    }

    #[test]
    fn library_cache_miss_when_jar_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let jar = dir.path().join("lib.jar");
        std::fs::write(&jar, b"jar-bytes").unwrap();

        let cache = LibraryCache::new(1 << 20, Duration::from_secs(3600));
        let key = LibraryCache::key("mylib", "1.0", "abc123");
        cache.put(
            key.clone(),
            LibraryEntry {
                jar_file: jar.clone(),
                source_hash: "abc123".to_string(),
                compiled_at: chrono::Utc::now(),
                compilation_time_ms: 10,
            },
        );
        assert!(cache.get(&key, "abc123").is_some());

        std::fs::remove_file(&jar).unwrap();
        assert!(cache.get(&key, "abc123").is_none());
        assert_eq!(cache.counters().evictions, 1);
    }

    #[test]
    fn library_cache_miss_when_source_hash_changes() {
        let dir = tempfile::tempdir().unwrap();
        let jar = dir.path().join("lib.jar");
        std::fs::write(&jar, b"jar-bytes").unwrap();

        let cache = LibraryCache::new(1 << 20, Duration::from_secs(3600));
        let key = LibraryCache::key("mylib", "1.0", "abc123");
        cache.put(
            key.clone(),
            LibraryEntry {
                jar_file: jar,
                source_hash: "abc123".to_string(),
                compiled_at: chrono::Utc::now(),
                compilation_time_ms: 10,
            },
        );
        assert!(cache.get(&key, "different-hash").is_none());
    }
}
