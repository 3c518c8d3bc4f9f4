//! The cache manager (C11, §4.11): composes the three sub-caches, runs the
//! background eviction worker, and exposes `warmupCache`/`cacheStatus`.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::caches::{DependencyGraphCache, LibraryCache, ScriptCache};
use crate::entries::{CompiledScriptHandle, DependencyGraphEntry, LibraryEntry};
use crate::store::CacheCounters;

/// Tuning knobs for a `CacheManager`, surfaced in the engine configuration
/// (§6 "cache: maxCacheSize, maxCacheAge, backgroundCleanupInterval").
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub max_cache_size_bytes: u64,
    pub max_cache_age: Duration,
    pub background_cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_cache_size_bytes: 512 * 1024 * 1024,
            max_cache_age: Duration::from_secs(24 * 3600),
            background_cleanup_interval: Duration::from_secs(300),
        }
    }
}

/// `Idle -> Warming -> Ready` observable (§4.11).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Idle,
    Warming,
    Ready,
}

impl CacheStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => CacheStatus::Warming,
            2 => CacheStatus::Ready,
            _ => CacheStatus::Idle,
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            CacheStatus::Idle => 0,
            CacheStatus::Warming => 1,
            CacheStatus::Ready => 2,
        }
    }
}

/// A script to precompute during `warmup_cache`.
pub struct WarmupScript {
    pub content: String,
    pub name: String,
    pub deps: Vec<String>,
    pub compiled: CompiledScriptHandle,
}

/// A library build output to precompute during `warmup_cache`.
pub struct WarmupLibrary {
    pub name: String,
    pub version: String,
    pub source_hash: String,
    pub entry: LibraryEntry,
}

/// Aggregated counters across all three sub-caches.
#[derive(Debug, Clone, Copy, Default)]
pub struct AggregateCounters {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entry_count: usize,
    pub total_size_bytes: u64,
}

impl AggregateCounters {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    fn add(&mut self, c: CacheCounters) {
        self.hits += c.hits;
        self.misses += c.misses;
        self.evictions += c.evictions;
        self.entry_count += c.entry_count;
        self.total_size_bytes += c.total_size_bytes;
    }
}

/// Multi-level content-addressed memo for compiled-script artifacts and
/// library build outputs (C11). Owns three independently-locked sub-caches
/// and a background worker that periodically enforces size/age limits.
pub struct CacheManager {
    scripts: ScriptCache,
    libraries: LibraryCache,
    dependency_graphs: DependencyGraphCache,
    status: AtomicU8,
    config: CacheConfig,
}

impl CacheManager {
    pub fn new(config: CacheConfig) -> Arc<Self> {
        Arc::new(Self {
            scripts: ScriptCache::new(config.max_cache_size_bytes, config.max_cache_age),
            libraries: LibraryCache::new(config.max_cache_size_bytes, config.max_cache_age),
            dependency_graphs: DependencyGraphCache::new(
                config.max_cache_size_bytes,
                config.max_cache_age,
            ),
            status: AtomicU8::new(CacheStatus::Idle.to_u8()),
            config,
        })
    }

    pub fn scripts(&self) -> &ScriptCache {
        &self.scripts
    }

    pub fn libraries(&self) -> &LibraryCache {
        &self.libraries
    }

    pub fn dependency_graphs(&self) -> &DependencyGraphCache {
        &self.dependency_graphs
    }

    pub fn status(&self) -> CacheStatus {
        CacheStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: CacheStatus) {
        self.status.store(status.to_u8(), Ordering::Release);
    }

    /// Precomputes and caches every given script/library synchronously,
    /// moving `cacheStatus` through `Idle -> Warming -> Ready` (§4.11).
    pub fn warmup_cache(&self, scripts: Vec<WarmupScript>, libraries: Vec<WarmupLibrary>) {
        self.set_status(CacheStatus::Warming);
        for script in scripts {
            let key = ScriptCache::key(&script.content, &script.name, &script.deps);
            self.scripts.put(key, script.compiled);
        }
        for library in libraries {
            let key = LibraryCache::key(&library.name, &library.version, &library.source_hash);
            self.libraries.put(key, library.entry);
        }
        self.set_status(CacheStatus::Ready);
    }

    pub fn counters(&self) -> AggregateCounters {
        let mut agg = AggregateCounters::default();
        agg.add(self.scripts.counters());
        agg.add(self.libraries.counters());
        agg.add(self.dependency_graphs.counters());
        agg
    }

    pub fn dependency_graph_entry(&self, key: &str) -> Option<DependencyGraphEntry> {
        self.dependency_graphs.get(key)
    }

    fn enforce_limits(&self) {
        self.scripts.enforce_limits();
        self.libraries.enforce_limits();
        self.dependency_graphs.enforce_limits();
    }

    /// Spawns the background worker that wakes every
    /// `backgroundCleanupInterval` to enforce size/age limits (§4.11).
    /// Callers keep the returned handle to shut the worker down; dropping
    /// it does not stop the task (it detaches, like the rest of this
    /// workspace's fire-and-forget background tasks).
    pub fn spawn_background_cleanup(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let interval = self.config.background_cleanup_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                debug!("running background cache cleanup");
                manager.enforce_limits();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_idle_and_reaches_ready_after_warmup() {
        let manager = CacheManager::new(CacheConfig::default());
        assert_eq!(manager.status(), CacheStatus::Idle);
        manager.warmup_cache(
            vec![WarmupScript {
                content: "echo hi".to_string(),
                name: "x".to_string(),
                deps: vec![],
                compiled: CompiledScriptHandle::new(b"bin".to_vec()),
            }],
            vec![],
        );
        assert_eq!(manager.status(), CacheStatus::Ready);
        let key = ScriptCache::key("echo hi", "x", &[]);
        assert!(manager.scripts().get(&key).is_some());
    }

    #[test]
    fn aggregate_counters_sum_across_sub_caches() {
        let manager = CacheManager::new(CacheConfig::default());
        let key = ScriptCache::key("a", "b", &[]);
        assert!(manager.scripts().get(&key).is_none());
        manager
            .scripts()
            .put(key.clone(), CompiledScriptHandle::new(b"x".to_vec()));
        assert!(manager.scripts().get(&key).is_some());

        let counters = manager.counters();
        assert_eq!(counters.hits, 1);
        assert_eq!(counters.misses, 1);
    }
}
