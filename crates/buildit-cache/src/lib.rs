//! The cache manager (C11): a multi-level content-addressed memo for
//! compiled-script artifacts and library build outputs.
//!
//! - `store` is the generic LRU-with-age-eviction bookkeeping shared by all
//!   three sub-caches.
//! - `caches` are the three typed sub-caches (`ScriptCache`, `LibraryCache`,
//!   `DependencyGraphCache`), each keyed as specified in §3.
//! - `manager` composes them into a `CacheManager` with a background
//!   cleanup worker, `warmupCache`, and a `cacheStatus` observable.

pub mod caches;
pub mod entries;
pub mod error;
pub mod keys;
pub mod manager;
pub mod store;

pub use caches::{DependencyGraphCache, LibraryCache, ScriptCache};
pub use entries::{CompiledScriptHandle, DependencyGraphEntry, LibraryEntry};
pub use error::{CacheError, CacheResult};
pub use manager::{AggregateCounters, CacheConfig, CacheManager, CacheStatus, WarmupLibrary, WarmupScript};
pub use store::CacheCounters;
