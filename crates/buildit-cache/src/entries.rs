//! Entry value types for the three sub-caches (§3).

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;

/// An opaque compiled-script artifact handle. The engine treats the
/// compiled form as a black box (§6 "script entries are kept in memory...
/// opaque"); callers that know the concrete script runtime downcast
/// `bytes`/`metadata` themselves.
#[derive(Debug, Clone)]
pub struct CompiledScriptHandle {
    pub bytes: Arc<Vec<u8>>,
    pub metadata: serde_json::Value,
}

impl CompiledScriptHandle {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(bytes),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Value stored for a `LibraryEntry` key (§3).
#[derive(Debug, Clone)]
pub struct LibraryEntry {
    pub jar_file: PathBuf,
    pub source_hash: String,
    pub compiled_at: DateTime<Utc>,
    pub compilation_time_ms: i64,
}

impl LibraryEntry {
    /// Valid iff the referenced artifact file exists and the source hash
    /// supplied at lookup time still matches (§3).
    pub fn is_valid(&self, current_source_hash: &str) -> bool {
        self.jar_file.exists() && self.source_hash == current_source_hash
    }
}

/// Value stored for a `DependencyGraphEntry` key (§3): an opaque resolved
/// dependency graph, represented as JSON since the graph shape itself is
/// an external-DSL concern out of scope here.
#[derive(Debug, Clone)]
pub struct DependencyGraphEntry {
    pub graph: serde_json::Value,
    pub size_bytes: u64,
}
