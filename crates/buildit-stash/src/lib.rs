//! Stash storage (C4, §4.3): named, content-hashed bundles of workspace
//! files copied aside by `Stash`/`Unstash` steps to transfer state between
//! stages.
//!
//! `StashStore` keeps an in-memory registry of `StashEntry` metadata
//! (§3) alongside an on-disk tree at `<base>/<name>/<relPath>` (§6). It
//! implements `buildit_core::StashHandle` so `ExecutionContext` can reach
//! it without `buildit-core` depending on this crate.

pub mod error;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

pub use error::{StashError, StashResult};

/// Metadata recorded for one named stash bundle (§3).
#[derive(Debug, Clone)]
pub struct StashEntry {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub file_count: usize,
    pub total_bytes: u64,
    pub storage_location: PathBuf,
    pub checksums: HashMap<String, String>,
}

/// In-memory registry plus on-disk storage for stash bundles. Operations
/// on the same `name` are serialized; distinct names run concurrently
/// (§5 "Shared-resource policy").
pub struct StashStore {
    base_dir: PathBuf,
    entries: Mutex<HashMap<String, StashEntry>>,
    name_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl StashStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            entries: Mutex::new(HashMap::new()),
            name_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn entry(&self, name: &str) -> Option<StashEntry> {
        self.entries.lock().unwrap().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_for(&self, name: &str) -> Arc<AsyncMutex<()>> {
        self.name_locks
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Replaces any existing bundle named `name` with the files in
    /// `workspace_root` matching `includes` minus `excludes` (comma-lists
    /// of globs; §4.3). A pattern that fails to parse is attempted as a
    /// literal relative path instead of erroring.
    pub async fn stash(
        &self,
        name: &str,
        workspace_root: &Path,
        includes: &str,
        excludes: &str,
    ) -> StashResult<StashEntry> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        let matched = resolve_patterns(workspace_root, includes, excludes)?;
        let dest_root = self.base_dir.join(name);

        if dest_root.exists() {
            tokio::fs::remove_dir_all(&dest_root).await?;
        }
        tokio::fs::create_dir_all(&dest_root).await?;

        let mut checksums = HashMap::new();
        let mut total_bytes = 0u64;
        for rel_path in &matched {
            let src = workspace_root.join(rel_path);
            let dest = dest_root.join(rel_path);
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let bytes = tokio::fs::read(&src).await?;
            total_bytes += bytes.len() as u64;
            let digest = Sha256::digest(&bytes);
            checksums.insert(rel_path.to_string_lossy().replace('\\', "/"), hex::encode(digest));
            tokio::fs::write(&dest, &bytes).await?;
        }

        let entry = StashEntry {
            name: name.to_string(),
            timestamp: Utc::now(),
            file_count: matched.len(),
            total_bytes,
            storage_location: dest_root,
            checksums,
        };
        self.entries
            .lock()
            .unwrap()
            .insert(name.to_string(), entry.clone());
        info!(stash = %name, files = entry.file_count, bytes = entry.total_bytes, "stashed");
        Ok(entry)
    }

    /// Copies every file from the bundle named `name` back into
    /// `workspace_root`, overwriting existing files.
    pub async fn unstash(&self, name: &str, workspace_root: &Path) -> StashResult<()> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        let entry = self
            .entries
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| StashError::NotFound(name.to_string()))?;

        for rel_path in entry.checksums.keys() {
            let src = entry.storage_location.join(rel_path);
            let dest = workspace_root.join(rel_path);
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(&src, &dest).await?;
        }
        debug!(stash = %name, files = entry.checksums.len(), "unstashed");
        Ok(())
    }
}

/// Enumerates files under `root` matching any comma-separated glob in
/// `includes` minus any matching `excludes`, returning paths relative to
/// `root`.
fn resolve_patterns(root: &Path, includes: &str, excludes: &str) -> StashResult<Vec<PathBuf>> {
    let include_patterns = split_globs(includes);
    let exclude_patterns = split_globs(excludes);

    let mut seen = std::collections::BTreeSet::new();
    for pattern in &include_patterns {
        for rel in match_pattern(root, pattern)? {
            seen.insert(rel);
        }
    }

    let mut excluded = std::collections::BTreeSet::new();
    for pattern in &exclude_patterns {
        for rel in match_pattern(root, pattern)? {
            excluded.insert(rel);
        }
    }

    Ok(seen.into_iter().filter(|p| !excluded.contains(p)).collect())
}

fn split_globs(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Matches `pattern` against `root`, returning paths relative to `root`.
/// A pattern that fails to parse as a glob is attempted as a literal path
/// instead (§4.3).
fn match_pattern(root: &Path, pattern: &str) -> StashResult<Vec<PathBuf>> {
    let full = root.join(pattern);
    match glob::glob(&full.to_string_lossy()) {
        Ok(paths) => {
            let mut out = Vec::new();
            for path in paths.flatten() {
                if path.is_file() {
                    if let Ok(rel) = path.strip_prefix(root) {
                        out.push(rel.to_path_buf());
                    }
                }
            }
            Ok(out)
        }
        Err(e) => {
            let literal = root.join(pattern);
            if literal.is_file() {
                Ok(vec![PathBuf::from(pattern)])
            } else {
                Err(StashError::InvalidPattern {
                    pattern: pattern.to_string(),
                    source: e,
                })
            }
        }
    }
}

#[async_trait]
impl buildit_core::StashHandle for StashStore {
    async fn stash(
        &self,
        name: &str,
        work_dir: &Path,
        includes: &str,
        excludes: &str,
    ) -> buildit_core::Result<()> {
        StashStore::stash(self, name, work_dir, includes, excludes)
            .await
            .map(|_| ())
            .map_err(|e| buildit_core::Error::Execution(e.to_string()))
    }

    async fn unstash(&self, name: &str, work_dir: &Path) -> buildit_core::Result<()> {
        StashStore::unstash(self, name, work_dir)
            .await
            .map_err(|e| buildit_core::Error::Execution(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn stash_then_unstash_round_trips_bytes_and_checksums() {
        let workspace = tempdir().unwrap();
        let base = tempdir().unwrap();
        fs::create_dir_all(workspace.path().join("a")).unwrap();
        fs::write(workspace.path().join("a/b.txt"), b"data").unwrap();

        let store = StashStore::new(base.path());
        let entry = store
            .stash("files", workspace.path(), "**/*.txt", "")
            .await
            .unwrap();
        assert_eq!(entry.file_count, 1);
        assert_eq!(entry.total_bytes, 4);

        fs::remove_file(workspace.path().join("a/b.txt")).unwrap();
        store.unstash("files", workspace.path()).await.unwrap();

        let restored = fs::read(workspace.path().join("a/b.txt")).unwrap();
        assert_eq!(restored, b"data");

        let digest = hex::encode(Sha256::digest(b"data"));
        assert_eq!(entry.checksums.get("a/b.txt"), Some(&digest));
    }

    #[tokio::test]
    async fn unstash_of_unknown_name_errors() {
        let base = tempdir().unwrap();
        let store = StashStore::new(base.path());
        let err = store.unstash("nope", base.path()).await.unwrap_err();
        assert!(matches!(err, StashError::NotFound(_)));
    }

    #[tokio::test]
    async fn restashing_the_same_name_replaces_the_prior_entry() {
        let workspace = tempdir().unwrap();
        let base = tempdir().unwrap();
        fs::write(workspace.path().join("one.txt"), b"first").unwrap();

        let store = StashStore::new(base.path());
        store
            .stash("files", workspace.path(), "*.txt", "")
            .await
            .unwrap();

        fs::remove_file(workspace.path().join("one.txt")).unwrap();
        fs::write(workspace.path().join("two.txt"), b"second").unwrap();
        let entry = store
            .stash("files", workspace.path(), "*.txt", "")
            .await
            .unwrap();

        assert_eq!(entry.file_count, 1);
        assert!(entry.checksums.contains_key("two.txt"));
        assert!(!entry.checksums.contains_key("one.txt"));
    }

    #[tokio::test]
    async fn excludes_remove_matching_files() {
        let workspace = tempdir().unwrap();
        let base = tempdir().unwrap();
        fs::write(workspace.path().join("keep.txt"), b"k").unwrap();
        fs::write(workspace.path().join("skip.log"), b"s").unwrap();

        let store = StashStore::new(base.path());
        let entry = store
            .stash("mixed", workspace.path(), "*.txt,*.log", "*.log")
            .await
            .unwrap();

        assert_eq!(entry.file_count, 1);
        assert!(entry.checksums.contains_key("keep.txt"));
    }
}
