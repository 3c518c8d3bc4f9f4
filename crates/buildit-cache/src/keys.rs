//! Cache key construction (§3).

use sha2::{Digest, Sha256};

/// `sha256(scriptContent || scriptName || sortedDeps)`, the `ScriptEntry` key.
pub fn script_key(script_content: &str, script_name: &str, deps: &[String]) -> String {
    let mut sorted = deps.to_vec();
    sorted.sort();
    let mut hasher = Sha256::new();
    hasher.update(script_content.as_bytes());
    hasher.update(script_name.as_bytes());
    for dep in &sorted {
        hasher.update(dep.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// `(name, version, sha256(sourcePath))`, the `LibraryEntry` key, rendered as
/// a single string so it can share the same keyed-map machinery as scripts.
pub fn library_key(name: &str, version: &str, source_hash: &str) -> String {
    format!("{name}@{version}#{source_hash}")
}

/// sha256 of a source file's bytes, used as the `sourceHash` half of a
/// `library_key` and for `LibraryEntry::is_valid`'s staleness check.
pub fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Sorted cache-keys of a `DependencyGraphEntry`'s input configurations,
/// joined into one key (§3: "keyed by sorted cache-keys of its input
/// configurations").
pub fn dependency_graph_key(input_keys: &[String]) -> String {
    let mut sorted = input_keys.to_vec();
    sorted.sort();
    sorted.join("|")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_key_is_order_independent_in_deps() {
        let a = script_key("echo hi", "build.sh", &["b".into(), "a".into()]);
        let b = script_key("echo hi", "build.sh", &["a".into(), "b".into()]);
        assert_eq!(a, b);
    }

    #[test]
    fn script_key_changes_with_content() {
        let a = script_key("echo hi", "build.sh", &[]);
        let b = script_key("echo bye", "build.sh", &[]);
        assert_ne!(a, b);
    }

    #[test]
    fn dependency_graph_key_is_order_independent() {
        let a = dependency_graph_key(&["k2".into(), "k1".into()]);
        let b = dependency_graph_key(&["k1".into(), "k2".into()]);
        assert_eq!(a, b);
    }
}
