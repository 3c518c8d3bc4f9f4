//! Step handler registry (C5).
//!
//! Maps a step's `variant_tag()` to the `StepHandler` that knows how to run
//! it. Registration is last-write-wins so an embedder can override a
//! built-in handler (e.g. swap the default `shell` handler for one that
//! shells out through a different launcher convention) without forking this
//! crate.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::handler::StepHandler;

/// Thread-safe, concurrently readable/writable map from variant tag to
/// handler. Cloning a `StepHandlerRegistry` shares the underlying map.
#[derive(Clone, Default)]
pub struct StepHandlerRegistry {
    handlers: Arc<RwLock<HashMap<&'static str, Arc<dyn StepHandler>>>>,
}

impl StepHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `tag`, replacing any handler already
    /// registered for that tag.
    pub fn register(&self, tag: &'static str, handler: Arc<dyn StepHandler>) {
        self.handlers.write().unwrap().insert(tag, handler);
    }

    pub fn get(&self, tag: &str) -> Option<Arc<dyn StepHandler>> {
        self.handlers.read().unwrap().get(tag).cloned()
    }

    pub fn has(&self, tag: &str) -> bool {
        self.handlers.read().unwrap().contains_key(tag)
    }

    pub fn unregister(&self, tag: &str) -> Option<Arc<dyn StepHandler>> {
        self.handlers.write().unwrap().remove(tag)
    }

    pub fn clear(&self) {
        self.handlers.write().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.handlers.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::EchoHandler;

    #[test]
    fn register_get_and_unregister_round_trip() {
        let registry = StepHandlerRegistry::new();
        assert!(!registry.has("echo"));

        registry.register("echo", Arc::new(EchoHandler));
        assert!(registry.has("echo"));
        assert_eq!(registry.len(), 1);

        let removed = registry.unregister("echo");
        assert!(removed.is_some());
        assert!(!registry.has("echo"));
    }

    #[test]
    fn last_write_wins() {
        let registry = StepHandlerRegistry::new();
        registry.register("echo", Arc::new(EchoHandler));
        registry.register("echo", Arc::new(EchoHandler));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn clone_shares_the_same_map() {
        let registry = StepHandlerRegistry::new();
        let clone = registry.clone();
        registry.register("echo", Arc::new(EchoHandler));
        assert!(clone.has("echo"));
    }
}
