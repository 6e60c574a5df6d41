use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::events::event::Event;

/// Key used when an extractor yields an empty string
pub const DEFAULT_KEY: &str = "default";

/// Resolves the per-key bucket/breaker an event belongs to
pub type KeyExtractor = Arc<dyn Fn(&Event) -> String + Send + Sync>;

/// Apply `extractor`, falling back to [`DEFAULT_KEY`]
pub(crate) fn resolve_key(extractor: &KeyExtractor, event: &Event) -> String {
    let key = extractor(event);
    if key.is_empty() {
        DEFAULT_KEY.to_string()
    } else {
        key
    }
}

/// Lock-guarded map from key to a lazily created per-key primitive
///
/// Lookups take the shared lock. Creation takes the exclusive lock and
/// re-checks for the key, since another caller may have created the entry
/// between the two lock acquisitions.
pub(crate) struct KeyedRegistry<T> {
    entries: RwLock<HashMap<String, Arc<T>>>,
}

impl<T> KeyedRegistry<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<Arc<T>> {
        self.entries.read().get(key).cloned()
    }

    pub(crate) fn get_or_insert_with(&self, key: &str, create: impl FnOnce() -> T) -> Arc<T> {
        if let Some(entry) = self.get(key) {
            return entry;
        }

        let mut entries = self.entries.write();
        // Double-check: someone may have won the race for the write lock
        if let Some(entry) = entries.get(key) {
            return Arc::clone(entry);
        }

        let entry = Arc::new(create());
        entries.insert(key.to_string(), Arc::clone(&entry));
        entry
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }
}
