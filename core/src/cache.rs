use std::collections::HashMap;

use parking_lot::RwLock;
use serde_json::Value;

/// Concurrent key-value store shared by everything on a bus.
///
/// Entries never expire and are never evicted.
pub struct KeyValueCache<V = Value> {
    data: RwLock<HashMap<String, V>>,
}

impl<V: Clone> KeyValueCache<V> {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }

    /// Retrieve a value by key.
    pub fn get(&self, key: &str) -> Option<V> {
        self.data.read().get(key).cloned()
    }

    /// Store a value under a key, returning the one it replaced.
    pub fn set(&self, key: impl Into<String>, value: V) -> Option<V> {
        self.data.write().insert(key.into(), value)
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl<V: Clone> Default for KeyValueCache<V> {
    fn default() -> Self {
        Self::new()
    }
}
