// ABOUTME: Read-mostly concurrent map shared by the connection registry and correlator
// ABOUTME: Thin wrapper over a sharded map so readers of one key never wait on another

use dashmap::DashMap;
use std::hash::Hash;

/// Concurrent key/value registry.
///
/// Absence is reported as `None`; no operation fails.
#[derive(Debug)]
pub struct ConcurrentRegistry<K, V>
where
    K: Eq + Hash,
{
    inner: DashMap<K, V>,
}

impl<K, V> Default for ConcurrentRegistry<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }
}

impl<K, V> ConcurrentRegistry<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces, returning the previous value.
    pub fn store(&self, key: K, value: V) -> Option<V> {
        self.inner.insert(key, value)
    }

    pub fn load_and_delete(&self, key: &K) -> Option<V> {
        self.inner.remove(key).map(|(_, v)| v)
    }

    /// Removes the entry only when `pred` holds for the current value.
    pub fn remove_if(&self, key: &K, pred: impl FnOnce(&V) -> bool) -> Option<V> {
        self.inner.remove_if(key, |_, v| pred(v)).map(|(_, v)| v)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    /// Visits entries until `f` returns `false`. Order is unspecified.
    ///
    /// Do not call back into the registry for the same shard from `f`.
    pub fn range(&self, mut f: impl FnMut(&K, &V) -> bool) {
        for entry in self.inner.iter() {
            if !f(entry.key(), entry.value()) {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<K, V> ConcurrentRegistry<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn load(&self, key: &K) -> Option<V> {
        self.inner.get(key).map(|v| v.value().clone())
    }
}

impl<K, V> ConcurrentRegistry<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn keys(&self) -> Vec<K> {
        self.inner.iter().map(|e| e.key().clone()).collect()
    }
}
