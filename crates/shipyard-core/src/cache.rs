//! Scoped memoization caches.
//!
//! The schema cache and the dependency cache are only valid for the
//! duration of one job. Enabling returns a [`CacheScope`] guard; dropping
//! the last guard disables the cache and discards its entries, so a job
//! that unwinds through an error never leaves stale state for the next one.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug)]
struct CacheState<K, V> {
    depth: usize,
    entries: HashMap<K, V>,
}

#[derive(Debug)]
pub struct ScopedCache<K, V> {
    name: &'static str,
    state: Mutex<CacheState<K, V>>,
}

impl<K, V> ScopedCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Mutex::new(CacheState {
                depth: 0,
                entries: HashMap::new(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Enable the cache until the returned guard is dropped.
    ///
    /// Scopes nest; entries survive until the outermost scope ends.
    pub fn enable(&self) -> CacheScope<'_, K, V> {
        let mut state = self.lock();
        state.depth += 1;
        tracing::debug!(cache = self.name, depth = state.depth, "cache enabled");
        CacheScope { cache: self }
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().depth > 0
    }

    /// Cached value for `key`, if the cache is enabled and holds one.
    pub fn get(&self, key: &K) -> Option<V> {
        let state = self.lock();
        if state.depth == 0 {
            return None;
        }
        state.entries.get(key).cloned()
    }

    /// Store `value`; a no-op while the cache is disabled.
    pub fn insert(&self, key: K, value: V) {
        let mut state = self.lock();
        if state.depth > 0 {
            state.entries.insert(key, value);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self) {
        let mut state = self.lock();
        state.depth = state.depth.saturating_sub(1);
        if state.depth == 0 {
            state.entries.clear();
            tracing::debug!(cache = self.name, "cache disabled");
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<K, V>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Guard returned by [`ScopedCache::enable`].
#[must_use = "the cache is disabled as soon as the scope is dropped"]
#[derive(Debug)]
pub struct CacheScope<'a, K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    cache: &'a ScopedCache<K, V>,
}

impl<K, V> Drop for CacheScope<'_, K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    fn drop(&mut self) {
        self.cache.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_cache_ignores_inserts() {
        let cache: ScopedCache<String, u32> = ScopedCache::new("test");
        cache.insert("a".into(), 1);
        assert!(cache.get(&"a".to_string()).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn scope_drop_clears_entries() {
        let cache: ScopedCache<String, u32> = ScopedCache::new("test");
        {
            let _scope = cache.enable();
            cache.insert("a".into(), 1);
            assert_eq!(cache.get(&"a".to_string()), Some(1));
        }
        assert!(!cache.is_enabled());
        assert!(cache.get(&"a".to_string()).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn nested_scopes_keep_entries_until_outermost_ends() {
        let cache: ScopedCache<String, u32> = ScopedCache::new("test");
        let outer = cache.enable();
        {
            let _inner = cache.enable();
            cache.insert("a".into(), 1);
        }
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        drop(outer);
        assert!(!cache.is_enabled());
    }

    #[test]
    fn scope_is_released_on_unwind() {
        let cache: ScopedCache<String, u32> = ScopedCache::new("test");
        let result: Result<(), &str> = (|| {
            let _scope = cache.enable();
            cache.insert("a".into(), 1);
            Err("boom")
        })();
        assert!(result.is_err());
        assert!(!cache.is_enabled());
    }
}
