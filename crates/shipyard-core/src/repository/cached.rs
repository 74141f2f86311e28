//! Object store wrapper backed by the job-scoped schema cache.

use std::fmt;

use crate::cache::ScopedCache;
use crate::error::Result;

use super::{ObjectStore, StoredObject};

/// Process-wide cache of object lookups keyed by `(type, id)`.
pub type SchemaCache = ScopedCache<(String, String), Option<StoredObject>>;

/// Reads through `cache` while it is enabled; writes update the cached copy.
pub struct CachedObjectStore<'a> {
    inner: &'a dyn ObjectStore,
    cache: &'a SchemaCache,
}

impl<'a> CachedObjectStore<'a> {
    pub fn new(inner: &'a dyn ObjectStore, cache: &'a SchemaCache) -> Self {
        Self { inner, cache }
    }
}

impl fmt::Debug for CachedObjectStore<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedObjectStore")
            .field("inner", &self.inner)
            .field("cache_enabled", &self.cache.is_enabled())
            .finish()
    }
}

impl ObjectStore for CachedObjectStore<'_> {
    fn load(&self, type_code: &str, id: &str) -> Result<Option<StoredObject>> {
        let key = (type_code.to_string(), id.to_string());
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }
        let loaded = self.inner.load(type_code, id)?;
        self.cache.insert(key, loaded.clone());
        Ok(loaded)
    }

    fn list(&self, type_code: &str) -> Result<Vec<StoredObject>> {
        self.inner.list(type_code)
    }

    fn save(&self, object: &StoredObject) -> Result<()> {
        self.inner.save(object)?;
        self.cache.insert(
            (object.type_code.clone(), object.id.clone()),
            Some(object.clone()),
        );
        Ok(())
    }

    fn next_id(&self, type_code: &str) -> Result<String> {
        self.inner.next_id(type_code)
    }

    fn find_by_name(&self, type_code: &str, name: &str) -> Result<Option<StoredObject>> {
        self.inner.find_by_name(type_code, name)
    }

    fn flush_cache(&self) {
        self.inner.flush_cache();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::FsObjectStore;
    use tempfile::TempDir;

    #[test]
    fn enabled_cache_serves_stale_reads_until_scope_ends() {
        let temp = TempDir::new().unwrap();
        let fs_store = FsObjectStore::new(temp.path().to_path_buf());
        fs_store.save(&StoredObject::new("Acl", "1", "before")).unwrap();

        let cache = SchemaCache::new("schema");
        let store = CachedObjectStore::new(&fs_store, &cache);
        {
            let _scope = cache.enable();
            assert_eq!(store.load("Acl", "1").unwrap().unwrap().name, "before");

            // Bypass the wrapper: the cached copy is served while enabled.
            fs_store.save(&StoredObject::new("Acl", "1", "after")).unwrap();
            assert_eq!(store.load("Acl", "1").unwrap().unwrap().name, "before");
        }
        assert_eq!(store.load("Acl", "1").unwrap().unwrap().name, "after");
    }
}
