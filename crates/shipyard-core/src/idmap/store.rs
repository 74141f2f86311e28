//! Persistence and in-memory cache for identifier maps.
//!
//! Maps are stored one document per source server under `<state>/idmaps/`,
//! named after the server with `:` replaced by `_`. Saving replaces the
//! persisted and cached copy wholesale; there is no partial merge.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::error::{DeployError, Result};
use crate::fs::write_atomic;
use crate::types::safe_file_stem;

use super::IdMap;

#[derive(Debug)]
pub struct IdMapStore {
    dir: PathBuf,
    cache: Mutex<HashMap<String, IdMap>>,
}

impl IdMapStore {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, source_server: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", safe_file_stem(source_server)))
    }

    /// Load the map for `source_server`.
    ///
    /// Never reports absence: an unknown server yields a fresh empty map.
    pub fn get_idmap(&self, source_server: &str) -> Result<IdMap> {
        if let Some(cached) = self.lock().get(source_server) {
            return Ok(cached.clone());
        }

        let path = self.path_for(source_server);
        let map = if path.exists() {
            let bytes = fs::read(&path).map_err(|e| DeployError::io(&path, e))?;
            let map: IdMap =
                serde_json::from_slice(&bytes).map_err(|e| DeployError::serialization(&path, e))?;
            map
        } else {
            IdMap::new(source_server)
        };

        self.lock()
            .insert(source_server.to_string(), map.clone());
        Ok(map)
    }

    /// Validate and persist `map`, replacing any previous copy.
    ///
    /// A map holding an incomplete mapping is rejected and nothing is written.
    pub fn save(&self, map: &IdMap) -> Result<()> {
        map.validate()?;

        let path = self.path_for(&map.source_server);
        let bytes =
            serde_json::to_vec_pretty(map).map_err(|e| DeployError::serialization(&path, e))?;
        write_atomic(&path, &bytes)?;

        self.lock()
            .insert(map.source_server.clone(), map.clone());
        tracing::debug!(server = %map.source_server, mappings = map.len(), "saved id map");
        Ok(())
    }

    /// Drop all cached maps; the next lookup reads from disk.
    pub fn clear_cache(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, IdMap>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idmap::IdMapping;
    use tempfile::TempDir;

    #[test]
    fn file_name_replaces_colon() {
        let temp = TempDir::new().unwrap();
        let store = IdMapStore::new(temp.path().to_path_buf());
        let mut map = IdMap::new("cms-prod:9992");
        map.add_mapping(IdMapping::new_object("Acl", "1", "a"));
        store.save(&map).unwrap();

        assert!(temp.path().join("cms-prod_9992.json").exists());
    }

    #[test]
    fn cached_copy_is_replaced_on_save() {
        let temp = TempDir::new().unwrap();
        let store = IdMapStore::new(temp.path().to_path_buf());

        let mut first = store.get_idmap("src").unwrap();
        first.add_mapping(IdMapping::new_object("Acl", "1", "a"));
        first.add_mapping(IdMapping::new_object("Acl", "2", "b"));
        store.save(&first).unwrap();

        let mut second = IdMap::new("src");
        second.add_mapping(IdMapping::new_object("Acl", "3", "c"));
        store.save(&second).unwrap();

        let loaded = store.get_idmap("src").unwrap();
        assert_eq!(loaded, second);
    }
}
