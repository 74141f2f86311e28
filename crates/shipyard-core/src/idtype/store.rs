//! Persisted id-type documents, one per dependency key.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{DeployError, Result};
use crate::fs::write_atomic;
use crate::types::DependencyKey;

use super::DependencyIdTypes;

#[derive(Debug, Clone)]
pub struct IdTypeStore {
    dir: PathBuf,
}

impl IdTypeStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &DependencyKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.file_stem()))
    }

    pub fn load(&self, key: &DependencyKey) -> Result<Option<DependencyIdTypes>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path).map_err(|e| DeployError::io(&path, e))?;
        let types =
            serde_json::from_slice(&bytes).map_err(|e| DeployError::serialization(&path, e))?;
        Ok(Some(types))
    }

    pub fn save(&self, types: &DependencyIdTypes) -> Result<()> {
        let path = self.path_for(&types.key);
        let bytes =
            serde_json::to_vec_pretty(types).map_err(|e| DeployError::serialization(&path, e))?;
        write_atomic(&path, &bytes)
    }

    /// Merge `discovered` into the persisted document and save the result.
    pub fn refresh(&self, discovered: &DependencyIdTypes) -> Result<DependencyIdTypes> {
        let mut current = self
            .load(&discovered.key)?
            .unwrap_or_else(|| DependencyIdTypes::new(discovered.key.clone()));
        current.fixup_mappings(discovered);
        self.save(&current)?;
        Ok(current)
    }
}
