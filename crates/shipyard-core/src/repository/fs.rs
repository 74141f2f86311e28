//! Filesystem-backed object store.
//!
//! Layout: `<root>/objects/<type>/<id>.json`, one [`StoredObject`] per file.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{DeployError, Result};
use crate::fs::write_atomic;
use crate::types::safe_file_stem;

use super::{ObjectStore, StoredObject};

#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn type_dir(&self, type_code: &str) -> PathBuf {
        self.root.join("objects").join(safe_file_stem(type_code))
    }

    fn object_path(&self, type_code: &str, id: &str) -> PathBuf {
        self.type_dir(type_code)
            .join(format!("{}.json", safe_file_stem(id)))
    }

    fn read_object(path: &Path) -> Result<StoredObject> {
        let bytes = fs::read(path).map_err(|e| DeployError::io(path, e))?;
        serde_json::from_slice(&bytes).map_err(|e| DeployError::serialization(path, e))
    }
}

impl ObjectStore for FsObjectStore {
    fn load(&self, type_code: &str, id: &str) -> Result<Option<StoredObject>> {
        let path = self.object_path(type_code, id);
        if !path.exists() {
            return Ok(None);
        }
        Self::read_object(&path).map(Some)
    }

    fn list(&self, type_code: &str) -> Result<Vec<StoredObject>> {
        let dir = self.type_dir(type_code);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut paths: Vec<PathBuf> = fs::read_dir(&dir)
            .map_err(|e| DeployError::io(&dir, e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        paths.iter().map(|path| Self::read_object(path)).collect()
    }

    fn save(&self, object: &StoredObject) -> Result<()> {
        let path = self.object_path(&object.type_code, &object.id);
        let bytes =
            serde_json::to_vec_pretty(object).map_err(|e| DeployError::serialization(&path, e))?;
        write_atomic(&path, &bytes)
    }

    fn next_id(&self, type_code: &str) -> Result<String> {
        let max = self
            .list(type_code)?
            .iter()
            .filter_map(|object| object.id.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        Ok((max + 1).to_string())
    }
}
