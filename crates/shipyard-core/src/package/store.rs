//! Persistent package-info records under `<state>/packages/`.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{DeployError, Result};
use crate::fs::write_atomic;
use crate::repository::ObjectStore;
use crate::types::safe_file_stem;

use super::{PackageInfo, PackageStatus};

#[derive(Debug, Clone)]
pub struct PackageStore {
    dir: PathBuf,
}

impl PackageStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", safe_file_stem(name)))
    }

    pub fn load(&self, name: &str) -> Result<Option<PackageInfo>> {
        let path = self.path_for(name);
        if !path.exists() {
            return Ok(None);
        }
        read_record(&path).map(Some)
    }

    pub fn list(&self) -> Result<Vec<PackageInfo>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut paths: Vec<PathBuf> = fs::read_dir(&self.dir)
            .map_err(|e| DeployError::io(&self.dir, e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();
        paths.iter().map(|path| read_record(path)).collect()
    }

    fn staged_path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.pending", safe_file_stem(name)))
    }

    /// Persist `info`, replacing any prior record of the same name.
    ///
    /// The new record is fully written before it is renamed over the old
    /// one, so a valid record exists at every point.
    pub fn save_replacing(&self, info: &PackageInfo) -> Result<()> {
        let path = self.path_for(&info.name);
        let bytes =
            serde_json::to_vec_pretty(info).map_err(|e| DeployError::serialization(&path, e))?;
        write_atomic(&path, &bytes)?;
        tracing::debug!(package = %info.name, status = ?info.status, "saved package record");
        Ok(())
    }

    /// Persist an in-progress record beside the current one.
    ///
    /// The current record stays authoritative for [`owner_of`](Self::owner_of)
    /// and [`load`](Self::load) until [`commit`](Self::commit).
    pub fn stage(&self, info: &PackageInfo) -> Result<()> {
        let path = self.staged_path_for(&info.name);
        let bytes =
            serde_json::to_vec_pretty(info).map_err(|e| DeployError::serialization(&path, e))?;
        write_atomic(&path, &bytes)
    }

    pub fn staged(&self, name: &str) -> Result<Option<PackageInfo>> {
        let path = self.staged_path_for(name);
        if !path.exists() {
            return Ok(None);
        }
        read_record(&path).map(Some)
    }

    /// Replace the current record with `info` and drop its staged copy.
    pub fn commit(&self, info: &PackageInfo) -> Result<()> {
        self.save_replacing(info)?;
        self.discard_staged(&info.name)
    }

    pub fn discard_staged(&self, name: &str) -> Result<()> {
        let path = self.staged_path_for(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DeployError::io(&path, e)),
        }
    }

    /// Successfully installed package owning target object `type_code`/`target_id`.
    pub fn owner_of(&self, type_code: &str, target_id: &str) -> Result<Option<PackageInfo>> {
        Ok(self.list()?.into_iter().find(|info| {
            info.status == PackageStatus::Success && info.element(type_code, target_id).is_some()
        }))
    }

    /// Recompute every element's baseline from the objects now on the target.
    pub fn rebase_baselines(&self, info: &mut PackageInfo, store: &dyn ObjectStore) -> Result<()> {
        for element in &mut info.elements {
            match store.load(&element.type_code, &element.target_id)? {
                Some(object) => element.baseline = object.content_hash(),
                None => tracing::warn!(
                    package = %info.name,
                    type_code = %element.type_code,
                    id = %element.target_id,
                    "installed object missing while rebasing"
                ),
            }
        }
        Ok(())
    }
}

fn read_record(path: &Path) -> Result<PackageInfo> {
    let bytes = fs::read(path).map_err(|e| DeployError::io(path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| DeployError::serialization(path, e))
}
