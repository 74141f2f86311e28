//! Coarse cross-process locks.
//!
//! The publisher lock keeps content publishing out while an import changes
//! structure; the deployment lock serializes installer runs. Both are
//! lock files created exclusively and removed when the guard drops.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::{DeployError, Result};

pub const PUBLISHER_LOCK: &str = "publisher";
pub const DEPLOYMENT_LOCK: &str = "deployment";

#[derive(Debug)]
pub struct FileLock {
    name: String,
    path: PathBuf,
}

impl FileLock {
    /// Take the lock at `path`, failing with [`DeployError::Locked`] if held.
    pub fn acquire(name: &str, path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| DeployError::io(parent, e))?;
        }
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(DeployError::Locked {
                    name: name.to_string(),
                    path: path.to_path_buf(),
                });
            }
            Err(e) => return Err(DeployError::io(path, e)),
        };
        writeln!(file, "{}", std::process::id()).map_err(|e| DeployError::io(path, e))?;
        tracing::debug!(lock = name, path = %path.display(), "lock acquired");
        Ok(Self {
            name: name.to_string(),
            path: path.to_path_buf(),
        })
    }

    pub fn is_held(path: &Path) -> bool {
        path.exists()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(lock = %self.name, error = %e, "failed to release lock");
        } else {
            tracing::debug!(lock = %self.name, "lock released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn second_acquire_fails_until_release() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("publisher.lock");

        let guard = FileLock::acquire(PUBLISHER_LOCK, &path).unwrap();
        assert!(FileLock::is_held(&path));
        assert!(matches!(
            FileLock::acquire(PUBLISHER_LOCK, &path).unwrap_err(),
            DeployError::Locked { .. }
        ));

        drop(guard);
        assert!(!FileLock::is_held(&path));
        assert!(FileLock::acquire(PUBLISHER_LOCK, &path).is_ok());
    }
}
