//! Filesystem primitives shared by the persistent stores.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{DeployError, Result};

static TMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Sibling temp path unique to this target, process and call.
fn tmp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let seq = TMP_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!(".{name}.{}.{seq}.tmp", std::process::id()))
}

/// Write `bytes` to a temp file next to `path`, then rename it over `path`.
///
/// Readers see either the old content or the new one, never a partial file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| DeployError::io(parent, e))?;
    }
    let tmp_path = tmp_path_for(path);
    fs::write(&tmp_path, bytes).map_err(|e| DeployError::io(&tmp_path, e))?;
    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(DeployError::io(path, e));
    }
    Ok(())
}
