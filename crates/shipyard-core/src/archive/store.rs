//! Zip-backed archive container.
//!
//! An [`Archive`] is opened once, either for writing or for reading, and
//! keeps that mode until [`Archive::close`]. Any call after close, or a
//! write against a read-mode archive, is a contract violation.

use std::collections::HashSet;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::dependency::Dependency;
use crate::error::{DeployError, Result};
use crate::idtype::DependencyIdTypes;
use crate::types::DependencyKey;

use super::manifest::{ARCHIVE_INFO_PATH, ARCHIVE_MANIFEST_PATH, CONFIG_DIR};
use super::{ArchiveDetail, ArchiveFile, ArchiveInfo, ArchiveManifest, DbmsInfo, PayloadFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveMode {
    Write,
    Read,
}

enum State {
    Writing(ZipWriter<File>),
    Reading(ZipArchive<File>),
    Closed,
}

pub struct Archive {
    path: PathBuf,
    mode: ArchiveMode,
    state: State,
    manifest: ArchiveManifest,
    info: ArchiveInfo,
}

impl std::fmt::Debug for Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("closed", &matches!(self.state, State::Closed))
            .field("files", &self.manifest.file_count())
            .finish()
    }
}

impl Archive {
    /// Create a fresh archive at `path`, truncating any existing file.
    pub fn create(path: &Path, info: ArchiveInfo) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| DeployError::io(parent, e))?;
        }
        let file = File::create(path).map_err(|e| DeployError::io(path, e))?;
        tracing::debug!(path = %path.display(), "creating archive");
        Ok(Self {
            path: path.to_path_buf(),
            mode: ArchiveMode::Write,
            state: State::Writing(ZipWriter::new(file)),
            manifest: ArchiveManifest::default(),
            info,
        })
    }

    /// Open an existing archive for reading and load its manifest.
    pub fn open(path: &Path) -> Result<Self> {
        let mut zip = open_zip(path)?;
        let manifest: ArchiveManifest = read_json_entry(&mut zip, path, ARCHIVE_MANIFEST_PATH)?;
        let info: ArchiveInfo = read_json_entry(&mut zip, path, ARCHIVE_INFO_PATH)?;
        tracing::debug!(
            path = %path.display(),
            dependencies = manifest.entries.len(),
            files = manifest.file_count(),
            "opened archive"
        );
        Ok(Self {
            path: path.to_path_buf(),
            mode: ArchiveMode::Read,
            state: State::Reading(zip),
            manifest,
            info,
        })
    }

    /// Read only the archive info, without loading the manifest.
    pub fn read_info(path: &Path) -> Result<ArchiveInfo> {
        let mut zip = open_zip(path)?;
        read_json_entry(&mut zip, path, ARCHIVE_INFO_PATH)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> ArchiveMode {
        self.mode
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed)
    }

    pub fn manifest(&self) -> Result<&ArchiveManifest> {
        self.ensure_open()?;
        Ok(&self.manifest)
    }

    pub fn info(&self) -> Result<&ArchiveInfo> {
        self.ensure_open()?;
        Ok(&self.info)
    }

    pub fn set_detail(&mut self, detail: ArchiveDetail) -> Result<()> {
        self.writer()?;
        self.info.detail = Some(detail);
        Ok(())
    }

    /// Store `files` for `dependency` and record them in the manifest.
    ///
    /// Generated scratch names are replaced by `<display name>-<type>.<ext>`;
    /// names repeated within the batch get a numeric suffix, and a path
    /// already present in the manifest gets a timestamp suffix.
    pub fn add_files(
        &mut self,
        dependency: &Dependency,
        files: Vec<PayloadFile>,
    ) -> Result<Vec<ArchiveFile>> {
        self.writer()?;
        let key = dependency.key();
        let mut batch_names = HashSet::new();
        let mut stored = Vec::with_capacity(files.len());

        for file in files {
            let base = if file.is_generated() {
                format!(
                    "{}-{}.{}",
                    sanitize_name(&dependency.display_name),
                    dependency.type_code,
                    file.file_type.extension()
                )
            } else {
                file.name.replace('\\', "/").rsplit('/').next().unwrap_or_default().to_string()
            };
            let name = disambiguate_in_batch(&base, &mut batch_names);
            let path = self.unique_path(&format!("{key}/{name}"));

            self.write_entry(&path, &file.data)?;
            let entry = ArchiveFile {
                file_type: file.file_type,
                path,
            };
            self.manifest.entry_mut(&key).files.push(entry.clone());
            stored.push(entry);
        }

        tracing::debug!(key = %key, files = stored.len(), "added files to archive");
        Ok(stored)
    }

    /// Store a config-definition file under `config/<name>`.
    pub fn add_config_file(&mut self, name: &str, data: &[u8]) -> Result<String> {
        self.writer()?;
        let path = self.unique_path(&format!("{CONFIG_DIR}/{}", sanitize_name(name)));
        self.write_entry(&path, data)?;
        self.manifest.config_files.push(path.clone());
        Ok(path)
    }

    pub fn config_files(&self) -> Result<&[String]> {
        self.ensure_open()?;
        Ok(&self.manifest.config_files)
    }

    pub fn add_id_types(&mut self, id_types: &DependencyIdTypes) -> Result<()> {
        self.writer()?;
        self.manifest.entry_mut(&id_types.key).id_types = Some(id_types.clone());
        Ok(())
    }

    pub fn id_types(&self, key: &DependencyKey) -> Result<Option<&DependencyIdTypes>> {
        self.ensure_open()?;
        Ok(self
            .manifest
            .entry(key)
            .and_then(|entry| entry.id_types.as_ref()))
    }

    pub fn add_dbms_info_list(&mut self, key: &DependencyKey, infos: Vec<DbmsInfo>) -> Result<()> {
        self.writer()?;
        if !infos.is_empty() {
            self.manifest.entry_mut(key).dbms_infos.extend(infos);
        }
        Ok(())
    }

    pub fn dbms_infos(&self, key: &DependencyKey) -> Result<&[DbmsInfo]> {
        self.ensure_open()?;
        Ok(self
            .manifest
            .entry(key)
            .map(|entry| entry.dbms_infos.as_slice())
            .unwrap_or(&[]))
    }

    /// Bytes of the stored file at `path`.
    pub fn file_data(&mut self, path: &str) -> Result<Vec<u8>> {
        let archive_path = self.path.clone();
        let zip = self.reader()?;
        let mut entry = zip
            .by_name(path)
            .map_err(|e| DeployError::archive(&archive_path, e))?;
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut data)
            .map_err(|e| DeployError::io(&archive_path, e))?;
        Ok(data)
    }

    /// Every payload file of `key` with its bytes, in manifest order.
    pub fn dependency_files(&mut self, key: &DependencyKey) -> Result<Vec<(ArchiveFile, Vec<u8>)>> {
        self.reader()?;
        let files = self.manifest.files(key).to_vec();
        files
            .into_iter()
            .map(|file| {
                let data = self.file_data(&file.path)?;
                Ok((file, data))
            })
            .collect()
    }

    /// Finalize the archive. Writing archives get their manifest and info
    /// serialized first. The archive is unusable afterwards.
    pub fn close(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, State::Closed) {
            State::Writing(mut zip) => {
                let manifest = serde_json::to_vec_pretty(&self.manifest)
                    .map_err(|e| DeployError::serialization(&self.path, e))?;
                let info = serde_json::to_vec_pretty(&self.info)
                    .map_err(|e| DeployError::serialization(&self.path, e))?;
                start_and_write(&mut zip, &self.path, ARCHIVE_MANIFEST_PATH, &manifest)?;
                start_and_write(&mut zip, &self.path, ARCHIVE_INFO_PATH, &info)?;
                zip.finish()
                    .map_err(|e| DeployError::archive(&self.path, e))?;
                tracing::info!(
                    path = %self.path.display(),
                    dependencies = self.manifest.entries.len(),
                    files = self.manifest.file_count(),
                    "archive written"
                );
                Ok(())
            }
            State::Reading(_) => Ok(()),
            State::Closed => Err(self.closed_error()),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            State::Closed => Err(self.closed_error()),
            _ => Ok(()),
        }
    }

    fn closed_error(&self) -> DeployError {
        DeployError::contract(format!("archive {} is closed", self.path.display()))
    }

    fn writer(&mut self) -> Result<&mut ZipWriter<File>> {
        match &mut self.state {
            State::Writing(zip) => Ok(zip),
            State::Reading(_) => Err(DeployError::contract(format!(
                "archive {} is open for reading",
                self.path.display()
            ))),
            State::Closed => Err(DeployError::contract(format!(
                "archive {} is closed",
                self.path.display()
            ))),
        }
    }

    fn reader(&mut self) -> Result<&mut ZipArchive<File>> {
        match &mut self.state {
            State::Reading(zip) => Ok(zip),
            State::Writing(_) => Err(DeployError::contract(format!(
                "archive {} is open for writing",
                self.path.display()
            ))),
            State::Closed => Err(DeployError::contract(format!(
                "archive {} is closed",
                self.path.display()
            ))),
        }
    }

    fn write_entry(&mut self, entry_path: &str, data: &[u8]) -> Result<()> {
        let archive_path = self.path.clone();
        let zip = self.writer()?;
        start_and_write(zip, &archive_path, entry_path, data)
    }

    fn unique_path(&self, candidate: &str) -> String {
        if !self.manifest.contains_path(candidate) {
            return candidate.to_string();
        }
        let (stem, ext) = split_extension(candidate);
        let mut stamp = chrono::Utc::now().timestamp_millis();
        loop {
            let path = format!("{stem}_{stamp}{ext}");
            if !self.manifest.contains_path(&path) {
                return path;
            }
            stamp += 1;
        }
    }
}

impl Drop for Archive {
    fn drop(&mut self) {
        if matches!(self.state, State::Writing(_)) {
            tracing::warn!(path = %self.path.display(), "archive dropped without close");
        }
    }
}

fn open_zip(path: &Path) -> Result<ZipArchive<File>> {
    let file = File::open(path).map_err(|e| DeployError::io(path, e))?;
    ZipArchive::new(file).map_err(|e| match e {
        ZipError::Io(source) => DeployError::io(path, source),
        other => DeployError::MalformedArchive {
            path: path.to_path_buf(),
            reason: other.to_string(),
        },
    })
}

fn read_json_entry<T: serde::de::DeserializeOwned>(
    zip: &mut ZipArchive<File>,
    path: &Path,
    entry_name: &str,
) -> Result<T> {
    let mut entry = zip
        .by_name(entry_name)
        .map_err(|_| DeployError::MalformedArchive {
            path: path.to_path_buf(),
            reason: format!("missing {entry_name}"),
        })?;
    let mut data = Vec::new();
    entry
        .read_to_end(&mut data)
        .map_err(|e| DeployError::io(path, e))?;
    serde_json::from_slice(&data).map_err(|e| DeployError::MalformedArchive {
        path: path.to_path_buf(),
        reason: format!("invalid {entry_name}: {e}"),
    })
}

fn start_and_write(
    zip: &mut ZipWriter<File>,
    archive_path: &Path,
    entry_path: &str,
    data: &[u8],
) -> Result<()> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(entry_path, options)
        .map_err(|e| DeployError::archive(archive_path, e))?;
    zip.write_all(data)
        .map_err(|e| DeployError::io(archive_path, e))
}

/// File-name safe rendering of a display name.
fn sanitize_name(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

/// `(stem, ".ext")` split at the first dot of the last path segment.
fn split_extension(path: &str) -> (&str, &str) {
    let name_start = path.rfind('/').map_or(0, |i| i + 1);
    match path[name_start..].find('.') {
        Some(dot) if dot > 0 => path.split_at(name_start + dot),
        _ => (path, ""),
    }
}

fn disambiguate_in_batch(base: &str, used: &mut HashSet<String>) -> String {
    if used.insert(base.to_string()) {
        return base.to_string();
    }
    let (stem, ext) = split_extension(base);
    let mut n = 1;
    loop {
        let candidate = format!("{stem}-{n}{ext}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}
