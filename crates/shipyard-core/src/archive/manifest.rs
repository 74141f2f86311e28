//! Archive manifest model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::idtype::DependencyIdTypes;
use crate::types::DependencyKey;

pub const ARCHIVE_MANIFEST_PATH: &str = "META-INF/manifest.json";
pub const ARCHIVE_INFO_PATH: &str = "META-INF/archive-info.json";
pub const CONFIG_DIR: &str = "config";

const GENERATED_PREFIX: &str = "~";
const GENERATED_SUFFIX: &str = ".tmp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    /// Serialized object document.
    Object,
    /// Opaque content blob (images, scripts, ...).
    Content,
    /// Table schema definition.
    Schema,
}

impl FileType {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Object => "json",
            Self::Content => "dat",
            Self::Schema => "schema.json",
        }
    }
}

/// A payload file as recorded in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveFile {
    pub file_type: FileType,
    /// Archive-relative path, always `/`-separated.
    pub path: String,
}

/// A payload file produced by a handler, before it is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadFile {
    pub name: String,
    pub file_type: FileType,
    pub data: Vec<u8>,
}

impl PayloadFile {
    pub fn new(name: impl Into<String>, file_type: FileType, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            file_type,
            data,
        }
    }

    /// Payload with a generated scratch name; the archive renames it on store.
    pub fn generated(type_code: &str, id: &str, file_type: FileType, data: Vec<u8>) -> Self {
        Self::new(
            format!("{GENERATED_PREFIX}{type_code}{id}{GENERATED_SUFFIX}"),
            file_type,
            data,
        )
    }

    pub fn is_generated(&self) -> bool {
        is_generated_name(&self.name)
    }
}

pub fn is_generated_name(name: &str) -> bool {
    name.starts_with(GENERATED_PREFIX) && name.ends_with(GENERATED_SUFFIX)
}

/// External database a dependency's payload was read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbmsInfo {
    pub driver: String,
    pub server: String,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub origin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl DbmsInfo {
    /// Datasource identity used when matching against the target's dbms map.
    pub fn datasource_key(&self) -> String {
        format!("{}:{}:{}", self.driver, self.server, self.database)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    #[serde(default)]
    pub files: Vec<ArchiveFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_types: Option<DependencyIdTypes>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dbms_infos: Vec<DbmsInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveManifest {
    #[serde(default)]
    pub entries: BTreeMap<DependencyKey, ManifestEntry>,
    /// Config-definition files stored under `config/`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_files: Vec<String>,
}

impl ArchiveManifest {
    pub fn entry(&self, key: &DependencyKey) -> Option<&ManifestEntry> {
        self.entries.get(key)
    }

    pub(crate) fn entry_mut(&mut self, key: &DependencyKey) -> &mut ManifestEntry {
        self.entries.entry(key.clone()).or_default()
    }

    pub fn files(&self, key: &DependencyKey) -> &[ArchiveFile] {
        self.entries
            .get(key)
            .map(|entry| entry.files.as_slice())
            .unwrap_or(&[])
    }

    pub fn keys(&self) -> impl Iterator<Item = &DependencyKey> {
        self.entries.keys()
    }

    pub fn contains_path(&self, path: &str) -> bool {
        self.config_files.iter().any(|p| p == path)
            || self
                .entries
                .values()
                .flat_map(|entry| entry.files.iter())
                .any(|file| file.path == path)
    }

    pub fn file_count(&self) -> usize {
        self.entries.values().map(|entry| entry.files.len()).sum()
    }
}
