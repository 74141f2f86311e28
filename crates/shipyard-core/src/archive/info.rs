//! Archive-level metadata stored at [`super::ARCHIVE_INFO_PATH`].

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::dependency::PackageTree;
use crate::descriptor::ExportDescriptor;
use crate::types::DependencyKey;

use super::DbmsInfo;

pub const ARCHIVE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveInfo {
    pub format_version: u32,
    pub server_name: String,
    pub product_version: Version,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<DbmsInfo>,
    pub created_at: DateTime<Utc>,
    /// Locked archives may not be re-exported or edited.
    #[serde(default = "default_editable")]
    pub editable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<ArchiveDetail>,
}

fn default_editable() -> bool {
    true
}

impl ArchiveInfo {
    pub fn new(server_name: impl Into<String>, product_version: Version) -> Self {
        Self {
            format_version: ARCHIVE_FORMAT_VERSION,
            server_name: server_name.into(),
            product_version,
            repository: None,
            created_at: Utc::now(),
            editable: true,
            detail: None,
        }
    }

    pub fn descriptor(&self) -> Option<&ExportDescriptor> {
        self.detail.as_ref().map(|detail| &detail.descriptor)
    }
}

/// Export descriptor and expanded package trees the archive was built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveDetail {
    pub descriptor: ExportDescriptor,
    pub packages: Vec<PackageTree>,
    #[serde(default)]
    pub included: BTreeSet<DependencyKey>,
}
