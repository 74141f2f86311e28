//! Export and import descriptor documents.
//!
//! The export descriptor names the packages to place in an archive; the
//! import descriptor carries an archive reference plus the validation
//! results computed for each of its packages.

use std::fs;
use std::path::{Path, PathBuf};

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::archive::ArchiveInfo;
use crate::error::{DeployError, Result};
use crate::types::DependencyKey;
use crate::validate::ValidationResults;

/// One deployable element to export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRef {
    pub type_code: String,
    pub id: String,
    /// Overrides the descriptor-wide `include_shared` for this package.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_all: Option<bool>,
}

impl PackageRef {
    pub fn new(type_code: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            type_code: type_code.into(),
            id: id.into(),
            include_all: None,
        }
    }

    pub fn key(&self) -> DependencyKey {
        DependencyKey::new(&self.type_code, &self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_package_version")]
    pub version: String,
    pub packages: Vec<PackageRef>,
    /// Keys kept in the graph but never packaged.
    #[serde(default)]
    pub excluded: Vec<DependencyKey>,
    #[serde(default = "default_true")]
    pub include_shared: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_def: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_config: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_version: Option<Version>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_version: Option<Version>,
    /// Names of packages that must already be installed on the target.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Communities the installed package is made visible to.
    #[serde(default)]
    pub communities: Vec<String>,
}

fn default_package_version() -> String {
    "1.0.0".to_string()
}

fn default_true() -> bool {
    true
}

impl ExportDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            version: default_package_version(),
            packages: Vec::new(),
            excluded: Vec::new(),
            include_shared: true,
            config_def: None,
            local_config: None,
            min_version: None,
            max_version: None,
            depends_on: Vec::new(),
            communities: Vec::new(),
        }
    }

    pub fn with_package(mut self, package: PackageRef) -> Self {
        self.packages.push(package);
        self
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| DeployError::io(path, e))?;
        let descriptor: Self =
            serde_json::from_slice(&bytes).map_err(|e| DeployError::serialization(path, e))?;
        descriptor.check(path)?;
        Ok(descriptor)
    }

    fn check(&self, path: &Path) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(DeployError::Config {
                path: path.to_path_buf(),
                reason: "descriptor name must not be empty".into(),
            });
        }
        if self.packages.is_empty() {
            return Err(DeployError::Config {
                path: path.to_path_buf(),
                reason: "descriptor lists no packages".into(),
            });
        }
        if let (Some(min), Some(max)) = (&self.min_version, &self.max_version)
            && min > max
        {
            return Err(DeployError::Config {
                path: path.to_path_buf(),
                reason: format!("min_version {min} is greater than max_version {max}"),
            });
        }
        Ok(())
    }

    pub fn include_all(&self, package: &PackageRef) -> bool {
        package.include_all.unwrap_or(self.include_shared)
    }

    pub fn is_excluded(&self, key: &DependencyKey) -> bool {
        self.excluded.contains(key)
    }

    /// Check `product` against the min/max compatible versions.
    pub fn check_compatible(&self, product: &Version) -> Result<()> {
        if let Some(min) = &self.min_version
            && product < min
        {
            return Err(DeployError::IncompatibleVersion {
                required: format!(">={min}"),
                actual: product.to_string(),
            });
        }
        if let Some(max) = &self.max_version
            && product > max
        {
            return Err(DeployError::IncompatibleVersion {
                required: format!("<={max}"),
                actual: product.to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportPackage {
    pub name: String,
    pub key: DependencyKey,
    #[serde(default)]
    pub validation_results: ValidationResults,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportDescriptor {
    pub archive: PathBuf,
    pub source_server: String,
    pub packages: Vec<ImportPackage>,
}

impl ImportDescriptor {
    /// Descriptor listing every package recorded in the archive info.
    pub fn from_archive(archive: &Path, info: &ArchiveInfo) -> Result<Self> {
        let detail = info.detail.as_ref().ok_or_else(|| DeployError::MalformedArchive {
            path: archive.to_path_buf(),
            reason: "archive carries no package detail".into(),
        })?;
        let packages = detail
            .packages
            .iter()
            .map(|package| ImportPackage {
                name: package.root.display_name.clone(),
                key: package.root.key(),
                validation_results: ValidationResults::default(),
            })
            .collect();
        Ok(Self {
            archive: archive.to_path_buf(),
            source_server: info.server_name.clone(),
            packages,
        })
    }

    pub fn package(&self, key: &DependencyKey) -> Option<&ImportPackage> {
        self.packages.iter().find(|package| &package.key == key)
    }

    pub fn has_errors(&self) -> bool {
        self.packages
            .iter()
            .any(|package| package.validation_results.has_errors())
    }
}
