//! Per-run job state.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::archive::DbmsInfo;
use crate::error::{DeployError, Result};
use crate::idmap::IdMap;
use crate::idtype::DependencyIdTypes;
use crate::types::DependencyKey;

/// Transient state of one import run.
#[derive(Debug)]
pub struct ImportContext {
    pub user: String,
    pub source_server: String,
    pub source_repository: Option<DbmsInfo>,
    /// Source datasource key → target datasource.
    pub target_dbms: BTreeMap<String, DbmsInfo>,
    pub id_map: IdMap,
    pub archive_log_id: String,
    package_log_id: Option<String>,
    txn: u64,
    current_id_types: Option<DependencyIdTypes>,
    current_dependency: Option<DependencyKey>,
    installed: HashSet<(DependencyKey, String)>,
    targets: HashMap<DependencyKey, String>,
}

impl ImportContext {
    pub fn new(
        user: impl Into<String>,
        source_server: impl Into<String>,
        id_map: IdMap,
        archive_log_id: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            source_server: source_server.into(),
            source_repository: None,
            target_dbms: BTreeMap::new(),
            id_map,
            archive_log_id: archive_log_id.into(),
            package_log_id: None,
            txn: 0,
            current_id_types: None,
            current_dependency: None,
            installed: HashSet::new(),
            targets: HashMap::new(),
        }
    }

    /// Start a package log; the transaction sequence restarts at 1.
    pub fn begin_package(&mut self, package_log_id: impl Into<String>) {
        self.package_log_id = Some(package_log_id.into());
        self.txn = 0;
        self.current_dependency = None;
        self.current_id_types = None;
    }

    pub fn package_log_id(&self) -> Option<&str> {
        self.package_log_id.as_deref()
    }

    pub fn next_txn(&mut self) -> u64 {
        self.txn += 1;
        self.txn
    }

    pub fn set_current(&mut self, key: DependencyKey, id_types: Option<DependencyIdTypes>) {
        self.current_dependency = Some(key);
        self.current_id_types = id_types;
    }

    pub fn clear_current(&mut self) {
        self.current_dependency = None;
        self.current_id_types = None;
    }

    /// Dependency being processed, for failure attribution.
    pub fn current_dependency(&self) -> Option<&DependencyKey> {
        self.current_dependency.as_ref()
    }

    pub fn current_id_types(&self) -> Option<&DependencyIdTypes> {
        self.current_id_types.as_ref()
    }

    /// Register `key` as installed by `package` with the given target id.
    ///
    /// Registering the same pair twice is a contract violation.
    pub fn add_installed_dependency(
        &mut self,
        key: &DependencyKey,
        package: &str,
        target_id: &str,
    ) -> Result<()> {
        if !self.installed.insert((key.clone(), package.to_string())) {
            return Err(DeployError::contract(format!(
                "{key} already installed for package '{package}' in this run"
            )));
        }
        self.targets.insert(key.clone(), target_id.to_string());
        Ok(())
    }

    pub fn is_installed(&self, key: &DependencyKey, package: &str) -> bool {
        self.installed.contains(&(key.clone(), package.to_string()))
    }

    /// Target id of `key` if any package installed it during this run.
    pub fn installed_target(&self, key: &DependencyKey) -> Option<&str> {
        self.targets.get(key).map(String::as_str)
    }

    /// Target datasource for a source datasource, defaulting to the source.
    pub fn map_dbms(&self, source: &DbmsInfo) -> DbmsInfo {
        self.target_dbms
            .get(&source.datasource_key())
            .cloned()
            .unwrap_or_else(|| source.clone())
    }
}

/// Transient state of one export run.
#[derive(Debug, Default)]
pub struct ExportContext {
    pub user: String,
    exported: HashSet<DependencyKey>,
}

impl ExportContext {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            exported: HashSet::new(),
        }
    }

    /// Mark `key` exported; false if it already was.
    pub fn mark_exported(&mut self, key: &DependencyKey) -> bool {
        self.exported.insert(key.clone())
    }

    pub fn exported_count(&self) -> usize {
        self.exported.len()
    }
}
