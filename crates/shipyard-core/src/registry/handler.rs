//! Per-type dependency behavior.

use std::collections::HashSet;
use std::fmt;

use crate::archive::{ArchiveFile, DbmsInfo, PayloadFile};
use crate::dependency::Dependency;
use crate::error::Result;
use crate::idmap::IdMap;
use crate::idtype::{DependencyIdTypes, IdTypeHandler};
use crate::repository::{ObjectStore, StoredObject};
use crate::types::DependencyKind;

/// Everything a handler needs to install one dependency.
#[derive(Debug)]
pub struct InstallRequest<'a> {
    pub store: &'a dyn ObjectStore,
    pub dependency: &'a Dependency,
    pub files: &'a [(ArchiveFile, Vec<u8>)],
    /// Object on the target the install replaces, if any.
    pub existing: Option<&'a StoredObject>,
    pub id_map: &'a IdMap,
    pub id_types: Option<&'a DependencyIdTypes>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstallResult {
    pub object: StoredObject,
    pub created: bool,
    /// Id types rewritten to target ids; the caller persists them.
    pub id_types: Option<DependencyIdTypes>,
}

pub trait DependencyHandler: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Declared child dependencies of `dependency` on the source server.
    fn children(&self, store: &dyn ObjectStore, dependency: &Dependency)
    -> Result<Vec<Dependency>>;

    fn id_type_handler(&self) -> Option<&dyn IdTypeHandler> {
        None
    }

    /// Objects referenced through typed id literals but not declared as children.
    ///
    /// Returned dependencies are flagged as auto-dependencies.
    fn missing_dependencies(
        &self,
        store: &dyn ObjectStore,
        dependency: &Dependency,
        id_types: Option<&DependencyIdTypes>,
    ) -> Result<Vec<Dependency>> {
        let Some(id_types) = id_types else {
            return Ok(Vec::new());
        };

        let mut known: HashSet<_> = dependency.children.iter().map(Dependency::key).collect();
        known.insert(dependency.key());

        let mut missing = Vec::new();
        for key in id_types.references() {
            if !known.insert(key.clone()) {
                continue;
            }
            match store.load(key.type_code(), key.id())? {
                Some(object) => {
                    let mut found = Dependency::from_object(&object, DependencyKind::Shared);
                    found.is_auto = true;
                    missing.push(found);
                }
                None => {
                    tracing::warn!(
                        key = %dependency.key(),
                        reference = %key,
                        "referenced object not found on source"
                    );
                }
            }
        }
        Ok(missing)
    }

    /// Installing replaces a same-named object already on the target.
    fn overwrites_existing(&self) -> bool {
        true
    }

    /// The target object `dependency` would install over, if any.
    ///
    /// A mapped target id wins; otherwise the lookup is by name.
    fn find_existing(
        &self,
        store: &dyn ObjectStore,
        dependency: &Dependency,
        id_map: Option<&IdMap>,
    ) -> Result<Option<StoredObject>> {
        if let Some(target_id) =
            id_map.and_then(|map| map.target_id(&dependency.type_code, &dependency.id))
            && let Some(object) = store.load(&dependency.type_code, target_id)?
        {
            return Ok(Some(object));
        }
        store.find_by_name(&dependency.type_code, &dependency.display_name)
    }

    fn export_files(&self, store: &dyn ObjectStore, dependency: &Dependency)
    -> Result<Vec<PayloadFile>>;

    fn dbms_infos(&self, _store: &dyn ObjectStore, _dependency: &Dependency) -> Result<Vec<DbmsInfo>> {
        Ok(Vec::new())
    }

    fn install(&self, request: InstallRequest<'_>) -> Result<InstallResult>;
}
