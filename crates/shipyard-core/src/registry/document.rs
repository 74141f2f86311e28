//! Generic handler for objects stored as JSON documents.

use serde_json::Value;

use crate::archive::{DbmsInfo, FileType, PayloadFile};
use crate::dependency::Dependency;
use crate::error::{DeployError, Result};
use crate::idtype::{IdTypeHandler, JsonIdTypeHandler};
use crate::repository::{ObjectStore, StoredObject};

use super::handler::{DependencyHandler, InstallRequest, InstallResult};

#[derive(Debug, Clone, Default)]
pub struct DocumentHandler {
    id_types: JsonIdTypeHandler,
}

impl DocumentHandler {
    pub fn new() -> Self {
        Self::default()
    }

    fn load_source(&self, store: &dyn ObjectStore, dependency: &Dependency) -> Result<StoredObject> {
        store
            .load(&dependency.type_code, &dependency.id)?
            .ok_or_else(|| DeployError::ObjectNotFound {
                type_code: dependency.type_code.clone(),
                id: dependency.id.clone(),
            })
    }
}

impl DependencyHandler for DocumentHandler {
    fn name(&self) -> &str {
        "document"
    }

    fn children(
        &self,
        store: &dyn ObjectStore,
        dependency: &Dependency,
    ) -> Result<Vec<Dependency>> {
        let object = match store.load(&dependency.type_code, &dependency.id)? {
            Some(object) => object,
            // Existence-only dependencies are never expanded.
            None if dependency.kind.is_existence_only() => return Ok(Vec::new()),
            None => {
                return Err(DeployError::ObjectNotFound {
                    type_code: dependency.type_code.clone(),
                    id: dependency.id.clone(),
                });
            }
        };

        let mut children = Vec::with_capacity(object.references.len());
        for reference in &object.references {
            let display_name = match store.load(&reference.type_code, &reference.id)? {
                Some(child) => child.name,
                None => reference.id.clone(),
            };
            let mut child = Dependency::new(
                &reference.type_code,
                &reference.id,
                display_name,
                reference.kind,
            );
            child.parent = Some(dependency.key());
            children.push(child);
        }
        Ok(children)
    }

    fn id_type_handler(&self) -> Option<&dyn IdTypeHandler> {
        Some(&self.id_types)
    }

    fn export_files(
        &self,
        store: &dyn ObjectStore,
        dependency: &Dependency,
    ) -> Result<Vec<PayloadFile>> {
        let object = self.load_source(store, dependency)?;
        let data = serde_json::to_vec_pretty(&object).map_err(|e| {
            DeployError::serialization(format!("{}", dependency.key()), e)
        })?;
        Ok(vec![PayloadFile::generated(
            &dependency.type_code,
            &dependency.id,
            FileType::Object,
            data,
        )])
    }

    /// Datasources named under the body's `dbms` property.
    fn dbms_infos(&self, store: &dyn ObjectStore, dependency: &Dependency) -> Result<Vec<DbmsInfo>> {
        let object = self.load_source(store, dependency)?;
        let infos = match object.body.get("dbms") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect(),
            Some(item @ Value::Object(_)) => serde_json::from_value(item.clone())
                .map(|info| vec![info])
                .unwrap_or_default(),
            _ => Vec::new(),
        };
        Ok(infos)
    }

    fn install(&self, request: InstallRequest<'_>) -> Result<InstallResult> {
        let dependency = request.dependency;
        let (file, data) = request
            .files
            .iter()
            .find(|(file, _)| file.file_type == FileType::Object)
            .ok_or_else(|| DeployError::MalformedArchive {
                path: dependency.key().to_string().into(),
                reason: "no object document stored for dependency".into(),
            })?;
        let source: StoredObject =
            serde_json::from_slice(data).map_err(|e| DeployError::serialization(&file.path, e))?;

        let (mut object, mut id_types) = match request.id_types {
            Some(id_types) => {
                let transformed = self.id_types.transform_ids(&source, id_types, request.id_map)?;
                (transformed.object, Some(transformed.id_types))
            }
            None => (source, None),
        };

        for reference in &mut object.references {
            if let Some(target_id) = request.id_map.target_id(&reference.type_code, &reference.id) {
                reference.id = target_id.to_string();
            }
        }

        let target_id = match (request.existing, request.id_map.target_id(&dependency.type_code, &dependency.id)) {
            (Some(existing), _) => existing.id.clone(),
            (None, Some(mapped)) => mapped.to_string(),
            (None, None) => request.store.next_id(&dependency.type_code)?,
        };
        object.id = target_id;
        if let Some(id_types) = id_types.as_mut() {
            id_types.key = object.key();
        }

        request.store.save(&object)?;
        tracing::debug!(
            source = %dependency.key(),
            target = %object.key(),
            created = request.existing.is_none(),
            "installed document"
        );

        Ok(InstallResult {
            created: request.existing.is_none(),
            object,
            id_types,
        })
    }
}
