//! Engine services shared by every job.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::config::EngineConfig;
use crate::dependency::DependencyCache;
use crate::descriptor::ImportDescriptor;
use crate::error::Result;
use crate::idmap::IdMapStore;
use crate::idtype::IdTypeStore;
use crate::locks::{DEPLOYMENT_LOCK, PUBLISHER_LOCK};
use crate::package::PackageStore;
use crate::registry::{DependencyTypeRegistry, HandlerTable, TypeCatalog};
use crate::repository::{ObjectStore, SchemaCache};

/// Explicit service container handed to jobs.
///
/// Frontends build one per process and pass it to every job; the scoped
/// caches it owns are enabled by the jobs themselves.
#[derive(Debug)]
pub struct DeployContext {
    config: EngineConfig,
    state_dir: PathBuf,
    registry: DependencyTypeRegistry,
    store: Box<dyn ObjectStore>,
    id_maps: IdMapStore,
    id_types: IdTypeStore,
    packages: PackageStore,
    schema_cache: SchemaCache,
    dependency_cache: DependencyCache,
    validations: Mutex<HashMap<PathBuf, ImportDescriptor>>,
}

impl DeployContext {
    /// Context with the registry named by `config` and default handlers.
    pub fn new(config: EngineConfig, store: Box<dyn ObjectStore>) -> Result<Self> {
        let catalog = match &config.types_file {
            Some(path) => TypeCatalog::load(path)?,
            None => TypeCatalog::builtin()?,
        };
        let registry =
            DependencyTypeRegistry::from_catalog(catalog, &HandlerTable::with_default_handlers())?;
        Self::with_registry(config, registry, store)
    }

    pub fn with_registry(
        config: EngineConfig,
        registry: DependencyTypeRegistry,
        store: Box<dyn ObjectStore>,
    ) -> Result<Self> {
        let state_dir = config.resolve_state_dir()?;
        Ok(Self {
            id_maps: IdMapStore::new(state_dir.join("idmaps")),
            id_types: IdTypeStore::new(state_dir.join("idtypes")),
            packages: PackageStore::new(state_dir.join("packages")),
            schema_cache: SchemaCache::new("schema"),
            dependency_cache: DependencyCache::new("dependency"),
            validations: Mutex::new(HashMap::new()),
            state_dir,
            config,
            registry,
            store,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn registry(&self) -> &DependencyTypeRegistry {
        &self.registry
    }

    pub fn store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }

    pub fn id_maps(&self) -> &IdMapStore {
        &self.id_maps
    }

    pub fn id_types(&self) -> &IdTypeStore {
        &self.id_types
    }

    pub fn packages(&self) -> &PackageStore {
        &self.packages
    }

    pub fn schema_cache(&self) -> &SchemaCache {
        &self.schema_cache
    }

    pub fn dependency_cache(&self) -> &DependencyCache {
        &self.dependency_cache
    }

    pub fn log_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }

    pub fn publisher_lock_path(&self) -> PathBuf {
        self.state_dir.join(format!("{PUBLISHER_LOCK}.lock"))
    }

    pub fn deployment_lock_path(&self) -> PathBuf {
        self.state_dir.join(format!("{DEPLOYMENT_LOCK}.lock"))
    }

    /// Keep a validation outcome for later lookup by archive path.
    pub fn store_validation(&self, descriptor: ImportDescriptor) {
        self.validations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(descriptor.archive.clone(), descriptor);
    }

    pub fn validation_for(&self, archive: &Path) -> Option<ImportDescriptor> {
        self.validations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(archive)
            .cloned()
    }
}
