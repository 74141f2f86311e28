//! Dependency type registry.
//!
//! The registry is the static catalog of dependency types: each type's
//! capability flags, allowed child types, and the handler implementing its
//! behavior. Handlers are resolved from a [`HandlerTable`] once, when the
//! registry is built; a type naming an unknown handler or child type is a
//! fatal configuration error.

pub mod document;
pub mod handler;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dependency::Dependency;
use crate::error::{DeployError, Result};
use crate::types::DependencyKind;

pub use document::DocumentHandler;
pub use handler::{DependencyHandler, InstallRequest, InstallResult};

/// Built-in catalog shipped with the engine.
pub const BUILTIN_CATALOG: &str = include_str!("catalog.toml");

/// Capability flags of a dependency type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeFlags {
    #[serde(default)]
    pub supports_id_types: bool,
    #[serde(default)]
    pub supports_id_mapping: bool,
    #[serde(default)]
    pub supports_user_dependencies: bool,
    #[serde(default)]
    pub deployable_element: bool,
    #[serde(default)]
    pub can_be_ancestor: bool,
    #[serde(default)]
    pub supports_parent_id: bool,
    #[serde(default)]
    pub auto_expand: bool,
    /// ACL definitions are validated through the object that owns them.
    #[serde(default)]
    pub acl_definition: bool,
    /// Association rows may legitimately be absent on the target.
    #[serde(default)]
    pub association: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildTypeDef {
    pub type_code: String,
    #[serde(default)]
    pub kind: DependencyKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyTypeDef {
    pub code: String,
    pub display_name: String,
    pub handler: String,
    /// Kind assigned to auto-discovered dependencies of this type.
    #[serde(default = "default_discovered_kind")]
    pub default_kind: DependencyKind,
    #[serde(flatten)]
    pub flags: TypeFlags,
    #[serde(default)]
    pub children: Vec<ChildTypeDef>,
}

fn default_discovered_kind() -> DependencyKind {
    DependencyKind::Shared
}

impl DependencyTypeDef {
    pub fn allows_child(&self, type_code: &str) -> bool {
        self.children.iter().any(|c| c.type_code == type_code)
    }
}

/// Parsed catalog document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeCatalog {
    #[serde(default)]
    pub deploy_order: Vec<String>,
    #[serde(default)]
    pub types: Vec<DependencyTypeDef>,
}

impl TypeCatalog {
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUILTIN_CATALOG, Path::new("<builtin catalog>"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| DeployError::io(path, e))?;
        Self::from_toml_str(&content, path)
    }

    pub fn from_toml_str(content: &str, origin: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|e| DeployError::Config {
            path: origin.to_path_buf(),
            reason: crate::config::describe_toml_error(&e, content),
        })
    }
}

/// Startup table mapping handler names to handler instances.
#[derive(Debug, Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<String, Arc<dyn DependencyHandler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table holding the generic document handler under `"document"`.
    pub fn with_default_handlers() -> Self {
        let mut table = Self::new();
        table.register("document", Arc::new(DocumentHandler::new()));
        table
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn DependencyHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DependencyHandler>> {
        self.handlers.get(name).cloned()
    }
}

/// A type definition bound to its resolved handler.
#[derive(Debug, Clone)]
pub struct RegisteredType {
    pub def: DependencyTypeDef,
    handler: Arc<dyn DependencyHandler>,
}

impl RegisteredType {
    pub fn handler(&self) -> &dyn DependencyHandler {
        self.handler.as_ref()
    }

    pub fn flags(&self) -> &TypeFlags {
        &self.def.flags
    }
}

#[derive(Debug, Clone)]
pub struct DependencyTypeRegistry {
    types: Vec<RegisteredType>,
    index: HashMap<String, usize>,
    deploy_order: Vec<String>,
}

impl DependencyTypeRegistry {
    /// Bind every type in `catalog` to its handler from `handlers`.
    pub fn from_catalog(catalog: TypeCatalog, handlers: &HandlerTable) -> Result<Self> {
        let mut types = Vec::with_capacity(catalog.types.len());
        let mut index = HashMap::new();

        for def in catalog.types {
            let handler = handlers
                .get(&def.handler)
                .ok_or_else(|| DeployError::MissingHandler {
                    type_code: def.code.clone(),
                    handler: def.handler.clone(),
                })?;
            if index.insert(def.code.clone(), types.len()).is_some() {
                return Err(DeployError::Config {
                    path: PathBuf::from("<type catalog>"),
                    reason: format!("dependency type '{}' is defined twice", def.code),
                });
            }
            types.push(RegisteredType { def, handler });
        }

        let registry = Self {
            types,
            index,
            deploy_order: catalog.deploy_order,
        };
        registry.check_references()?;
        Ok(registry)
    }

    /// Registry over the built-in catalog and default handlers.
    pub fn builtin() -> Result<Self> {
        Self::from_catalog(TypeCatalog::builtin()?, &HandlerTable::with_default_handlers())
    }

    fn check_references(&self) -> Result<()> {
        for registered in &self.types {
            for child in &registered.def.children {
                if !self.index.contains_key(&child.type_code) {
                    return Err(DeployError::UnknownDependencyType(format!(
                        "{} (child of {})",
                        child.type_code, registered.def.code
                    )));
                }
            }
        }
        for code in &self.deploy_order {
            if !self.index.contains_key(code) {
                return Err(DeployError::UnknownDependencyType(format!(
                    "{code} (in deploy_order)"
                )));
            }
        }
        Ok(())
    }

    pub fn get(&self, type_code: &str) -> Result<&RegisteredType> {
        self.index
            .get(type_code)
            .map(|&i| &self.types[i])
            .ok_or_else(|| DeployError::UnknownDependencyType(type_code.to_string()))
    }

    pub fn contains(&self, type_code: &str) -> bool {
        self.index.contains_key(type_code)
    }

    pub fn handler(&self, type_code: &str) -> Result<&dyn DependencyHandler> {
        self.get(type_code).map(RegisteredType::handler)
    }

    pub fn types(&self) -> impl Iterator<Item = &RegisteredType> {
        self.types.iter()
    }

    pub fn is_deployable_element(&self, type_code: &str) -> bool {
        self.get(type_code)
            .map(|t| t.def.flags.deployable_element)
            .unwrap_or(false)
    }

    /// Types that may hold a child of `type_code`.
    pub fn parent_types(&self, type_code: &str) -> Vec<&str> {
        self.types
            .iter()
            .filter(|t| t.def.allows_child(type_code))
            .map(|t| t.def.code.as_str())
            .collect()
    }

    /// Position of `type_code` in the configured deploy order.
    pub fn deploy_rank(&self, type_code: &str) -> usize {
        self.deploy_order
            .iter()
            .position(|code| code == type_code)
            .unwrap_or(self.deploy_order.len())
    }

    /// Stable sort of top-level packages into the configured deploy order.
    pub fn reorder_deployed_elements(&self, packages: &mut [Dependency]) {
        packages.sort_by_key(|package| self.deploy_rank(&package.type_code));
    }
}
