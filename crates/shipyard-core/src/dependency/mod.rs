//! Dependency model and graph construction.
//!
//! A [`Dependency`] binds a registered dependency type to one concrete
//! object. Package roots (deployable elements) are expanded into trees by
//! the [`DependencyGraphBuilder`]; which nodes get packaged is tracked
//! separately in a [`TreeContext`] rather than on the nodes themselves.

pub mod builder;
pub mod tree;

use serde::{Deserialize, Serialize};

use crate::repository::StoredObject;
use crate::types::{DependencyKey, DependencyKind};

pub use builder::{DependencyCache, DependencyGraphBuilder};
pub use tree::{PackageTree, SuppressionFilter, TreeContext};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    pub type_code: String,
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub kind: DependencyKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<DependencyKey>,
    /// Discovered by scanning rather than declared by the package author.
    #[serde(default)]
    pub is_auto: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Dependency>,
}

impl Dependency {
    pub fn new(
        type_code: impl Into<String>,
        id: impl Into<String>,
        display_name: impl Into<String>,
        kind: DependencyKind,
    ) -> Self {
        Self {
            type_code: type_code.into(),
            id: id.into(),
            display_name: display_name.into(),
            kind,
            parent: None,
            is_auto: false,
            children: Vec::new(),
        }
    }

    pub fn from_object(object: &StoredObject, kind: DependencyKind) -> Self {
        Self::new(&object.type_code, &object.id, &object.name, kind)
    }

    pub fn key(&self) -> DependencyKey {
        DependencyKey::new(&self.type_code, &self.id)
    }

    /// Attach `child`, recording this dependency as its parent.
    pub fn with_child(mut self, mut child: Dependency) -> Self {
        child.parent = Some(self.key());
        self.children.push(child);
        self
    }

    /// Pre-order traversal of this dependency and all descendants.
    pub fn walk(&self) -> Walk<'_> {
        Walk { stack: vec![self] }
    }

    /// First node in pre-order with the given key.
    pub fn find(&self, key: &DependencyKey) -> Option<&Dependency> {
        self.walk().find(|dep| &dep.key() == key)
    }

    pub fn local_children(&self) -> impl Iterator<Item = &Dependency> {
        self.children
            .iter()
            .filter(|child| child.kind == DependencyKind::Local)
    }
}

pub struct Walk<'a> {
    stack: Vec<&'a Dependency>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a Dependency;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.stack.pop()?;
        self.stack.extend(next.children.iter().rev());
        Some(next)
    }
}
