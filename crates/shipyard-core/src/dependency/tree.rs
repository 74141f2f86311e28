//! Inclusion state for a set of expanded package trees.
//!
//! Nodes are never flagged in place. Inclusion is recomputed from the
//! trees, each package's include-all setting and the suppression filter
//! whenever the graph changes, and stored as a key → included map.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{DependencyKey, DependencyKind};

use super::Dependency;

/// Predicate excluding dependencies from packaging by key.
pub type SuppressionFilter = Box<dyn Fn(&DependencyKey) -> bool + Send + Sync>;

/// One expanded package root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageTree {
    pub root: Dependency,
    /// Package SHARED children along with LOCAL ones.
    pub include_all: bool,
}

#[derive(Default)]
pub struct TreeContext {
    packages: Vec<PackageTree>,
    included: HashMap<DependencyKey, bool>,
    suppress: Option<SuppressionFilter>,
}

impl fmt::Debug for TreeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeContext")
            .field("packages", &self.packages)
            .field("included", &self.included)
            .field("suppress", &self.suppress.is_some())
            .finish()
    }
}

impl TreeContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context whose inclusion state honors `filter`.
    ///
    /// Suppressed dependencies stay in the trees for traversal but are
    /// never included.
    pub fn with_suppression(filter: SuppressionFilter) -> Self {
        Self {
            suppress: Some(filter),
            ..Self::default()
        }
    }

    /// Rebuild a context from trees stored in an archive.
    pub fn from_packages(packages: Vec<PackageTree>) -> Self {
        let mut ctx = Self {
            packages,
            ..Self::default()
        };
        ctx.recompute();
        ctx
    }

    pub fn set_suppression(&mut self, filter: SuppressionFilter) {
        self.suppress = Some(filter);
        self.recompute();
    }

    pub fn packages(&self) -> &[PackageTree] {
        &self.packages
    }

    pub fn roots(&self) -> impl Iterator<Item = &Dependency> {
        self.packages.iter().map(|package| &package.root)
    }

    pub fn package(&self, key: &DependencyKey) -> Option<&PackageTree> {
        self.packages
            .iter()
            .find(|package| &package.root.key() == key)
    }

    pub fn is_included(&self, key: &DependencyKey) -> bool {
        self.included.get(key).copied().unwrap_or(false)
    }

    pub fn is_suppressed(&self, key: &DependencyKey) -> bool {
        self.suppress.as_ref().is_some_and(|filter| filter(key))
    }

    /// True if `key` appears anywhere in any package tree.
    pub fn contains(&self, key: &DependencyKey) -> bool {
        self.included.contains_key(key)
    }

    pub fn all_keys(&self) -> HashSet<DependencyKey> {
        self.included.keys().cloned().collect()
    }

    pub fn included_keys(&self) -> BTreeSet<DependencyKey> {
        self.included
            .iter()
            .filter(|(_, included)| **included)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Number of distinct dependencies across all trees.
    pub fn len(&self) -> usize {
        self.included.len()
    }

    pub fn is_empty(&self) -> bool {
        self.included.is_empty()
    }

    pub(crate) fn push_package(&mut self, package: PackageTree) {
        self.packages.push(package);
        self.recompute();
    }

    pub(crate) fn replace_roots(&mut self, roots: Vec<Dependency>) {
        for (package, root) in self.packages.iter_mut().zip(roots) {
            package.root = root;
        }
        self.recompute();
    }

    /// Included dependencies of `root` in installation order.
    ///
    /// Post-order: children precede their parents; a key shared by several
    /// parents is emitted at its first occurrence; back edges are ignored.
    pub fn installation_order<'t>(&self, root: &'t Dependency) -> Vec<&'t Dependency> {
        let mut order = Vec::new();
        let mut emitted = HashSet::new();
        let mut on_path = HashSet::new();
        self.post_order(root, &mut on_path, &mut emitted, &mut order);
        order
    }

    fn post_order<'t>(
        &self,
        node: &'t Dependency,
        on_path: &mut HashSet<DependencyKey>,
        emitted: &mut HashSet<DependencyKey>,
        order: &mut Vec<&'t Dependency>,
    ) {
        let key = node.key();
        if emitted.contains(&key) || !on_path.insert(key.clone()) {
            return;
        }
        for child in &node.children {
            self.post_order(child, on_path, emitted, order);
        }
        on_path.remove(&key);
        if self.is_included(&key) && emitted.insert(key) {
            order.push(node);
        }
    }

    fn recompute(&mut self) {
        let mut included = HashMap::new();
        for package in &self.packages {
            self.mark(&package.root, true, package.include_all, true, &mut included);
        }
        self.included = included;
    }

    fn mark(
        &self,
        node: &Dependency,
        parent_included: bool,
        include_all: bool,
        is_root: bool,
        out: &mut HashMap<DependencyKey, bool>,
    ) {
        let key = node.key();
        let included = is_root
            || (parent_included
                && !self.is_suppressed(&key)
                && match node.kind {
                    DependencyKind::Local => true,
                    DependencyKind::Shared => include_all || node.is_auto,
                    DependencyKind::System | DependencyKind::Server => false,
                });

        let entry = out.entry(key).or_insert(false);
        *entry |= included;

        for child in &node.children {
            self.mark(child, included, include_all, false, out);
        }
    }
}
