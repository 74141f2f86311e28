//! Expansion of deployable elements into dependency trees.

use std::collections::HashSet;

use crate::cache::ScopedCache;
use crate::error::{DeployError, Result};
use crate::idtype::IdTypeStore;
use crate::job::JobHandle;
use crate::registry::DependencyTypeRegistry;
use crate::repository::ObjectStore;
use crate::types::{DependencyKey, DependencyKind};

use super::{Dependency, PackageTree, TreeContext};

/// Job-scoped memo of handler child lookups, keyed by dependency.
pub type DependencyCache = ScopedCache<DependencyKey, Vec<Dependency>>;

pub struct DependencyGraphBuilder<'a> {
    registry: &'a DependencyTypeRegistry,
    store: &'a dyn ObjectStore,
    id_types: Option<&'a IdTypeStore>,
    cache: &'a DependencyCache,
}

impl<'a> DependencyGraphBuilder<'a> {
    pub fn new(
        registry: &'a DependencyTypeRegistry,
        store: &'a dyn ObjectStore,
        cache: &'a DependencyCache,
    ) -> Self {
        Self {
            registry,
            store,
            id_types: None,
            cache,
        }
    }

    /// Persist and reuse id-type assignments while discovering dependencies.
    pub fn with_id_types(mut self, id_types: &'a IdTypeStore) -> Self {
        self.id_types = Some(id_types);
        self
    }

    pub fn dependency_cache(&self) -> &DependencyCache {
        self.cache
    }

    /// Unexpanded root for the deployable element `type_code`/`id`.
    pub fn root_dependency(&self, type_code: &str, id: &str) -> Result<Dependency> {
        let registered = self.registry.get(type_code)?;
        if !registered.flags().deployable_element {
            return Err(DeployError::contract(format!(
                "{type_code} is not a deployable element"
            )));
        }
        let object = self
            .store
            .load(type_code, id)?
            .ok_or_else(|| DeployError::ObjectNotFound {
                type_code: type_code.to_string(),
                id: id.to_string(),
            })?;
        Ok(Dependency::from_object(&object, DependencyKind::Local))
    }

    /// Expand `root` and add it to `ctx` as a package.
    pub fn add_package(
        &self,
        ctx: &mut TreeContext,
        root: Dependency,
        include_all: bool,
    ) -> Result<()> {
        let key = root.key();
        let mut ancestors = Vec::new();
        let root = self.expand(root, &mut ancestors)?;
        tracing::debug!(
            package = %key,
            dependencies = root.walk().count(),
            include_all,
            "added package"
        );
        ctx.push_package(PackageTree { root, include_all });
        Ok(())
    }

    /// Add auto-dependencies discovered through typed id literals.
    ///
    /// Runs to a fixpoint so dependencies found under new auto-dependencies
    /// are picked up too. Repeated calls add nothing: a discovered key
    /// becomes a declared child of its parent. Returns the number of
    /// dependencies added; stops early without error when cancelled.
    pub fn add_missing_dependencies(
        &self,
        handle: &dyn JobHandle,
        ctx: &mut TreeContext,
    ) -> Result<usize> {
        let mut total = 0;
        loop {
            let mut roots: Vec<Dependency> = ctx.roots().cloned().collect();
            let mut pass = Discovery {
                handle,
                known: ctx.all_keys(),
                added: 0,
            };
            let mut cancelled = false;
            for root in &mut roots {
                let mut ancestors = Vec::new();
                if !self.discover(root, ctx, &mut pass, &mut ancestors)? {
                    cancelled = true;
                    break;
                }
            }
            let added = pass.added;
            if added > 0 {
                ctx.replace_roots(roots);
            }
            total += added;
            if cancelled {
                tracing::info!(added = total, "dependency discovery cancelled");
                return Ok(total);
            }
            if added == 0 {
                break;
            }
        }
        if total > 0 {
            tracing::info!(added = total, "added missing dependencies");
        }
        Ok(total)
    }

    /// Stable sort of top-level packages into the registry's deploy order.
    pub fn reorder_deployed_elements(&self, packages: &mut [Dependency]) {
        self.registry.reorder_deployed_elements(packages);
    }

    fn children(&self, dependency: &Dependency) -> Result<Vec<Dependency>> {
        let key = dependency.key();
        if let Some(children) = self.cache.get(&key) {
            return Ok(children);
        }
        let handler = self.registry.handler(&dependency.type_code)?;
        let children = handler.children(self.store, dependency)?;
        self.cache.insert(key, children.clone());
        Ok(children)
    }

    fn expand(
        &self,
        mut dependency: Dependency,
        ancestors: &mut Vec<DependencyKey>,
    ) -> Result<Dependency> {
        let registered = self.registry.get(&dependency.type_code)?;
        if dependency.kind.is_existence_only() {
            return Ok(dependency);
        }

        let key = dependency.key();
        ancestors.push(key.clone());
        let mut expanded = Vec::new();
        for mut child in self.children(&dependency)? {
            // Unknown child types are a catalog misconfiguration.
            self.registry.get(&child.type_code)?;
            if !registered.def.allows_child(&child.type_code) {
                tracing::warn!(
                    parent = %key,
                    child = %child.key(),
                    "child type not declared for parent type"
                );
            }
            child.parent = Some(key.clone());
            if ancestors.contains(&child.key()) {
                tracing::debug!(parent = %key, child = %child.key(), "cycle cut");
                expanded.push(child);
                continue;
            }
            expanded.push(self.expand(child, ancestors)?);
        }
        ancestors.pop();

        dependency.children = expanded;
        Ok(dependency)
    }

    /// Returns false once the job is cancelled.
    fn discover(
        &self,
        node: &mut Dependency,
        ctx: &TreeContext,
        pass: &mut Discovery<'_>,
        ancestors: &mut Vec<DependencyKey>,
    ) -> Result<bool> {
        if pass.handle.is_cancelled() {
            return Ok(false);
        }

        let key = node.key();
        ancestors.push(key.clone());
        for child in &mut node.children {
            if ancestors.contains(&child.key()) {
                continue;
            }
            if !self.discover(child, ctx, pass, ancestors)? {
                ancestors.pop();
                return Ok(false);
            }
        }

        let registered = self.registry.get(&node.type_code)?;
        if ctx.is_included(&key) && registered.flags().supports_id_types {
            let handler = registered.handler();
            if let Some(id_handler) = handler.id_type_handler()
                && let Some(object) = self.store.load(&node.type_code, &node.id)?
            {
                let discovered = id_handler.id_types(&object);
                let id_types = match self.id_types {
                    Some(store) => store.refresh(&discovered)?,
                    None => discovered,
                };
                for mut found in handler.missing_dependencies(self.store, node, Some(&id_types))? {
                    // Already somewhere in the tree, under any package or parent.
                    if pass.known.contains(&found.key()) {
                        continue;
                    }
                    found.kind = self.registry.get(&found.type_code)?.def.default_kind;
                    found.is_auto = true;
                    found.parent = Some(key.clone());
                    let found = if ancestors.contains(&found.key()) {
                        found
                    } else {
                        self.expand(found, ancestors)?
                    };
                    tracing::debug!(parent = %key, dependency = %found.key(), "auto dependency");
                    pass.known.extend(found.walk().map(Dependency::key));
                    node.children.push(found);
                    pass.added += 1;
                }
            }
        }
        ancestors.pop();
        Ok(true)
    }
}

/// Bookkeeping for one discovery pass over every package.
struct Discovery<'h> {
    handle: &'h dyn JobHandle,
    known: HashSet<DependencyKey>,
    added: usize,
}
