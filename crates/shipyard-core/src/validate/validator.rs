//! Classification of a package's dependencies against the target.
//!
//! Traversal is depth-first from the package root and only descends into
//! LOCAL children. Nested deployable elements are checked where they occur,
//! but their LOCAL children are deferred until the rest of the package has
//! been walked. Non-local keys are checked once per pass; local keys are
//! checked at every occurrence since each carries its own parent context.

use std::collections::{HashSet, VecDeque};

use crate::dependency::{Dependency, TreeContext};
use crate::error::Result;
use crate::idmap::IdMap;
use crate::job::JobHandle;
use crate::package::PackageStore;
use crate::registry::DependencyTypeRegistry;
use crate::repository::ObjectStore;
use crate::types::{DependencyKey, DependencyKind};

use super::{ValidationContext, ValidationResult, ValidationResults};

pub struct DependencyValidator<'a> {
    registry: &'a DependencyTypeRegistry,
    store: &'a dyn ObjectStore,
    packages: &'a PackageStore,
    id_map: Option<&'a IdMap>,
}

/// Per-package traversal state.
struct Pass<'t> {
    package: &'t str,
    seen: HashSet<DependencyKey>,
    deferred: VecDeque<&'t Dependency>,
    results: ValidationResults,
}

impl<'a> DependencyValidator<'a> {
    pub fn new(
        registry: &'a DependencyTypeRegistry,
        store: &'a dyn ObjectStore,
        packages: &'a PackageStore,
    ) -> Self {
        Self {
            registry,
            store,
            packages,
            id_map: None,
        }
    }

    /// Resolve target objects through `id_map` before falling back to names.
    pub fn with_id_map(mut self, id_map: &'a IdMap) -> Self {
        self.id_map = Some(id_map);
        self
    }

    /// Validate the package rooted at `root`, installed as `package`.
    ///
    /// Stops at the next dependency once `handle` reports cancellation and
    /// returns what was collected so far.
    pub fn validate_package(
        &self,
        handle: &dyn JobHandle,
        tree: &TreeContext,
        root: &Dependency,
        package: &str,
        vctx: &mut ValidationContext,
    ) -> Result<ValidationResults> {
        let mut pass = Pass {
            package,
            seen: HashSet::new(),
            deferred: VecDeque::new(),
            results: ValidationResults::new(),
        };

        if !self.visit(handle, tree, root, true, &mut pass, vctx)? {
            return Ok(pass.results);
        }
        while let Some(next) = pass.deferred.pop_front() {
            if !self.visit(handle, tree, next, false, &mut pass, vctx)? {
                break;
            }
        }

        tracing::debug!(
            package,
            results = pass.results.len(),
            errors = pass.results.errors().count(),
            "validated package"
        );
        Ok(pass.results)
    }

    /// Returns false once cancellation was observed.
    fn visit<'t>(
        &self,
        handle: &dyn JobHandle,
        tree: &TreeContext,
        dependency: &'t Dependency,
        is_root: bool,
        pass: &mut Pass<'t>,
        vctx: &mut ValidationContext,
    ) -> Result<bool> {
        if handle.is_cancelled() {
            return Ok(false);
        }
        handle.dependency_processed();

        let key = dependency.key();
        let local = is_root || dependency.kind == DependencyKind::Local;

        if !local {
            if !pass.seen.insert(key.clone()) {
                return Ok(true);
            }
            if let Some(prior) = vctx.prior_from_other(&key, pass.package) {
                if !(dependency.is_auto && !tree.is_included(&key)) {
                    pass.results.extend(prior.iter().cloned());
                }
                return Ok(true);
            }
        }

        let found = self.check(tree, dependency, pass.package)?;
        vctx.record(key, pass.package, &found);
        pass.results.extend(found);

        let nested = !is_root && self.registry.is_deployable_element(&dependency.type_code);
        if nested {
            pass.deferred.extend(dependency.local_children());
            return Ok(true);
        }

        if local {
            for child in &dependency.children {
                if !self.visit(handle, tree, child, false, pass, vctx)? {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    fn check(
        &self,
        tree: &TreeContext,
        dependency: &Dependency,
        package: &str,
    ) -> Result<Vec<ValidationResult>> {
        let registered = self.registry.get(&dependency.type_code)?;
        let handler = registered.handler();
        let key = dependency.key();

        if dependency.kind.is_existence_only() {
            let existing = handler.find_existing(self.store, dependency, self.id_map)?;
            return Ok(match existing {
                Some(_) => Vec::new(),
                None => vec![ValidationResult::error(
                    dependency,
                    format!(
                        "{} '{}' does not exist on the target server",
                        registered.def.display_name, dependency.display_name
                    ),
                )],
            });
        }

        if registered.flags().acl_definition {
            return Ok(Vec::new());
        }

        let included = tree.is_included(&key);
        if included {
            if dependency.is_auto || !handler.overwrites_existing() {
                return Ok(Vec::new());
            }
            let Some(existing) = handler.find_existing(self.store, dependency, self.id_map)? else {
                return Ok(Vec::new());
            };
            let result = match self.packages.owner_of(&existing.type_code, &existing.id)? {
                Some(owner) if owner.name != package => Some(ValidationResult::error(
                    dependency,
                    format!(
                        "{} '{}' already exists and belongs to package '{}'",
                        registered.def.display_name, dependency.display_name, owner.name
                    ),
                )),
                Some(owner) => owner
                    .element(&existing.type_code, &existing.id)
                    .filter(|element| element.is_modified(&existing))
                    .map(|_| {
                        ValidationResult::warning(
                            dependency,
                            format!(
                                "{} '{}' was modified since package '{}' installed it and will be overwritten",
                                registered.def.display_name, dependency.display_name, owner.name
                            ),
                        )
                    }),
                None => Some(ValidationResult::warning(
                    dependency,
                    format!(
                        "{} '{}' already exists and was not installed by any package; it will be overwritten",
                        registered.def.display_name, dependency.display_name
                    ),
                )),
            };
            return Ok(result.into_iter().collect());
        }

        if registered.flags().association {
            return Ok(Vec::new());
        }
        let existing = handler.find_existing(self.store, dependency, self.id_map)?;
        Ok(match existing {
            Some(_) => Vec::new(),
            None => vec![ValidationResult::error(
                dependency,
                format!(
                    "{} '{}' is not part of the package and does not exist on the target server",
                    registered.def.display_name, dependency.display_name
                ),
            )],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::PackageTree;
    use crate::job::JobMonitor;
    use crate::package::{PackageElement, PackageInfo, PackageStatus};
    use crate::repository::{FsObjectStore, StoredObject};
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        registry: DependencyTypeRegistry,
        store: FsObjectStore,
        packages: PackageStore,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        Fixture {
            registry: DependencyTypeRegistry::builtin().unwrap(),
            store: FsObjectStore::new(temp.path().join("target")),
            packages: PackageStore::new(temp.path().join("packages")),
            _temp: temp,
        }
    }

    fn run(f: &Fixture, root: &Dependency, include_all: bool, package: &str) -> ValidationResults {
        let tree = TreeContext::from_packages(vec![PackageTree {
            root: root.clone(),
            include_all,
        }]);
        DependencyValidator::new(&f.registry, &f.store, &f.packages)
            .validate_package(
                &JobMonitor::new(),
                &tree,
                root,
                package,
                &mut ValidationContext::new(),
            )
            .unwrap()
    }

    #[test]
    fn missing_system_dependency_is_one_error() {
        let f = fixture();
        let root = Dependency::new("ContentType", "1", "Article", DependencyKind::Local)
            .with_child(Dependency::new("Community", "10", "Default", DependencyKind::System));

        let results = run(&f, &root, true, "articles");
        assert_eq!(results.len(), 1);
        let result = results.iter().next().unwrap();
        assert!(result.is_error);
        assert!(result.message.contains("does not exist"));
    }

    #[test]
    fn same_package_unmodified_is_silent() {
        let f = fixture();
        let existing = StoredObject::new("ContentType", "77", "Article");
        f.store.save(&existing).unwrap();
        let mut info = PackageInfo::new("articles", "1.0.0", "log", "src");
        info.status = PackageStatus::Success;
        info.add_element(PackageElement::from_installed("1", &existing));
        f.packages.save_replacing(&info).unwrap();

        let root = Dependency::new("ContentType", "1", "Article", DependencyKind::Local);
        assert!(run(&f, &root, true, "articles").is_empty());
    }

    #[test]
    fn different_owner_is_one_error() {
        let f = fixture();
        let existing = StoredObject::new("ContentType", "77", "Article");
        f.store.save(&existing).unwrap();
        let mut info = PackageInfo::new("news", "1.0.0", "log", "src");
        info.status = PackageStatus::Success;
        info.add_element(PackageElement::from_installed("1", &existing));
        f.packages.save_replacing(&info).unwrap();

        let root = Dependency::new("ContentType", "1", "Article", DependencyKind::Local);
        let results = run(&f, &root, true, "articles");
        assert_eq!(results.len(), 1);
        assert!(results.has_errors());
        assert!(results.iter().next().unwrap().message.contains("news"));
    }

    #[test]
    fn modified_since_install_warns() {
        let f = fixture();
        let existing = StoredObject::new("ContentType", "77", "Article");
        let mut info = PackageInfo::new("articles", "1.0.0", "log", "src");
        info.status = PackageStatus::Success;
        info.add_element(PackageElement::from_installed("1", &existing));
        f.packages.save_replacing(&info).unwrap();
        f.store
            .save(&existing.clone().with_body(serde_json::json!({"edited": true})))
            .unwrap();

        let root = Dependency::new("ContentType", "1", "Article", DependencyKind::Local);
        let results = run(&f, &root, true, "articles");
        assert_eq!(results.warnings().count(), 1);
        assert!(!results.has_errors());
    }

    #[test]
    fn unowned_existing_object_warns() {
        let f = fixture();
        f.store.save(&StoredObject::new("ContentType", "77", "Article")).unwrap();
        let root = Dependency::new("ContentType", "1", "Article", DependencyKind::Local);
        let results = run(&f, &root, true, "articles");
        assert_eq!(results.warnings().count(), 1);
    }

    #[test]
    fn excluded_shared_dependency_must_exist() {
        let f = fixture();
        let root = Dependency::new("ContentType", "1", "Article", DependencyKind::Local)
            .with_child(Dependency::new("Workflow", "5", "Standard", DependencyKind::Shared));

        let results = run(&f, &root, false, "articles");
        assert_eq!(results.errors().count(), 1);

        f.store.save(&StoredObject::new("Workflow", "9", "Standard")).unwrap();
        assert!(run(&f, &root, false, "articles").is_empty());
    }

    #[test]
    fn acl_definitions_and_associations_are_skipped() {
        let f = fixture();
        let root = Dependency::new("Template", "1", "rail", DependencyKind::Local)
            .with_child(Dependency::new("Acl", "4", "acl", DependencyKind::Shared))
            .with_child(
                Dependency::new("Slot", "3", "left", DependencyKind::Local).with_child(
                    Dependency::new("SlotContent", "8", "assoc", DependencyKind::Shared),
                ),
            );
        assert!(run(&f, &root, false, "p").is_empty());
    }

    #[test]
    fn local_key_is_checked_under_each_parent() {
        let f = fixture();
        f.store.save(&StoredObject::new("Table", "90", "Orders")).unwrap();
        let table = || Dependency::new("Table", "3", "Orders", DependencyKind::Local);
        let root = Dependency::new("ContentType", "1", "Article", DependencyKind::Local)
            .with_child(table())
            .with_child(Dependency::new("Acl", "4", "editors", DependencyKind::Local).with_child(table()));

        let results = run(&f, &root, true, "articles");
        assert_eq!(results.for_dependency(&table().key()).len(), 2);
        assert_eq!(results.warnings().count(), 2);
    }

    #[test]
    fn shared_key_is_checked_once_and_reused_by_later_packages() {
        let f = fixture();
        let workflow = || Dependency::new("Workflow", "5", "Standard", DependencyKind::Shared);
        let article = Dependency::new("ContentType", "1", "Article", DependencyKind::Local)
            .with_child(workflow())
            .with_child(Dependency::new("Table", "3", "Orders", DependencyKind::Local).with_child(workflow()));
        let press = Dependency::new("ContentType", "20", "Press", DependencyKind::Local)
            .with_child(workflow());
        let tree = TreeContext::from_packages(vec![
            PackageTree {
                root: article.clone(),
                include_all: false,
            },
            PackageTree {
                root: press.clone(),
                include_all: false,
            },
        ]);
        let validator = DependencyValidator::new(&f.registry, &f.store, &f.packages);
        let monitor = JobMonitor::new();
        let mut vctx = ValidationContext::new();

        let first = validator
            .validate_package(&monitor, &tree, &article, "articles", &mut vctx)
            .unwrap();
        assert_eq!(first.for_dependency(&workflow().key()).len(), 1);

        // A fresh check would now pass; the recorded result is reused instead.
        f.store.save(&StoredObject::new("Workflow", "9", "Standard")).unwrap();
        let second = validator
            .validate_package(&monitor, &tree, &press, "press", &mut vctx)
            .unwrap();
        let reused = second.for_dependency(&workflow().key());
        assert_eq!(reused.len(), 1);
        assert!(reused[0].is_error);
    }

    #[test]
    fn nested_element_children_are_checked_last() {
        let f = fixture();
        f.store.save(&StoredObject::new("Table", "90", "Lines")).unwrap();
        f.store.save(&StoredObject::new("Table", "91", "Orders")).unwrap();
        let root = Dependency::new("ContentType", "1", "Article", DependencyKind::Local)
            .with_child(
                Dependency::new("Template", "2", "Left Rail", DependencyKind::Local)
                    .with_child(Dependency::new("Table", "3", "Lines", DependencyKind::Local)),
            )
            .with_child(Dependency::new("Table", "4", "Orders", DependencyKind::Local));

        let results = run(&f, &root, true, "articles");
        let order: Vec<_> = results.iter().map(|r| r.key.to_string()).collect();
        assert_eq!(order, vec!["Table-4", "Table-3"]);
    }

    #[test]
    fn cancelled_validation_returns_partial_results() {
        let f = fixture();
        let root = Dependency::new("ContentType", "1", "Article", DependencyKind::Local)
            .with_child(Dependency::new("Community", "10", "Default", DependencyKind::System));
        let tree = TreeContext::from_packages(vec![PackageTree {
            root: root.clone(),
            include_all: true,
        }]);
        let monitor = JobMonitor::new();
        monitor.cancel();

        let results = DependencyValidator::new(&f.registry, &f.store, &f.packages)
            .validate_package(&monitor, &tree, &root, "p", &mut ValidationContext::new())
            .unwrap();
        assert!(results.is_empty());
    }
}
