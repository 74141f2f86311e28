#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use semver::Version;
use serde_json::json;
use tempfile::TempDir;

use shipyard_core::config::{ConflictPolicy, EngineConfig};
use shipyard_core::context::DeployContext;
use shipyard_core::descriptor::{ExportDescriptor, PackageRef};
use shipyard_core::idtype::{DependencyIdTypes, IdType, IdTypeMapping};
use shipyard_core::job::{ExportJob, JobMonitor};
use shipyard_core::package::{PackageElement, PackageInfo, PackageStatus};
use shipyard_core::repository::{ObjectRef, ObjectStore, StoredObject};
use shipyard_core::types::{DependencyKey, DependencyKind};
use shipyard_core::Result;

/// Target-style object store kept in memory.
///
/// New ids start at 500 so remapped ids are easy to tell from source ids.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<(String, String), StoredObject>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn load(&self, type_code: &str, id: &str) -> Result<Option<StoredObject>> {
        let objects = self.objects.lock().unwrap();
        Ok(objects.get(&(type_code.to_string(), id.to_string())).cloned())
    }

    fn list(&self, type_code: &str) -> Result<Vec<StoredObject>> {
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .values()
            .filter(|object| object.type_code == type_code)
            .cloned()
            .collect())
    }

    fn save(&self, object: &StoredObject) -> Result<()> {
        self.objects.lock().unwrap().insert(
            (object.type_code.clone(), object.id.clone()),
            object.clone(),
        );
        Ok(())
    }

    fn next_id(&self, type_code: &str) -> Result<String> {
        let highest = self
            .list(type_code)?
            .iter()
            .filter_map(|object| object.id.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        Ok(highest.max(499).saturating_add(1).to_string())
    }
}

/// One simulated server: its own object store and state directory.
pub struct Server {
    pub ctx: DeployContext,
    pub state_dir: PathBuf,
}

pub fn server(temp: &TempDir, name: &str) -> Server {
    server_with_policy(temp, name, ConflictPolicy::Abort)
}

pub fn server_with_policy(temp: &TempDir, name: &str, policy: ConflictPolicy) -> Server {
    let state_dir = temp.path().join(name.replace(':', "_"));
    let mut config =
        EngineConfig::new(name, Version::new(8, 1, 0)).with_state_dir(state_dir.clone());
    config.import.conflict_policy = policy;
    let ctx = DeployContext::new(config, Box::new(MemoryObjectStore::new())).unwrap();
    Server { ctx, state_dir }
}

/// Source content: an Article content type sharing the `rail` template,
/// owning an ACL, referencing the system community and pointing at the
/// Standard workflow only through a literal id in its body.
pub fn seed_source(store: &dyn ObjectStore) {
    store
        .save(
            &StoredObject::new("ContentType", "1", "Article")
                .with_body(json!({ "workflowid": 5, "label": "Article" }))
                .with_reference(ObjectRef::new("Template", "2", DependencyKind::Shared))
                .with_reference(ObjectRef::new("Acl", "8", DependencyKind::Local))
                .with_reference(ObjectRef::new("Community", "10", DependencyKind::System)),
        )
        .unwrap();
    store
        .save(
            &StoredObject::new("Template", "2", "rail")
                .with_body(json!({ "layout": "two-column" }))
                .with_reference(ObjectRef::new("Acl", "7", DependencyKind::Local)),
        )
        .unwrap();
    store.save(&StoredObject::new("Acl", "7", "rail-acl")).unwrap();
    store.save(&StoredObject::new("Acl", "8", "article-acl")).unwrap();
    store
        .save(&StoredObject::new("Workflow", "5", "Standard").with_body(json!({ "states": 3 })))
        .unwrap();
    store.save(&StoredObject::new("Community", "10", "Default")).unwrap();
}

/// Mark the Article's `workflowid` literal as a workflow reference.
pub fn assign_workflow_id_type(source: &Server) {
    let mut id_types = DependencyIdTypes::new(DependencyKey::new("ContentType", "1"));
    id_types
        .mappings
        .push(IdTypeMapping::undefined("/workflowid", "5"));
    id_types.set_type("/workflowid", IdType::reference("Workflow"));
    source.ctx.id_types().save(&id_types).unwrap();
}

pub fn article_descriptor() -> ExportDescriptor {
    ExportDescriptor::new("article-pkg").with_package(PackageRef::new("ContentType", "1"))
}

/// Seeded source server with the Article package exported to `<temp>/article-pkg.zip`.
pub fn export_article(temp: &TempDir) -> (Server, PathBuf) {
    export_with(temp, article_descriptor())
}

/// Seeded source server with `descriptor` exported to `<temp>/<name>.zip`.
pub fn export_with(temp: &TempDir, descriptor: ExportDescriptor) -> (Server, PathBuf) {
    let source = server(temp, "source:9992");
    seed_source(source.ctx.store());
    seed_press(source.ctx.store());
    assign_workflow_id_type(&source);
    let archive = temp.path().join(format!("{}.zip", descriptor.name));
    let report = ExportJob::new(&source.ctx, descriptor, &archive)
        .run(&JobMonitor::new())
        .unwrap();
    assert!(!report.cancelled);
    (source, archive)
}

/// A second content type sharing the `rail` template with the Article.
pub fn seed_press(store: &dyn ObjectStore) {
    store
        .save(
            &StoredObject::new("ContentType", "11", "Press")
                .with_reference(ObjectRef::new("Template", "2", DependencyKind::Shared))
                .with_reference(ObjectRef::new("Acl", "9", DependencyKind::Local)),
        )
        .unwrap();
    store.save(&StoredObject::new("Acl", "9", "press-acl")).unwrap();
}

/// Record `object` on the target as installed by package `owner`.
pub fn record_owner(server: &Server, owner: &str, object: &StoredObject) {
    let mut info = PackageInfo::new(owner, "1.0.0", "legacy-1", "elsewhere:9992");
    info.status = PackageStatus::Success;
    info.add_element(PackageElement::from_installed("1", object));
    server.ctx.packages().save_replacing(&info).unwrap();
}

pub fn target(temp: &TempDir) -> Server {
    target_with_policy(temp, ConflictPolicy::Abort)
}

/// Empty target server holding only the system community.
pub fn target_with_policy(temp: &TempDir, policy: ConflictPolicy) -> Server {
    let target = server_with_policy(temp, "target:9992", policy);
    target
        .ctx
        .store()
        .save(&StoredObject::new("Community", "3", "Default"))
        .unwrap();
    target
}
