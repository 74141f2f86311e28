mod support;

use serde_json::json;
use tempfile::TempDir;

use shipyard_core::descriptor::PackageRef;
use shipyard_core::installer::PackageInstaller;
use shipyard_core::job::{JobMonitor, JobStatus, ValidationJob, run_job};
use shipyard_core::repository::StoredObject;
use shipyard_core::types::DependencyKey;

use support::{article_descriptor, export_article, export_with, record_owner, server, target};

fn key(type_code: &str, id: &str) -> DependencyKey {
    DependencyKey::new(type_code, id)
}

#[test]
fn clean_target_validates_without_results() {
    let temp = TempDir::new().unwrap();
    let (_source, archive) = export_article(&temp);
    let target = target(&temp);

    let monitor = JobMonitor::new();
    let job = ValidationJob::new(&target.ctx, &archive);
    let descriptor = run_job(&monitor, "validate", |m| job.run(m)).unwrap();

    assert_eq!(descriptor.source_server, "source:9992");
    assert_eq!(descriptor.packages.len(), 1);
    assert!(descriptor.packages[0].validation_results.is_empty());
    assert_eq!(monitor.snapshot().status, JobStatus::Completed);
    assert_eq!(monitor.snapshot().progress, 100);

    let kept = target.ctx.validation_for(&archive).unwrap();
    assert_eq!(kept, descriptor);
}

#[test]
fn missing_system_dependency_is_an_error() {
    let temp = TempDir::new().unwrap();
    let (_source, archive) = export_article(&temp);
    let target = server(&temp, "target:9992");

    let descriptor = ValidationJob::new(&target.ctx, &archive)
        .run(&JobMonitor::new())
        .unwrap();

    let results = &descriptor.packages[0].validation_results;
    assert_eq!(results.len(), 1);
    let error = results.errors().next().unwrap();
    assert_eq!(error.key, key("Community", "10"));
    assert!(error.message.contains("does not exist"));
}

#[test]
fn validation_prepares_id_mappings() {
    let temp = TempDir::new().unwrap();
    let (_source, archive) = export_article(&temp);
    let target = target(&temp);

    ValidationJob::new(&target.ctx, &archive)
        .run(&JobMonitor::new())
        .unwrap();

    // Persisted, so a fresh lookup after a cache clear sees it.
    target.ctx.id_maps().clear_cache();
    let id_map = target.ctx.id_maps().get_idmap("source:9992").unwrap();
    assert_eq!(id_map.target_id("Community", "10"), Some("3"));
    assert!(id_map.get("ContentType", "1").unwrap().is_new_object);
    assert!(id_map.get("Template", "2").unwrap().is_new_object);
}

#[test]
fn shared_result_is_reported_for_every_package() {
    let temp = TempDir::new().unwrap();
    let descriptor = article_descriptor().with_package(PackageRef::new("ContentType", "11"));
    let (_source, archive) = export_with(&temp, descriptor);
    let target = target(&temp);
    let legacy = StoredObject::new("Template", "40", "rail");
    target.ctx.store().save(&legacy).unwrap();
    record_owner(&target, "Legacy", &legacy);

    let descriptor = ValidationJob::new(&target.ctx, &archive)
        .run(&JobMonitor::new())
        .unwrap();

    for package in &descriptor.packages {
        let errors: Vec<_> = package.validation_results.errors().collect();
        assert_eq!(errors.len(), 1, "package {}", package.name);
        assert_eq!(errors[0].key, key("Template", "2"));
    }
}

#[test]
fn modified_object_of_same_package_warns() {
    let temp = TempDir::new().unwrap();
    let (_source, archive) = export_article(&temp);
    let target = target(&temp);

    PackageInstaller::new(&target.ctx)
        .install_package(&archive, false)
        .unwrap();

    let store = target.ctx.store();
    let mut template = store.find_by_name("Template", "rail").unwrap().unwrap();
    template.body["layout"] = json!("three-column");
    store.save(&template).unwrap();

    let descriptor = ValidationJob::new(&target.ctx, &archive)
        .run(&JobMonitor::new())
        .unwrap();
    let results = &descriptor.packages[0].validation_results;
    assert!(!results.has_errors());
    let warnings: Vec<_> = results.warnings().collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].key, key("Template", "2"));
    assert!(warnings[0].message.contains("modified"));
}
