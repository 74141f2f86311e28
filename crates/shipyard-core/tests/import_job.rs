mod support;

use semver::Version;
use serde_json::json;
use tempfile::TempDir;

use shipyard_core::config::ConflictPolicy;
use shipyard_core::descriptor::PackageRef;
use shipyard_core::installer::PackageInstaller;
use shipyard_core::job::{
    ImportJob, JobMonitor, JobStatus, PackageOutcome, TransactionLog, TxAction, ValidationJob,
    run_job,
};
use shipyard_core::locks::{FileLock, PUBLISHER_LOCK};
use shipyard_core::package::PackageStatus;
use shipyard_core::repository::StoredObject;
use shipyard_core::types::DependencyKey;
use shipyard_core::{DeployError, ErrorCode};

use support::{
    article_descriptor, export_article, export_with, record_owner, target, target_with_policy,
};

fn key(type_code: &str, id: &str) -> DependencyKey {
    DependencyKey::new(type_code, id)
}

#[test]
fn install_remaps_ids_and_records_package() {
    let temp = TempDir::new().unwrap();
    let (_source, archive) = export_article(&temp);
    let target = target(&temp);

    let report = PackageInstaller::new(&target.ctx)
        .install_package(&archive, true)
        .unwrap();
    assert_eq!(report.installed(), 1);
    assert_eq!(report.packages[0].created, 5);

    let store = target.ctx.store();
    let article = store.find_by_name("ContentType", "Article").unwrap().unwrap();
    assert_eq!(article.id, "500");
    // Installed before the content type, so its new id was already known.
    assert_eq!(article.body["workflowid"], json!(500));
    let refs: Vec<_> = article
        .references
        .iter()
        .map(|r| (r.type_code.as_str(), r.id.as_str()))
        .collect();
    assert_eq!(
        refs,
        vec![("Template", "500"), ("Acl", "501"), ("Community", "3")]
    );

    let record = target.ctx.packages().load("Article").unwrap().unwrap();
    assert_eq!(record.status, PackageStatus::Success);
    assert_eq!(record.elements.len(), 5);
    assert_eq!(record.source_server, "source:9992");

    let id_map = target.ctx.id_maps().get_idmap("source:9992").unwrap();
    assert_eq!(id_map.target_id("ContentType", "1"), Some("500"));
    assert_eq!(id_map.target_id("Community", "10"), Some("3"));

    let id_types = target
        .ctx
        .id_types()
        .load(&key("ContentType", "500"))
        .unwrap()
        .unwrap();
    assert_eq!(id_types.get("/workflowid").unwrap().value, "500");
}

#[test]
fn install_writes_transaction_log() {
    let temp = TempDir::new().unwrap();
    let (_source, archive) = export_article(&temp);
    let target = target(&temp);

    let report = PackageInstaller::new(&target.ctx)
        .install_package(&archive, false)
        .unwrap();

    let log = TransactionLog::open(&target.ctx.log_dir(), &report.archive_log_id).unwrap();
    let entries = log.entries().unwrap();
    let actions: Vec<_> = entries.iter().map(|e| e.action).collect();
    assert_eq!(actions.first(), Some(&TxAction::PackageStarted));
    assert_eq!(actions.last(), Some(&TxAction::PackageSucceeded));
    assert_eq!(
        actions.iter().filter(|a| **a == TxAction::Created).count(),
        5
    );
    let txns: Vec<_> = entries.iter().map(|e| e.txn).collect();
    assert_eq!(txns, (1..=7).collect::<Vec<u64>>());
}

#[test]
fn reinstall_updates_in_place() {
    let temp = TempDir::new().unwrap();
    let (_source, archive) = export_article(&temp);
    let target = target(&temp);
    let installer = PackageInstaller::new(&target.ctx);

    installer.install_package(&archive, true).unwrap();
    let report = installer.install_package(&archive, true).unwrap();

    assert_eq!(report.packages[0].created, 0);
    assert_eq!(report.packages[0].updated, 5);
    assert_eq!(target.ctx.store().list("ContentType").unwrap().len(), 1);
    assert_eq!(target.ctx.store().list("Acl").unwrap().len(), 2);
}

#[test]
fn shared_template_owned_elsewhere_blocks_install() {
    let temp = TempDir::new().unwrap();
    let (_source, archive) = export_article(&temp);
    let target = target(&temp);
    let legacy = StoredObject::new("Template", "40", "rail");
    target.ctx.store().save(&legacy).unwrap();
    record_owner(&target, "Legacy", &legacy);

    let err = PackageInstaller::new(&target.ctx)
        .install_package(&archive, true)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Validation);
    let message = err.to_string();
    assert!(message.contains("Template-2"));
    assert!(message.contains("Legacy"));
    assert_eq!(message.lines().filter(|l| l.starts_with("    ")).count(), 1);

    // Nothing was installed.
    assert!(target.ctx.store().list("ContentType").unwrap().is_empty());
}

#[test]
fn conflict_aborts_package_without_rollback() {
    let temp = TempDir::new().unwrap();
    let (_source, archive) = export_article(&temp);
    let target = target(&temp);
    let legacy = StoredObject::new("Template", "40", "rail");
    target.ctx.store().save(&legacy).unwrap();
    record_owner(&target, "Legacy", &legacy);

    let descriptor = ValidationJob::new(&target.ctx, &archive)
        .run(&JobMonitor::new())
        .unwrap();
    assert!(descriptor.has_errors());

    let monitor = JobMonitor::new();
    let job = ImportJob::new(&target.ctx, &archive);
    let err = run_job(&monitor, "import", |m| job.run(m)).unwrap_err();
    assert!(matches!(err, DeployError::Conflict { ref owner, .. } if owner == "Legacy"));
    assert_eq!(monitor.snapshot().status, JobStatus::Failed);

    // The template's ACL went in before the conflict and stays.
    let store = target.ctx.store();
    assert!(store.find_by_name("Acl", "rail-acl").unwrap().is_some());
    assert!(store.find_by_name("ContentType", "Article").unwrap().is_none());

    let record = target.ctx.packages().load("Article").unwrap().unwrap();
    assert_eq!(record.status, PackageStatus::Failed);
    assert!(!FileLock::is_held(&target.ctx.publisher_lock_path()));
}

#[test]
fn skip_policy_maps_onto_existing_object() {
    let temp = TempDir::new().unwrap();
    let (_source, archive) = export_article(&temp);
    let target = target_with_policy(&temp, ConflictPolicy::Skip);
    let legacy = StoredObject::new("Template", "40", "rail");
    target.ctx.store().save(&legacy).unwrap();
    record_owner(&target, "Legacy", &legacy);

    ValidationJob::new(&target.ctx, &archive)
        .run(&JobMonitor::new())
        .unwrap();
    let report = ImportJob::new(&target.ctx, &archive)
        .run(&JobMonitor::new())
        .unwrap();

    let package = &report.packages[0];
    assert_eq!(package.outcome, PackageOutcome::Installed);
    assert_eq!(package.skipped, 1);
    assert_eq!(package.created, 4);

    let article = target
        .ctx
        .store()
        .find_by_name("ContentType", "Article")
        .unwrap()
        .unwrap();
    assert!(article
        .references
        .iter()
        .any(|r| r.type_code == "Template" && r.id == "40"));
    assert_eq!(target.ctx.store().list("Template").unwrap().len(), 1);
}

#[test]
fn shared_dependency_installs_once_per_run() {
    let temp = TempDir::new().unwrap();
    let descriptor = article_descriptor().with_package(PackageRef::new("ContentType", "11"));
    let (_source, archive) = export_with(&temp, descriptor);
    let target = target(&temp);

    let report = PackageInstaller::new(&target.ctx)
        .install_package(&archive, true)
        .unwrap();

    assert_eq!(report.installed(), 2);
    let press = report
        .packages
        .iter()
        .find(|p| p.key == key("ContentType", "11"))
        .unwrap();
    assert_eq!(press.created, 2);
    assert_eq!(press.skipped, 2);
    assert_eq!(target.ctx.store().list("Template").unwrap().len(), 1);

    let record = target.ctx.packages().load("Press").unwrap().unwrap();
    assert_eq!(record.elements.len(), 2);
    assert!(record.element("Template", "500").is_none());
}

#[test]
fn cancelled_import_releases_publisher_lock() {
    let temp = TempDir::new().unwrap();
    let (_source, archive) = export_article(&temp);
    let target = target(&temp);

    let monitor = JobMonitor::new();
    monitor.cancel();
    let job = ImportJob::new(&target.ctx, &archive);
    let report = run_job(&monitor, "import", |m| job.run(m)).unwrap();

    assert!(report.cancelled);
    assert_eq!(report.packages[0].outcome, PackageOutcome::Aborted);
    assert_eq!(monitor.snapshot().status, JobStatus::Cancelled);
    assert!(!FileLock::is_held(&target.ctx.publisher_lock_path()));
    assert!(target.ctx.store().list("ContentType").unwrap().is_empty());
}

#[test]
fn cancelled_reinstall_keeps_installed_record() {
    let temp = TempDir::new().unwrap();
    let (_source, archive) = export_article(&temp);
    let target = target(&temp);
    PackageInstaller::new(&target.ctx)
        .install_package(&archive, true)
        .unwrap();
    let packages = target.ctx.packages();
    assert_eq!(packages.owner_of("ContentType", "500").unwrap().unwrap().name, "Article");

    let monitor = JobMonitor::new();
    monitor.cancel();
    let job = ImportJob::new(&target.ctx, &archive);
    let report = run_job(&monitor, "import", |m| job.run(m)).unwrap();
    assert!(report.cancelled);

    let record = packages.load("Article").unwrap().unwrap();
    assert_eq!(record.status, PackageStatus::Success);
    assert_eq!(record.elements.len(), 5);
    assert_eq!(packages.owner_of("ContentType", "500").unwrap().unwrap().name, "Article");
    assert!(packages.staged("Article").unwrap().is_none());
}

#[test]
fn packages_after_an_abort_keep_no_record() {
    let temp = TempDir::new().unwrap();
    let descriptor = article_descriptor().with_package(PackageRef::new("ContentType", "11"));
    let (_source, archive) = export_with(&temp, descriptor);
    let target = target(&temp);

    let monitor = JobMonitor::new();
    monitor.cancel();
    let report = ImportJob::new(&target.ctx, &archive).run(&monitor).unwrap();

    let outcomes: Vec<_> = report.packages.iter().map(|p| p.outcome).collect();
    assert_eq!(outcomes, vec![PackageOutcome::Aborted, PackageOutcome::NotStarted]);
    let untouched = &report.packages[1].name;
    assert!(target.ctx.packages().load(untouched).unwrap().is_none());
    assert!(target.ctx.packages().staged(untouched).unwrap().is_none());
}

#[test]
fn held_publisher_lock_blocks_import() {
    let temp = TempDir::new().unwrap();
    let (_source, archive) = export_article(&temp);
    let target = target(&temp);
    let _held = FileLock::acquire(PUBLISHER_LOCK, &target.ctx.publisher_lock_path()).unwrap();

    let err = ImportJob::new(&target.ctx, &archive)
        .run(&JobMonitor::new())
        .unwrap_err();
    assert!(matches!(err, DeployError::Locked { .. }));
}

#[test]
fn version_window_is_enforced_on_request() {
    let temp = TempDir::new().unwrap();
    let mut descriptor = article_descriptor();
    descriptor.min_version = Some(Version::new(9, 0, 0));
    let (_source, archive) = export_with(&temp, descriptor);
    let target = target(&temp);
    let installer = PackageInstaller::new(&target.ctx);

    let err = installer.install_package(&archive, true).unwrap_err();
    assert!(matches!(err, DeployError::IncompatibleVersion { .. }));
    assert!(!FileLock::is_held(&target.ctx.deployment_lock_path()));

    assert!(installer.install_package(&archive, false).is_ok());
}
