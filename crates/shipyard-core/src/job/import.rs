//! Import job: archive → target server.
//!
//! Packages install one at a time in deploy order, each dependency in
//! installation order. A failing package is aborted and ends the run;
//! packages installed before it stay installed.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use crate::archive::{Archive, ArchiveDetail};
use crate::config::ConflictPolicy;
use crate::context::DeployContext;
use crate::dependency::{Dependency, TreeContext};
use crate::error::{DeployError, Result};
use crate::locks::{FileLock, PUBLISHER_LOCK};
use crate::package::{PackageElement, PackageInfo, PackageStatus};
use crate::registry::InstallRequest;
use crate::repository::{CachedObjectStore, ObjectStore};
use crate::types::DependencyKey;

use super::txlog::new_archive_log_id;
use super::{ImportContext, JobHandle, JobMonitor, TransactionLog, TxAction, TxEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageOutcome {
    Installed,
    Aborted,
    /// The run ended before the package started.
    NotStarted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageReport {
    pub name: String,
    pub key: DependencyKey,
    pub outcome: PackageOutcome,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
}

impl PackageReport {
    fn new(root: &Dependency) -> Self {
        Self {
            name: root.display_name.clone(),
            key: root.key(),
            outcome: PackageOutcome::NotStarted,
            created: 0,
            updated: 0,
            skipped: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub archive: PathBuf,
    pub source_server: String,
    pub archive_log_id: String,
    pub packages: Vec<PackageReport>,
    pub cancelled: bool,
}

impl ImportReport {
    pub fn installed(&self) -> usize {
        self.packages
            .iter()
            .filter(|package| package.outcome == PackageOutcome::Installed)
            .count()
    }
}

/// Flushes the target's object cache and forgets cached id maps on every exit path.
struct FlushOnDrop<'a> {
    ctx: &'a DeployContext,
}

impl Drop for FlushOnDrop<'_> {
    fn drop(&mut self) {
        self.ctx.store().flush_cache();
        self.ctx.id_maps().clear_cache();
        tracing::debug!("object cache flushed");
    }
}

enum Installed {
    Created,
    Updated,
    Skipped,
}

pub struct ImportJob<'a> {
    ctx: &'a DeployContext,
    archive_path: PathBuf,
}

impl<'a> ImportJob<'a> {
    pub fn new(ctx: &'a DeployContext, archive_path: &Path) -> Self {
        Self {
            ctx,
            archive_path: archive_path.to_path_buf(),
        }
    }

    pub fn run(&self, monitor: &JobMonitor) -> Result<ImportReport> {
        let ctx = self.ctx;
        let _lock = FileLock::acquire(PUBLISHER_LOCK, &ctx.publisher_lock_path())?;
        let _flush = FlushOnDrop { ctx };
        let _schema = ctx.schema_cache().enable();
        let store = CachedObjectStore::new(ctx.store(), ctx.schema_cache());

        let archive = Archive::open(&self.archive_path)?;
        let info = archive.info()?.clone();
        let detail = info.detail.clone().ok_or_else(|| DeployError::MalformedArchive {
            path: self.archive_path.clone(),
            reason: "archive carries no package detail".into(),
        })?;
        let tree = tree_from_detail(&detail);

        let stem = self
            .archive_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "archive".to_string());
        let archive_log_id = new_archive_log_id(&stem);
        let txlog = TransactionLog::open(&ctx.log_dir(), &archive_log_id)?;

        let id_map = ctx.id_maps().get_idmap(&info.server_name)?;
        let mut ictx = ImportContext::new(
            &ctx.config().import.user,
            &info.server_name,
            id_map,
            &archive_log_id,
        );
        ictx.source_repository = info.repository.clone();

        let mut roots: Vec<Dependency> = tree.roots().cloned().collect();
        ctx.registry().reorder_deployed_elements(&mut roots);

        // Records stay in memory until their package starts; prior records
        // remain authoritative meanwhile.
        let descriptor = &detail.descriptor;
        let mut records: Vec<PackageInfo> = roots
            .iter()
            .map(|root| {
                let mut record = PackageInfo::new(
                    &root.display_name,
                    &descriptor.version,
                    &archive_log_id,
                    &info.server_name,
                );
                record.description = descriptor.description.clone();
                record.depends_on = descriptor.depends_on.clone();
                record.communities = descriptor.communities.clone();
                record
            })
            .collect();

        let orders: Vec<Vec<&Dependency>> =
            roots.iter().map(|root| tree.installation_order(root)).collect();
        monitor.set_total(orders.iter().map(Vec::len).sum());

        let mut report = ImportReport {
            archive: self.archive_path.clone(),
            source_server: info.server_name.clone(),
            archive_log_id: archive_log_id.clone(),
            packages: roots.iter().map(PackageReport::new).collect(),
            cancelled: false,
        };
        let mut run = ImportRun {
            monitor,
            store: &store,
            archive,
            ictx,
            txlog,
        };

        for (index, (order, record)) in orders.iter().zip(records.iter_mut()).enumerate() {
            let root_key = roots[index].key();
            ctx.packages().stage(record)?;
            run.ictx.begin_package(format!("{archive_log_id}-{}", index + 1));
            run.log(Some(&root_key), TxAction::PackageStarted, None, None)?;
            tracing::info!(package = %record.name, dependencies = order.len(), "installing package");

            let package_report = &mut report.packages[index];
            match self.install_package(&mut run, record, order, package_report) {
                Ok(()) => {
                    self.finish_package(run.store, record)?;
                    ctx.id_maps().save(&run.ictx.id_map)?;
                    run.log(Some(&root_key), TxAction::PackageSucceeded, None, None)?;
                    package_report.outcome = PackageOutcome::Installed;
                }
                Err(err) => {
                    package_report.outcome = PackageOutcome::Aborted;
                    self.abort_package(&mut run, &root_key, record, &err);
                    if matches!(err, DeployError::Cancelled) {
                        report.cancelled = true;
                        break;
                    }
                    return Err(err);
                }
            }
        }

        tracing::info!(
            archive = %self.archive_path.display(),
            installed = report.installed(),
            cancelled = report.cancelled,
            "import finished"
        );
        Ok(report)
    }

    fn install_package(
        &self,
        run: &mut ImportRun<'_>,
        record: &mut PackageInfo,
        order: &[&Dependency],
        report: &mut PackageReport,
    ) -> Result<()> {
        for dependency in order {
            if run.monitor.is_cancelled() {
                return Err(DeployError::Cancelled);
            }
            let key = dependency.key();
            run.monitor.update_status(&format!("installing {key}"))?;

            match self.install_dependency(run, record, dependency)? {
                Installed::Created => report.created += 1,
                Installed::Updated => report.updated += 1,
                Installed::Skipped => report.skipped += 1,
            }
            run.ictx.clear_current();
            run.monitor.increment();
        }
        Ok(())
    }

    fn install_dependency(
        &self,
        run: &mut ImportRun<'_>,
        record: &mut PackageInfo,
        dependency: &Dependency,
    ) -> Result<Installed> {
        let key = dependency.key();
        let package = record.name.clone();

        if let Some(target_id) = run.ictx.installed_target(&key).map(str::to_string) {
            if !run.ictx.is_installed(&key, &package) {
                run.ictx.add_installed_dependency(&key, &package, &target_id)?;
            }
            run.log(
                Some(&key),
                TxAction::Skipped,
                Some(&target_id),
                Some("installed earlier in this run"),
            )?;
            return Ok(Installed::Skipped);
        }

        let id_types = run.archive.id_types(&key)?.cloned();
        run.ictx.set_current(key.clone(), id_types);
        for source in run.archive.dbms_infos(&key)? {
            let target = run.ictx.map_dbms(source);
            tracing::debug!(key = %key, source = %source.datasource_key(), target = %target.datasource_key(), "datasource mapped");
        }

        let store = run.store;
        let handler = self.ctx.registry().handler(&dependency.type_code)?;
        let existing = handler.find_existing(store, dependency, Some(&run.ictx.id_map))?;

        if let Some(existing) = &existing {
            let keep_existing = if !handler.overwrites_existing() {
                true
            } else {
                match self.ctx.packages().owner_of(&existing.type_code, &existing.id)? {
                    Some(owner) if owner.name != package => match self.ctx.config().import.conflict_policy {
                        ConflictPolicy::Abort => {
                            return Err(DeployError::Conflict {
                                key: key.to_string(),
                                owner: owner.name,
                            });
                        }
                        ConflictPolicy::Skip => true,
                        ConflictPolicy::Overwrite => {
                            tracing::warn!(key = %key, owner = %owner.name, "overwriting object owned by another package");
                            false
                        }
                    },
                    _ => false,
                }
            };
            if keep_existing {
                run.ictx.id_map.record_installed(
                    &dependency.type_code,
                    &dependency.id,
                    &dependency.display_name,
                    &existing.id,
                    &existing.name,
                );
                run.ictx.add_installed_dependency(&key, &package, &existing.id)?;
                run.log(Some(&key), TxAction::Skipped, Some(&existing.id), Some("kept existing object"))?;
                return Ok(Installed::Skipped);
            }
        }

        let files = run.archive.dependency_files(&key)?;
        let result = handler.install(InstallRequest {
            store,
            dependency,
            files: &files,
            existing: existing.as_ref(),
            id_map: &run.ictx.id_map,
            id_types: run.ictx.current_id_types(),
        })?;

        if let Some(id_types) = &result.id_types {
            self.ctx.id_types().save(id_types)?;
        }
        let target_id = result.object.id.clone();
        run.ictx.id_map.record_installed(
            &dependency.type_code,
            &dependency.id,
            &dependency.display_name,
            &target_id,
            &result.object.name,
        );
        run.ictx.add_installed_dependency(&key, &package, &target_id)?;
        record.add_element(PackageElement::from_installed(&dependency.id, &result.object));

        let action = if result.created {
            TxAction::Created
        } else {
            TxAction::Updated
        };
        run.log(Some(&key), action, Some(&target_id), None)?;
        tracing::debug!(key = %key, target = %target_id, created = result.created, "installed dependency");
        Ok(if result.created {
            Installed::Created
        } else {
            Installed::Updated
        })
    }

    /// Community visibility first, then baselines, then the success record.
    fn finish_package(&self, store: &dyn ObjectStore, record: &mut PackageInfo) -> Result<()> {
        if !record.communities.is_empty() {
            apply_communities(store, record)?;
        }
        self.ctx.packages().rebase_baselines(record, store)?;
        record.status = PackageStatus::Success;
        record.installed_at = Utc::now();
        self.ctx.packages().commit(record)
    }

    /// Best effort: failures here are logged, never returned.
    ///
    /// A previously successful record of the package is kept so its objects
    /// stay owned; otherwise the attempt is recorded as failed.
    fn abort_package(
        &self,
        run: &mut ImportRun<'_>,
        root_key: &DependencyKey,
        record: &mut PackageInfo,
        err: &DeployError,
    ) {
        let message = err.to_string();
        let failed = run.ictx.current_dependency().cloned();
        if let Some(failed) = &failed
            && let Err(e) = run.log(Some(failed), TxAction::Failed, None, Some(&message))
        {
            tracing::warn!(error = %e, "failed to log dependency failure");
        }
        if let Err(e) = run.log(Some(root_key), TxAction::PackageAborted, None, Some(&message)) {
            tracing::warn!(error = %e, "failed to log package abort");
        }

        let packages = self.ctx.packages();
        record.status = PackageStatus::Failed;
        let saved = match packages.load(&record.name) {
            Ok(Some(prior)) if prior.status == PackageStatus::Success => {
                tracing::info!(package = %record.name, version = %prior.version, "kept installed record");
                packages.discard_staged(&record.name)
            }
            _ => packages.commit(record),
        };
        if let Err(e) = saved {
            tracing::warn!(package = %record.name, error = %e, "failed to record package failure");
        }
        tracing::error!(
            package = %record.name,
            dependency = ?failed.map(|key| key.to_string()),
            error = %message,
            "package aborted"
        );
    }
}

/// State shared by every package of one import run.
struct ImportRun<'r> {
    monitor: &'r JobMonitor,
    store: &'r dyn ObjectStore,
    archive: Archive,
    ictx: ImportContext,
    txlog: TransactionLog,
}

impl ImportRun<'_> {
    fn log(
        &mut self,
        key: Option<&DependencyKey>,
        action: TxAction,
        target_id: Option<&str>,
        message: Option<&str>,
    ) -> Result<()> {
        let txn = self.ictx.next_txn();
        self.txlog.append(&TxEntry {
            archive_log_id: self.ictx.archive_log_id.clone(),
            package_log_id: self.ictx.package_log_id().map(str::to_string),
            txn,
            timestamp: Utc::now(),
            key: key.cloned(),
            action,
            target_id: target_id.map(str::to_string),
            message: message.map(str::to_string),
        })
    }
}

/// Rebuild the tree recorded at export; only keys packaged then count as included.
pub(crate) fn tree_from_detail(detail: &ArchiveDetail) -> TreeContext {
    let included = detail.included.clone();
    let mut tree = TreeContext::from_packages(detail.packages.clone());
    tree.set_suppression(Box::new(move |key| !included.contains(key)));
    tree
}

/// Make every installed element visible to `communities`.
fn apply_communities(store: &dyn ObjectStore, record: &PackageInfo) -> Result<()> {
    let communities: Vec<Value> = record.communities.iter().cloned().map(Value::String).collect();
    for element in &record.elements {
        let Some(mut object) = store.load(&element.type_code, &element.target_id)? else {
            continue;
        };
        if let Value::Object(body) = &mut object.body {
            body.insert("communities".to_string(), Value::Array(communities.clone()));
            store.save(&object)?;
        }
    }
    tracing::debug!(package = %record.name, communities = ?record.communities, "community visibility applied");
    Ok(())
}

