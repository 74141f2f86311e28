//! Export job: descriptor → archive.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::archive::{Archive, ArchiveDetail, ArchiveInfo};
use crate::context::DeployContext;
use crate::dependency::{DependencyGraphBuilder, TreeContext};
use crate::descriptor::ExportDescriptor;
use crate::error::{DeployError, Result};
use crate::repository::{CachedObjectStore, ObjectStore};

use super::{ExportContext, JobHandle, JobMonitor};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportReport {
    pub archive: PathBuf,
    pub packages: usize,
    pub dependencies: usize,
    pub auto_dependencies: usize,
    pub files: usize,
    pub cancelled: bool,
}

pub struct ExportJob<'a> {
    ctx: &'a DeployContext,
    descriptor: ExportDescriptor,
    archive_path: PathBuf,
}

impl<'a> ExportJob<'a> {
    pub fn new(ctx: &'a DeployContext, descriptor: ExportDescriptor, archive_path: &Path) -> Self {
        Self {
            ctx,
            descriptor,
            archive_path: archive_path.to_path_buf(),
        }
    }

    /// Build the package trees and write the archive.
    ///
    /// A cancelled export removes its partial archive.
    pub fn run(&self, monitor: &JobMonitor) -> Result<ExportReport> {
        let ctx = self.ctx;
        let _schema = ctx.schema_cache().enable();
        let _dependencies = ctx.dependency_cache().enable();
        let store = CachedObjectStore::new(ctx.store(), ctx.schema_cache());
        let builder = DependencyGraphBuilder::new(ctx.registry(), &store, ctx.dependency_cache())
            .with_id_types(ctx.id_types());

        let mut report = ExportReport {
            archive: self.archive_path.clone(),
            packages: self.descriptor.packages.len(),
            dependencies: 0,
            auto_dependencies: 0,
            files: 0,
            cancelled: false,
        };

        let mut tree = TreeContext::new();
        for package in &self.descriptor.packages {
            if monitor.is_cancelled() {
                report.cancelled = true;
                return Ok(report);
            }
            let root = builder.root_dependency(&package.type_code, &package.id)?;
            builder.add_package(&mut tree, root, self.descriptor.include_all(package))?;
        }
        let excluded: HashSet<_> = self.descriptor.excluded.iter().cloned().collect();
        tree.set_suppression(Box::new(move |key| excluded.contains(key)));

        report.auto_dependencies = builder.add_missing_dependencies(monitor, &mut tree)?;
        if monitor.is_cancelled() {
            report.cancelled = true;
            return Ok(report);
        }

        let included = tree.included_keys();
        monitor.set_total(included.len());

        let info = ArchiveInfo::new(
            &ctx.config().server_name,
            ctx.config().product_version.clone(),
        );
        let mut archive = Archive::create(&self.archive_path, info)?;

        for config_file in [&self.descriptor.config_def, &self.descriptor.local_config]
            .into_iter()
            .flatten()
        {
            let data = std::fs::read(config_file).map_err(|e| DeployError::io(config_file, e))?;
            let name = config_file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "config".to_string());
            archive.add_config_file(&name, &data)?;
        }

        let mut ectx = ExportContext::new(&ctx.config().import.user);
        'packages: for package in tree.packages() {
            for dependency in tree.installation_order(&package.root) {
                if monitor.is_cancelled() {
                    report.cancelled = true;
                    break 'packages;
                }
                let key = dependency.key();
                if !ectx.mark_exported(&key) {
                    continue;
                }
                monitor.update_status(&format!("exporting {key}"))?;

                let registered = ctx.registry().get(&dependency.type_code)?;
                let handler = registered.handler();
                let files = handler.export_files(&store, dependency)?;
                report.files += archive.add_files(dependency, files)?.len();

                if registered.flags().supports_id_types
                    && let Some(id_handler) = handler.id_type_handler()
                {
                    let id_types = match ctx.id_types().load(&key)? {
                        Some(saved) => Some(saved),
                        None => store
                            .load(&dependency.type_code, &dependency.id)?
                            .map(|object| id_handler.id_types(&object)),
                    };
                    if let Some(id_types) = id_types {
                        archive.add_id_types(&id_types)?;
                    }
                }
                archive.add_dbms_info_list(&key, handler.dbms_infos(&store, dependency)?)?;
                monitor.increment();
            }
        }
        report.dependencies = ectx.exported_count();

        archive.set_detail(ArchiveDetail {
            descriptor: self.descriptor.clone(),
            packages: tree.packages().to_vec(),
            included,
        })?;
        archive.close()?;

        if report.cancelled {
            std::fs::remove_file(&self.archive_path)
                .map_err(|e| DeployError::io(&self.archive_path, e))?;
            tracing::info!(archive = %self.archive_path.display(), "partial archive removed");
        } else {
            tracing::info!(
                archive = %self.archive_path.display(),
                dependencies = report.dependencies,
                files = report.files,
                "export finished"
            );
        }
        Ok(report)
    }
}
