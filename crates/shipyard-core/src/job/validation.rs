//! Validation job: classify an archive's packages against the target.

use std::path::{Path, PathBuf};

use crate::archive::Archive;
use crate::context::DeployContext;
use crate::descriptor::ImportDescriptor;
use crate::error::{DeployError, Result};
use crate::idmap::prepare_mappings;
use crate::repository::CachedObjectStore;
use crate::validate::{DependencyValidator, ValidationContext};

use super::import::tree_from_detail;
use super::{JobHandle, JobMonitor};

pub struct ValidationJob<'a> {
    ctx: &'a DeployContext,
    archive_path: PathBuf,
}

impl<'a> ValidationJob<'a> {
    pub fn new(ctx: &'a DeployContext, archive_path: &Path) -> Self {
        Self {
            ctx,
            archive_path: archive_path.to_path_buf(),
        }
    }

    /// Prepare id mappings for the archive's source server, then validate
    /// every package. The resulting descriptor is also kept on the context.
    pub fn run(&self, monitor: &JobMonitor) -> Result<ImportDescriptor> {
        let ctx = self.ctx;
        let _schema = ctx.schema_cache().enable();
        let store = CachedObjectStore::new(ctx.store(), ctx.schema_cache());

        let info = {
            let archive = Archive::open(&self.archive_path)?;
            archive.info()?.clone()
        };
        let detail = info.detail.as_ref().ok_or_else(|| DeployError::MalformedArchive {
            path: self.archive_path.clone(),
            reason: "archive carries no package detail".into(),
        })?;
        let mut descriptor = ImportDescriptor::from_archive(&self.archive_path, &info)?;
        let tree = tree_from_detail(detail);

        let mut id_map = ctx.id_maps().get_idmap(&info.server_name)?;
        let changed = prepare_mappings(ctx.registry(), &store, &tree, &mut id_map)?;
        if changed > 0 {
            ctx.id_maps().save(&id_map)?;
        }

        let total: usize = tree.roots().map(|root| root.walk().count()).sum();
        monitor.set_total(total);
        monitor.update_status(&format!("validating {}", self.archive_path.display()))?;

        let validator = DependencyValidator::new(ctx.registry(), &store, ctx.packages())
            .with_id_map(&id_map);
        let mut vctx = ValidationContext::new();
        for package in &mut descriptor.packages {
            let Some(root) = tree.package(&package.key).map(|p| &p.root) else {
                continue;
            };
            package.validation_results =
                validator.validate_package(monitor, &tree, root, &package.name, &mut vctx)?;
            if monitor.is_cancelled() {
                break;
            }
        }

        tracing::info!(
            archive = %self.archive_path.display(),
            packages = descriptor.packages.len(),
            has_errors = descriptor.has_errors(),
            "validation finished"
        );
        ctx.store_validation(descriptor.clone());
        Ok(descriptor)
    }
}
