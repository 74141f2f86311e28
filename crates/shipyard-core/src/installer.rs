//! One-call package installation for local clients.

use std::path::Path;

use crate::archive::Archive;
use crate::context::DeployContext;
use crate::descriptor::ImportDescriptor;
use crate::error::{DeployError, Result};
use crate::job::{ImportJob, ImportReport, JobHandle, JobMonitor, ValidationJob, run_job};
use crate::locks::{DEPLOYMENT_LOCK, FileLock};

/// Validates and imports an archive under the deployment lock.
pub struct PackageInstaller<'a> {
    ctx: &'a DeployContext,
    monitor: JobMonitor,
}

impl<'a> PackageInstaller<'a> {
    pub fn new(ctx: &'a DeployContext) -> Self {
        Self {
            ctx,
            monitor: JobMonitor::new(),
        }
    }

    /// Monitor shared by the validation and import runs, for cancellation.
    pub fn monitor(&self) -> &JobMonitor {
        &self.monitor
    }

    /// Install `archive`, refusing it if validation reports any error.
    ///
    /// With `validate_version`, the archive's compatible product-version
    /// window is checked against this server first.
    pub fn install_package(&self, archive: &Path, validate_version: bool) -> Result<ImportReport> {
        let _lock = FileLock::acquire(DEPLOYMENT_LOCK, &self.ctx.deployment_lock_path())?;

        let info = Archive::read_info(archive)?;
        if validate_version {
            let descriptor = info.descriptor().ok_or_else(|| DeployError::MalformedArchive {
                path: archive.to_path_buf(),
                reason: "archive carries no export descriptor".into(),
            })?;
            descriptor.check_compatible(&self.ctx.config().product_version)?;
        }

        let validation = ValidationJob::new(self.ctx, archive);
        let descriptor = run_job(&self.monitor, "validate", |monitor| validation.run(monitor))?;
        if self.monitor.is_cancelled() {
            return Err(DeployError::Cancelled);
        }
        if descriptor.has_errors() {
            return Err(DeployError::Validation(validation_message(&descriptor)));
        }

        let import = ImportJob::new(self.ctx, archive);
        run_job(&self.monitor, "import", |monitor| import.run(monitor))
    }
}

/// One line per error, grouped under the package that reported it.
fn validation_message(descriptor: &ImportDescriptor) -> String {
    let mut lines = vec![format!(
        "validation of {} failed:",
        descriptor.archive.display()
    )];
    for package in &descriptor.packages {
        if !package.validation_results.has_errors() {
            continue;
        }
        lines.push(format!("  package '{}':", package.name));
        for error in package.validation_results.errors() {
            lines.push(format!("    {}: {}", error.key, error.message));
        }
    }
    lines.join("\n")
}
