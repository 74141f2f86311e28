//! Long-running deployment jobs.
//!
//! Export, import and validation each run to completion on the calling
//! thread. Progress and cancellation flow through a [`JobHandle`]; the
//! [`run_job`] wrapper drives the state machine
//! `Initialized → Running → {Completed | Failed | Cancelled}`.

pub mod context;
pub mod export;
pub mod import;
pub mod monitor;
pub mod txlog;
pub mod validation;

use serde::{Deserialize, Serialize};

use crate::error::{DeployError, Result};

pub use context::{ExportContext, ImportContext};
pub use export::{ExportJob, ExportReport};
pub use import::{ImportJob, ImportReport, PackageOutcome, PackageReport};
pub use monitor::{JobMonitor, JobSnapshot};
pub use txlog::{TransactionLog, TxAction, TxEntry};
pub use validation::ValidationJob;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Initialized,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// The host's progress and cancellation surface as seen by a job.
pub trait JobHandle: Send + Sync {
    /// Report progress. Fails if the total dependency count is not set yet.
    fn update_status(&self, message: &str) -> Result<()>;

    /// Cooperative cancellation flag, polled between dependencies.
    fn is_cancelled(&self) -> bool;

    /// Count one processed dependency toward progress.
    fn dependency_processed(&self) {}
}

/// Run `job` under `monitor`, recording its terminal state.
///
/// Errors are logged and recorded as the failure message before being
/// returned. A job that observed cancellation returns normally and is
/// recorded as cancelled.
pub fn run_job<T>(
    monitor: &JobMonitor,
    name: &str,
    job: impl FnOnce(&JobMonitor) -> Result<T>,
) -> Result<T> {
    monitor.start();
    tracing::info!(job = name, "job started");

    match job(monitor) {
        Ok(value) if monitor.is_cancelled() => {
            monitor.mark_cancelled();
            tracing::info!(job = name, "job cancelled");
            Ok(value)
        }
        Ok(value) => {
            monitor.complete();
            tracing::info!(job = name, "job completed");
            Ok(value)
        }
        Err(DeployError::Cancelled) => {
            monitor.mark_cancelled();
            tracing::info!(job = name, "job cancelled");
            Err(DeployError::Cancelled)
        }
        Err(err) => {
            monitor.fail(&err.to_string());
            tracing::error!(job = name, code = err.code() as u32, error = %err, "job failed");
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_job_completes_at_full_progress() {
        let monitor = JobMonitor::new();
        let value = run_job(&monitor, "test", |m| {
            m.set_total(2);
            m.update_status("one")?;
            m.increment();
            Ok(7)
        })
        .unwrap();
        assert_eq!(value, 7);
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.status, JobStatus::Completed);
        assert_eq!(snapshot.progress, 100);
    }

    #[test]
    fn failed_job_reports_minus_one() {
        let monitor = JobMonitor::new();
        let result: Result<()> =
            run_job(&monitor, "test", |_| Err(DeployError::Validation("bad".into())));
        assert!(result.is_err());
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert_eq!(snapshot.progress, -1);
        assert_eq!(snapshot.message, "bad");
    }

    #[test]
    fn cancelled_job_is_not_an_error() {
        let monitor = JobMonitor::new();
        let result = run_job(&monitor, "test", |m| {
            m.cancel();
            Ok(())
        });
        assert!(result.is_ok());
        assert_eq!(monitor.snapshot().status, JobStatus::Cancelled);
    }
}
