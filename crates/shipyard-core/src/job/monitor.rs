//! Shared job progress and cancellation state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use crate::error::{DeployError, Result};

use super::{JobHandle, JobStatus};

/// Point-in-time view of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSnapshot {
    pub status: JobStatus,
    /// 1–99 while running, 100 on completion, -1 on failure.
    pub progress: i32,
    pub message: String,
    pub processed: usize,
    pub total: Option<usize>,
}

#[derive(Debug)]
struct MonitorState {
    status: JobStatus,
    total: Option<usize>,
    processed: usize,
    progress: i32,
    message: String,
}

#[derive(Debug)]
pub struct JobMonitor {
    cancelled: AtomicBool,
    state: Mutex<MonitorState>,
}

impl Default for JobMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl JobMonitor {
    pub fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            state: Mutex::new(MonitorState {
                status: JobStatus::Initialized,
                total: None,
                processed: 0,
                progress: 0,
                message: String::new(),
            }),
        }
    }

    /// Request cancellation; the job stops at its next check.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn set_total(&self, total: usize) {
        let mut state = self.lock();
        state.total = Some(total);
        state.processed = 0;
        state.progress = running_progress(0, total);
    }

    /// Count one processed dependency.
    pub fn increment(&self) {
        let mut state = self.lock();
        state.processed += 1;
        if let Some(total) = state.total
            && state.status == JobStatus::Running
        {
            state.progress = running_progress(state.processed, total);
        }
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let state = self.lock();
        JobSnapshot {
            status: state.status,
            progress: state.progress,
            message: state.message.clone(),
            processed: state.processed,
            total: state.total,
        }
    }

    pub(crate) fn start(&self) {
        let mut state = self.lock();
        state.status = JobStatus::Running;
        state.progress = state
            .total
            .map_or(1, |total| running_progress(state.processed, total));
    }

    pub(crate) fn complete(&self) {
        let mut state = self.lock();
        state.status = JobStatus::Completed;
        state.progress = 100;
    }

    pub(crate) fn fail(&self, message: &str) {
        let mut state = self.lock();
        state.status = JobStatus::Failed;
        state.progress = -1;
        state.message = message.to_string();
    }

    pub(crate) fn mark_cancelled(&self) {
        let mut state = self.lock();
        state.status = JobStatus::Cancelled;
        state.message = "cancelled".to_string();
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl JobHandle for JobMonitor {
    fn update_status(&self, message: &str) -> Result<()> {
        let mut state = self.lock();
        if state.total.is_none() {
            return Err(DeployError::contract(
                "status update before the total dependency count was set",
            ));
        }
        state.message = message.to_string();
        tracing::debug!(progress = state.progress, "{message}");
        Ok(())
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn dependency_processed(&self) {
        self.increment();
    }
}

fn running_progress(processed: usize, total: usize) -> i32 {
    if total == 0 {
        return 1;
    }
    let percent = processed.saturating_mul(100) / total;
    percent.clamp(1, 99) as i32
}
