//! Execution event subscribers.
//!
//! The executor and playbook report progress through the
//! [`ExecutionCallback`] observer: batch start and end, each task's start and
//! terminal status, and group completion. Presentation lives entirely in
//! the subscribers:
//!
//! - [`NullCallback`] - No output (useful for testing)
//! - [`LogCallback`] - Structured `tracing` events
//! - [`ProgressCallback`] - Progress bars through `indicatif`

pub mod progress;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::executor::{GroupProgress, TaskError, TaskLabel, TaskStatus};

pub use progress::ProgressCallback;

/// Description of a batch about to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchInfo {
    /// Label of the step group the batch belongs to
    pub name: String,
    pub tasks: usize,
    pub groups: usize,
    /// Hide the batch-level bar
    pub silent_main_bar: bool,
    /// Hide per-group bars
    pub silent_sub_bar: bool,
}

/// Receiver of execution events.
///
/// Every method has an empty default so subscribers override only what
/// they need.
#[async_trait]
pub trait ExecutionCallback: Send + Sync {
    /// Called before the first step group of a playbook.
    async fn on_playbook_start(&self, groups: usize) {
        let _ = groups;
    }

    /// Called after the last step group and the post steps.
    async fn on_playbook_end(&self, success: bool) {
        let _ = success;
    }

    /// Called once before any task of a batch is scheduled.
    async fn on_batch_start(&self, batch: &BatchInfo) {
        let _ = batch;
    }

    /// Called when a worker starts a task.
    async fn on_task_start(&self, slot: usize, task: &TaskLabel) {
        let _ = (slot, task);
    }

    /// Called once per task with its terminal status.
    async fn on_task_finish(
        &self,
        slot: usize,
        task: &TaskLabel,
        status: TaskStatus,
        error: Option<&TaskError>,
    ) {
        let _ = (slot, task, status, error);
    }

    /// Called after each member of a group finishes.
    async fn on_group_progress(&self, progress: &GroupProgress) {
        let _ = progress;
    }

    /// Called after every task of a batch finished or was skipped.
    async fn on_batch_end(&self, batch: &BatchInfo, success: bool) {
        let _ = (batch, success);
    }
}

/// Subscriber that ignores every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCallback;

impl ExecutionCallback for NullCallback {}

/// Subscriber that turns events into `tracing` events
#[derive(Debug, Clone, Copy, Default)]
pub struct LogCallback;

#[async_trait]
impl ExecutionCallback for LogCallback {
    async fn on_batch_start(&self, batch: &BatchInfo) {
        info!(group = %batch.name, tasks = batch.tasks, "Starting step group");
    }

    async fn on_task_start(&self, slot: usize, task: &TaskLabel) {
        debug!(slot, task = %task, "Task started");
    }

    async fn on_task_finish(
        &self,
        slot: usize,
        task: &TaskLabel,
        status: TaskStatus,
        error: Option<&TaskError>,
    ) {
        match (status, error) {
            (TaskStatus::Error, Some(e)) => error!(slot, task = %task, error = %e, "Task failed"),
            (TaskStatus::Skip, _) => warn!(slot, task = %task, "Task skipped"),
            _ => info!(slot, task = %task, status = %status, "Task finished"),
        }
    }

    async fn on_group_progress(&self, progress: &GroupProgress) {
        if let Some(status) = progress.status {
            debug!(group = %progress.parent_id, status = %status, "Group finished");
        }
    }

    async fn on_batch_end(&self, batch: &BatchInfo, success: bool) {
        if success {
            info!(group = %batch.name, "Step group finished");
        } else {
            warn!(group = %batch.name, "Step group failed");
        }
    }
}
