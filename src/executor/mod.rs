//! Core execution engine for storadm
//!
//! This module provides the task executor:
//! - Bounded parallelism through a tokio semaphore
//! - A shared [`Monitor`] recording each task's terminal status
//! - Aggregation of tasks sharing a parent id into one reporting group
//! - Stop-on-error scheduling, or run-everything for status batches
//!
//! The executor never retries and never cancels a running task. Once a
//! task fails it stops launching new ones, waits for those in flight and
//! marks the rest as skipped.

pub mod monitor;
pub mod step;
pub mod task;

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, instrument, warn};

use crate::callback::{BatchInfo, ExecutionCallback, NullCallback};
use crate::config::DEFAULT_CONCURRENCY;

use monitor::group_key;
pub use monitor::{GroupProgress, Monitor, TaskStatus};
pub use step::{Outputs, Step, StepContext, StepError, StepResult};
pub use task::{Task, TaskError, TaskLabel, Tasks};

/// Errors that can occur during execution
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error(transparent)]
    Task(#[from] TaskError),
}

/// Result type for executor operations
pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Options for one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecOptions {
    /// Tasks in flight at once; 0 selects the default
    pub concurrency: usize,
    pub silent_main_bar: bool,
    pub silent_sub_bar: bool,
    /// Keep scheduling after a task failed
    pub skip_error_on_failure: bool,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            silent_main_bar: false,
            silent_sub_bar: false,
            skip_error_on_failure: false,
        }
    }
}

impl ExecOptions {
    /// Concurrency actually used for a batch
    pub fn effective_concurrency(&self) -> usize {
        if self.concurrency == 0 {
            DEFAULT_CONCURRENCY
        } else {
            self.concurrency
        }
    }
}

/// Outcome of one task, for reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskReport {
    pub slot: usize,
    pub name: String,
    pub subname: String,
    pub target: String,
    pub parent_id: Option<String>,
    pub status: TaskStatus,
    pub error: Option<String>,
}

/// Per-task and per-group outcome of a batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub name: String,
    pub tasks: Vec<TaskReport>,
    pub groups: Vec<GroupProgress>,
}

impl BatchReport {
    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    pub fn success(&self) -> bool {
        self.count(TaskStatus::Error) == 0
    }
}

/// A finished batch: its report and the first task error, if any.
#[derive(Debug)]
pub struct BatchOutcome {
    pub report: BatchReport,
    pub error: Option<TaskError>,
}

impl BatchOutcome {
    pub fn into_result(self) -> ExecutorResult<BatchReport> {
        match self.error {
            Some(e) => Err(e.into()),
            None => Ok(self.report),
        }
    }
}

/// Runs batches of tasks with bounded parallelism
pub struct TaskExecutor {
    callback: Arc<dyn ExecutionCallback>,
    outputs: Outputs,
}

impl Default for TaskExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskExecutor {
    pub fn new() -> Self {
        Self::with_callback(Arc::new(NullCallback))
    }

    pub fn with_callback(callback: Arc<dyn ExecutionCallback>) -> Self {
        Self {
            callback,
            outputs: Outputs::new(),
        }
    }

    /// Share an existing outputs map with the steps run by this executor.
    pub fn with_outputs(mut self, outputs: Outputs) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn outputs(&self) -> &Outputs {
        &self.outputs
    }

    /// Run a batch and return its report, or the first task error.
    pub async fn run(&self, tasks: Tasks, options: &ExecOptions) -> ExecutorResult<BatchReport> {
        self.execute(tasks, options).await.into_result()
    }

    /// Run a batch to completion.
    ///
    /// Tasks are launched in order, each once a worker slot is free. Unless
    /// `skip_error_on_failure` is set, no task is launched after an error
    /// has been recorded; those tasks are reported as skipped.
    #[instrument(skip(self, tasks, options), fields(batch = %tasks.name(), tasks = tasks.len()))]
    pub async fn execute(&self, tasks: Tasks, options: &ExecOptions) -> BatchOutcome {
        let (name, tasks) = tasks.into_inner();
        let labels: Vec<TaskLabel> = tasks.iter().map(|t| t.label().clone()).collect();
        let monitor = Arc::new(Monitor::new(&labels));
        let concurrency = options.effective_concurrency();
        let semaphore = Arc::new(Semaphore::new(concurrency));

        let batch = BatchInfo {
            name: name.clone(),
            tasks: labels.len(),
            groups: monitor.groups().len(),
            silent_main_bar: options.silent_main_bar,
            silent_sub_bar: options.silent_sub_bar,
        };
        info!(concurrency, "Executing batch");
        self.callback.on_batch_start(&batch).await;

        let mut handles = Vec::with_capacity(tasks.len());
        let mut stopped = false;
        for (slot, task) in tasks.into_iter().enumerate() {
            let permit = if stopped {
                None
            } else {
                Arc::clone(&semaphore).acquire_owned().await.ok()
            };
            if permit.is_none() || (!options.skip_error_on_failure && monitor.has_error()) {
                if !stopped {
                    warn!(slot, "Stopping scheduling after a failure");
                    stopped = true;
                }
                drop(permit);
                self.skip(&monitor, slot, task.label()).await;
                continue;
            }

            let guard = SlotGuard {
                slot,
                label: task.label().clone(),
                monitor: Arc::clone(&monitor),
                _permit: permit,
            };
            let monitor = Arc::clone(&monitor);
            let callback = Arc::clone(&self.callback);
            let outputs = self.outputs.clone();
            let label = task.label().clone();
            debug!(slot, task = %label, "Launching task");
            let handle = tokio::spawn(async move {
                let _guard = guard;
                callback.on_task_start(slot, task.label()).await;
                let progress = match task.execute(outputs).await {
                    Ok(()) => {
                        callback
                            .on_task_finish(slot, task.label(), TaskStatus::Ok, None)
                            .await;
                        monitor.set_ok(slot)
                    }
                    Err(e) => {
                        callback
                            .on_task_finish(slot, task.label(), TaskStatus::Error, Some(&e))
                            .await;
                        monitor.set_error(slot, e)
                    }
                };
                if let Some(progress) = progress {
                    callback.on_group_progress(&progress).await;
                }
            });
            handles.push(((slot, label), handle));
        }

        let (launched, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        for ((slot, label), joined) in launched.into_iter().zip(join_all(handles).await) {
            if let Err(e) = joined {
                error!(slot, error = %e, "Task worker did not complete");
                // the worker's guard already recorded the failure
                let err = panicked(&label);
                self.callback
                    .on_task_finish(slot, &label, TaskStatus::Error, Some(&err))
                    .await;
                if let Some(progress) = monitor.group(&group_key(slot, &label)) {
                    self.callback.on_group_progress(&progress).await;
                }
            }
        }

        let report = BatchReport {
            name,
            tasks: labels
                .into_iter()
                .enumerate()
                .map(|(slot, label)| TaskReport {
                    slot,
                    status: monitor.get(slot).unwrap_or(TaskStatus::Skip),
                    error: monitor.message(slot),
                    name: label.name,
                    subname: label.subname,
                    target: label.target,
                    parent_id: label.parent_id,
                })
                .collect(),
            groups: monitor.groups(),
        };
        let error = monitor.take_error();
        self.callback.on_batch_end(&batch, error.is_none()).await;
        BatchOutcome { report, error }
    }

    async fn skip(&self, monitor: &Monitor, slot: usize, label: &TaskLabel) {
        let progress = monitor.set_skip(slot);
        self.callback
            .on_task_finish(slot, label, TaskStatus::Skip, None)
            .await;
        if let Some(progress) = progress {
            self.callback.on_group_progress(&progress).await;
        }
    }
}

fn panicked(label: &TaskLabel) -> TaskError {
    TaskError::Panicked {
        task: label.name.clone(),
        host: label.target.clone(),
    }
}

/// Worker slot held by a running task.
///
/// A worker that unwinds or is cancelled before recording a status gets an
/// error recorded here, before its permit is returned to the semaphore.
struct SlotGuard {
    slot: usize,
    label: TaskLabel,
    monitor: Arc<Monitor>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if self.monitor.get(self.slot).is_none() {
            self.monitor.set_error(self.slot, panicked(&self.label));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Connection, LocalConnection};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Sleep {
        millis: u64,
        fail: bool,
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Step for Sleep {
        fn name(&self) -> &str {
            "sleep"
        }

        async fn execute(&self, _ctx: &mut StepContext) -> StepResult {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(self.millis)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            if self.fail {
                Err(StepError::failed("failed"))
            } else {
                Ok(())
            }
        }
    }

    struct Counters {
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl Counters {
        fn new() -> Self {
            Self {
                running: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn task(&self, host: &str, millis: u64, fail: bool) -> Task {
            let conn: Arc<dyn Connection> = Arc::new(LocalConnection::with_identifier(host));
            Task::new("Sleep", host, conn).step(Sleep {
                millis,
                fail,
                running: Arc::clone(&self.running),
                peak: Arc::clone(&self.peak),
            })
        }
    }

    fn statuses(report: &BatchReport) -> Vec<TaskStatus> {
        report.tasks.iter().map(|t| t.status).collect()
    }

    #[tokio::test]
    async fn test_concurrency_bound() {
        let counters = Counters::new();
        let mut tasks = Tasks::new("bound");
        for i in 0..10 {
            tasks.push(counters.task(&format!("h{}", i), 20, false));
        }
        let options = ExecOptions {
            concurrency: 2,
            ..ExecOptions::default()
        };

        let report = TaskExecutor::new().run(tasks, &options).await.unwrap();
        assert_eq!(report.count(TaskStatus::Ok), 10);
        assert!(counters.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_zero_concurrency_uses_default() {
        let options = ExecOptions {
            concurrency: 0,
            ..ExecOptions::default()
        };
        assert_eq!(options.effective_concurrency(), 3);

        let counters = Counters::new();
        let mut tasks = Tasks::new("default");
        for i in 0..6 {
            tasks.push(counters.task(&format!("h{}", i), 20, false));
        }
        TaskExecutor::new().run(tasks, &options).await.unwrap();
        assert!(counters.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_failure_stops_scheduling() {
        let counters = Counters::new();
        let mut tasks = Tasks::new("stop");
        tasks.push(counters.task("h1", 100, false));
        tasks.push(counters.task("h2", 100, false));
        tasks.push(counters.task("h3", 0, true));
        tasks.push(counters.task("h4", 0, false));
        tasks.push(counters.task("h5", 0, false));
        let options = ExecOptions {
            concurrency: 3,
            ..ExecOptions::default()
        };

        let outcome = TaskExecutor::new().execute(tasks, &options).await;
        assert_eq!(
            statuses(&outcome.report),
            vec![
                TaskStatus::Ok,
                TaskStatus::Ok,
                TaskStatus::Error,
                TaskStatus::Skip,
                TaskStatus::Skip
            ]
        );
        assert!(matches!(
            outcome.error,
            Some(TaskError::Step { ref host, .. }) if host == "h3"
        ));
    }

    #[tokio::test]
    async fn test_skip_error_on_failure_runs_everything() {
        let counters = Counters::new();
        let mut tasks = Tasks::new("status");
        tasks.push(counters.task("h1", 0, true));
        tasks.push(counters.task("h2", 10, false));
        tasks.push(counters.task("h3", 0, true));
        let options = ExecOptions {
            concurrency: 1,
            skip_error_on_failure: true,
            ..ExecOptions::default()
        };

        let outcome = TaskExecutor::new().execute(tasks, &options).await;
        assert_eq!(
            statuses(&outcome.report),
            vec![TaskStatus::Error, TaskStatus::Ok, TaskStatus::Error]
        );
        assert!(matches!(
            outcome.error,
            Some(TaskError::Step { ref host, .. }) if host == "h1"
        ));
    }

    #[tokio::test]
    async fn test_parent_groups_aggregate() {
        let counters = Counters::new();
        let mut tasks = Tasks::new("groups");
        tasks.push(counters.task("h1", 0, false).with_parent_id("p1"));
        tasks.push(counters.task("h1", 0, true).with_parent_id("p1"));
        tasks.push(counters.task("h2", 0, false).with_parent_id("p2"));
        let options = ExecOptions {
            concurrency: 3,
            skip_error_on_failure: true,
            ..ExecOptions::default()
        };

        let outcome = TaskExecutor::new().execute(tasks, &options).await;
        let groups: Vec<_> = outcome
            .report
            .groups
            .iter()
            .map(|g| (g.parent_id.as_str(), g.done, g.total, g.status))
            .collect();
        assert_eq!(
            groups,
            vec![
                ("p1", 2, 2, Some(TaskStatus::Error)),
                ("p2", 1, 1, Some(TaskStatus::Ok))
            ]
        );
    }

    struct Panic;

    #[async_trait]
    impl Step for Panic {
        fn name(&self) -> &str {
            "panic"
        }

        async fn execute(&self, _ctx: &mut StepContext) -> StepResult {
            panic!("step blew up");
        }
    }

    #[tokio::test]
    async fn test_panicking_task_stops_scheduling() {
        let counters = Counters::new();
        let conn: Arc<dyn Connection> = Arc::new(LocalConnection::with_identifier("h1"));
        let mut tasks = Tasks::new("panic");
        tasks.push(Task::new("Panic", "h1", conn).step(Panic));
        tasks.push(counters.task("h2", 0, false));
        tasks.push(counters.task("h3", 0, false));
        let options = ExecOptions {
            concurrency: 1,
            ..ExecOptions::default()
        };

        let outcome = TaskExecutor::new().execute(tasks, &options).await;
        assert_eq!(
            statuses(&outcome.report),
            vec![TaskStatus::Error, TaskStatus::Skip, TaskStatus::Skip]
        );
        assert!(matches!(
            outcome.error,
            Some(TaskError::Panicked { ref host, .. }) if host == "h1"
        ));
        assert_eq!(counters.peak.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let report = TaskExecutor::new()
            .run(Tasks::new("empty"), &ExecOptions::default())
            .await
            .unwrap();
        assert!(report.tasks.is_empty());
        assert!(report.success());
    }
}
