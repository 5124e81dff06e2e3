//! Task definition and execution
//!
//! A task is an ordered list of steps bound to one host, plus the labels
//! reporting uses to describe it.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::step::{Outputs, Step, StepContext, StepError};
use crate::connection::Connection;

/// Errors that end a task
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{task} on '{host}': step '{step}' failed: {source}")]
    Step {
        task: String,
        host: String,
        step: String,
        #[source]
        source: StepError,
    },

    #[error("{task} on '{host}': worker panicked")]
    Panicked { task: String, host: String },
}

/// Reporting labels of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskLabel {
    /// What the task does, e.g. `Start Service`
    pub name: String,
    /// Which instance it does it to, e.g. `host=server-1 role=mds`
    pub subname: String,
    /// Host the task runs against
    pub target: String,
    /// Tasks sharing a parent id are reported as one group
    pub parent_id: Option<String>,
}

impl fmt::Display for TaskLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.subname.is_empty() {
            write!(f, "{} [{}]", self.name, self.target)
        } else {
            write!(f, "{}: {} [{}]", self.name, self.subname, self.target)
        }
    }
}

/// An ordered list of steps run against one host
pub struct Task {
    label: TaskLabel,
    conn: Arc<dyn Connection>,
    steps: Vec<Box<dyn Step>>,
}

impl Task {
    pub fn new(name: impl Into<String>, subname: impl Into<String>, conn: Arc<dyn Connection>) -> Self {
        Self {
            label: TaskLabel {
                name: name.into(),
                subname: subname.into(),
                target: conn.identifier().to_string(),
                parent_id: None,
            },
            conn,
            steps: Vec::new(),
        }
    }

    /// Group this task with every other task of the same parent.
    pub fn with_parent_id(mut self, parent_id: impl Into<String>) -> Self {
        self.label.parent_id = Some(parent_id.into());
        self
    }

    pub fn add_step(&mut self, step: impl Step + 'static) {
        self.steps.push(Box::new(step));
    }

    /// Builder form of [`Task::add_step`].
    pub fn step(mut self, step: impl Step + 'static) -> Self {
        self.add_step(step);
        self
    }

    pub fn label(&self) -> &TaskLabel {
        &self.label
    }

    pub fn steps(&self) -> impl Iterator<Item = &dyn Step> {
        self.steps.iter().map(|s| s.as_ref())
    }

    fn step_error(&self, step: &dyn Step, source: StepError) -> TaskError {
        TaskError::Step {
            task: self.label.name.clone(),
            host: self.label.target.clone(),
            step: step.name().to_string(),
            source,
        }
    }

    /// Run every step in order, stopping at the first failure.
    #[instrument(skip(self, outputs), fields(task = %self.label.name, host = %self.label.target))]
    pub async fn execute(&self, outputs: Outputs) -> Result<(), TaskError> {
        let mut ctx = StepContext::new(Arc::clone(&self.conn), outputs);
        for step in &self.steps {
            debug!(step = step.name(), "Running step");
            if let Err(e) = step.execute(&mut ctx).await {
                warn!(step = step.name(), error = %e, "Step failed");
                return Err(self.step_error(step.as_ref(), e));
            }
        }
        Ok(())
    }

    /// Run every step's rollback, last step first.
    ///
    /// The first failure is returned after all rollbacks ran.
    pub async fn rollback(&self, outputs: Outputs) -> Result<(), TaskError> {
        let mut ctx = StepContext::new(Arc::clone(&self.conn), outputs);
        let mut first = None;
        for step in self.steps.iter().rev() {
            if let Err(e) = step.rollback(&mut ctx).await {
                warn!(step = step.name(), error = %e, "Rollback failed");
                first.get_or_insert_with(|| self.step_error(step.as_ref(), e));
            }
        }
        first.map_or(Ok(()), Err)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("label", &self.label)
            .field("steps", &self.steps.iter().map(|s| s.name()).collect::<Vec<_>>())
            .finish()
    }
}

/// A named batch of tasks handed to the executor together
#[derive(Debug, Default)]
pub struct Tasks {
    name: String,
    tasks: Vec<Task>,
}

impl Tasks {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: Vec::new(),
        }
    }

    pub fn push(&mut self, task: Task) {
        self.tasks.push(task);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    pub(crate) fn into_inner(self) -> (String, Vec<Task>) {
        (self.name, self.tasks)
    }
}

impl Extend<Task> for Tasks {
    fn extend<I: IntoIterator<Item = Task>>(&mut self, iter: I) {
        self.tasks.extend(iter);
    }
}
