//! Steps: the smallest unit of work a task runs.
//!
//! A step only sees its [`StepContext`]: the connection to the task's host,
//! a register shared with the other steps of the same task, and the
//! playbook-wide [`Outputs`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use crate::connection::{Connection, ConnectionError};

/// Errors a step can fail with
#[derive(Debug, Error)]
pub enum StepError {
    #[error("command `{command}` exited with {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("'{0}' was not registered by an earlier step")]
    MissingRegister(String),

    #[error("{0}")]
    Failed(String),
}

impl StepError {
    pub fn failed(message: impl Into<String>) -> Self {
        StepError::Failed(message.into())
    }
}

/// Result type for step execution
pub type StepResult = Result<(), StepError>;

/// Key/value results collected by steps across a whole playbook run.
///
/// Cloning shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct Outputs {
    inner: Arc<Mutex<BTreeMap<String, String>>>,
}

impl Outputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.lock().insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Copy of every collected value, ordered by key.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.inner.lock().clone()
    }
}

/// Everything a step may touch while it runs
pub struct StepContext {
    conn: Arc<dyn Connection>,
    register: HashMap<String, String>,
    outputs: Outputs,
}

impl StepContext {
    pub fn new(conn: Arc<dyn Connection>, outputs: Outputs) -> Self {
        Self {
            conn,
            register: HashMap::new(),
            outputs,
        }
    }

    /// Connection to the task's host
    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.conn
    }

    /// Publish a value for later steps of the same task.
    pub fn register(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.register.insert(key.into(), value.into());
    }

    pub fn registered(&self, key: &str) -> Option<&str> {
        self.register.get(key).map(String::as_str)
    }

    /// Like [`StepContext::registered`], failing when the key is absent.
    pub fn require(&self, key: &str) -> Result<&str, StepError> {
        self.registered(key)
            .ok_or_else(|| StepError::MissingRegister(key.to_string()))
    }

    pub fn outputs(&self) -> &Outputs {
        &self.outputs
    }
}

/// One operation within a task
#[async_trait]
pub trait Step: Send + Sync {
    /// Short label used in logs
    fn name(&self) -> &str;

    async fn execute(&self, ctx: &mut StepContext) -> StepResult;

    /// Undo the effects of [`Step::execute`]. Never called automatically.
    async fn rollback(&self, ctx: &mut StepContext) -> StepResult {
        let _ = ctx;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::LocalConnection;

    #[test]
    fn test_outputs_shared_between_clones() {
        let outputs = Outputs::new();
        let clone = outputs.clone();
        clone.set("a", "1");
        assert_eq!(outputs.get("a").as_deref(), Some("1"));
        assert_eq!(outputs.len(), 1);
    }

    #[test]
    fn test_register_is_context_local() {
        let conn: Arc<dyn Connection> = Arc::new(LocalConnection::new());
        let mut ctx = StepContext::new(Arc::clone(&conn), Outputs::new());
        ctx.register("container_id", "abc");
        assert_eq!(ctx.require("container_id").unwrap(), "abc");

        let other = StepContext::new(conn, Outputs::new());
        assert!(matches!(
            other.require("container_id"),
            Err(StepError::MissingRegister(_))
        ));
    }
}
