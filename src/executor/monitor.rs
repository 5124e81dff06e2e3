//! Shared status of a running batch.
//!
//! Every task of a batch owns a slot. Workers record their slot's terminal
//! status here, the scheduler reads it to decide whether to keep launching
//! tasks, and tasks sharing a parent id are aggregated into one group.
//! All state sits behind one mutex that is never held across an await.

use std::fmt;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;

use super::task::{TaskError, TaskLabel};

/// Terminal status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    /// Ran to completion
    Ok,
    /// Never ran because scheduling had stopped
    Skip,
    /// A step failed
    Error,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskStatus::Ok => "OK",
            TaskStatus::Skip => "SKIP",
            TaskStatus::Error => "ERROR",
        })
    }
}

/// Completion of one reporting group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupProgress {
    pub parent_id: String,
    pub done: usize,
    pub total: usize,
    /// Set once every member finished
    pub status: Option<TaskStatus>,
}

impl GroupProgress {
    pub fn is_complete(&self) -> bool {
        self.done == self.total
    }
}

#[derive(Debug, Default)]
struct GroupState {
    total: usize,
    done: usize,
    ok: usize,
    error: usize,
}

impl GroupState {
    fn aggregate(&self) -> TaskStatus {
        if self.error > 0 {
            TaskStatus::Error
        } else if self.ok > 0 {
            TaskStatus::Ok
        } else {
            TaskStatus::Skip
        }
    }

    fn progress(&self, parent_id: &str) -> GroupProgress {
        GroupProgress {
            parent_id: parent_id.to_string(),
            done: self.done,
            total: self.total,
            status: (self.done == self.total).then(|| self.aggregate()),
        }
    }
}

#[derive(Debug, Default)]
struct MonitorState {
    statuses: Vec<Option<TaskStatus>>,
    messages: Vec<Option<String>>,
    slot_groups: Vec<String>,
    groups: IndexMap<String, GroupState>,
    first_error: Option<TaskError>,
}

/// Per-slot statuses, group aggregates and the first error of a batch
#[derive(Debug, Default)]
pub struct Monitor {
    state: Mutex<MonitorState>,
}

/// Group key of a task: its parent id, or a key unique to its slot.
pub(crate) fn group_key(slot: usize, label: &TaskLabel) -> String {
    label
        .parent_id
        .clone()
        .unwrap_or_else(|| format!("#{}", slot))
}

impl Monitor {
    /// Create a monitor with one slot per label, in slot order.
    pub fn new<'a>(labels: impl IntoIterator<Item = &'a TaskLabel>) -> Self {
        let mut state = MonitorState::default();
        for (slot, label) in labels.into_iter().enumerate() {
            let key = group_key(slot, label);
            state.groups.entry(key.clone()).or_default().total += 1;
            state.slot_groups.push(key);
            state.statuses.push(None);
            state.messages.push(None);
        }
        Self {
            state: Mutex::new(state),
        }
    }

    fn record(&self, slot: usize, status: TaskStatus, error: Option<TaskError>) -> Option<GroupProgress> {
        let mut state = self.state.lock();
        let previous = state.statuses.get(slot).copied()?;
        if previous.is_some() {
            return None;
        }
        state.statuses[slot] = Some(status);
        if let Some(err) = error {
            state.messages[slot] = Some(err.to_string());
            if state.first_error.is_none() {
                state.first_error = Some(err);
            }
        }

        let key = state.slot_groups[slot].clone();
        let group = state.groups.get_mut(&key)?;
        group.done += 1;
        match status {
            TaskStatus::Ok => group.ok += 1,
            TaskStatus::Error => group.error += 1,
            TaskStatus::Skip => {}
        }
        Some(group.progress(&key))
    }

    /// Record a finished task. Returns the updated group, or `None` when the
    /// slot is unknown or already recorded.
    pub fn set_ok(&self, slot: usize) -> Option<GroupProgress> {
        self.record(slot, TaskStatus::Ok, None)
    }

    /// Record a task that never ran.
    pub fn set_skip(&self, slot: usize) -> Option<GroupProgress> {
        self.record(slot, TaskStatus::Skip, None)
    }

    /// Record a failed task. The first error recorded is kept as the batch
    /// error.
    pub fn set_error(&self, slot: usize, error: TaskError) -> Option<GroupProgress> {
        self.record(slot, TaskStatus::Error, Some(error))
    }

    pub fn get(&self, slot: usize) -> Option<TaskStatus> {
        self.state.lock().statuses.get(slot).copied().flatten()
    }

    /// Error message recorded for a slot
    pub fn message(&self, slot: usize) -> Option<String> {
        self.state.lock().messages.get(slot).cloned().flatten()
    }

    pub fn has_error(&self) -> bool {
        self.state.lock().first_error.is_some()
    }

    pub fn group(&self, parent_id: &str) -> Option<GroupProgress> {
        let state = self.state.lock();
        state.groups.get(parent_id).map(|g| g.progress(parent_id))
    }

    /// Every group, in order of first appearance.
    pub fn groups(&self) -> Vec<GroupProgress> {
        let state = self.state.lock();
        state
            .groups
            .iter()
            .map(|(key, g)| g.progress(key))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return the first recorded error.
    pub fn take_error(&self) -> Option<TaskError> {
        self.state.lock().first_error.take()
    }
}
