// crates/pipeline/src/scheduler.rs
//! Deadline-ordered task queue for the single mutator loop.
//!
//! Debounce is "reset the deadline on a new event"; periodic work
//! reschedules itself after each firing. The owning loop calls
//! `take_due` at its suspension points and executes what comes back —
//! the scheduler itself never runs anything.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use redline_types::SessionId;

/// Work the pipeline loop knows how to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// Recompute clusters for a session (debounced).
    ClusterRefresh { session_id: SessionId },
    /// Periodic checkpoint of every active session.
    SnapshotTick,
    /// A producer's backoff window elapsed; purely informational.
    BackoffExpiry { producer: String },
}

/// Stable key a task is scheduled under; rescheduling a key moves its
/// deadline instead of duplicating the task.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskKey {
    ClusterRefresh(SessionId),
    SnapshotTick,
    BackoffExpiry(String),
}

impl Task {
    fn key(&self) -> TaskKey {
        match self {
            Task::ClusterRefresh { session_id } => TaskKey::ClusterRefresh(*session_id),
            Task::SnapshotTick => TaskKey::SnapshotTick,
            Task::BackoffExpiry { producer } => TaskKey::BackoffExpiry(producer.clone()),
        }
    }
}

#[derive(Debug, Default)]
pub struct Scheduler {
    deadlines: BTreeMap<TaskKey, (DateTime<Utc>, Task)>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule (or debounce: re-deadline) a task.
    pub fn schedule(&mut self, task: Task, at: DateTime<Utc>) {
        self.deadlines.insert(task.key(), (at, task));
    }

    pub fn cancel(&mut self, key: &TaskKey) -> bool {
        self.deadlines.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    /// Deadline of the next task, for callers that sleep.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.deadlines.values().map(|(at, _)| *at).min()
    }

    /// Remove and return every task due at `now`, in deadline order.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<Task> {
        let due_keys: Vec<TaskKey> = self
            .deadlines
            .iter()
            .filter(|(_, (at, _))| *at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        let mut due: Vec<(DateTime<Utc>, Task)> = due_keys
            .into_iter()
            .filter_map(|key| self.deadlines.remove(&key))
            .collect();
        due.sort_by_key(|(at, _)| *at);
        due.into_iter().map(|(_, task)| task).collect()
    }
}

/// Cooperative cancellation flag shared between an operation and its
/// caller. Cancelling is idempotent.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Rc<Cell<bool>>,
    reason: Rc<Cell<Option<&'static str>>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self, reason: &'static str) {
        self.cancelled.set(true);
        self.reason.set(Some(reason));
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }

    pub fn reason(&self) -> &'static str {
        self.reason.get().unwrap_or("cancelled")
    }
}
