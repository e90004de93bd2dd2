// src/scheduling/registry.rs

//! Process-lifetime registry of in-flight tasks.
//!
//! Tasks register when they begin and deregister when their owning handle is
//! dropped. The lock is only ever held for a map insert/remove or for cloning
//! the current entries, never while a command runs.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::scheduling::snapshot::TaskSnapshot;
use crate::scheduling::task::{Task, TaskContext, TaskId, TaskOwner, TaskState};

#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<RwLock<BTreeMap<TaskId, Arc<TaskState>>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new task in the waiting state and register it.
    pub fn begin_task(
        &self,
        owner: TaskOwner,
        result_type: &'static str,
        context: TaskContext,
    ) -> Task {
        Task::register(self, owner, result_type, context)
    }

    /// Number of tasks currently in flight (waiting or running).
    pub fn len(&self) -> usize {
        self.tasks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shared state of every in-flight task, ordered by task id.
    pub fn tasks(&self) -> Vec<Arc<TaskState>> {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Best-effort diagnostic snapshot of every in-flight task.
    pub fn snapshot(&self) -> Vec<TaskSnapshot> {
        self.tasks()
            .iter()
            .map(|state| TaskSnapshot::capture(state))
            .collect()
    }

    pub(crate) fn insert(&self, state: Arc<TaskState>) {
        self.tasks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(state.id(), state);
    }

    pub(crate) fn remove(&self, id: TaskId) {
        self.tasks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }
}
