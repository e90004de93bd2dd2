// src/scheduling/snapshot.rs

//! Point-in-time diagnostic records for status reporting.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::scheduling::task::{TaskContext, TaskId, TaskState};

/// Read-only view of a task for human-facing monitoring.
///
/// The session counters are read without synchronization against commands
/// that may be mutating the session at the same moment. They can be stale or
/// momentarily inconsistent with each other and must not drive any decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    pub session_id: String,
    pub result_type: &'static str,
    pub context: TaskContext,
    pub running: bool,
    pub time_since_creation: Duration,
    pub time_since_last_execution_start: Duration,
    pub time_since_last_wait_start: Duration,
    pub total_execution_time: Duration,
    pub num_docs: Option<u64>,
    pub num_groups: Option<BTreeMap<String, u32>>,
    pub num_stats: Option<u32>,
    pub frames: Option<Vec<String>>,
}

impl TaskSnapshot {
    pub fn capture(state: &TaskState) -> Self {
        let session = state.session();
        let frames = state.frames();

        Self {
            task_id: state.id(),
            session_id: state.session_id().to_string(),
            result_type: state.result_type(),
            context: state.context().clone(),
            running: state.is_running(),
            time_since_creation: state.time_since_creation(),
            time_since_last_execution_start: state.time_since_last_execution_start(),
            time_since_last_wait_start: state.time_since_last_wait_start(),
            total_execution_time: state.total_execution_time(),
            // Weak reads; see the type-level docs.
            num_docs: session.and_then(|s| s.weak_num_docs()),
            num_groups: session.and_then(|s| s.weak_num_groups()),
            num_stats: session.and_then(|s| s.weak_num_stats()),
            frames: if frames.is_empty() { None } else { Some(frames) },
        }
    }
}

impl fmt::Display for TaskSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "task {} session={} type={} {} age={:?} exec={:?}",
            self.task_id,
            self.session_id,
            self.result_type,
            if self.running { "running" } else { "waiting" },
            self.time_since_creation,
            self.total_execution_time,
        )?;
        if let Some(docs) = self.num_docs {
            write!(f, " docs={docs}")?;
        }
        if let Some(groups) = &self.num_groups {
            write!(f, " groups={groups:?}")?;
        }
        if let Some(stats) = self.num_stats {
            write!(f, " stats={stats}")?;
        }
        if let Some(user) = &self.context.user_name {
            write!(f, " user={user}")?;
        }
        if let Some(frames) = &self.frames {
            write!(f, " at [{}]", frames.join(" > "))?;
        }
        Ok(())
    }
}
