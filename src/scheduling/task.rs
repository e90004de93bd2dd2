// src/scheduling/task.rs

//! Tasks: the diagnostic record of one in-flight command execution.
//!
//! A [`Task`] is owned by the continuation running its command. Everything a
//! monitoring reader may look at lives in the shared [`TaskState`], whose
//! timing fields are atomics so snapshots never contend with the owner.

use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use crate::scheduling::registry::TaskRegistry;
use crate::scheduling::snapshot::TaskSnapshot;
use crate::session::SessionDiagnostics;

/// Process-unique task identifier.
pub type TaskId = u64;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

fn next_task_id() -> TaskId {
    NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)
}

/// Who a request came from, as far as the caller knows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskContext {
    pub user_name: Option<String>,
    pub client_name: Option<String>,
    pub dataset: Option<String>,
}

/// The session a task works on behalf of.
///
/// `session` may be absent, e.g. while a session is still being set up.
#[derive(Clone)]
pub struct TaskOwner {
    pub session_id: String,
    pub session: Option<Arc<dyn SessionDiagnostics>>,
}

impl TaskOwner {
    pub fn session<S: SessionDiagnostics + 'static>(session: &Arc<S>) -> Self {
        let session_id = session.session_id().to_string();
        let session: Arc<dyn SessionDiagnostics> = session.clone();
        Self {
            session_id,
            session: Some(session),
        }
    }

    pub fn detached(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            session: None,
        }
    }
}

impl fmt::Debug for TaskOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskOwner")
            .field("session_id", &self.session_id)
            .field("attached", &self.session.is_some())
            .finish()
    }
}

/// Shared, concurrently readable part of a task.
///
/// Timestamps are stored as nanoseconds since `created`.
pub struct TaskState {
    id: TaskId,
    owner: TaskOwner,
    result_type: &'static str,
    context: TaskContext,
    created: Instant,
    last_execution_start: AtomicU64,
    last_wait_start: AtomicU64,
    total_execution: AtomicU64,
    running: AtomicBool,
    frames: Mutex<Vec<String>>,
}

impl TaskState {
    fn new(owner: TaskOwner, result_type: &'static str, context: TaskContext) -> Self {
        Self {
            id: next_task_id(),
            owner,
            result_type,
            context,
            created: Instant::now(),
            last_execution_start: AtomicU64::new(0),
            last_wait_start: AtomicU64::new(0),
            total_execution: AtomicU64::new(0),
            running: AtomicBool::new(false),
            frames: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn session_id(&self) -> &str {
        &self.owner.session_id
    }

    pub fn session(&self) -> Option<&Arc<dyn SessionDiagnostics>> {
        self.owner.session.as_ref()
    }

    pub fn result_type(&self) -> &'static str {
        self.result_type
    }

    pub fn context(&self) -> &TaskContext {
        &self.context
    }

    /// Whether the task currently holds a scheduler slot.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn time_since_creation(&self) -> Duration {
        self.created.elapsed()
    }

    pub fn time_since_last_execution_start(&self) -> Duration {
        self.since(self.last_execution_start.load(Ordering::Acquire))
    }

    pub fn time_since_last_wait_start(&self) -> Duration {
        self.since(self.last_wait_start.load(Ordering::Acquire))
    }

    /// Execution time accumulated so far, including the current running
    /// period if the task holds a slot right now.
    pub fn total_execution_time(&self) -> Duration {
        let finished = Duration::from_nanos(self.total_execution.load(Ordering::Acquire));
        if self.is_running() {
            finished + self.time_since_last_execution_start()
        } else {
            finished
        }
    }

    /// Copy of the current diagnostic frames, outermost first.
    pub fn frames(&self) -> Vec<String> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Waiting -> running. Idempotent.
    pub(crate) fn mark_running(&self) {
        if !self.running.swap(true, Ordering::AcqRel) {
            self.last_execution_start
                .store(self.now_offset(), Ordering::Release);
        }
    }

    /// Running -> waiting. Idempotent.
    pub(crate) fn mark_waiting(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            let now = self.now_offset();
            let started = self.last_execution_start.load(Ordering::Acquire);
            self.total_execution
                .fetch_add(now.saturating_sub(started), Ordering::AcqRel);
            self.last_wait_start.store(now, Ordering::Release);
        }
    }

    fn push_frame(&self, frame: String) {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(frame);
    }

    fn pop_frame(&self) {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
    }

    fn now_offset(&self) -> u64 {
        u64::try_from(self.created.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    fn since(&self, offset_nanos: u64) -> Duration {
        self.created
            .elapsed()
            .saturating_sub(Duration::from_nanos(offset_nanos))
    }
}

impl fmt::Debug for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskState")
            .field("id", &self.id)
            .field("session_id", &self.owner.session_id)
            .field("result_type", &self.result_type)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Owning handle for one in-flight command execution.
///
/// Dropping the task finalizes its execution time and removes it from the
/// in-flight registry.
#[derive(Debug)]
pub struct Task {
    state: Arc<TaskState>,
    registry: TaskRegistry,
}

impl Task {
    pub(crate) fn register(
        registry: &TaskRegistry,
        owner: TaskOwner,
        result_type: &'static str,
        context: TaskContext,
    ) -> Self {
        let state = Arc::new(TaskState::new(owner, result_type, context));
        registry.insert(Arc::clone(&state));
        debug!(
            task_id = state.id,
            session = %state.owner.session_id,
            result_type,
            "task registered"
        );
        Self {
            state,
            registry: registry.clone(),
        }
    }

    pub fn id(&self) -> TaskId {
        self.state.id
    }

    pub fn state(&self) -> &Arc<TaskState> {
        &self.state
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot::capture(&self.state)
    }

    /// Associate this task with the current thread until the guard drops, so
    /// [`current_task`] and [`enter_frame`] can find it.
    pub fn enter(&self) -> CurrentTaskGuard {
        let previous = CURRENT_TASK.with(|cell| cell.replace(Some(Arc::clone(&self.state))));
        CurrentTaskGuard {
            previous,
            _not_send: PhantomData,
        }
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        self.state.mark_waiting();
        self.registry.remove(self.state.id);
        debug!(
            task_id = self.state.id,
            session = %self.state.owner.session_id,
            total_execution = ?self.state.total_execution_time(),
            "task finished"
        );
    }
}

thread_local! {
    static CURRENT_TASK: RefCell<Option<Arc<TaskState>>> = const { RefCell::new(None) };
}

/// Restores the previously current task on drop.
pub struct CurrentTaskGuard {
    previous: Option<Arc<TaskState>>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for CurrentTaskGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_TASK.with(|cell| {
            cell.replace(previous);
        });
    }
}

/// The task entered on this thread, if any.
pub fn current_task() -> Option<Arc<TaskState>> {
    CURRENT_TASK.with(|cell| cell.borrow().clone())
}

/// Push a diagnostic frame onto the current task until the guard drops.
///
/// A no-op when no task is entered on this thread.
pub fn enter_frame(frame: impl Into<String>) -> FrameGuard {
    let task = current_task();
    if let Some(task) = &task {
        task.push_frame(frame.into());
    }
    FrameGuard { task }
}

#[must_use = "the frame is popped as soon as the guard drops"]
pub struct FrameGuard {
    task: Option<Arc<TaskState>>,
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.pop_frame();
        }
    }
}
