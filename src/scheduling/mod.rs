// src/scheduling/mod.rs

//! Admission control and in-flight task diagnostics.
//!
//! - [`scheduler`] bounds how many commands run at once and moves slots
//!   between sibling schedulers.
//! - [`slot`] is the RAII handle for a held slot.
//! - [`task`] describes one in-flight command execution.
//! - [`registry`] tracks every in-flight task for the lifetime of the process.
//! - [`snapshot`] is the read-only record handed to status reporting.

pub mod registry;
pub mod scheduler;
pub mod slot;
pub mod snapshot;
pub mod task;

pub use registry::TaskRegistry;
pub use scheduler::{
    SchedulerError, SchedulerGroup, SchedulerStats, TaskScheduler, TransferRejected,
};
pub use slot::SlotGuard;
pub use snapshot::TaskSnapshot;
pub use task::{
    current_task, enter_frame, CurrentTaskGuard, FrameGuard, Task, TaskContext, TaskId,
    TaskOwner, TaskState,
};
