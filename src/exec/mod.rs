// src/exec/mod.rs

//! Pipeline execution layer.
//!
//! This module turns an ordered pipeline of commands into a graph of Tokio
//! tasks ordered by the groups each command reads and writes, and gates
//! every command on a scheduler slot.
//!
//! - [`tracker`] derives each command's wait-set from earlier reads/writes.
//! - [`pending`] holds the shareable result handles and step/pipeline errors.
//! - [`executor`] owns [`CommandExecutor`], which dispatches and drains a
//!   pipeline.

pub mod executor;
pub mod pending;
pub mod tracker;

pub use executor::{CommandExecutor, DynCommand};
pub use pending::{PendingResult, PipelineError, StepError, StepOutcome};
pub use tracker::DefUseTracker;
