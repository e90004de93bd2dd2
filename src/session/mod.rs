// src/session/mod.rs

//! Session and command abstractions the executor runs against.
//!
//! - [`Session`] / [`SessionDiagnostics`] describe the live per-session state.
//! - [`Command`] is one pipeline step with declared read/write groups.
//! - [`memory`] provides an in-memory session used by the CLI and tests.
//! - [`commands`] holds the concrete commands over that session.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::types::GroupName;

pub mod commands;
pub mod memory;

pub use commands::{
    CopyGroups, GroupStats, MetricRegroup, NumGroups, PopStat, PushStat, ResetGroups,
};
pub use memory::{GroupAssignment, InMemorySession, MetricSpec, SessionOutput};

/// Best-effort counters for monitoring.
///
/// Implementations must not block: these are called from status snapshots
/// while commands may be mutating the session. Returning `None` (e.g. when
/// a lock is busy) is always acceptable, and values may be stale.
pub trait SessionDiagnostics: Send + Sync {
    fn session_id(&self) -> &str;

    fn weak_num_docs(&self) -> Option<u64>;

    /// Group counts per group namespace.
    fn weak_num_groups(&self) -> Option<BTreeMap<String, u32>>;

    fn weak_num_stats(&self) -> Option<u32>;
}

/// Live state commands are applied to.
pub trait Session: SessionDiagnostics + 'static {
    /// Value produced by applying a command.
    type Output: Clone + Send + Sync + fmt::Debug + 'static;
}

/// One pipeline step.
///
/// Commands are immutable; `apply` takes `&self`. Any two commands whose
/// group sets overlap are never applied concurrently by the executor, so
/// `apply` may assume exclusive access to its output groups.
pub trait Command<S: Session>: Send + Sync + fmt::Debug {
    /// Short human-readable command name for logs and diagnostics.
    fn name(&self) -> &str;

    fn session_id(&self) -> &str;

    /// Groups read by this command.
    fn input_groups(&self) -> &[GroupName];

    /// Groups written by this command.
    fn output_groups(&self) -> &[GroupName];

    /// Tag describing what `apply` returns.
    fn result_type(&self) -> &'static str;

    fn apply(&self, session: &S) -> Result<S::Output, CommandError>;
}

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: u64, available: u64 },

    #[error("unknown group namespace '{0}'")]
    UnknownGroup(GroupName),

    #[error("unknown metric '{0}'")]
    UnknownMetric(String),

    #[error("stat stack is empty")]
    EmptyStatStack,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("command for session '{expected}' applied to session '{actual}'")]
    WrongSession { expected: String, actual: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CommandError {
    /// Whether the failure is a resource-exhaustion condition.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, CommandError::OutOfMemory { .. })
    }
}
