// src/exec/pending.rs

//! Result handles for dispatched commands and the errors they carry.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use futures::future::{BoxFuture, Shared};
use thiserror::Error;

use crate::session::CommandError;

/// Why one pipeline step did not produce a value.
#[derive(Error, Debug, Clone)]
pub enum StepError {
    #[error("{command} failed: {source}")]
    Failed {
        command: Arc<str>,
        source: Arc<CommandError>,
    },

    /// A wait-set member failed; `upstream` is that member's own error.
    #[error("{command} skipped: upstream {} failed", .upstream.command())]
    UpstreamFailed {
        command: Arc<str>,
        #[source]
        upstream: Arc<StepError>,
    },

    #[error("{command} aborted: {reason}")]
    Aborted { command: Arc<str>, reason: String },
}

impl StepError {
    /// Label of the step this error belongs to.
    pub fn command(&self) -> &str {
        match self {
            StepError::Failed { command, .. }
            | StepError::UpstreamFailed { command, .. }
            | StepError::Aborted { command, .. } => command,
        }
    }

    /// The failure this error descends from, following upstream links.
    pub fn root(&self) -> &StepError {
        let mut current = self;
        while let StepError::UpstreamFailed { upstream, .. } = current {
            current = upstream;
        }
        current
    }

    /// Label of the step where the failure originated.
    pub fn root_command(&self) -> &str {
        self.root().command()
    }

    /// Whether this step failed on its own rather than because of a dependency.
    pub fn is_root_cause(&self) -> bool {
        !matches!(self, StepError::UpstreamFailed { .. })
    }

    /// The command error at the root of this failure, if any.
    pub fn command_error(&self) -> Option<&CommandError> {
        match self.root() {
            StepError::Failed { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn is_out_of_memory(&self) -> bool {
        self.command_error().is_some_and(CommandError::is_out_of_memory)
    }
}

/// Every failure observed while draining one pipeline.
#[derive(Error, Debug, Clone)]
#[error("pipeline failed: {primary} ({} other failure(s))", .others.len())]
pub struct PipelineError {
    /// The terminal step's error if the terminal branch failed, otherwise the
    /// first failing step in submission order.
    pub primary: StepError,
    /// Remaining failures in submission order.
    pub others: Vec<StepError>,
}

impl PipelineError {
    pub fn failures(&self) -> impl Iterator<Item = &StepError> {
        std::iter::once(&self.primary).chain(self.others.iter())
    }

    /// Failures that originated in their own step.
    pub fn root_causes(&self) -> impl Iterator<Item = &StepError> {
        self.failures().filter(|e| e.is_root_cause())
    }
}

pub type StepOutcome<O> = Result<O, StepError>;

pub type SharedOutcome<O> = Shared<BoxFuture<'static, StepOutcome<O>>>;

/// Shareable handle to a dispatched command's eventual outcome.
///
/// Cloning is cheap and every clone observes the same outcome. Equality and
/// hashing use the command's position in the pipeline, which is unique per
/// run.
pub struct PendingResult<O: Clone> {
    seq: usize,
    label: Arc<str>,
    outcome: SharedOutcome<O>,
}

impl<O: Clone> PendingResult<O> {
    pub(crate) fn new(seq: usize, label: Arc<str>, outcome: SharedOutcome<O>) -> Self {
        Self {
            seq,
            label,
            outcome,
        }
    }

    /// Position of the command in the pipeline, starting at 0.
    pub fn seq(&self) -> usize {
        self.seq
    }

    pub fn label(&self) -> &Arc<str> {
        &self.label
    }

    /// Future resolving to the command's outcome.
    pub fn wait(&self) -> SharedOutcome<O> {
        self.outcome.clone()
    }

    /// The outcome if the command has already finished.
    pub fn peek(&self) -> Option<&StepOutcome<O>> {
        self.outcome.peek()
    }
}

impl<O: Clone> Clone for PendingResult<O> {
    fn clone(&self) -> Self {
        Self {
            seq: self.seq,
            label: Arc::clone(&self.label),
            outcome: self.outcome.clone(),
        }
    }
}

impl<O: Clone> PartialEq for PendingResult<O> {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl<O: Clone> Eq for PendingResult<O> {}

impl<O: Clone> Hash for PendingResult<O> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.seq.hash(state);
    }
}

impl<O: Clone> fmt::Debug for PendingResult<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingResult")
            .field("seq", &self.seq)
            .field("label", &self.label)
            .field("done", &self.peek().is_some())
            .finish()
    }
}
