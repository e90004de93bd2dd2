// src/exec/executor.rs

//! Dependency-driven pipeline executor.
//!
//! Every command of a pipeline is dispatched up front as its own Tokio task.
//! That task first waits for the command's wait-set (computed by the
//! [`DefUseTracker`] at dispatch time), then registers a [`Task`] and waits
//! for a scheduler slot, and finally runs `apply` on the blocking pool while
//! holding the slot. Commands whose group sets are disjoint therefore run in
//! parallel up to the scheduler's capacity; commands sharing a group run in
//! submission order.
//!
//! [`Task`]: crate::scheduling::Task

use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::exec::pending::{PendingResult, PipelineError, StepError, StepOutcome};
use crate::exec::tracker::DefUseTracker;
use crate::scheduling::{TaskContext, TaskOwner, TaskRegistry, TaskScheduler, enter_frame};
use crate::session::{Command, CommandError, Session};

/// Shared command object as handed to the executor.
pub type DynCommand<S> = Arc<dyn Command<S>>;

/// Runs pipelines of commands against one session.
pub struct CommandExecutor<S: Session> {
    session: Arc<S>,
    scheduler: TaskScheduler,
    registry: TaskRegistry,
    context: TaskContext,
}

impl<S: Session> CommandExecutor<S> {
    pub fn new(session: Arc<S>, scheduler: TaskScheduler, registry: TaskRegistry) -> Self {
        Self {
            session,
            scheduler,
            registry,
            context: TaskContext::default(),
        }
    }

    /// Attach request context to every task this executor creates.
    pub fn with_context(mut self, context: TaskContext) -> Self {
        self.context = context;
        self
    }

    pub fn session(&self) -> &Arc<S> {
        &self.session
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Run `first` in order followed by `last`, and return `last`'s value.
    ///
    /// Returns only after every dispatched command has finished, including
    /// side branches `last` does not depend on and writers superseded by a
    /// later write to the same group. Any failure fails the run:
    /// the terminal step's error becomes [`PipelineError::primary`] when the
    /// terminal branch failed, otherwise the first failure in submission
    /// order does. All other failures are logged and kept in
    /// [`PipelineError::others`].
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn run(
        &self,
        first: Vec<DynCommand<S>>,
        last: DynCommand<S>,
    ) -> Result<S::Output, PipelineError> {
        let started = Instant::now();
        let total = first.len() + 1;
        info!(
            session = %self.session.session_id(),
            commands = total,
            "running pipeline"
        );

        let mut tracker = DefUseTracker::new();
        let mut dispatched = Vec::with_capacity(total);
        for (seq, command) in first.into_iter().enumerate() {
            dispatched.push(self.dispatch(seq, command, &mut tracker));
        }
        let terminal = self.dispatch(total - 1, last, &mut tracker);

        // Superseded commands are covered by the live ones, but their
        // outcomes are still collected so no root failure goes unreported.
        debug!(
            session = %self.session.session_id(),
            live = tracker.all_live(terminal.clone()).len(),
            dispatched = total,
            "draining pipeline"
        );
        drop(tracker);

        // Drain everything before looking at any outcome.
        let outcomes = join_all(dispatched.iter().map(PendingResult::wait)).await;
        let terminal_outcome = terminal.wait().await;

        let failures: Vec<StepError> = outcomes.into_iter().filter_map(Result::err).collect();

        for failure in &failures {
            warn!(
                session = %self.session.session_id(),
                command = failure.command(),
                error = %failure,
                "side branch failed"
            );
        }

        let mut failures = failures.into_iter();
        let result = match terminal_outcome {
            Err(primary) => Err(PipelineError {
                primary,
                others: failures.collect(),
            }),
            Ok(value) => match failures.next() {
                None => Ok(value),
                Some(primary) => Err(PipelineError {
                    primary,
                    others: failures.collect(),
                }),
            },
        };

        match &result {
            Ok(_) => info!(
                session = %self.session.session_id(),
                elapsed = ?started.elapsed(),
                "pipeline finished"
            ),
            Err(err) => info!(
                session = %self.session.session_id(),
                elapsed = ?started.elapsed(),
                failures = err.others.len() + 1,
                "pipeline failed"
            ),
        }

        result
    }

    /// Spawn the continuation for one command and record its result handle.
    fn dispatch(
        &self,
        seq: usize,
        command: DynCommand<S>,
        tracker: &mut DefUseTracker<PendingResult<S::Output>>,
    ) -> PendingResult<S::Output> {
        let label: Arc<str> = Arc::from(format!("#{seq} {}", command.name()));
        let wait_set = tracker.wait_set(command.input_groups(), command.output_groups());

        debug!(
            session = %self.session.session_id(),
            command = %label,
            waits_on = ?wait_set.iter().map(|p| p.seq()).collect::<Vec<_>>(),
            "dispatching command"
        );

        let step = Step {
            label: Arc::clone(&label),
            command: Arc::clone(&command),
            session: Arc::clone(&self.session),
            scheduler: self.scheduler.clone(),
            registry: self.registry.clone(),
            context: self.context.clone(),
        };

        let handle = tokio::spawn(step.run(wait_set));
        let join_label = Arc::clone(&label);
        let outcome = async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(err) => Err(StepError::Aborted {
                    command: join_label,
                    reason: err.to_string(),
                }),
            }
        }
        .boxed()
        .shared();

        let pending = PendingResult::new(seq, label, outcome);
        tracker.record_uses(command.input_groups(), &pending);
        tracker.record_definition(command.output_groups(), &pending);
        pending
    }
}

/// Everything one command's continuation needs, owned.
struct Step<S: Session> {
    label: Arc<str>,
    command: DynCommand<S>,
    session: Arc<S>,
    scheduler: TaskScheduler,
    registry: TaskRegistry,
    context: TaskContext,
}

impl<S: Session> Step<S> {
    async fn run(self, wait_set: Vec<PendingResult<S::Output>>) -> StepOutcome<S::Output> {
        let upstream = join_all(wait_set.iter().map(PendingResult::wait)).await;
        drop(wait_set);

        if let Some(failed) = upstream.into_iter().find_map(Result::err) {
            debug!(
                command = %self.label,
                upstream = failed.root_command(),
                "not running command: dependency failed"
            );
            return Err(StepError::UpstreamFailed {
                command: self.label,
                upstream: Arc::new(failed),
            });
        }

        let expected = self.command.session_id();
        let actual = self.session.session_id();
        if expected != actual {
            return Err(StepError::Failed {
                source: Arc::new(CommandError::WrongSession {
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                }),
                command: self.label,
            });
        }

        // Begin the task before queueing so the wait shows up in its timings.
        let task = self.registry.begin_task(
            TaskOwner::session(&self.session),
            self.command.result_type(),
            self.context.clone(),
        );
        let slot = self.scheduler.acquire_slot_for(&task).await;
        debug!(command = %self.label, task_id = task.id(), "command starting");

        let command = Arc::clone(&self.command);
        let session = Arc::clone(&self.session);
        let frame = self.label.to_string();
        let applied = tokio::task::spawn_blocking(move || {
            let current = task.enter();
            let frame = enter_frame(frame);
            let output = command.apply(&session);
            drop(frame);
            drop(slot);
            drop(current);
            drop(task);
            output
        })
        .await;

        match applied {
            Ok(Ok(value)) => {
                debug!(command = %self.label, "command finished");
                Ok(value)
            }
            Ok(Err(err)) => {
                debug!(command = %self.label, error = %err, "command failed");
                Err(StepError::Failed {
                    command: self.label,
                    source: Arc::new(err),
                })
            }
            Err(err) => Err(StepError::Aborted {
                command: self.label,
                reason: err.to_string(),
            }),
        }
    }
}
