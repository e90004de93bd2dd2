// src/scheduling/scheduler.rs

//! Slot-based admission control.
//!
//! A [`SchedulerGroup`] owns one slot ledger shared by any number of
//! [`TaskScheduler`]s (e.g. a CPU scheduler and a remote-work scheduler).
//! Every count, waiter queue and running-task table of every scheduler in the
//! group lives behind the one ledger mutex, which is what makes
//! [`TaskScheduler::transfer_slot`] atomic with respect to both schedulers.
//!
//! Admission is FIFO: a release hands its permit straight to the head waiter,
//! so the held count never dips in between and no later arrival can barge.
//! The ledger lock is only held for bookkeeping, never across a command.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::scheduling::slot::SlotGuard;
use crate::scheduling::snapshot::TaskSnapshot;
use crate::scheduling::task::{Task, TaskState};

/// Contract violations when moving slots between schedulers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("no slot held on scheduler '{scheduler}'")]
    SlotNotHeld { scheduler: String },

    #[error("schedulers '{from}' and '{to}' do not share a slot ledger")]
    ForeignScheduler { from: String, to: String },
}

/// A refused [`TaskScheduler::transfer_slot`]. The caller's guard comes back
/// untouched, so a rejected call changes no accounting.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct TransferRejected {
    pub error: SchedulerError,
    pub slot: SlotGuard,
}

impl TransferRejected {
    pub fn into_slot(self) -> SlotGuard {
        self.slot
    }
}

impl From<TransferRejected> for SchedulerError {
    fn from(rejected: TransferRejected) -> Self {
        rejected.error
    }
}

/// Counters for one scheduler, read atomically with respect to each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub name: String,
    pub capacity: usize,
    pub held: usize,
    pub waiting: usize,
    pub running_tasks: usize,
    pub total_grants: u64,
    pub total_transfers_in: u64,
    pub total_wait: Duration,
}

static NEXT_LEDGER_ID: AtomicU64 = AtomicU64::new(1);

struct Waiter {
    ticket: u64,
    task: Option<Arc<TaskState>>,
    /// Slot (scheduler index, ticket) freed at the instant this waiter is
    /// granted. Set for transfers only.
    release_from: Option<(usize, u64)>,
    enqueued: Instant,
    grant: oneshot::Sender<()>,
}

struct SlotAccount {
    name: Arc<str>,
    capacity: usize,
    held: usize,
    waiters: VecDeque<Waiter>,
    running: BTreeMap<u64, Arc<TaskState>>,
    total_grants: u64,
    total_transfers_in: u64,
    total_wait: Duration,
}

impl SlotAccount {
    fn add_holder(&mut self, ticket: u64, task: &Arc<TaskState>) {
        task.mark_running();
        self.running.insert(ticket, Arc::clone(task));
    }
}

struct LedgerState {
    accounts: Vec<SlotAccount>,
    next_ticket: u64,
}

impl LedgerState {
    fn ticket(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }

    /// Grant a slot immediately if nobody is queued and capacity remains.
    fn try_grant(&mut self, index: usize, ticket: u64, task: Option<&Arc<TaskState>>) -> bool {
        let account = &mut self.accounts[index];
        if !account.waiters.is_empty() || account.held >= account.capacity {
            return false;
        }

        account.held += 1;
        account.total_grants += 1;
        if let Some(task) = task {
            account.add_holder(ticket, task);
        }
        true
    }

    fn enqueue(&mut self, index: usize, waiter: Waiter) {
        self.accounts[index].waiters.push_back(waiter);
    }

    /// Remove a still-queued waiter. Returns `false` if it was already granted.
    fn cancel_waiter(&mut self, index: usize, ticket: u64) -> bool {
        let waiters = &mut self.accounts[index].waiters;
        match waiters.iter().position(|w| w.ticket == ticket) {
            Some(pos) => {
                waiters.remove(pos);
                true
            }
            None => false,
        }
    }

    fn release(&mut self, index: usize, ticket: u64) {
        if let Some(task) = self.detach(index, ticket) {
            task.mark_waiting();
        }
        self.free_one(index);
    }

    fn detach(&mut self, index: usize, ticket: u64) -> Option<Arc<TaskState>> {
        self.accounts[index].running.remove(&ticket)
    }

    /// Return one permit: hand it to the head waiter, or decrement `held`.
    fn free_one(&mut self, index: usize) {
        let Some(waiter) = self.accounts[index].waiters.pop_front() else {
            let account = &mut self.accounts[index];
            debug_assert!(account.held > 0, "slot released on '{}' with none held", account.name);
            account.held = account.held.saturating_sub(1);
            return;
        };

        let account = &mut self.accounts[index];
        account.total_grants += 1;
        account.total_wait += waiter.enqueued.elapsed();
        if let Some(task) = &waiter.task {
            account.add_holder(waiter.ticket, task);
        }
        if waiter.release_from.is_some() {
            account.total_transfers_in += 1;
        }

        // The receiver outlives any queued waiter: `PendingGrant` removes its
        // waiter under this lock before its receiver can be dropped.
        let _ = waiter.grant.send(());

        if let Some((source, source_ticket)) = waiter.release_from {
            self.detach(source, source_ticket);
            self.free_one(source);
        }
    }

    fn stats(&self, index: usize) -> SchedulerStats {
        let account = &self.accounts[index];
        SchedulerStats {
            name: account.name.to_string(),
            capacity: account.capacity,
            held: account.held,
            waiting: account.waiters.len(),
            running_tasks: account.running.len(),
            total_grants: account.total_grants,
            total_transfers_in: account.total_transfers_in,
            total_wait: account.total_wait,
        }
    }
}

struct Ledger {
    id: u64,
    state: Mutex<LedgerState>,
}

impl Ledger {
    fn new() -> Self {
        Self {
            id: NEXT_LEDGER_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(LedgerState {
                accounts: Vec::new(),
                next_ticket: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A family of schedulers sharing one slot ledger.
#[derive(Clone)]
pub struct SchedulerGroup {
    ledger: Arc<Ledger>,
}

impl SchedulerGroup {
    pub fn new() -> Self {
        Self {
            ledger: Arc::new(Ledger::new()),
        }
    }

    /// Add a scheduler with `capacity` slots. Zero capacity yields a no-op
    /// scheduler that admits everything immediately without accounting.
    pub fn add_scheduler(&self, name: impl Into<String>, capacity: usize) -> TaskScheduler {
        let name: Arc<str> = Arc::from(name.into());
        let index = {
            let mut state = self.ledger.lock();
            state.accounts.push(SlotAccount {
                name: Arc::clone(&name),
                capacity,
                held: 0,
                waiters: VecDeque::new(),
                running: BTreeMap::new(),
                total_grants: 0,
                total_transfers_in: 0,
                total_wait: Duration::ZERO,
            });
            state.accounts.len() - 1
        };

        debug!(scheduler = %name, capacity, ledger = self.ledger.id, "scheduler created");

        TaskScheduler {
            ledger: Arc::clone(&self.ledger),
            index,
            name,
            capacity,
        }
    }

    /// Every scheduler registered in this group, in creation order.
    pub fn schedulers(&self) -> Vec<TaskScheduler> {
        let state = self.ledger.lock();
        state
            .accounts
            .iter()
            .enumerate()
            .map(|(index, account)| TaskScheduler {
                ledger: Arc::clone(&self.ledger),
                index,
                name: Arc::clone(&account.name),
                capacity: account.capacity,
            })
            .collect()
    }

    /// Slots held across all schedulers of the group, read in one critical
    /// section.
    pub fn total_held(&self) -> usize {
        self.ledger.lock().accounts.iter().map(|a| a.held).sum()
    }
}

impl Default for SchedulerGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SchedulerGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerGroup")
            .field("ledger", &self.ledger.id)
            .finish_non_exhaustive()
    }
}

/// Handle to one scheduler. Cheap to clone; clones refer to the same slots.
#[derive(Clone)]
pub struct TaskScheduler {
    ledger: Arc<Ledger>,
    index: usize,
    name: Arc<str>,
    capacity: usize,
}

impl TaskScheduler {
    /// Standalone scheduler in its own group.
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        SchedulerGroup::new().add_scheduler(name, capacity)
    }

    /// Scheduler that never makes anyone wait. Used in tests.
    pub fn noop() -> Self {
        Self::new("noop", 0)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_noop(&self) -> bool {
        self.capacity == 0
    }

    /// Whether `other` is a handle to this very scheduler.
    pub fn same_as(&self, other: &TaskScheduler) -> bool {
        Arc::ptr_eq(&self.ledger, &other.ledger) && self.index == other.index
    }

    /// Wait for a slot without attributing it to a task.
    pub async fn acquire_slot(&self) -> SlotGuard {
        self.acquire(None).await
    }

    /// Wait for a slot on behalf of `task`.
    ///
    /// The task is marked running once the slot is granted and appears in
    /// [`snapshot_running_tasks`](Self::snapshot_running_tasks) until the
    /// guard drops. Dropping the returned future while it waits abandons the
    /// wait without consuming a permit.
    pub async fn acquire_slot_for(&self, task: &Task) -> SlotGuard {
        self.acquire(Some(Arc::clone(task.state()))).await
    }

    async fn acquire(&self, task: Option<Arc<TaskState>>) -> SlotGuard {
        if self.is_noop() {
            return SlotGuard::noop();
        }

        let task_id = task.as_ref().map(|t| t.id());
        let (ticket, rx) = {
            let mut state = self.ledger.lock();
            let ticket = state.ticket();

            if state.try_grant(self.index, ticket, task.as_ref()) {
                debug!(
                    scheduler = %self.name,
                    task_id,
                    slots_held = state.accounts[self.index].held,
                    "slot granted"
                );
                return SlotGuard::held(self.clone(), ticket);
            }

            let (tx, rx) = oneshot::channel();
            state.enqueue(
                self.index,
                Waiter {
                    ticket,
                    task,
                    release_from: None,
                    enqueued: Instant::now(),
                    grant: tx,
                },
            );
            debug!(
                scheduler = %self.name,
                task_id,
                waiting = state.accounts[self.index].waiters.len(),
                "all slots busy; queued"
            );
            (ticket, rx)
        };

        PendingGrant::new(self.clone(), ticket, rx, None).wait().await
    }

    /// Move a slot held on `from` onto this scheduler.
    ///
    /// The caller keeps holding its `from` slot while it waits here, and the
    /// two counters change together in one critical section once a slot is
    /// available, so the task never holds zero slots and the permit is never
    /// counted twice. Fails if `held` is not a slot of `from` or if the
    /// schedulers belong to different groups; either way `held` is handed
    /// back inside the error. Transferring into a no-op scheduler releases
    /// the slot; transferring out of one is a plain acquire.
    pub async fn transfer_slot(
        &self,
        from: &TaskScheduler,
        held: SlotGuard,
    ) -> Result<SlotGuard, TransferRejected> {
        // Anything "holds" a no-op slot; there is nothing to move.
        if from.is_noop() && held.is_noop() {
            return Ok(self.acquire(None).await);
        }

        let Some(source_ticket) = held.ticket_on(from) else {
            warn!(
                from = %from.name,
                to = %self.name,
                "rejected slot transfer: caller holds no slot on source scheduler"
            );
            return Err(TransferRejected {
                error: SchedulerError::SlotNotHeld {
                    scheduler: from.name.to_string(),
                },
                slot: held,
            });
        };

        if self.is_noop() {
            drop(held);
            return Ok(SlotGuard::noop());
        }

        if !Arc::ptr_eq(&self.ledger, &from.ledger) {
            warn!(from = %from.name, to = %self.name, "rejected slot transfer across groups");
            return Err(TransferRejected {
                error: SchedulerError::ForeignScheduler {
                    from: from.name.to_string(),
                    to: self.name.to_string(),
                },
                slot: held,
            });
        }

        if self.same_as(from) {
            return Ok(held);
        }

        let (ticket, rx) = {
            let mut state = self.ledger.lock();
            let ticket = state.ticket();
            let task = state.accounts[from.index].running.get(&source_ticket).cloned();

            if state.try_grant(self.index, ticket, task.as_ref()) {
                state.detach(from.index, source_ticket);
                state.free_one(from.index);
                state.accounts[self.index].total_transfers_in += 1;
                held.forget();
                debug!(from = %from.name, to = %self.name, "slot transferred");
                return Ok(SlotGuard::held(self.clone(), ticket));
            }

            let (tx, rx) = oneshot::channel();
            state.enqueue(
                self.index,
                Waiter {
                    ticket,
                    task,
                    release_from: Some((from.index, source_ticket)),
                    enqueued: Instant::now(),
                    grant: tx,
                },
            );
            debug!(
                from = %from.name,
                to = %self.name,
                "target scheduler saturated; waiting to transfer slot"
            );
            (ticket, rx)
        };

        Ok(PendingGrant::new(self.clone(), ticket, rx, Some(held)).wait().await)
    }

    /// Shared state of every task currently holding a slot here.
    pub fn running_tasks(&self) -> Vec<Arc<TaskState>> {
        self.ledger.lock().accounts[self.index]
            .running
            .values()
            .cloned()
            .collect()
    }

    /// Best-effort snapshot of every task currently holding a slot here.
    ///
    /// The ledger lock is held only while cloning the task list; snapshots
    /// are built after it is released.
    pub fn snapshot_running_tasks(&self) -> Vec<TaskSnapshot> {
        self.running_tasks()
            .iter()
            .map(|state| TaskSnapshot::capture(state))
            .collect()
    }

    pub fn held_slots(&self) -> usize {
        self.ledger.lock().accounts[self.index].held
    }

    pub fn stats(&self) -> SchedulerStats {
        self.ledger.lock().stats(self.index)
    }

    pub(crate) fn release_ticket(&self, ticket: u64) {
        let mut state = self.ledger.lock();
        state.release(self.index, ticket);
        debug!(
            scheduler = %self.name,
            slots_held = state.accounts[self.index].held,
            "slot released"
        );
    }
}

impl fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("ledger", &self.ledger.id)
            .finish()
    }
}

/// A queued slot request. Dropping it before the grant is observed either
/// withdraws the request or gives back the slot it was just handed.
struct PendingGrant {
    scheduler: TaskScheduler,
    ticket: u64,
    rx: oneshot::Receiver<()>,
    /// Slot being transferred away; the ledger frees it on grant.
    source: Option<SlotGuard>,
    armed: bool,
}

impl PendingGrant {
    fn new(
        scheduler: TaskScheduler,
        ticket: u64,
        rx: oneshot::Receiver<()>,
        source: Option<SlotGuard>,
    ) -> Self {
        Self {
            scheduler,
            ticket,
            rx,
            source,
            armed: true,
        }
    }

    async fn wait(mut self) -> SlotGuard {
        // The ledger always sends before dropping a queued waiter's sender.
        let _ = (&mut self.rx).await;

        self.armed = false;
        if let Some(source) = self.source.take() {
            source.forget();
        }
        debug!(scheduler = %self.scheduler.name, "slot granted after wait");
        SlotGuard::held(self.scheduler.clone(), self.ticket)
    }
}

impl Drop for PendingGrant {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let granted = {
            let mut state = self.scheduler.ledger.lock();
            if state.cancel_waiter(self.scheduler.index, self.ticket) {
                false
            } else {
                state.release(self.scheduler.index, self.ticket);
                true
            }
        };

        // Outside the ledger lock: dropping a live guard takes it again.
        match self.source.take() {
            Some(source) if granted => source.forget(),
            Some(source) => drop(source),
            None => {}
        }

        debug!(
            scheduler = %self.scheduler.name,
            granted,
            "abandoned slot wait"
        );
    }
}
