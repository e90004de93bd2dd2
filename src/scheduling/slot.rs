// src/scheduling/slot.rs

//! Scoped slot handles.

use std::fmt;

use crate::scheduling::scheduler::TaskScheduler;

struct HeldSlot {
    scheduler: TaskScheduler,
    ticket: u64,
}

/// A held admission slot. The slot goes back to its scheduler exactly once,
/// when the guard is dropped (or explicitly [`release`](Self::release)d).
///
/// Guards handed out by a no-op scheduler hold nothing.
#[must_use = "dropping the guard releases the slot immediately"]
pub struct SlotGuard {
    slot: Option<HeldSlot>,
}

impl SlotGuard {
    pub(crate) fn noop() -> Self {
        Self { slot: None }
    }

    pub(crate) fn held(scheduler: TaskScheduler, ticket: u64) -> Self {
        Self {
            slot: Some(HeldSlot { scheduler, ticket }),
        }
    }

    /// `true` if this guard does not account for any slot.
    pub fn is_noop(&self) -> bool {
        self.slot.is_none()
    }

    /// Name of the scheduler this slot belongs to.
    pub fn scheduler_name(&self) -> Option<&str> {
        self.slot.as_ref().map(|s| s.scheduler.name())
    }

    /// Whether this guard holds a slot on `scheduler`.
    pub fn is_held_on(&self, scheduler: &TaskScheduler) -> bool {
        self.ticket_on(scheduler).is_some()
    }

    pub fn release(self) {
        drop(self);
    }

    pub(crate) fn ticket_on(&self, scheduler: &TaskScheduler) -> Option<u64> {
        self.slot
            .as_ref()
            .filter(|s| s.scheduler.same_as(scheduler))
            .map(|s| s.ticket)
    }

    /// Disarm without returning the slot; the ledger already accounted for it.
    pub(crate) fn forget(mut self) {
        self.slot = None;
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.scheduler.release_ticket(slot.ticket);
        }
    }
}

impl fmt::Debug for SlotGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.slot {
            Some(slot) => f
                .debug_struct("SlotGuard")
                .field("scheduler", &slot.scheduler.name())
                .field("ticket", &slot.ticket)
                .finish(),
            None => f.write_str("SlotGuard(noop)"),
        }
    }
}
