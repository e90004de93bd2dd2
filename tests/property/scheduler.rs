// tests/property/scheduler.rs

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use cmdpipe::scheduling::{SchedulerGroup, SlotGuard, TaskScheduler};
use futures::task::noop_waker_ref;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Acquire(usize),
    Release(usize),
    Transfer(usize),
    Cancel(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..2usize).prop_map(Op::Acquire),
        2 => any::<usize>().prop_map(Op::Release),
        2 => any::<usize>().prop_map(Op::Transfer),
        1 => any::<usize>().prop_map(Op::Cancel),
    ]
}

type SlotFuture = Pin<Box<dyn Future<Output = SlotGuard>>>;

/// A slot request that did not complete on its first poll.
struct Pending {
    target: usize,
    /// Scheduler whose slot is being given up, for transfers.
    source: Option<usize>,
    future: SlotFuture,
}

struct Harness {
    schedulers: [TaskScheduler; 2],
    group: SchedulerGroup,
    held: Vec<(usize, SlotGuard)>,
    pending: Vec<Pending>,
}

impl Harness {
    fn new(capacities: (usize, usize)) -> Self {
        let group = SchedulerGroup::new();
        let schedulers = [
            group.add_scheduler("a", capacities.0),
            group.add_scheduler("b", capacities.1),
        ];
        Self {
            schedulers,
            group,
            held: Vec::new(),
            pending: Vec::new(),
        }
    }

    fn submit(&mut self, target: usize, source: Option<usize>, mut future: SlotFuture) {
        let mut cx = Context::from_waker(noop_waker_ref());
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(guard) => self.held.push((target, guard)),
            Poll::Pending => self.pending.push(Pending {
                target,
                source,
                future,
            }),
        }
    }

    /// Poll every pending request once; granted ones become held slots.
    fn settle(&mut self) {
        let mut cx = Context::from_waker(noop_waker_ref());
        let mut still_pending = Vec::new();
        for mut pending in self.pending.drain(..) {
            match pending.future.as_mut().poll(&mut cx) {
                Poll::Ready(guard) => self.held.push((pending.target, guard)),
                Poll::Pending => still_pending.push(pending),
            }
        }
        self.pending = still_pending;
    }

    fn apply(&mut self, op: Op) {
        match op {
            Op::Acquire(target) => {
                let scheduler = self.schedulers[target].clone();
                self.submit(
                    target,
                    None,
                    Box::pin(async move { scheduler.acquire_slot().await }),
                );
            }
            Op::Release(n) if !self.held.is_empty() => {
                let idx = n % self.held.len();
                let (_, guard) = self.held.swap_remove(idx);
                guard.release();
            }
            Op::Transfer(n) if !self.held.is_empty() => {
                let idx = n % self.held.len();
                let (source, guard) = self.held.swap_remove(idx);
                let target = 1 - source;
                let from = self.schedulers[source].clone();
                let to = self.schedulers[target].clone();
                self.submit(
                    target,
                    Some(source),
                    Box::pin(async move {
                        match to.transfer_slot(&from, guard).await {
                            Ok(guard) => guard,
                            Err(err) => panic!("transfer within a group failed: {err}"),
                        }
                    }),
                );
            }
            Op::Cancel(n) if !self.pending.is_empty() => {
                let idx = n % self.pending.len();
                drop(self.pending.swap_remove(idx));
            }
            _ => {}
        }
        self.settle();
    }

    fn check(&self) -> Result<(), TestCaseError> {
        let mut total = 0;
        for (index, scheduler) in self.schedulers.iter().enumerate() {
            let held = scheduler.held_slots();
            let ours = self.held.iter().filter(|(s, _)| *s == index).count();
            let in_transit = self
                .pending
                .iter()
                .filter(|p| p.source == Some(index))
                .count();
            let queued = self.pending.iter().filter(|p| p.target == index).count();

            prop_assert!(held <= scheduler.capacity());
            prop_assert_eq!(held, ours + in_transit, "slot accounting on '{}'", scheduler.name());
            prop_assert_eq!(scheduler.stats().waiting, queued);
            if queued > 0 {
                prop_assert_eq!(held, scheduler.capacity(), "waiters on '{}' behind an idle slot", scheduler.name());
            }
            total += held;
        }
        prop_assert_eq!(self.group.total_held(), total);
        Ok(())
    }
}

proptest! {
    #[test]
    fn test_slot_ledger_matches_model(
        capacities in (1..=3usize, 1..=3usize),
        ops in proptest::collection::vec(op_strategy(), 1..60),
    ) {
        let mut harness = Harness::new(capacities);
        for op in ops {
            harness.apply(op);
            harness.check()?;
        }

        // Tear down pending requests first: cancelling a transfer returns
        // its source slot, which may complete another request.
        while !harness.pending.is_empty() {
            drop(harness.pending.swap_remove(0));
            harness.settle();
            harness.check()?;
        }
        harness.held.clear();
        prop_assert_eq!(harness.group.total_held(), 0);
    }
}
