// tests/property/def_use.rs

use std::collections::BTreeSet;

use cmdpipe::exec::DefUseTracker;
use cmdpipe::plan::{PipelinePlan, PlanStep};
use proptest::prelude::*;

const GROUPS: [&str; 4] = ["a", "b", "c", "d"];

#[derive(Debug, Clone)]
struct Access {
    inputs: Vec<String>,
    outputs: Vec<String>,
}

impl Access {
    fn reads(&self, group: &str) -> bool {
        self.inputs.iter().any(|g| g == group)
    }

    fn writes(&self, group: &str) -> bool {
        self.outputs.iter().any(|g| g == group)
    }

    /// Whether running `self` and `later` in either order could differ.
    fn conflicts_with(&self, later: &Access) -> bool {
        GROUPS.iter().any(|g| {
            (self.writes(g) && (later.reads(g) || later.writes(g)))
                || (self.reads(g) && later.writes(g))
        })
    }
}

fn group_subset() -> impl Strategy<Value = Vec<String>> {
    proptest::sample::subsequence(GROUPS.to_vec(), 0..=2)
        .prop_map(|groups| groups.into_iter().map(str::to_string).collect())
}

fn pipeline_strategy(max_len: usize) -> impl Strategy<Value = Vec<Access>> {
    proptest::collection::vec(
        (group_subset(), group_subset()).prop_map(|(inputs, outputs)| Access { inputs, outputs }),
        1..=max_len,
    )
}

/// Wait-sets for `pipeline`, computed the way the executor submits commands.
fn wait_sets(pipeline: &[Access]) -> Vec<Vec<usize>> {
    let mut tracker = DefUseTracker::new();
    pipeline
        .iter()
        .enumerate()
        .map(|(seq, access)| {
            let waits = tracker.wait_set(&access.inputs, &access.outputs);
            tracker.record_uses(&access.inputs, &seq);
            tracker.record_definition(&access.outputs, &seq);
            waits
        })
        .collect()
}

/// `reach[j]` holds every command `j` waits on, directly or transitively.
fn reachability(waits: &[Vec<usize>]) -> Vec<BTreeSet<usize>> {
    let mut reach: Vec<BTreeSet<usize>> = Vec::with_capacity(waits.len());
    for direct in waits {
        let mut all = BTreeSet::new();
        for &dep in direct {
            all.insert(dep);
            all.extend(reach[dep].iter().copied());
        }
        reach.push(all);
    }
    reach
}

proptest! {
    #[test]
    fn test_conflicting_commands_are_always_ordered(pipeline in pipeline_strategy(24)) {
        let waits = wait_sets(&pipeline);
        let reach = reachability(&waits);

        for j in 0..pipeline.len() {
            for i in 0..j {
                if pipeline[i].conflicts_with(&pipeline[j]) {
                    prop_assert!(
                        reach[j].contains(&i),
                        "#{j} {:?} does not wait for conflicting #{i} {:?}",
                        pipeline[j],
                        pipeline[i]
                    );
                }
            }
        }
    }

    #[test]
    fn test_wait_sets_hold_only_earlier_conflicting_commands(pipeline in pipeline_strategy(24)) {
        let waits = wait_sets(&pipeline);

        for (j, direct) in waits.iter().enumerate() {
            let unique: BTreeSet<_> = direct.iter().copied().collect();
            prop_assert_eq!(unique.len(), direct.len(), "duplicate in wait-set of #{}", j);

            for &i in direct {
                prop_assert!(i < j);
                prop_assert!(pipeline[i].conflicts_with(&pipeline[j]));
            }
        }
    }

    #[test]
    fn test_all_live_covers_every_command(pipeline in pipeline_strategy(24)) {
        let mut tracker = DefUseTracker::new();
        let mut waits = Vec::new();
        for (seq, access) in pipeline.iter().enumerate() {
            waits.push(tracker.wait_set(&access.inputs, &access.outputs));
            tracker.record_uses(&access.inputs, &seq);
            tracker.record_definition(&access.outputs, &seq);
        }
        let terminal = pipeline.len() - 1;
        let live = tracker.all_live(terminal);
        prop_assert_eq!(live[0], terminal);

        // Awaiting the live set transitively awaits everything submitted.
        let reach = reachability(&waits);
        let mut covered: BTreeSet<usize> = live.iter().copied().collect();
        for &seq in &live {
            covered.extend(reach[seq].iter().copied());
        }
        prop_assert_eq!(covered.len(), pipeline.len());
    }

    #[test]
    fn test_plan_stages_respect_dependencies(pipeline in pipeline_strategy(16)) {
        let plan = PipelinePlan::build(
            pipeline
                .iter()
                .enumerate()
                .map(|(seq, a)| PlanStep::new(seq, format!("c{seq}"), a.inputs.clone(), a.outputs.clone()))
                .collect(),
        );
        let stages = plan.stages().unwrap();

        let mut stage_of = vec![usize::MAX; pipeline.len()];
        for (stage, seqs) in stages.iter().enumerate() {
            for &seq in seqs {
                stage_of[seq] = stage;
            }
        }
        prop_assert!(stage_of.iter().all(|&s| s != usize::MAX));

        for seq in 0..pipeline.len() {
            for dep in plan.dependencies_of(seq) {
                prop_assert!(stage_of[dep] < stage_of[seq]);
            }
        }
        for seqs in &stages {
            for (n, &a) in seqs.iter().enumerate() {
                for &b in &seqs[n + 1..] {
                    prop_assert!(!plan.is_ordered(a, b));
                }
            }
        }
    }
}
