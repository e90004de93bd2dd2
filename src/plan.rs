// src/plan.rs

//! Static def-use plan of a pipeline.
//!
//! Applies the same hazard rules as the executor, but to command positions
//! instead of live results, and keeps the resulting edges in a petgraph
//! graph. Used by `--dry-run` and config validation.
//!
//! Edge direction: dependency -> dependent. For
//!
//! ```text
//! #0 reset_groups  -> a
//! #1 num_groups    <- a
//! ```
//!
//! we add the edge `0 -> 1`.

use std::fmt;

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::errors::{CmdpipeError, Result};
use crate::exec::{DefUseTracker, DynCommand};
use crate::session::Session;
use crate::types::GroupName;

/// One command as seen by the planner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStep {
    pub seq: usize,
    pub name: String,
    pub inputs: Vec<GroupName>,
    pub outputs: Vec<GroupName>,
}

impl PlanStep {
    pub fn new(
        seq: usize,
        name: impl Into<String>,
        inputs: Vec<GroupName>,
        outputs: Vec<GroupName>,
    ) -> Self {
        Self {
            seq,
            name: name.into(),
            inputs,
            outputs,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelinePlan {
    steps: Vec<PlanStep>,
    graph: DiGraphMap<usize, ()>,
}

impl PipelinePlan {
    /// Build the plan for `steps`, taken in submission order. The last step
    /// is the terminal one; `seq`s must run `0..steps.len()`.
    pub fn build(steps: Vec<PlanStep>) -> Self {
        let mut graph = DiGraphMap::new();
        let mut tracker = DefUseTracker::new();

        for step in &steps {
            graph.add_node(step.seq);
            for dep in tracker.wait_set(&step.inputs, &step.outputs) {
                graph.add_edge(dep, step.seq, ());
            }
            tracker.record_uses(&step.inputs, &step.seq);
            tracker.record_definition(&step.outputs, &step.seq);
        }

        Self { steps, graph }
    }

    pub fn from_commands<S: Session>(first: &[DynCommand<S>], last: &DynCommand<S>) -> Self {
        let steps = first
            .iter()
            .chain(std::iter::once(last))
            .enumerate()
            .map(|(seq, command)| {
                PlanStep::new(
                    seq,
                    command.name(),
                    command.input_groups().to_vec(),
                    command.output_groups().to_vec(),
                )
            })
            .collect();
        Self::build(steps)
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn terminal(&self) -> Option<&PlanStep> {
        self.steps.last()
    }

    /// Direct dependencies of step `seq`, ascending.
    pub fn dependencies_of(&self, seq: usize) -> Vec<usize> {
        let mut deps: Vec<usize> = self
            .graph
            .neighbors_directed(seq, Direction::Incoming)
            .collect();
        deps.sort_unstable();
        deps
    }

    /// Whether `a` and `b` are ordered with respect to each other, directly
    /// or transitively.
    pub fn is_ordered(&self, a: usize, b: usize) -> bool {
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        petgraph::algo::has_path_connecting(&self.graph, lo, hi, None)
    }

    /// Group steps into stages: every step sits one stage after its latest
    /// dependency, so steps within a stage are mutually independent.
    pub fn stages(&self) -> Result<Vec<Vec<usize>>> {
        let order = toposort(&self.graph, None).map_err(|cycle| {
            CmdpipeError::PlanCycle(format!(
                "cycle detected in pipeline plan involving step #{}",
                cycle.node_id()
            ))
        })?;

        let mut level = vec![0usize; self.steps.len()];
        for &seq in &order {
            let stage = self
                .graph
                .neighbors_directed(seq, Direction::Incoming)
                .map(|dep| level[dep] + 1)
                .max()
                .unwrap_or(0);
            level[seq] = stage;
        }

        let depth = level.iter().copied().max().map_or(0, |d| d + 1);
        let mut stages = vec![Vec::new(); depth];
        for (seq, &stage) in level.iter().enumerate() {
            stages[stage].push(seq);
        }
        Ok(stages)
    }
}

impl fmt::Display for PipelinePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "steps ({}):", self.steps.len())?;
        for step in &self.steps {
            let marker = if Some(step) == self.terminal() { " (terminal)" } else { "" };
            writeln!(f, "  #{} {}{marker}", step.seq, step.name)?;
            if !step.inputs.is_empty() {
                writeln!(f, "      reads: {:?}", step.inputs)?;
            }
            if !step.outputs.is_empty() {
                writeln!(f, "      writes: {:?}", step.outputs)?;
            }
            let deps = self.dependencies_of(step.seq);
            if !deps.is_empty() {
                writeln!(f, "      after: {deps:?}")?;
            }
        }

        if let Ok(stages) = self.stages() {
            writeln!(f)?;
            writeln!(f, "stages ({}):", stages.len())?;
            for (i, stage) in stages.iter().enumerate() {
                writeln!(f, "  {i}: {stage:?}")?;
            }
        }
        Ok(())
    }
}
