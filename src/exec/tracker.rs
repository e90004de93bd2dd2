// src/exec/tracker.rs

//! Def-use bookkeeping for one pipeline.
//!
//! For every named group the tracker remembers the result of the last
//! command that wrote it (the *definition*) and the results of commands that
//! read it since (the *uses*). From that it derives each new command's
//! wait-set:
//!
//! - reading a group waits for its definition (read-after-write);
//! - writing a group waits for its definition (write-after-write) and for
//!   every use since (write-after-read).
//!
//! Groups the tracker has never seen contribute nothing.

use std::collections::{BTreeMap, HashSet};
use std::hash::Hash;

use crate::types::GroupName;

#[derive(Debug, Clone)]
struct GroupState<H> {
    definition: Option<H>,
    uses: Vec<H>,
}

impl<H> Default for GroupState<H> {
    fn default() -> Self {
        Self {
            definition: None,
            uses: Vec::new(),
        }
    }
}

/// Def-use tracker over result handles `H`.
///
/// `H`'s equality is handle identity: two handles are equal iff they refer
/// to the same command's result.
#[derive(Debug, Clone)]
pub struct DefUseTracker<H> {
    groups: BTreeMap<GroupName, GroupState<H>>,
}

impl<H> Default for DefUseTracker<H> {
    fn default() -> Self {
        Self {
            groups: BTreeMap::new(),
        }
    }
}

impl<H: Clone + Eq + Hash> DefUseTracker<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Results a command reading `inputs` and writing `outputs` must see
    /// completed before it runs, deduplicated, in first-seen order.
    pub fn wait_set(&self, inputs: &[GroupName], outputs: &[GroupName]) -> Vec<H> {
        let mut seen = HashSet::new();
        let mut wait_set = Vec::new();
        let mut add = |handle: &H| {
            if seen.insert(handle.clone()) {
                wait_set.push(handle.clone());
            }
        };

        for name in inputs {
            if let Some(definition) = self.groups.get(name).and_then(|g| g.definition.as_ref()) {
                add(definition);
            }
        }

        for name in outputs {
            if let Some(group) = self.groups.get(name) {
                if let Some(definition) = &group.definition {
                    add(definition);
                }
                group.uses.iter().for_each(&mut add);
            }
        }

        wait_set
    }

    /// Record `handle` as reading each of `inputs`.
    pub fn record_uses(&mut self, inputs: &[GroupName], handle: &H) {
        for name in inputs {
            let uses = &mut self.groups.entry(name.clone()).or_default().uses;
            if uses.last() != Some(handle) {
                uses.push(handle.clone());
            }
        }
    }

    /// Record `handle` as the new writer of each of `outputs`, starting a new
    /// epoch: earlier uses no longer matter because every later reader will
    /// depend on this definition.
    pub fn record_definition(&mut self, outputs: &[GroupName], handle: &H) {
        for name in outputs {
            let group = self.groups.entry(name.clone()).or_default();
            group.definition = Some(handle.clone());
            group.uses.clear();
        }
    }

    /// `terminal` followed by every other definition and use the tracker
    /// still knows about, deduplicated.
    ///
    /// Awaiting all of these drains the pipeline: any command not listed
    /// here has been superseded by a listed command that waits on it.
    pub fn all_live(&self, terminal: H) -> Vec<H> {
        let mut seen = HashSet::new();
        seen.insert(terminal.clone());
        let mut live = vec![terminal];

        for group in self.groups.values() {
            for handle in group.definition.iter().chain(group.uses.iter()) {
                if seen.insert(handle.clone()) {
                    live.push(handle.clone());
                }
            }
        }

        live
    }

    pub fn definition(&self, group: &str) -> Option<&H> {
        self.groups.get(group).and_then(|g| g.definition.as_ref())
    }

    pub fn uses(&self, group: &str) -> &[H] {
        self.groups
            .get(group)
            .map(|g| g.uses.as_slice())
            .unwrap_or(&[])
    }
}
