// src/config/model.rs

//! Serde model of `Cmdpipe.toml`.
//!
//! [`RawConfigFile`] is exactly what was deserialised. [`ConfigFile`] is the
//! validated form; the only way to obtain one outside this module is
//! `ConfigFile::try_from(raw)`, which runs the checks in
//! [`validate`](crate::config::validate).

use std::sync::Arc;

use serde::Deserialize;

use crate::errors::{CmdpipeError, Result};
use crate::exec::DynCommand;
use crate::plan::PipelinePlan;
use crate::session::commands::{
    CopyGroups, GroupStats, MetricRegroup, NumGroups, PopStat, PushStat, ResetGroups,
};
use crate::session::memory::{InMemorySession, MetricSpec};
use crate::types::{DEFAULT_GROUPS, GroupName, STAT_STACK};

fn default_cpu_slots() -> usize {
    4
}

fn default_max_blocking_threads() -> usize {
    64
}

fn default_session_id() -> String {
    "session".to_string()
}

fn default_memory_limit() -> u64 {
    64 * 1024 * 1024
}

fn default_multiplier() -> i64 {
    1
}

fn default_input() -> GroupName {
    DEFAULT_GROUPS.to_string()
}

/// `[scheduler]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerSection {
    /// Concurrent command bodies. 0 disables admission control.
    #[serde(default = "default_cpu_slots")]
    pub cpu_slots: usize,

    /// Slots of the sibling remote scheduler sharing the CPU scheduler's
    /// ledger. 0 disables it.
    #[serde(default)]
    pub remote_slots: usize,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            cpu_slots: default_cpu_slots(),
            remote_slots: 0,
        }
    }
}

/// `[runtime]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeSection {
    /// Tokio worker threads; defaults to the number of cores.
    #[serde(default)]
    pub worker_threads: Option<usize>,

    #[serde(default = "default_max_blocking_threads")]
    pub max_blocking_threads: usize,

    /// Period for logging running-task snapshots; 0 disables it.
    #[serde(default)]
    pub status_interval_ms: u64,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            worker_threads: None,
            max_blocking_threads: default_max_blocking_threads(),
            status_interval_ms: 0,
        }
    }
}

/// `[[session.metric]]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricConfig {
    pub name: String,
    pub modulus: i64,
    #[serde(default = "default_multiplier")]
    pub multiplier: i64,
    #[serde(default)]
    pub offset: i64,
}

impl From<&MetricConfig> for MetricSpec {
    fn from(cfg: &MetricConfig) -> Self {
        MetricSpec {
            name: cfg.name.clone(),
            modulus: cfg.modulus,
            multiplier: cfg.multiplier,
            offset: cfg.offset,
        }
    }
}

/// `[session]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionSection {
    #[serde(default = "default_session_id")]
    pub id: String,

    pub num_docs: usize,

    #[serde(default = "default_memory_limit")]
    pub memory_limit_bytes: u64,

    #[serde(default, rename = "metric")]
    pub metrics: Vec<MetricConfig>,
}

/// One `[[command]]` entry, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandConfig {
    ResetGroups {
        output: GroupName,
    },
    MetricRegroup {
        #[serde(default = "default_input")]
        input: GroupName,
        output: GroupName,
        metric: String,
        min: i64,
        max: i64,
        interval: i64,
    },
    CopyGroups {
        #[serde(default = "default_input")]
        input: GroupName,
        output: GroupName,
    },
    GroupStats {
        #[serde(default = "default_input")]
        input: GroupName,
        metric: String,
    },
    NumGroups {
        #[serde(default = "default_input")]
        input: GroupName,
    },
    PushStat {
        metric: String,
    },
    PopStat,
}

impl CommandConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            CommandConfig::ResetGroups { .. } => "reset_groups",
            CommandConfig::MetricRegroup { .. } => "metric_regroup",
            CommandConfig::CopyGroups { .. } => "copy_groups",
            CommandConfig::GroupStats { .. } => "group_stats",
            CommandConfig::NumGroups { .. } => "num_groups",
            CommandConfig::PushStat { .. } => "push_stat",
            CommandConfig::PopStat => "pop_stat",
        }
    }

    /// Groups read, as the command will declare them.
    pub fn inputs(&self) -> Vec<GroupName> {
        match self {
            CommandConfig::MetricRegroup { input, .. }
            | CommandConfig::CopyGroups { input, .. }
            | CommandConfig::GroupStats { input, .. }
            | CommandConfig::NumGroups { input } => vec![input.clone()],
            CommandConfig::ResetGroups { .. }
            | CommandConfig::PushStat { .. }
            | CommandConfig::PopStat => Vec::new(),
        }
    }

    /// Groups written, as the command will declare them.
    pub fn outputs(&self) -> Vec<GroupName> {
        match self {
            CommandConfig::ResetGroups { output }
            | CommandConfig::MetricRegroup { output, .. }
            | CommandConfig::CopyGroups { output, .. } => vec![output.clone()],
            CommandConfig::PushStat { .. } | CommandConfig::PopStat => {
                vec![STAT_STACK.to_string()]
            }
            CommandConfig::GroupStats { .. } | CommandConfig::NumGroups { .. } => Vec::new(),
        }
    }

    pub fn metric(&self) -> Option<&str> {
        match self {
            CommandConfig::MetricRegroup { metric, .. }
            | CommandConfig::GroupStats { metric, .. }
            | CommandConfig::PushStat { metric } => Some(metric),
            _ => None,
        }
    }

    /// Instantiate the command for session `session_id`.
    pub fn build(&self, session_id: &str) -> DynCommand<InMemorySession> {
        match self.clone() {
            CommandConfig::ResetGroups { output } => Arc::new(ResetGroups::new(session_id, output)),
            CommandConfig::MetricRegroup {
                input,
                output,
                metric,
                min,
                max,
                interval,
            } => Arc::new(MetricRegroup::new(
                session_id, input, output, metric, min, max, interval,
            )),
            CommandConfig::CopyGroups { input, output } => {
                Arc::new(CopyGroups::new(session_id, input, output))
            }
            CommandConfig::GroupStats { input, metric } => {
                Arc::new(GroupStats::new(session_id, input, metric))
            }
            CommandConfig::NumGroups { input } => Arc::new(NumGroups::new(session_id, input)),
            CommandConfig::PushStat { metric } => Arc::new(PushStat::new(session_id, metric)),
            CommandConfig::PopStat => Arc::new(PopStat::new(session_id)),
        }
    }
}

/// Raw TOML configuration, as deserialised.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub scheduler: SchedulerSection,

    #[serde(default)]
    pub runtime: RuntimeSection,

    pub session: SessionSection,

    /// Pipeline in submission order; the last entry is the terminal command.
    #[serde(default, rename = "command")]
    pub commands: Vec<CommandConfig>,
}

/// Validated configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    pub scheduler: SchedulerSection,
    pub runtime: RuntimeSection,
    pub session: SessionSection,
    commands: Vec<CommandConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            scheduler: raw.scheduler,
            runtime: raw.runtime,
            session: raw.session,
            commands: raw.commands,
        }
    }

    /// Non-empty; the last entry is the terminal command.
    pub fn commands(&self) -> &[CommandConfig] {
        &self.commands
    }

    pub fn metric_specs(&self) -> Vec<MetricSpec> {
        self.session.metrics.iter().map(MetricSpec::from).collect()
    }

    /// Instantiate the pipeline for session `session_id` as
    /// `(first commands, terminal command)`.
    pub fn build_pipeline(
        &self,
        session_id: &str,
    ) -> Result<(Vec<DynCommand<InMemorySession>>, DynCommand<InMemorySession>)> {
        let mut commands: Vec<_> = self.commands.iter().map(|c| c.build(session_id)).collect();
        let last = commands.pop().ok_or_else(|| {
            CmdpipeError::ConfigError("pipeline has no terminal command".to_string())
        })?;
        Ok((commands, last))
    }

    pub fn plan(&self) -> Result<PipelinePlan> {
        let (first, last) = self.build_pipeline(&self.session.id)?;
        Ok(PipelinePlan::from_commands(&first, &last))
    }
}
