// src/config/validate.rs

use std::collections::BTreeSet;

use crate::config::model::{CommandConfig, ConfigFile, RawConfigFile};
use crate::errors::{CmdpipeError, Result};
use crate::plan::{PipelinePlan, PlanStep};
use crate::session::MetricRegroup;
use crate::types::{DEFAULT_GROUPS, STAT_STACK};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = CmdpipeError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_commands(cfg)?;
    validate_runtime(cfg)?;
    validate_session(cfg)?;
    validate_commands(cfg)?;
    validate_group_flow(cfg)?;
    validate_plan(cfg)?;
    Ok(())
}

fn config_error(msg: impl Into<String>) -> CmdpipeError {
    CmdpipeError::ConfigError(msg.into())
}

fn ensure_has_commands(cfg: &RawConfigFile) -> Result<()> {
    if cfg.commands.is_empty() {
        return Err(config_error(
            "config must contain at least one [[command]] section",
        ));
    }
    Ok(())
}

fn validate_runtime(cfg: &RawConfigFile) -> Result<()> {
    if cfg.runtime.worker_threads == Some(0) {
        return Err(config_error("[runtime].worker_threads must be >= 1 (got 0)"));
    }
    if cfg.runtime.max_blocking_threads == 0 {
        return Err(config_error(
            "[runtime].max_blocking_threads must be >= 1 (got 0)",
        ));
    }
    Ok(())
}

fn validate_session(cfg: &RawConfigFile) -> Result<()> {
    let session = &cfg.session;
    if session.id.trim().is_empty() {
        return Err(config_error("[session].id must not be empty"));
    }
    if session.num_docs == 0 {
        return Err(config_error("[session].num_docs must be >= 1 (got 0)"));
    }

    let mut seen = BTreeSet::new();
    for metric in &session.metrics {
        if metric.name.is_empty() {
            return Err(config_error("[[session.metric]] name must not be empty"));
        }
        if !seen.insert(metric.name.as_str()) {
            return Err(config_error(format!(
                "metric '{}' is defined more than once",
                metric.name
            )));
        }
        if metric.modulus <= 0 {
            return Err(config_error(format!(
                "metric '{}' needs modulus >= 1 (got {})",
                metric.name, metric.modulus
            )));
        }
    }
    Ok(())
}

fn validate_commands(cfg: &RawConfigFile) -> Result<()> {
    let metrics: BTreeSet<&str> = cfg.session.metrics.iter().map(|m| m.name.as_str()).collect();

    for (seq, command) in cfg.commands.iter().enumerate() {
        let kind = command.kind();

        if let Some(metric) = command.metric() {
            if !metrics.contains(metric) {
                return Err(config_error(format!(
                    "command #{seq} ({kind}) references unknown metric '{metric}'"
                )));
            }
        }

        for group in command.inputs().iter().chain(command.outputs().iter()) {
            if group.trim().is_empty() {
                return Err(config_error(format!(
                    "command #{seq} ({kind}) has an empty group name"
                )));
            }
        }

        if let CommandConfig::MetricRegroup {
            min, max, interval, ..
        } = command
        {
            if *interval <= 0 {
                return Err(config_error(format!(
                    "command #{seq} ({kind}) needs interval >= 1 (got {interval})"
                )));
            }
            if min >= max {
                return Err(config_error(format!(
                    "command #{seq} ({kind}) needs min < max (got min={min}, max={max})"
                )));
            }
            if MetricRegroup::bucket_count(*min, *max, *interval).is_none() {
                return Err(config_error(format!(
                    "command #{seq} ({kind}) splits [{min}, {max}) into too many buckets \
                     for interval {interval}"
                )));
            }
        }

        for group in command.outputs() {
            if group != STAT_STACK && group.starts_with('@') {
                return Err(config_error(format!(
                    "command #{seq} ({kind}) writes reserved group '{group}'"
                )));
            }
        }
    }
    Ok(())
}

/// Every group a command reads must be `default` or written by an earlier
/// command; the session has nothing else at apply time.
fn validate_group_flow(cfg: &RawConfigFile) -> Result<()> {
    let mut defined: BTreeSet<String> = BTreeSet::new();
    defined.insert(DEFAULT_GROUPS.to_string());

    for (seq, command) in cfg.commands.iter().enumerate() {
        for group in command.inputs() {
            if !defined.contains(&group) {
                return Err(config_error(format!(
                    "command #{seq} ({}) reads group '{group}' before any command writes it",
                    command.kind()
                )));
            }
        }
        defined.extend(command.outputs());
    }
    Ok(())
}

fn validate_plan(cfg: &RawConfigFile) -> Result<()> {
    let plan = PipelinePlan::build(
        cfg.commands
            .iter()
            .enumerate()
            .map(|(seq, c)| PlanStep::new(seq, c.kind(), c.inputs(), c.outputs()))
            .collect(),
    );
    plan.stages()?;
    Ok(())
}
