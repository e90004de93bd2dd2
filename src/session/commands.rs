// src/session/commands.rs

//! Commands over [`InMemorySession`].

use crate::scheduling::enter_frame;
use crate::session::memory::{InMemorySession, SessionOutput};
use crate::session::{Command, CommandError};
use crate::types::{GroupName, STAT_STACK};

/// Put every document into group 1 of `output`.
#[derive(Debug, Clone)]
pub struct ResetGroups {
    session_id: String,
    outputs: Vec<GroupName>,
}

impl ResetGroups {
    pub fn new(session_id: impl Into<String>, output: impl Into<GroupName>) -> Self {
        Self {
            session_id: session_id.into(),
            outputs: vec![output.into()],
        }
    }
}

impl Command<InMemorySession> for ResetGroups {
    fn name(&self) -> &str {
        "reset_groups"
    }

    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn input_groups(&self) -> &[GroupName] {
        &[]
    }

    fn output_groups(&self) -> &[GroupName] {
        &self.outputs
    }

    fn result_type(&self) -> &'static str {
        "unit"
    }

    fn apply(&self, session: &InMemorySession) -> Result<SessionOutput, CommandError> {
        session.set_groups(&self.outputs[0], vec![1; session.num_docs()], 1)?;
        Ok(SessionOutput::Done)
    }
}

/// Split every group of `input` into buckets of `metric` and write the
/// result to `output`.
///
/// Each group gets `ceil((max - min) / interval)` regular buckets plus one
/// gutter below `min` and one at or above `max`. A document in group `g`
/// landing in bucket `b` moves to group `(g - 1) * buckets + b + 1`; filtered
/// documents (group 0) stay filtered.
#[derive(Debug, Clone)]
pub struct MetricRegroup {
    session_id: String,
    inputs: Vec<GroupName>,
    outputs: Vec<GroupName>,
    metric: String,
    min: i64,
    max: i64,
    interval: i64,
}

impl MetricRegroup {
    pub fn new(
        session_id: impl Into<String>,
        input: impl Into<GroupName>,
        output: impl Into<GroupName>,
        metric: impl Into<String>,
        min: i64,
        max: i64,
        interval: i64,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            inputs: vec![input.into()],
            outputs: vec![output.into()],
            metric: metric.into(),
            min,
            max,
            interval,
        }
    }

    /// Buckets per input group for `[min, max)` split by `interval`: the
    /// regular ones plus both gutters. `None` if the range is empty, the
    /// interval is not positive, or the count does not fit a group id.
    pub fn bucket_count(min: i64, max: i64, interval: i64) -> Option<u32> {
        if interval <= 0 || min >= max {
            return None;
        }
        let span = i128::from(max) - i128::from(min);
        let regular = (span + i128::from(interval) - 1) / i128::from(interval);
        u32::try_from(regular).ok()?.checked_add(2)
    }

    /// Bucket of `value`; `buckets` comes from [`bucket_count`](Self::bucket_count).
    fn bucket(&self, value: i64, buckets: u32) -> u32 {
        if value < self.min {
            0
        } else if value >= self.max {
            buckets - 1
        } else {
            // Below `buckets - 2` because `value < max`.
            let offset = i128::from(value) - i128::from(self.min);
            (offset / i128::from(self.interval)) as u32 + 1
        }
    }
}

impl Command<InMemorySession> for MetricRegroup {
    fn name(&self) -> &str {
        "metric_regroup"
    }

    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn input_groups(&self) -> &[GroupName] {
        &self.inputs
    }

    fn output_groups(&self) -> &[GroupName] {
        &self.outputs
    }

    fn result_type(&self) -> &'static str {
        "num_groups"
    }

    fn apply(&self, session: &InMemorySession) -> Result<SessionOutput, CommandError> {
        let buckets = Self::bucket_count(self.min, self.max, self.interval).ok_or_else(|| {
            CommandError::InvalidArgument(format!(
                "metric_regroup needs min < max, interval > 0 and fewer than 2^32 buckets \
                 (got min={}, max={}, interval={})",
                self.min, self.max, self.interval
            ))
        })?;

        let input = session.groups(&self.inputs[0])?;
        let values = session.metric(&self.metric)?;
        let num_groups = input.num_groups().checked_mul(buckets).ok_or_else(|| {
            CommandError::InvalidArgument(format!(
                "regrouping {} groups into {buckets} buckets overflows the group id space",
                input.num_groups()
            ))
        })?;

        let _frame = enter_frame(format!("bucketing {} by {}", self.inputs[0], self.metric));
        let docs = input
            .docs()
            .iter()
            .zip(values.iter())
            .map(|(&group, &value)| {
                if group == 0 {
                    0
                } else {
                    (group - 1) * buckets + self.bucket(value, buckets) + 1
                }
            })
            .collect();

        session.set_groups(&self.outputs[0], docs, num_groups)?;
        Ok(SessionOutput::NumGroups(num_groups))
    }
}

/// Duplicate a group namespace.
#[derive(Debug, Clone)]
pub struct CopyGroups {
    session_id: String,
    inputs: Vec<GroupName>,
    outputs: Vec<GroupName>,
}

impl CopyGroups {
    pub fn new(
        session_id: impl Into<String>,
        input: impl Into<GroupName>,
        output: impl Into<GroupName>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            inputs: vec![input.into()],
            outputs: vec![output.into()],
        }
    }
}

impl Command<InMemorySession> for CopyGroups {
    fn name(&self) -> &str {
        "copy_groups"
    }

    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn input_groups(&self) -> &[GroupName] {
        &self.inputs
    }

    fn output_groups(&self) -> &[GroupName] {
        &self.outputs
    }

    fn result_type(&self) -> &'static str {
        "unit"
    }

    fn apply(&self, session: &InMemorySession) -> Result<SessionOutput, CommandError> {
        let input = session.groups(&self.inputs[0])?;
        session.set_groups(&self.outputs[0], input.docs().to_vec(), input.num_groups())?;
        Ok(SessionOutput::Done)
    }
}

/// Sum `metric` per group of `input`.
#[derive(Debug, Clone)]
pub struct GroupStats {
    session_id: String,
    inputs: Vec<GroupName>,
    metric: String,
}

impl GroupStats {
    pub fn new(
        session_id: impl Into<String>,
        input: impl Into<GroupName>,
        metric: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            inputs: vec![input.into()],
            metric: metric.into(),
        }
    }
}

impl Command<InMemorySession> for GroupStats {
    fn name(&self) -> &str {
        "group_stats"
    }

    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn input_groups(&self) -> &[GroupName] {
        &self.inputs
    }

    fn output_groups(&self) -> &[GroupName] {
        &[]
    }

    fn result_type(&self) -> &'static str {
        "group_stats"
    }

    fn apply(&self, session: &InMemorySession) -> Result<SessionOutput, CommandError> {
        let input = session.groups(&self.inputs[0])?;
        let values = session.metric(&self.metric)?;

        let _frame = enter_frame(format!("summing {} over {}", self.metric, self.inputs[0]));
        let mut sums = vec![0i64; input.num_groups() as usize + 1];
        for (&group, &value) in input.docs().iter().zip(values.iter()) {
            if group == 0 {
                continue;
            }
            // `set_groups` keeps every id within `num_groups`.
            let Some(sum) = sums.get_mut(group as usize) else {
                return Err(CommandError::InvalidArgument(format!(
                    "group {group} of '{}' exceeds its group count {}",
                    self.inputs[0],
                    input.num_groups()
                )));
            };
            *sum = sum.checked_add(value).ok_or_else(|| {
                CommandError::InvalidArgument(format!(
                    "sum of {} over group {group} overflows",
                    self.metric
                ))
            })?;
        }
        Ok(SessionOutput::GroupStats(sums))
    }
}

/// Report the number of groups in `input`.
#[derive(Debug, Clone)]
pub struct NumGroups {
    session_id: String,
    inputs: Vec<GroupName>,
}

impl NumGroups {
    pub fn new(session_id: impl Into<String>, input: impl Into<GroupName>) -> Self {
        Self {
            session_id: session_id.into(),
            inputs: vec![input.into()],
        }
    }
}

impl Command<InMemorySession> for NumGroups {
    fn name(&self) -> &str {
        "num_groups"
    }

    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn input_groups(&self) -> &[GroupName] {
        &self.inputs
    }

    fn output_groups(&self) -> &[GroupName] {
        &[]
    }

    fn result_type(&self) -> &'static str {
        "num_groups"
    }

    fn apply(&self, session: &InMemorySession) -> Result<SessionOutput, CommandError> {
        let input = session.groups(&self.inputs[0])?;
        Ok(SessionOutput::NumGroups(input.num_groups()))
    }
}

/// Push a metric onto the stat stack.
#[derive(Debug, Clone)]
pub struct PushStat {
    session_id: String,
    outputs: Vec<GroupName>,
    metric: String,
}

impl PushStat {
    pub fn new(session_id: impl Into<String>, metric: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            outputs: vec![STAT_STACK.to_string()],
            metric: metric.into(),
        }
    }
}

impl Command<InMemorySession> for PushStat {
    fn name(&self) -> &str {
        "push_stat"
    }

    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn input_groups(&self) -> &[GroupName] {
        &[]
    }

    fn output_groups(&self) -> &[GroupName] {
        &self.outputs
    }

    fn result_type(&self) -> &'static str {
        "num_stats"
    }

    fn apply(&self, session: &InMemorySession) -> Result<SessionOutput, CommandError> {
        Ok(SessionOutput::NumStats(session.push_stat(&self.metric)?))
    }
}

/// Pop the top of the stat stack.
#[derive(Debug, Clone)]
pub struct PopStat {
    session_id: String,
    outputs: Vec<GroupName>,
}

impl PopStat {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            outputs: vec![STAT_STACK.to_string()],
        }
    }
}

impl Command<InMemorySession> for PopStat {
    fn name(&self) -> &str {
        "pop_stat"
    }

    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn input_groups(&self) -> &[GroupName] {
        &[]
    }

    fn output_groups(&self) -> &[GroupName] {
        &self.outputs
    }

    fn result_type(&self) -> &'static str {
        "num_stats"
    }

    fn apply(&self, session: &InMemorySession) -> Result<SessionOutput, CommandError> {
        Ok(SessionOutput::NumStats(session.pop_stat()?))
    }
}
