// src/session/memory.rs

//! In-memory session: a fixed set of documents, synthetic metric columns,
//! named group assignments and a stat stack, all under a memory budget.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::debug;

use crate::session::{CommandError, Session, SessionDiagnostics};
use crate::types::{DEFAULT_GROUPS, GroupName};

/// Synthetic metric column: `value(doc) = (doc * multiplier + offset) % modulus`,
/// with the product and sum wrapping on overflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSpec {
    pub name: String,
    pub modulus: i64,
    pub multiplier: i64,
    pub offset: i64,
}

impl MetricSpec {
    pub fn new(name: impl Into<String>, modulus: i64, multiplier: i64) -> Self {
        Self {
            name: name.into(),
            modulus,
            multiplier,
            offset: 0,
        }
    }

    fn column(&self, num_docs: usize) -> Arc<[i64]> {
        let modulus = self.modulus.max(1);
        (0..num_docs as i64)
            .map(|doc| {
                doc.wrapping_mul(self.multiplier)
                    .wrapping_add(self.offset)
                    .rem_euclid(modulus)
            })
            .collect()
    }
}

/// Values produced by the in-memory commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutput {
    Done,
    NumGroups(u32),
    /// Per-group sums, indexed by group; index 0 (filtered docs) is always 0.
    GroupStats(Vec<i64>),
    NumStats(u32),
}

impl fmt::Display for SessionOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionOutput::Done => write!(f, "done"),
            SessionOutput::NumGroups(n) => write!(f, "groups: {n}"),
            SessionOutput::GroupStats(stats) => {
                writeln!(f, "group\tsum")?;
                for (group, sum) in stats.iter().enumerate().skip(1) {
                    writeln!(f, "{group}\t{sum}")?;
                }
                Ok(())
            }
            SessionOutput::NumStats(n) => write!(f, "stats: {n}"),
        }
    }
}

#[derive(Debug)]
struct MemoryBudget {
    limit: u64,
    used: AtomicU64,
}

impl MemoryBudget {
    fn claim(self: &Arc<Self>, bytes: u64) -> Result<MemoryReservation, CommandError> {
        let mut used = self.used.load(Ordering::Acquire);
        loop {
            let available = self.limit.saturating_sub(used);
            if bytes > available {
                return Err(CommandError::OutOfMemory {
                    requested: bytes,
                    available,
                });
            }
            match self.used.compare_exchange_weak(
                used,
                used + bytes,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Ok(MemoryReservation {
                        budget: Arc::clone(self),
                        bytes,
                    });
                }
                Err(actual) => used = actual,
            }
        }
    }
}

/// Memory held on behalf of one group array; returned on drop.
#[derive(Debug)]
struct MemoryReservation {
    budget: Arc<MemoryBudget>,
    bytes: u64,
}

impl Drop for MemoryReservation {
    fn drop(&mut self) {
        self.budget.used.fetch_sub(self.bytes, Ordering::AcqRel);
    }
}

/// Group id per document. Group 0 means "filtered out".
#[derive(Debug)]
pub struct GroupAssignment {
    docs: Vec<u32>,
    num_groups: u32,
    _reservation: MemoryReservation,
}

impl GroupAssignment {
    pub fn docs(&self) -> &[u32] {
        &self.docs
    }

    /// Highest group id in use.
    pub fn num_groups(&self) -> u32 {
        self.num_groups
    }
}

pub struct InMemorySession {
    id: String,
    num_docs: usize,
    metrics: BTreeMap<String, Arc<[i64]>>,
    groups: RwLock<HashMap<GroupName, Arc<GroupAssignment>>>,
    stats: Mutex<Vec<String>>,
    memory: Arc<MemoryBudget>,
    // Monitoring mirrors, updated after each mutation.
    weak_stats: AtomicU32,
    weak_groups: RwLock<BTreeMap<String, u32>>,
}

impl InMemorySession {
    /// Open a session with every document in group 1 of the default groups.
    pub fn open(
        id: impl Into<String>,
        num_docs: usize,
        memory_limit_bytes: u64,
        metrics: &[MetricSpec],
    ) -> Result<Self, CommandError> {
        let session = Self {
            id: id.into(),
            num_docs,
            metrics: metrics
                .iter()
                .map(|m| (m.name.clone(), m.column(num_docs)))
                .collect(),
            groups: RwLock::new(HashMap::new()),
            stats: Mutex::new(Vec::new()),
            memory: Arc::new(MemoryBudget {
                limit: memory_limit_bytes,
                used: AtomicU64::new(0),
            }),
            weak_stats: AtomicU32::new(0),
            weak_groups: RwLock::new(BTreeMap::new()),
        };

        session.set_groups(DEFAULT_GROUPS, vec![1; num_docs], 1)?;
        debug!(session = %session.id, num_docs, "session opened");
        Ok(session)
    }

    pub fn num_docs(&self) -> usize {
        self.num_docs
    }

    pub fn memory_used(&self) -> u64 {
        self.memory.used.load(Ordering::Acquire)
    }

    pub fn memory_limit(&self) -> u64 {
        self.memory.limit
    }

    pub fn metric(&self, name: &str) -> Result<Arc<[i64]>, CommandError> {
        self.metrics
            .get(name)
            .cloned()
            .ok_or_else(|| CommandError::UnknownMetric(name.to_string()))
    }

    pub fn groups(&self, name: &str) -> Result<Arc<GroupAssignment>, CommandError> {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| CommandError::UnknownGroup(name.to_string()))
    }

    /// Replace (or create) a group namespace. Every id in `docs` must be at
    /// most `num_groups`.
    ///
    /// The new array is reserved before the old one is released, so a
    /// regroup needs room for both at once.
    pub fn set_groups(
        &self,
        name: &str,
        docs: Vec<u32>,
        num_groups: u32,
    ) -> Result<(), CommandError> {
        if docs.len() != self.num_docs {
            return Err(CommandError::InvalidArgument(format!(
                "group array for '{name}' has {} entries, session has {} docs",
                docs.len(),
                self.num_docs
            )));
        }

        if let Some(&bad) = docs.iter().find(|&&group| group > num_groups) {
            return Err(CommandError::InvalidArgument(format!(
                "group id {bad} for '{name}' exceeds its group count {num_groups}"
            )));
        }

        let bytes = (docs.len() * std::mem::size_of::<u32>()) as u64;
        let reservation = self.memory.claim(bytes)?;
        let assignment = Arc::new(GroupAssignment {
            docs,
            num_groups,
            _reservation: reservation,
        });

        let previous = self
            .groups
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), assignment);
        drop(previous);

        self.weak_groups
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), num_groups);
        Ok(())
    }

    pub fn push_stat(&self, metric: &str) -> Result<u32, CommandError> {
        self.metric(metric)?;
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        stats.push(metric.to_string());
        let count = stats.len() as u32;
        self.weak_stats.store(count, Ordering::Relaxed);
        Ok(count)
    }

    pub fn pop_stat(&self) -> Result<u32, CommandError> {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        stats.pop().ok_or(CommandError::EmptyStatStack)?;
        let count = stats.len() as u32;
        self.weak_stats.store(count, Ordering::Relaxed);
        Ok(count)
    }

    pub fn stats(&self) -> Vec<String> {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl fmt::Debug for InMemorySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemorySession")
            .field("id", &self.id)
            .field("num_docs", &self.num_docs)
            .field("metrics", &self.metrics.keys().collect::<Vec<_>>())
            .field("memory_used", &self.memory_used())
            .finish_non_exhaustive()
    }
}

impl SessionDiagnostics for InMemorySession {
    fn session_id(&self) -> &str {
        &self.id
    }

    fn weak_num_docs(&self) -> Option<u64> {
        Some(self.num_docs as u64)
    }

    fn weak_num_groups(&self) -> Option<BTreeMap<String, u32>> {
        // Never wait on a writer; a busy lock just means no data this time.
        self.weak_groups.try_read().ok().map(|g| g.clone())
    }

    fn weak_num_stats(&self) -> Option<u32> {
        Some(self.weak_stats.load(Ordering::Relaxed))
    }
}

impl Session for InMemorySession {
    type Output = SessionOutput;
}
