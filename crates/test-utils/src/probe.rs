//! Instrumented session and command for executor tests.
//!
//! `ProbeSession` records when every `ProbeCommand` starts and finishes,
//! tracks peak concurrency, and flags any moment where two commands with
//! conflicting group sets run at once.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use cmdpipe::scheduling::current_task;
use cmdpipe::session::{Command, CommandError, Session, SessionDiagnostics};
use cmdpipe::types::GroupName;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeEvent {
    Started(String),
    Finished(String),
}

#[derive(Debug, Default)]
struct GroupUse {
    readers: usize,
    writers: usize,
}

#[derive(Debug)]
pub struct ProbeSession {
    id: String,
    events: Mutex<Vec<ProbeEvent>>,
    active: AtomicUsize,
    peak: AtomicUsize,
    groups: Mutex<HashMap<GroupName, GroupUse>>,
    violations: Mutex<Vec<String>>,
    frames: Mutex<BTreeMap<String, Vec<String>>>,
}

impl ProbeSession {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            events: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            groups: Mutex::new(HashMap::new()),
            violations: Mutex::new(Vec::new()),
            frames: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn events(&self) -> Vec<ProbeEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn started(&self, name: &str) -> bool {
        self.position(&ProbeEvent::Started(name.to_string())).is_some()
    }

    pub fn finished(&self, name: &str) -> bool {
        self.position(&ProbeEvent::Finished(name.to_string())).is_some()
    }

    /// `true` if `a` finished before `b` started.
    pub fn finished_before(&self, a: &str, b: &str) -> bool {
        match (
            self.position(&ProbeEvent::Finished(a.to_string())),
            self.position(&ProbeEvent::Started(b.to_string())),
        ) {
            (Some(finished), Some(started)) => finished < started,
            _ => false,
        }
    }

    /// `true` if `a` and `b` were both running at some point.
    pub fn overlapped(&self, a: &str, b: &str) -> bool {
        let pos = |e: ProbeEvent| self.position(&e);
        match (
            pos(ProbeEvent::Started(a.to_string())),
            pos(ProbeEvent::Finished(a.to_string())),
            pos(ProbeEvent::Started(b.to_string())),
            pos(ProbeEvent::Finished(b.to_string())),
        ) {
            (Some(sa), Some(fa), Some(sb), Some(fb)) => sa < fb && sb < fa,
            _ => false,
        }
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Descriptions of every read/write conflict observed while running.
    pub fn hazard_violations(&self) -> Vec<String> {
        self.violations.lock().unwrap().clone()
    }

    /// Diagnostic frames of the current task as seen by command `name`.
    pub fn frames_seen_by(&self, name: &str) -> Option<Vec<String>> {
        self.frames.lock().unwrap().get(name).cloned()
    }

    fn position(&self, event: &ProbeEvent) -> Option<usize> {
        self.events.lock().unwrap().iter().position(|e| e == event)
    }

    fn enter(&self, command: &ProbeCommand) {
        {
            let mut groups = self.groups.lock().unwrap();
            for group in &command.outputs {
                let g = groups.entry(group.clone()).or_default();
                if g.readers > 0 || g.writers > 0 {
                    self.violations.lock().unwrap().push(format!(
                        "{} wrote '{group}' while it was in use",
                        command.name
                    ));
                }
                g.writers += 1;
            }
            for group in command.inputs.iter().filter(|g| !command.outputs.contains(g)) {
                let g = groups.entry(group.clone()).or_default();
                if g.writers > 0 {
                    self.violations.lock().unwrap().push(format!(
                        "{} read '{group}' while it was being written",
                        command.name
                    ));
                }
                g.readers += 1;
            }
            self.events
                .lock()
                .unwrap()
                .push(ProbeEvent::Started(command.name.clone()));
        }

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if let Some(task) = current_task() {
            self.frames
                .lock()
                .unwrap()
                .insert(command.name.clone(), task.frames());
        }
    }

    fn exit(&self, command: &ProbeCommand) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        let mut groups = self.groups.lock().unwrap();
        for group in &command.outputs {
            if let Some(g) = groups.get_mut(group) {
                g.writers -= 1;
            }
        }
        for group in command.inputs.iter().filter(|g| !command.outputs.contains(g)) {
            if let Some(g) = groups.get_mut(group) {
                g.readers -= 1;
            }
        }
        self.events
            .lock()
            .unwrap()
            .push(ProbeEvent::Finished(command.name.clone()));
    }
}

impl SessionDiagnostics for ProbeSession {
    fn session_id(&self) -> &str {
        &self.id
    }

    fn weak_num_docs(&self) -> Option<u64> {
        None
    }

    fn weak_num_groups(&self) -> Option<BTreeMap<String, u32>> {
        let groups = self.groups.try_lock().ok()?;
        Some(groups.keys().map(|k| (k.clone(), 0)).collect())
    }

    fn weak_num_stats(&self) -> Option<u32> {
        Some(self.active.load(Ordering::Relaxed) as u32)
    }
}

impl Session for ProbeSession {
    type Output = String;
}

/// A latch commands can block on until the test opens it.
#[derive(Debug, Clone, Default)]
pub struct ProbeGate {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ProbeGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        let (open, cvar) = &*self.inner;
        *open.lock().unwrap() = true;
        cvar.notify_all();
    }

    pub fn wait(&self) {
        let (open, cvar) = &*self.inner;
        let mut guard = open.lock().unwrap();
        while !*guard {
            guard = cvar.wait(guard).unwrap();
        }
    }
}

#[derive(Debug, Clone)]
enum Failure {
    OutOfMemory,
    Error(String),
    Panic,
}

/// Command that records itself on a [`ProbeSession`] and returns its name.
#[derive(Debug, Clone)]
pub struct ProbeCommand {
    name: String,
    session_id: String,
    inputs: Vec<GroupName>,
    outputs: Vec<GroupName>,
    delay: Duration,
    failure: Option<Failure>,
    gate: Option<ProbeGate>,
}

impl ProbeCommand {
    /// A command for session `"probe"` with no groups.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            session_id: "probe".to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            delay: Duration::ZERO,
            failure: None,
            gate: None,
        }
    }

    pub fn reads(mut self, groups: &[&str]) -> Self {
        self.inputs.extend(groups.iter().map(|g| g.to_string()));
        self
    }

    pub fn writes(mut self, groups: &[&str]) -> Self {
        self.outputs.extend(groups.iter().map(|g| g.to_string()));
        self
    }

    pub fn for_session(mut self, id: &str) -> Self {
        self.session_id = id.to_string();
        self
    }

    pub fn sleeps(mut self, ms: u64) -> Self {
        self.delay = Duration::from_millis(ms);
        self
    }

    pub fn fails_with(mut self, msg: &str) -> Self {
        self.failure = Some(Failure::Error(msg.to_string()));
        self
    }

    pub fn fails_out_of_memory(mut self) -> Self {
        self.failure = Some(Failure::OutOfMemory);
        self
    }

    pub fn panics(mut self) -> Self {
        self.failure = Some(Failure::Panic);
        self
    }

    /// Block inside `apply` until `gate` opens.
    pub fn waits_on(mut self, gate: &ProbeGate) -> Self {
        self.gate = Some(gate.clone());
        self
    }

    pub fn arc(self) -> Arc<dyn Command<ProbeSession>> {
        Arc::new(self)
    }
}

impl Command<ProbeSession> for ProbeCommand {
    fn name(&self) -> &str {
        &self.name
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
        "probe"
    }

    fn apply(&self, session: &ProbeSession) -> Result<String, CommandError> {
        session.enter(self);
        if let Some(gate) = &self.gate {
            gate.wait();
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        let result = match &self.failure {
            None => Ok(self.name.clone()),
            Some(Failure::OutOfMemory) => Err(CommandError::OutOfMemory {
                requested: 1 << 30,
                available: 0,
            }),
            Some(Failure::Error(msg)) => Err(CommandError::InvalidArgument(msg.clone())),
            Some(Failure::Panic) => {
                session.exit(self);
                panic!("probe command {} panicked", self.name);
            }
        };
        session.exit(self);
        result
    }
}
