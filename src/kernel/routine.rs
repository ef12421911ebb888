//! Routines and the context they run in.
//!
//! A routine is the code behind a process. Routine instances are not
//! persisted: the kernel records each process's [`RoutineKind`] and rebuilds
//! the instance from a [`RoutineRegistry`] factory when a snapshot is
//! restored. Anything a routine needs to remember across ticks belongs in
//! its process memory ([`RunContext::load`] / [`RunContext::store`]).

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;

use super::types::{ProcessControlBlock, RunResult};
use crate::topics::TopicBus;
use crate::tracer::Tracer;
use crate::types::{Error, ProcessId, Result, RoutineKind, Tick};
use crate::validation::{validate_non_empty, validate_priority};

/// Code executed for a process once per eligible tick.
///
/// Returning `Err` (or panicking) is a routine fault: the process and its
/// descendants are terminated and the fault is logged; other processes keep
/// running.
pub trait Routine: fmt::Debug {
    fn run(&mut self, ctx: &mut RunContext<'_>) -> Result<RunResult>;
}

type Factory = Box<dyn Fn() -> Box<dyn Routine>>;

/// Maps routine kinds to constructors.
#[derive(Default)]
pub struct RoutineRegistry {
    factories: HashMap<RoutineKind, Factory>,
}

impl RoutineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `kind`, replacing any previous factory.
    pub fn register<F, R>(&mut self, kind: &str, factory: F) -> &mut Self
    where
        F: Fn() -> R + 'static,
        R: Routine + 'static,
    {
        self.factories.insert(
            RoutineKind::from(kind),
            Box::new(move || Box::new(factory()) as Box<dyn Routine>),
        );
        self
    }

    pub fn contains(&self, kind: &RoutineKind) -> bool {
        self.factories.contains_key(kind)
    }

    /// Build a fresh routine instance.
    pub fn instantiate(&self, kind: &RoutineKind) -> Result<Box<dyn Routine>> {
        self.factories
            .get(kind)
            .map(|factory| factory())
            .ok_or_else(|| Error::config(format!("unknown routine kind: {}", kind)))
    }

    pub fn kinds(&self) -> Vec<&RoutineKind> {
        let mut kinds: Vec<_> = self.factories.keys().collect();
        kinds.sort();
        kinds
    }
}

impl fmt::Debug for RoutineRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutineRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Child process created during an invocation, inserted once it returns.
#[derive(Debug)]
pub(crate) struct PendingSpawn {
    pub(crate) pcb: ProcessControlBlock,
    pub(crate) routine: Box<dyn Routine>,
}

/// Everything a routine may touch during one invocation.
pub struct RunContext<'a> {
    tick: Tick,
    pcb: &'a mut ProcessControlBlock,
    topics: &'a mut TopicBus,
    registry: &'a RoutineRegistry,
    tracer: &'a dyn Tracer,
    capacity: usize,
    taken: &'a dyn Fn(&ProcessId) -> bool,
    pending: Vec<PendingSpawn>,
}

fn never_taken(_: &ProcessId) -> bool {
    false
}

impl fmt::Debug for RunContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("tick", &self.tick)
            .field("pid", &self.pcb.id)
            .field("capacity", &self.capacity)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl<'a> RunContext<'a> {
    pub(crate) fn new(
        tick: Tick,
        pcb: &'a mut ProcessControlBlock,
        topics: &'a mut TopicBus,
        registry: &'a RoutineRegistry,
        tracer: &'a dyn Tracer,
        capacity: usize,
    ) -> Self {
        Self {
            tick,
            pcb,
            topics,
            registry,
            tracer,
            capacity,
            taken: &never_taken,
            pending: Vec::new(),
        }
    }

    /// Ids for which `taken` holds are skipped when naming children.
    pub(crate) fn with_taken_ids(mut self, taken: &'a dyn Fn(&ProcessId) -> bool) -> Self {
        self.taken = taken;
        self
    }

    pub fn tick(&self) -> Tick {
        self.tick
    }

    pub fn pid(&self) -> &ProcessId {
        &self.pcb.id
    }

    pub fn priority(&self) -> f64 {
        self.pcb.priority
    }

    pub fn memory(&self) -> &Value {
        &self.pcb.memory
    }

    pub fn memory_mut(&mut self) -> &mut Value {
        &mut self.pcb.memory
    }

    /// Decode process memory, or `T::default()` if nothing was stored yet.
    pub fn load<T>(&self) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        if self.pcb.memory.is_null() {
            return Ok(T::default());
        }
        Ok(T::deserialize(&self.pcb.memory)?)
    }

    /// Replace process memory with `value`.
    pub fn store<T: Serialize>(&mut self, value: &T) -> Result<()> {
        self.pcb.memory = serde_json::to_value(value)?;
        Ok(())
    }

    pub fn topics(&mut self) -> &mut TopicBus {
        self.topics
    }

    pub fn tracer(&self) -> &dyn Tracer {
        self.tracer
    }

    /// Spawn a child of the running process.
    ///
    /// The child is registered when this invocation returns and first runs on
    /// a later tick. A malformed request is a config error: it is logged and
    /// returned, and nothing is created.
    pub fn spawn_child(&mut self, kind: &str, priority: f64, memory: Value) -> Result<ProcessId> {
        match self.prepare_child(kind, priority, memory) {
            Ok(pending) => {
                let id = pending.pcb.id.clone();
                self.pending.push(pending);
                self.capacity -= 1;
                Ok(id)
            }
            Err(err) => {
                self.tracer.error(
                    "spawn rejected",
                    &json!({ "kind": kind, "error": err.to_string() }),
                );
                tracing::warn!(parent_id = %self.pcb.id, kind, error = %err, "spawn_rejected");
                Err(err)
            }
        }
    }

    fn prepare_child(&mut self, kind: &str, priority: f64, memory: Value) -> Result<PendingSpawn> {
        validate_non_empty(kind, "kind")?;
        validate_priority(priority, "priority")?;
        if self.capacity == 0 {
            return Err(Error::config("process table is full"));
        }
        let kind = RoutineKind::from(kind);
        let routine = self.registry.instantiate(&kind)?;

        let mut id = self.pcb.allocate_child_id(&kind);
        while (self.taken)(&id) {
            id = self.pcb.allocate_child_id(&kind);
        }
        let mut pcb = ProcessControlBlock::new(
            id,
            kind,
            Some(self.pcb.id.clone()),
            priority,
            0,
            self.tick,
        );
        pcb.memory = memory;
        Ok(PendingSpawn { pcb, routine })
    }

    pub(crate) fn into_pending(self) -> Vec<PendingSpawn> {
        self.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracer::RecordingTracer;
    use serde::Deserialize;

    #[derive(Debug)]
    struct Idle;

    impl Routine for Idle {
        fn run(&mut self, _ctx: &mut RunContext<'_>) -> Result<RunResult> {
            Ok(RunResult::Running)
        }
    }

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Counter {
        runs: u32,
    }

    fn registry() -> RoutineRegistry {
        let mut registry = RoutineRegistry::new();
        registry.register("idle", || Idle);
        registry
    }

    fn parent_pcb() -> ProcessControlBlock {
        let kind = RoutineKind::from("idle");
        ProcessControlBlock::new(ProcessId::root(&kind, 0), kind, None, 1.0, 0, 0)
    }

    #[test]
    fn test_unknown_kind_is_config_error() {
        let err = registry().instantiate(&RoutineKind::from("miner")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_registry_debug_lists_kinds() {
        assert!(format!("{:?}", registry()).contains("idle"));
    }

    #[test]
    fn test_load_defaults_then_round_trips() {
        let registry = registry();
        let mut pcb = parent_pcb();
        let mut topics = TopicBus::default();
        let tracer = RecordingTracer::new();
        let mut ctx = RunContext::new(5, &mut pcb, &mut topics, &registry, &tracer, 10);

        let mut counter: Counter = ctx.load().unwrap();
        assert_eq!(counter, Counter::default());
        counter.runs += 1;
        ctx.store(&counter).unwrap();
        assert_eq!(ctx.load::<Counter>().unwrap().runs, 1);
        assert_eq!(pcb.memory, serde_json::json!({"runs": 1}));
    }

    #[test]
    fn test_spawn_child_allocates_scoped_id() {
        let registry = registry();
        let mut pcb = parent_pcb();
        let mut topics = TopicBus::default();
        let tracer = RecordingTracer::new();
        let mut ctx = RunContext::new(5, &mut pcb, &mut topics, &registry, &tracer, 10);

        let id = ctx.spawn_child("idle", 2.0, json!({"room": "E1S1"})).unwrap();
        assert_eq!(id.as_str(), "idle:0/idle:0");

        let pending = ctx.into_pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].pcb.parent_id.as_ref(), Some(&pcb.id));
        assert_eq!(pending[0].pcb.memory, json!({"room": "E1S1"}));
        assert_eq!(pcb.next_child, 1);
    }

    #[test]
    fn test_malformed_spawn_is_logged_and_creates_nothing() {
        let registry = registry();
        let mut pcb = parent_pcb();
        let mut topics = TopicBus::default();
        let tracer = RecordingTracer::new();
        let mut ctx = RunContext::new(5, &mut pcb, &mut topics, &registry, &tracer, 10);

        assert!(ctx.spawn_child("", 1.0, Value::Null).is_err());
        assert!(ctx.spawn_child("idle", f64::NAN, Value::Null).is_err());
        assert!(ctx.spawn_child("ghost", 1.0, Value::Null).is_err());
        assert!(ctx.into_pending().is_empty());
        assert_eq!(tracer.errors().len(), 3);
        assert_eq!(pcb.next_child, 0);
    }

    #[test]
    fn test_spawn_child_skips_ids_in_use() {
        let registry = registry();
        let mut pcb = parent_pcb();
        let mut topics = TopicBus::default();
        let tracer = RecordingTracer::new();
        let taken = |id: &ProcessId| id.as_str() == "idle:0/idle:0";
        let mut ctx = RunContext::new(5, &mut pcb, &mut topics, &registry, &tracer, 10)
            .with_taken_ids(&taken);

        let id = ctx.spawn_child("idle", 1.0, Value::Null).unwrap();
        assert_eq!(id.as_str(), "idle:0/idle:1");
        assert_eq!(ctx.into_pending()[0].pcb.id, id);
    }

    #[test]
    fn test_spawn_respects_capacity() {
        let registry = registry();
        let mut pcb = parent_pcb();
        let mut topics = TopicBus::default();
        let tracer = RecordingTracer::new();
        let mut ctx = RunContext::new(0, &mut pcb, &mut topics, &registry, &tracer, 1);

        assert!(ctx.spawn_child("idle", 1.0, Value::Null).is_ok());
        let err = ctx.spawn_child("idle", 1.0, Value::Null).unwrap_err();
        assert!(err.to_string().contains("full"));
    }
}
