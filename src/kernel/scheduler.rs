//! Process registry and per-tick dispatch.
//!
//! Each tick every live process is visited once, highest priority first and
//! ties broken by registration order. Eligible processes are invoked until the
//! tick budget runs out; the remainder waits for the next tick.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet, VecDeque};

use super::budget::TickBudget;
use super::recovery::with_recovery;
use super::routine::{PendingSpawn, Routine, RoutineRegistry, RunContext};
use super::snapshot::SchedulerSnapshot;
use super::types::{ProcessControlBlock, ProcessState, RunResult};
use crate::topics::TopicBus;
use crate::tracer::Tracer;
use crate::types::{Error, ProcessId, Result, RoutineKind, Tick};
use crate::validation::{validate_non_empty, validate_priority};

/// Request to create a process from outside any routine.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnRequest {
    pub kind: String,
    pub priority: f64,
    pub parent: Option<ProcessId>,
    pub memory: Value,
}

impl SpawnRequest {
    pub fn new(kind: impl Into<String>, priority: f64) -> Self {
        Self {
            kind: kind.into(),
            priority,
            parent: None,
            memory: Value::Null,
        }
    }

    pub fn with_parent(mut self, parent: ProcessId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_memory(mut self, memory: Value) -> Self {
        self.memory = memory;
        self
    }
}

/// What happened during one dispatch pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub tick: Tick,
    /// Routines invoked.
    pub ran: usize,
    /// Processes skipped because their wake tick is in the future.
    pub sleeping: usize,
    /// Eligible processes left for the next tick because the budget ran out.
    pub deferred: usize,
    /// Children registered by routines during the pass.
    pub spawned: usize,
    /// Processes removed, cascades included.
    pub terminated: usize,
    /// Invocations that returned an error or panicked.
    pub faulted: usize,
}

#[derive(Debug)]
struct ProcessEntry {
    pcb: ProcessControlBlock,
    routine: Box<dyn Routine>,
}

/// Live process table.
///
/// Owned by the `Kernel` and called via `&mut self`. Terminated processes are
/// removed immediately, so every entry is either running or sleeping.
#[derive(Debug)]
pub struct Scheduler {
    registry: RoutineRegistry,
    processes: HashMap<ProcessId, ProcessEntry>,
    next_root: u64,
    next_registration: u64,
    max_processes: usize,
}

impl Scheduler {
    pub fn new(registry: RoutineRegistry, max_processes: usize) -> Self {
        Self {
            registry,
            processes: HashMap::new(),
            next_root: 0,
            next_registration: 0,
            max_processes,
        }
    }

    pub fn registry(&self) -> &RoutineRegistry {
        &self.registry
    }

    /// Register a new process, first eligible at `wake_tick`.
    pub fn spawn(&mut self, request: SpawnRequest, wake_tick: Tick) -> Result<ProcessId> {
        validate_non_empty(&request.kind, "kind")?;
        validate_priority(request.priority, "priority")?;
        if self.processes.len() >= self.max_processes {
            return Err(Error::config(format!(
                "process table is full ({} processes)",
                self.max_processes
            )));
        }

        let kind = RoutineKind::from(request.kind.as_str());
        let routine = self.registry.instantiate(&kind)?;

        let id = match &request.parent {
            Some(parent_id) => {
                let parent = self
                    .processes
                    .get_mut(parent_id)
                    .ok_or_else(|| Error::config(format!("unknown parent: {}", parent_id)))?;
                let mut id = parent.pcb.allocate_child_id(&kind);
                while self.processes.contains_key(&id) {
                    id = match self.processes.get_mut(parent_id) {
                        Some(parent) => parent.pcb.allocate_child_id(&kind),
                        None => return Err(Error::internal("parent vanished during spawn")),
                    };
                }
                id
            }
            None => {
                let mut id = ProcessId::root(&kind, self.next_root);
                self.next_root += 1;
                while self.processes.contains_key(&id) {
                    id = ProcessId::root(&kind, self.next_root);
                    self.next_root += 1;
                }
                id
            }
        };

        let mut pcb = ProcessControlBlock::new(
            id.clone(),
            kind,
            request.parent,
            request.priority,
            self.next_registration,
            wake_tick,
        );
        pcb.memory = request.memory;
        self.next_registration += 1;

        tracing::debug!(pid = %id, kind = %pcb.kind, priority = pcb.priority, "process_spawned");
        self.processes.insert(id.clone(), ProcessEntry { pcb, routine });
        Ok(id)
    }

    /// Run one pass over the process table at `tick`.
    pub fn dispatch(
        &mut self,
        tick: Tick,
        topics: &mut TopicBus,
        budget: &TickBudget,
        tracer: &dyn Tracer,
    ) -> TickReport {
        let mut report = TickReport {
            tick,
            ..TickReport::default()
        };
        let mut exhausted = false;

        for pid in self.dispatch_order() {
            // Gone if an earlier cascade this pass took it.
            let Some(entry) = self.processes.get(&pid) else {
                continue;
            };
            if !entry.pcb.is_eligible(tick) {
                report.sleeping += 1;
                continue;
            }
            if exhausted || budget.is_exhausted() {
                exhausted = true;
                report.deferred += 1;
                continue;
            }

            let (outcome, pending) = self.invoke(&pid, tick, topics, tracer);
            report.ran += 1;
            report.spawned += self.insert_pending(pending);

            match outcome {
                Ok(RunResult::Terminated) => {
                    report.terminated += self.terminate_tree(&pid).len();
                }
                Ok(result) => {
                    if let Some(entry) = self.processes.get_mut(&pid) {
                        entry.pcb.apply(result, tick);
                    }
                }
                Err(err) => {
                    report.faulted += 1;
                    tracer.error(
                        "routine fault",
                        &json!({ "pid": pid.as_str(), "error": err.to_string() }),
                    );
                    tracing::warn!(pid = %pid, tick, error = %err, "routine_fault");
                    report.terminated += self.terminate_tree(&pid).len();
                }
            }
        }

        if exhausted {
            tracing::debug!(
                tick,
                deferred = report.deferred,
                used_ms = budget.used().as_millis() as u64,
                "tick_budget_exhausted"
            );
        }
        report
    }

    fn invoke(
        &mut self,
        pid: &ProcessId,
        tick: Tick,
        topics: &mut TopicBus,
        tracer: &dyn Tracer,
    ) -> (Result<RunResult>, Vec<PendingSpawn>) {
        let capacity = self.max_processes.saturating_sub(self.processes.len());
        // Out of the table while it runs, so the context can see every other id.
        let Some(ProcessEntry { mut pcb, mut routine }) = self.processes.remove(pid) else {
            return (
                Err(Error::not_found(format!("unknown pid: {}", pid))),
                Vec::new(),
            );
        };

        let span = tracer.begin(pid.as_str());
        let processes = &self.processes;
        let taken = |id: &ProcessId| processes.contains_key(id);
        let mut ctx = RunContext::new(tick, &mut pcb, topics, &self.registry, &*span, capacity)
            .with_taken_ids(&taken);
        let outcome = with_recovery(|| routine.run(&mut ctx), pid.as_str());
        let pending = ctx.into_pending();
        span.end();

        self.processes
            .insert(pid.clone(), ProcessEntry { pcb, routine });
        (outcome, pending)
    }

    fn insert_pending(&mut self, pending: Vec<PendingSpawn>) -> usize {
        let mut inserted = 0;
        for PendingSpawn { mut pcb, routine } in pending {
            if self.processes.contains_key(&pcb.id) {
                tracing::warn!(pid = %pcb.id, "spawn_id_collision");
                continue;
            }
            pcb.registered = self.next_registration;
            self.next_registration += 1;
            tracing::debug!(pid = %pcb.id, kind = %pcb.kind, priority = pcb.priority, "process_spawned");
            self.processes
                .insert(pcb.id.clone(), ProcessEntry { pcb, routine });
            inserted += 1;
        }
        inserted
    }

    /// Remove `pid` and every descendant. Returns the removed ids, `pid` first.
    fn terminate_tree(&mut self, pid: &ProcessId) -> Vec<ProcessId> {
        if !self.processes.contains_key(pid) {
            return Vec::new();
        }
        let mut doomed = vec![pid.clone()];
        doomed.extend(self.descendants(pid));

        for id in &doomed {
            self.processes.remove(id);
        }
        tracing::debug!(pid = %pid, removed = doomed.len(), "process_terminated");
        doomed
    }

    /// Terminate a live process and its descendants from outside a routine.
    pub fn kill(&mut self, pid: &ProcessId) -> Result<Vec<ProcessId>> {
        if !self.processes.contains_key(pid) {
            return Err(Error::not_found(format!("unknown pid: {}", pid)));
        }
        Ok(self.terminate_tree(pid))
    }

    /// Get process by PID.
    pub fn get(&self, pid: &ProcessId) -> Option<&ProcessControlBlock> {
        self.processes.get(pid).map(|entry| &entry.pcb)
    }

    /// List all processes in dispatch order.
    pub fn list(&self) -> Vec<ProcessControlBlock> {
        let mut pcbs: Vec<_> = self.processes.values().map(|e| e.pcb.clone()).collect();
        pcbs.sort_by(dispatch_cmp);
        pcbs
    }

    /// Count processes.
    pub fn count(&self) -> usize {
        self.processes.len()
    }

    /// Count processes by their state as of `tick`.
    pub fn count_by_state(&self, state: ProcessState, tick: Tick) -> usize {
        self.processes
            .values()
            .filter(|entry| entry.pcb.state_at(tick) == state)
            .count()
    }

    /// Direct children of `pid`, in registration order.
    pub fn children(&self, pid: &ProcessId) -> Vec<ProcessId> {
        let mut children: Vec<_> = self
            .processes
            .values()
            .filter(|entry| entry.pcb.parent_id.as_ref() == Some(pid))
            .map(|entry| (entry.pcb.registered, entry.pcb.id.clone()))
            .collect();
        children.sort();
        children.into_iter().map(|(_, id)| id).collect()
    }

    /// Every process whose parent chain includes `pid`, breadth first.
    pub fn descendants(&self, pid: &ProcessId) -> Vec<ProcessId> {
        let mut by_parent: HashMap<&ProcessId, Vec<&ProcessId>> = HashMap::new();
        for entry in self.processes.values() {
            if let Some(parent) = &entry.pcb.parent_id {
                by_parent.entry(parent).or_default().push(&entry.pcb.id);
            }
        }

        let mut found = Vec::new();
        let mut visited = HashSet::from([pid]);
        let mut queue = VecDeque::from([pid]);
        while let Some(current) = queue.pop_front() {
            if let Some(children) = by_parent.get(current) {
                for child in children {
                    if visited.insert(*child) {
                        found.push((*child).clone());
                        queue.push_back(*child);
                    }
                }
            }
        }
        found
    }

    /// Ids of all processes, highest priority first, ties by registration.
    pub fn dispatch_order(&self) -> Vec<ProcessId> {
        let mut pcbs: Vec<_> = self.processes.values().map(|e| &e.pcb).collect();
        pcbs.sort_by(|a, b| dispatch_cmp(a, b));
        pcbs.into_iter().map(|pcb| pcb.id.clone()).collect()
    }

    /// Persistable copy of the process table.
    pub fn snapshot(&self) -> SchedulerSnapshot {
        let mut processes: Vec<_> = self.processes.values().map(|e| e.pcb.clone()).collect();
        processes.sort_by_key(|pcb| pcb.registered);
        SchedulerSnapshot {
            next_root: self.next_root,
            next_registration: self.next_registration,
            processes,
        }
    }

    /// Rebuild a scheduler from a snapshot, instantiating each process's
    /// routine from `registry`.
    ///
    /// Processes of unknown kind are dropped, and so is everything whose parent
    /// chain no longer resolves. Duplicate ids make the snapshot invalid.
    pub fn restore(
        registry: RoutineRegistry,
        max_processes: usize,
        snapshot: SchedulerSnapshot,
    ) -> Result<Self> {
        {
            let mut seen = HashSet::new();
            for pcb in &snapshot.processes {
                if !seen.insert(&pcb.id) {
                    return Err(Error::snapshot(format!("duplicate process id: {}", pcb.id)));
                }
            }
        }

        let mut pcbs: Vec<ProcessControlBlock> = snapshot
            .processes
            .into_iter()
            .filter(|pcb| {
                if pcb.state.is_terminal() {
                    return false;
                }
                if !registry.contains(&pcb.kind) {
                    tracing::warn!(pid = %pcb.id, kind = %pcb.kind, "restore_unknown_kind");
                    return false;
                }
                true
            })
            .collect();

        // Drop orphans until every remaining parent link resolves.
        loop {
            let live: HashSet<ProcessId> = pcbs.iter().map(|pcb| pcb.id.clone()).collect();
            let before = pcbs.len();
            pcbs.retain(|pcb| match &pcb.parent_id {
                Some(parent) if !live.contains(parent) => {
                    tracing::warn!(pid = %pcb.id, parent_id = %parent, "restore_orphan_dropped");
                    false
                }
                _ => true,
            });
            if pcbs.len() == before {
                break;
            }
        }
        reject_parent_cycles(&pcbs)?;

        let next_registration = pcbs
            .iter()
            .map(|pcb| pcb.registered + 1)
            .max()
            .unwrap_or(0)
            .max(snapshot.next_registration);

        let mut scheduler = Self {
            next_root: snapshot.next_root,
            next_registration,
            ..Self::new(registry, max_processes)
        };
        for pcb in pcbs {
            let routine = scheduler.registry.instantiate(&pcb.kind)?;
            scheduler
                .processes
                .insert(pcb.id.clone(), ProcessEntry { pcb, routine });
        }

        tracing::debug!(processes = scheduler.processes.len(), "scheduler_restored");
        Ok(scheduler)
    }
}

/// Every parent chain must end at a root.
fn reject_parent_cycles(pcbs: &[ProcessControlBlock]) -> Result<()> {
    let parents: HashMap<&ProcessId, &ProcessId> = pcbs
        .iter()
        .filter_map(|pcb| pcb.parent_id.as_ref().map(|parent| (&pcb.id, parent)))
        .collect();

    for pcb in pcbs {
        let mut chain = HashSet::from([&pcb.id]);
        let mut current = &pcb.id;
        while let Some(parent) = parents.get(current) {
            if !chain.insert(*parent) {
                return Err(Error::snapshot(format!(
                    "parent cycle through process {}",
                    pcb.id
                )));
            }
            current = *parent;
        }
    }
    Ok(())
}

fn dispatch_cmp(a: &ProcessControlBlock, b: &ProcessControlBlock) -> Ordering {
    b.priority
        .total_cmp(&a.priority)
        .then_with(|| a.registered.cmp(&b.registered))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::budget::ManualClock;
    use crate::tracer::{NullTracer, RecordingTracer};
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    type Log = Rc<RefCell<Vec<String>>>;

    /// Records its pid and returns a fixed result.
    #[derive(Debug)]
    struct Scripted {
        log: Log,
        result: RunResult,
    }

    impl Routine for Scripted {
        fn run(&mut self, ctx: &mut RunContext<'_>) -> Result<RunResult> {
            self.log.borrow_mut().push(ctx.pid().to_string());
            Ok(self.result)
        }
    }

    #[derive(Debug)]
    struct Faulty;

    impl Routine for Faulty {
        fn run(&mut self, _ctx: &mut RunContext<'_>) -> Result<RunResult> {
            Err(Error::stale_reference("target structure is gone"))
        }
    }

    #[derive(Debug)]
    struct Spawner;

    impl Routine for Spawner {
        fn run(&mut self, ctx: &mut RunContext<'_>) -> Result<RunResult> {
            ctx.spawn_child("worker", 1.0, Value::Null)?;
            Ok(RunResult::Running)
        }
    }

    fn registry(log: &Log) -> RoutineRegistry {
        let mut registry = RoutineRegistry::new();
        let (a, b, c) = (log.clone(), log.clone(), log.clone());
        registry
            .register("worker", move || Scripted {
                log: a.clone(),
                result: RunResult::Running,
            })
            .register("napper", move || Scripted {
                log: b.clone(),
                result: RunResult::Sleeping(3),
            })
            .register("quitter", move || Scripted {
                log: c.clone(),
                result: RunResult::Terminated,
            })
            .register("faulty", || Faulty)
            .register("spawner", || Spawner);
        registry
    }

    fn scheduler() -> (Scheduler, Log) {
        let log = Log::default();
        (Scheduler::new(registry(&log), 100), log)
    }

    fn run(scheduler: &mut Scheduler, tick: Tick) -> TickReport {
        let mut topics = TopicBus::default();
        scheduler.dispatch(tick, &mut topics, &TickBudget::unlimited(), &NullTracer)
    }

    #[test]
    fn test_dispatch_order_priority_then_registration() {
        let (mut sched, log) = scheduler();
        let low = sched.spawn(SpawnRequest::new("worker", 1.0), 0).unwrap();
        let high = sched.spawn(SpawnRequest::new("worker", 9.0), 0).unwrap();
        let tie = sched.spawn(SpawnRequest::new("worker", 1.0), 0).unwrap();

        assert_eq!(sched.dispatch_order(), vec![high.clone(), low.clone(), tie.clone()]);
        run(&mut sched, 0);
        assert_eq!(
            *log.borrow(),
            vec![high.to_string(), low.to_string(), tie.to_string()]
        );
    }

    #[test]
    fn test_root_ids_are_sequential() {
        let (mut sched, _log) = scheduler();
        let a = sched.spawn(SpawnRequest::new("worker", 1.0), 0).unwrap();
        let b = sched.spawn(SpawnRequest::new("napper", 1.0), 0).unwrap();
        assert_eq!(a.as_str(), "worker:0");
        assert_eq!(b.as_str(), "napper:1");
    }

    #[test]
    fn test_spawn_validation() {
        let (mut sched, _log) = scheduler();
        assert!(matches!(
            sched.spawn(SpawnRequest::new("", 1.0), 0),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            sched.spawn(SpawnRequest::new("worker", f64::NAN), 0),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            sched.spawn(SpawnRequest::new("miner", 1.0), 0),
            Err(Error::Config(_))
        ));
        let orphan = SpawnRequest::new("worker", 1.0).with_parent(ProcessId::root(&"x".into(), 7));
        assert!(matches!(sched.spawn(orphan, 0), Err(Error::Config(_))));
        assert_eq!(sched.count(), 0);
    }

    #[test]
    fn test_capacity_limit() {
        let log = Log::default();
        let mut sched = Scheduler::new(registry(&log), 1);
        sched.spawn(SpawnRequest::new("worker", 1.0), 0).unwrap();
        let err = sched.spawn(SpawnRequest::new("worker", 1.0), 0).unwrap_err();
        assert!(err.to_string().contains("full"));
    }

    #[test]
    fn test_sleeping_process_skipped_until_wake() {
        let (mut sched, log) = scheduler();
        let pid = sched.spawn(SpawnRequest::new("napper", 1.0), 0).unwrap();

        assert_eq!(run(&mut sched, 10).ran, 1);
        assert_eq!(sched.get(&pid).unwrap().wake_tick, 13);
        assert_eq!(sched.count_by_state(ProcessState::Sleeping, 11), 1);

        for tick in 11..13 {
            let report = run(&mut sched, tick);
            assert_eq!((report.ran, report.sleeping), (0, 1));
        }
        assert_eq!(sched.count_by_state(ProcessState::Sleeping, 13), 0);
        assert_eq!(sched.count_by_state(ProcessState::Running, 13), 1);
        assert_eq!(run(&mut sched, 13).ran, 1);
        assert_eq!(log.borrow().len(), 2);
    }

    #[test]
    fn test_terminated_cascades_to_descendants() {
        let (mut sched, _log) = scheduler();
        let root = sched.spawn(SpawnRequest::new("quitter", 1.0), 0).unwrap();
        let child = sched
            .spawn(SpawnRequest::new("worker", 5.0).with_parent(root.clone()), 0)
            .unwrap();
        sched
            .spawn(SpawnRequest::new("worker", 5.0).with_parent(child.clone()), 0)
            .unwrap();
        let bystander = sched.spawn(SpawnRequest::new("worker", 0.5), 0).unwrap();

        let report = run(&mut sched, 0);
        // Children outrank the root, so they ran before the cascade.
        assert_eq!(report.ran, 4);
        assert_eq!(report.terminated, 3);
        assert_eq!(sched.count(), 1);
        assert!(sched.get(&bystander).is_some());
    }

    #[test]
    fn test_cascade_skips_lower_priority_descendants() {
        let (mut sched, log) = scheduler();
        let root = sched.spawn(SpawnRequest::new("quitter", 9.0), 0).unwrap();
        sched
            .spawn(SpawnRequest::new("worker", 1.0).with_parent(root.clone()), 0)
            .unwrap();

        let report = run(&mut sched, 0);
        assert_eq!(report.ran, 1);
        assert_eq!(*log.borrow(), vec![root.to_string()]);
        assert_eq!(sched.count(), 0);
    }

    #[test]
    fn test_fault_isolated_to_subtree() {
        let (mut sched, log) = scheduler();
        let faulty = sched.spawn(SpawnRequest::new("faulty", 9.0), 0).unwrap();
        sched
            .spawn(SpawnRequest::new("worker", 1.0).with_parent(faulty), 0)
            .unwrap();
        let sibling = sched.spawn(SpawnRequest::new("worker", 5.0), 0).unwrap();

        let tracer = RecordingTracer::new();
        let mut topics = TopicBus::default();
        let report = sched.dispatch(0, &mut topics, &TickBudget::unlimited(), &tracer);

        assert_eq!(report.faulted, 1);
        assert_eq!(report.terminated, 2);
        assert_eq!(*log.borrow(), vec![sibling.to_string()]);
        assert_eq!(tracer.errors().len(), 1);
        assert_eq!(tracer.errors()[0].msg, "routine fault");
    }

    #[test]
    fn test_children_spawned_mid_tick_run_next_tick() {
        let (mut sched, log) = scheduler();
        let parent = sched.spawn(SpawnRequest::new("spawner", 1.0), 0).unwrap();

        let report = run(&mut sched, 0);
        assert_eq!(report.spawned, 1);
        assert!(log.borrow().is_empty());

        let children = sched.children(&parent);
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].as_str(), "spawner:0/worker:0");

        run(&mut sched, 1);
        assert_eq!(*log.borrow(), vec!["spawner:0/worker:0".to_string()]);
    }

    #[test]
    fn test_budget_defers_remaining_processes() {
        let (mut sched, log) = scheduler();
        for _ in 0..3 {
            sched.spawn(SpawnRequest::new("worker", 1.0), 0).unwrap();
        }
        let clock = ManualClock::new();
        let budget = TickBudget::new(Duration::from_millis(5), Box::new(clock.clone()));
        clock.set(Duration::from_millis(5));

        let mut topics = TopicBus::default();
        let report = sched.dispatch(0, &mut topics, &budget, &NullTracer);
        assert_eq!((report.ran, report.deferred), (0, 3));
        assert!(log.borrow().is_empty());

        let report = run(&mut sched, 1);
        assert_eq!(report.ran, 3);
    }

    #[test]
    fn test_kill_unknown_is_not_found() {
        let (mut sched, _log) = scheduler();
        let err = sched.kill(&ProcessId::root(&"worker".into(), 0)).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_restore_drops_unknown_kinds_and_orphans() {
        let (mut sched, log) = scheduler();
        let parent = sched.spawn(SpawnRequest::new("napper", 1.0), 0).unwrap();
        let child = sched
            .spawn(SpawnRequest::new("worker", 1.0).with_parent(parent.clone()), 0)
            .unwrap();
        sched
            .spawn(SpawnRequest::new("worker", 1.0).with_parent(child), 0)
            .unwrap();
        let survivor = sched.spawn(SpawnRequest::new("worker", 1.0), 0).unwrap();
        let snapshot = sched.snapshot();

        // A registry that no longer knows "napper".
        let mut registry = RoutineRegistry::new();
        let l = log.clone();
        registry.register("worker", move || Scripted {
            log: l.clone(),
            result: RunResult::Running,
        });

        let restored = Scheduler::restore(registry, 100, snapshot).unwrap();
        assert_eq!(restored.count(), 1);
        assert!(restored.get(&survivor).is_some());
        assert_eq!(restored.next_registration, 4);
    }

    #[test]
    fn test_restore_rejects_duplicate_ids() {
        let (mut sched, log) = scheduler();
        sched.spawn(SpawnRequest::new("worker", 1.0), 0).unwrap();
        let mut snapshot = sched.snapshot();
        snapshot.processes.push(snapshot.processes[0].clone());

        let err = Scheduler::restore(registry(&log), 100, snapshot).unwrap_err();
        assert!(matches!(err, Error::Snapshot(_)));
    }

    #[test]
    fn test_restore_rejects_self_parent() {
        let (mut sched, log) = scheduler();
        let pid = sched.spawn(SpawnRequest::new("worker", 1.0), 0).unwrap();
        let mut snapshot = sched.snapshot();
        snapshot.processes[0].parent_id = Some(pid);

        let err = Scheduler::restore(registry(&log), 100, snapshot).unwrap_err();
        assert!(matches!(err, Error::Snapshot(_)));
    }

    #[test]
    fn test_restore_rejects_parent_cycle() {
        let (mut sched, log) = scheduler();
        let a = sched.spawn(SpawnRequest::new("worker", 1.0), 0).unwrap();
        let b = sched
            .spawn(SpawnRequest::new("worker", 1.0).with_parent(a.clone()), 0)
            .unwrap();
        sched
            .spawn(SpawnRequest::new("worker", 1.0).with_parent(b.clone()), 0)
            .unwrap();
        let mut snapshot = sched.snapshot();
        let root = snapshot.processes.iter_mut().find(|p| p.id == a).unwrap();
        root.parent_id = Some(b);

        let err = Scheduler::restore(registry(&log), 100, snapshot).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_descendants_terminates_on_cyclic_links() {
        let (mut sched, _log) = scheduler();
        let a = sched.spawn(SpawnRequest::new("worker", 1.0), 0).unwrap();
        let b = sched
            .spawn(SpawnRequest::new("worker", 1.0).with_parent(a.clone()), 0)
            .unwrap();
        if let Some(entry) = sched.processes.get_mut(&a) {
            entry.pcb.parent_id = Some(b.clone());
        }

        assert_eq!(sched.descendants(&a), vec![b]);
        assert_eq!(sched.kill(&a).unwrap().len(), 2);
        assert_eq!(sched.count(), 0);
    }

    #[test]
    fn test_child_id_skips_restored_collision() {
        let (mut sched, _log) = scheduler();
        let parent = sched.spawn(SpawnRequest::new("spawner", 1.0), 0).unwrap();
        let existing = sched
            .spawn(SpawnRequest::new("worker", 1.0).with_parent(parent.clone()), 0)
            .unwrap();
        assert_eq!(existing.as_str(), "spawner:0/worker:0");

        let mut snapshot = sched.snapshot();
        snapshot.processes[0].next_child = 0;
        let log = Log::default();
        let mut restored = Scheduler::restore(registry(&log), 100, snapshot).unwrap();

        let report = run(&mut restored, 1);
        assert_eq!(report.spawned, 1);
        assert_eq!(restored.count(), 3);
        assert_eq!(
            restored.children(&parent)[1].as_str(),
            "spawner:0/worker:1"
        );
    }

    #[test]
    fn test_restore_keeps_id_counters() {
        let (mut sched, log) = scheduler();
        sched.spawn(SpawnRequest::new("worker", 1.0), 0).unwrap();
        let snapshot = sched.snapshot();

        let mut restored = Scheduler::restore(registry(&log), 100, snapshot).unwrap();
        let next = restored.spawn(SpawnRequest::new("worker", 1.0), 0).unwrap();
        assert_eq!(next.as_str(), "worker:1");
    }
}
