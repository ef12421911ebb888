//! Kernel - the tick-driven process scheduler.
//!
//! The Kernel owns all mutable state: the process table and the topic bus.
//! The host calls [`Kernel::tick`] once per external tick, then persists
//! [`Kernel::snapshot`] until the next invocation. Subsystems (scheduler,
//! budget, throttles) are plain structs owned by the Kernel, not globals.

use serde_json::{json, Value};

use crate::topics::TopicBus;
use crate::tracer::Tracer;
use crate::types::{Config, ProcessId, Result, Tick};

pub mod budget;
pub mod recovery;
pub mod routine;
pub mod scheduler;
pub mod snapshot;
pub mod throttle;
pub mod types;

pub use budget::{CpuClock, ManualClock, TickBudget, WallClock};
pub use recovery::with_recovery;
pub use routine::{Routine, RoutineRegistry, RunContext};
pub use scheduler::{Scheduler, SpawnRequest, TickReport};
pub use snapshot::{KernelSnapshot, SchedulerSnapshot};
pub use throttle::{Throttle, Throttles};
pub use types::{ProcessControlBlock, ProcessState, RunResult};

/// Scheduler plus message bus, driven one tick at a time.
#[derive(Debug)]
pub struct Kernel {
    config: Config,
    scheduler: Scheduler,
    topics: TopicBus,
    last_tick: Option<Tick>,
}

impl Kernel {
    pub fn new(config: Config, registry: RoutineRegistry) -> Self {
        Self {
            scheduler: Scheduler::new(registry, config.kernel.max_processes),
            topics: TopicBus::new(config.topics.clone()),
            last_tick: None,
            config,
        }
    }

    /// Rehydrate a kernel persisted by [`Kernel::snapshot`].
    pub fn restore(
        config: Config,
        registry: RoutineRegistry,
        snapshot: KernelSnapshot,
    ) -> Result<Self> {
        let scheduler =
            Scheduler::restore(registry, config.kernel.max_processes, snapshot.scheduler)?;
        let mut topics = snapshot.topics;
        topics.set_config(config.topics.clone());
        topics.normalize();
        if let Some(last) = snapshot.last_tick {
            topics.set_tick(last);
        }

        tracing::info!(
            processes = scheduler.count(),
            topics = topics.topic_names().len(),
            last_tick = ?snapshot.last_tick,
            "kernel_restored"
        );
        Ok(Self {
            config,
            scheduler,
            topics,
            last_tick: snapshot.last_tick,
        })
    }

    /// [`Kernel::restore`] from the plain key/value form written by [`Kernel::save`].
    pub fn load(config: Config, registry: RoutineRegistry, raw: &Value) -> Result<Self> {
        Self::restore(config, registry, KernelSnapshot::from_value(raw)?)
    }

    pub fn snapshot(&self) -> KernelSnapshot {
        KernelSnapshot {
            last_tick: self.last_tick,
            scheduler: self.scheduler.snapshot(),
            topics: self.topics.clone(),
        }
    }

    pub fn save(&self) -> Result<Value> {
        self.snapshot().to_value()
    }

    /// Create a process from the host side. It is eligible from the next tick.
    ///
    /// Malformed requests are logged and rejected; nothing is created.
    pub fn spawn(&mut self, request: SpawnRequest) -> Result<ProcessId> {
        let kind = request.kind.clone();
        let wake_tick = self.next_tick();
        self.scheduler.spawn(request, wake_tick).map_err(|err| {
            tracing::warn!(kind = %kind, error = %err, "spawn_rejected");
            err
        })
    }

    /// Terminate `pid` and its descendants. Returns the removed ids.
    pub fn kill(&mut self, pid: &ProcessId) -> Result<Vec<ProcessId>> {
        let removed = self.scheduler.kill(pid)?;
        tracing::info!(pid = %pid, removed = removed.len(), "process_killed");
        Ok(removed)
    }

    /// Queue a request from the host side, stamped with the next tick so its
    /// ttl counts from the tick that can first read it.
    pub fn send_request(
        &mut self,
        topic: &str,
        priority: f64,
        details: Value,
        ttl: Tick,
    ) -> Result<u64> {
        let current = self.topics.tick();
        self.topics.set_tick(self.next_tick());
        let sent = self.topics.send_request(topic, priority, details, ttl);
        self.topics.set_tick(current);
        sent
    }

    /// Run one tick under the configured wall-clock budget.
    pub fn tick(&mut self, tick: Tick, tracer: &dyn Tracer) -> TickReport {
        let budget = TickBudget::wall_clock(self.config.kernel.tick_budget);
        self.tick_with_budget(tick, &budget, tracer)
    }

    /// Run one tick under a caller-supplied budget.
    ///
    /// Ticks must increase. A repeated or older tick is ignored with a warning.
    pub fn tick_with_budget(
        &mut self,
        tick: Tick,
        budget: &TickBudget,
        tracer: &dyn Tracer,
    ) -> TickReport {
        if let Some(last) = self.last_tick {
            if tick <= last {
                tracing::warn!(tick, last_tick = last, "tick_not_advancing");
                return TickReport {
                    tick,
                    ..TickReport::default()
                };
            }
        }

        self.topics.set_tick(tick);
        let span = tracer.begin("tick");
        let report = self
            .scheduler
            .dispatch(tick, &mut self.topics, budget, &*span);
        span.log(
            "tick complete",
            &json!({
                "tick": tick,
                "ran": report.ran,
                "deferred": report.deferred,
                "terminated": report.terminated,
                "faulted": report.faulted,
            }),
        );
        span.end();
        self.last_tick = Some(tick);

        tracing::debug!(
            tick,
            ran = report.ran,
            sleeping = report.sleeping,
            deferred = report.deferred,
            spawned = report.spawned,
            terminated = report.terminated,
            faulted = report.faulted,
            "tick_complete"
        );
        report
    }

    /// Tick the host should run next.
    pub fn next_tick(&self) -> Tick {
        self.last_tick.map_or(0, |t| t.saturating_add(1))
    }

    pub fn last_tick(&self) -> Option<Tick> {
        self.last_tick
    }

    pub fn topics(&self) -> &TopicBus {
        &self.topics
    }

    /// Direct bus access. Sends through here are stamped with the last tick;
    /// host requests should go through [`Kernel::send_request`].
    pub fn topics_mut(&mut self) -> &mut TopicBus {
        &mut self.topics
    }

    /// Count processes by state as of the next tick.
    pub fn count_by_state(&self, state: ProcessState) -> usize {
        self.scheduler.count_by_state(state, self.next_tick())
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
