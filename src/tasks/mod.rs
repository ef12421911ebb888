//! Phased task workers.
//!
//! Many routines share one shape: take a request off a topic, walk it through
//! Load, Act and Unload while sleeping between steps, then go back to idle.
//! [`PhasedRoutine`] runs that loop over a [`PhasedWorker`] and keeps all of
//! its progress in process memory, so it survives snapshot/restore.
//!
//! A task must finish loading within its TTL, counted in elapsed ticks. When
//! the TTL runs out the task is dropped, not requeued, and the process goes
//! back to idle.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

use crate::kernel::{Routine, RunContext, RunResult, Throttles};
use crate::types::{Error, Result, Tick};

/// Ticks a task may spend in [`Phase::Load`].
pub const TASK_TTL: i64 = 25;

/// Sleep when the topic has nothing to take.
pub const NEW_TASK_SLEEP: Tick = 10;

/// Ticks between [`PhasedWorker::report_status`] calls.
pub const STATUS_PERIOD: Tick = 25;

/// Where the current task is. Persisted as `{"phase": "load", "ttl": 12}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Phase {
    Load { ttl: i64 },
    Act,
    Unload,
}

impl Phase {
    fn next(self) -> Option<Phase> {
        match self {
            Phase::Load { .. } => Some(Phase::Act),
            Phase::Act => Some(Phase::Unload),
            Phase::Unload => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Phase::Load { .. } => "load",
            Phase::Act => "act",
            Phase::Unload => "unload",
        }
    }
}

/// Outcome of one phase step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Stay in the current phase.
    Stay { sleep: Tick },
    /// Advance to the next phase; after Unload the task is complete.
    Next { sleep: Tick },
    /// Task complete.
    Done,
    /// Drop the task and go idle.
    Abandon,
}

/// Domain logic behind a [`PhasedRoutine`].
///
/// Returning [`Error::StaleReference`] from a phase abandons the task. Any
/// other error is a routine fault.
pub trait PhasedWorker: fmt::Debug {
    /// Task payload, decoded from the message details.
    type Details: Serialize + DeserializeOwned;

    /// Topic tasks are taken from.
    fn topic(&self) -> &str;

    fn load(&mut self, ctx: &mut RunContext<'_>, details: &mut Self::Details) -> Result<Step>;

    fn act(&mut self, ctx: &mut RunContext<'_>, details: &mut Self::Details) -> Result<Step>;

    fn unload(&mut self, ctx: &mut RunContext<'_>, details: &mut Self::Details) -> Result<Step>;

    /// Periodic status while a task is active, throttled to once per
    /// `status_period` ticks.
    fn report_status(&mut self, _ctx: &mut RunContext<'_>, _details: &Self::Details) -> Result<()> {
        Ok(())
    }
}

/// Timing knobs for a [`PhasedRoutine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhasedConfig {
    pub task_ttl: i64,
    pub idle_sleep: Tick,
    pub status_period: Tick,
}

impl Default for PhasedConfig {
    fn default() -> Self {
        Self {
            task_ttl: TASK_TTL,
            idle_sleep: NEW_TASK_SLEEP,
            status_period: STATUS_PERIOD,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct PhasedMemory {
    prev_tick: Option<Tick>,
    task: Option<ActiveTask>,
    throttles: Throttles,
}

#[derive(Debug, Serialize, Deserialize)]
struct ActiveTask {
    details: Value,
    #[serde(flatten)]
    phase: Phase,
}

/// Routine that drives a [`PhasedWorker`] through one task at a time.
#[derive(Debug)]
pub struct PhasedRoutine<W> {
    worker: W,
    config: PhasedConfig,
}

impl<W: PhasedWorker> PhasedRoutine<W> {
    pub fn new(worker: W) -> Self {
        Self::with_config(worker, PhasedConfig::default())
    }

    pub fn with_config(worker: W, config: PhasedConfig) -> Self {
        Self { worker, config }
    }

    pub fn worker(&self) -> &W {
        &self.worker
    }

    fn step(
        &mut self,
        ctx: &mut RunContext<'_>,
        memory: &mut PhasedMemory,
        elapsed: Tick,
    ) -> Result<RunResult> {
        let (mut task, elapsed) = match memory.task.take() {
            Some(task) => (task, elapsed),
            None => {
                let topic = self.worker.topic().to_string();
                let Some(message) = ctx.topics().get_next_request(&topic) else {
                    ctx.tracer().log("no available tasks", &json!({ "topic": topic }));
                    return Ok(RunResult::sleep_or_run(self.config.idle_sleep));
                };
                ctx.tracer()
                    .log("got new task", &json!({ "topic": topic, "details": message.details }));
                let task = ActiveTask {
                    details: message.details,
                    phase: Phase::Load {
                        ttl: self.config.task_ttl,
                    },
                };
                (task, 0)
            }
        };

        let mut details: W::Details = match serde_json::from_value(task.details.clone()) {
            Ok(details) => details,
            Err(err) => {
                ctx.tracer().error(
                    "malformed task details, dropping task",
                    &json!({ "details": task.details, "error": err.to_string() }),
                );
                tracing::warn!(pid = %ctx.pid(), error = %err, "task_details_malformed");
                return Ok(RunResult::Running);
            }
        };

        let period = self.config.status_period;
        let tick = ctx.tick();
        let worker = &mut self.worker;
        memory
            .throttles
            .call("status", period, tick, || worker.report_status(ctx, &details))
            .transpose()?;

        let step = match task.phase {
            Phase::Load { ttl } => {
                let ttl = ttl.min(self.config.task_ttl);
                if ttl <= 0 {
                    ctx.tracer()
                        .log("ttl exceeded, clearing task", &json!({ "details": task.details }));
                    tracing::debug!(pid = %ctx.pid(), "task_load_expired");
                    return Ok(RunResult::Running);
                }
                let elapsed = i64::try_from(elapsed).unwrap_or(i64::MAX);
                task.phase = Phase::Load {
                    ttl: ttl.saturating_sub(elapsed),
                };
                self.worker.load(ctx, &mut details)
            }
            Phase::Act => self.worker.act(ctx, &mut details),
            Phase::Unload => self.worker.unload(ctx, &mut details),
        };

        let step = match step {
            Ok(step) => step,
            Err(Error::StaleReference(reason)) => {
                ctx.tracer().log(
                    "stale reference, abandoning task",
                    &json!({ "phase": task.phase.name(), "reason": reason }),
                );
                return Ok(RunResult::Running);
            }
            Err(err) => return Err(err),
        };
        task.details = serde_json::to_value(&details)?;

        match step {
            Step::Stay { sleep } => {
                memory.task = Some(task);
                Ok(RunResult::sleep_or_run(sleep))
            }
            Step::Next { sleep } => {
                match task.phase.next() {
                    Some(phase) => {
                        ctx.tracer().log(
                            "phase complete",
                            &json!({ "from": task.phase.name(), "to": phase.name() }),
                        );
                        task.phase = phase;
                        memory.task = Some(task);
                    }
                    None => ctx.tracer().log("task complete", &Value::Null),
                }
                Ok(RunResult::sleep_or_run(sleep))
            }
            Step::Done => {
                ctx.tracer().log("task complete", &Value::Null);
                Ok(RunResult::Running)
            }
            Step::Abandon => {
                ctx.tracer()
                    .log("task abandoned", &json!({ "phase": task.phase.name() }));
                Ok(RunResult::Running)
            }
        }
    }
}

impl<W: PhasedWorker> Routine for PhasedRoutine<W> {
    fn run(&mut self, ctx: &mut RunContext<'_>) -> Result<RunResult> {
        let mut memory = match ctx.load::<PhasedMemory>() {
            Ok(memory) => memory,
            Err(err) => {
                ctx.tracer().error(
                    "task memory unreadable, resetting",
                    &json!({ "error": err.to_string() }),
                );
                PhasedMemory::default()
            }
        };

        let tick = ctx.tick();
        let elapsed = memory.prev_tick.map_or(0, |prev| tick.saturating_sub(prev));
        memory.prev_tick = Some(tick);

        let result = self.step(ctx, &mut memory, elapsed)?;
        ctx.store(&memory)?;
        Ok(result)
    }
}
