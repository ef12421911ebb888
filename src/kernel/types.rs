//! Kernel types: ProcessState, RunResult, ProcessControlBlock.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{ProcessId, RoutineKind, Tick};

/// Process lifecycle state.
///
/// State transitions:
/// ```text
/// RUNNING ⇄ SLEEPING
///    ↓         ↓
///      TERMINATED
/// ```
/// Only the process's own [`RunResult`] moves it, except that terminating an
/// ancestor terminates it too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    #[default]
    Running,
    Sleeping,
    Terminated,
}

impl ProcessState {
    /// Check if this is a terminal state.
    pub fn is_terminal(self) -> bool {
        self == ProcessState::Terminated
    }
}

/// What a routine asks the scheduler to do with it after one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunResult {
    /// Run again on the next tick.
    Running,
    /// Skip this many ticks. `Sleeping(0)` behaves like `Running`.
    Sleeping(Tick),
    /// Remove the process and all its descendants.
    Terminated,
}

impl RunResult {
    /// `Sleeping(n)` for non-zero `n`, otherwise `Running`.
    pub fn sleep_or_run(ticks: Tick) -> Self {
        if ticks == 0 {
            RunResult::Running
        } else {
            RunResult::Sleeping(ticks)
        }
    }
}

/// Process Control Block - the kernel's persisted record of one process.
///
/// Everything in here survives snapshot/restore; the routine instance itself
/// is rebuilt from `kind`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessControlBlock {
    // Identity
    pub id: ProcessId,
    pub kind: RoutineKind,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<ProcessId>,

    // Scheduling
    pub priority: f64,
    pub state: ProcessState,
    pub wake_tick: Tick,

    /// Registration order, the tie-breaker among equal priorities.
    pub registered: u64,

    /// Counter for ids of children spawned by this process.
    #[serde(default)]
    pub next_child: u64,

    /// Opaque per-routine memory, persisted verbatim.
    #[serde(default)]
    pub memory: Value,
}

impl ProcessControlBlock {
    pub fn new(
        id: ProcessId,
        kind: RoutineKind,
        parent_id: Option<ProcessId>,
        priority: f64,
        registered: u64,
        wake_tick: Tick,
    ) -> Self {
        Self {
            id,
            kind,
            parent_id,
            priority,
            state: ProcessState::Running,
            wake_tick,
            registered,
            next_child: 0,
            memory: Value::Null,
        }
    }

    /// Check if the process may run at `tick`.
    pub fn is_eligible(&self, tick: Tick) -> bool {
        !self.state.is_terminal() && self.wake_tick <= tick
    }

    /// State as seen at `tick`. A sleeper whose wake tick has arrived counts
    /// as running even though the stored state changes only on its next run.
    pub fn state_at(&self, tick: Tick) -> ProcessState {
        match self.state {
            ProcessState::Sleeping if self.wake_tick <= tick => ProcessState::Running,
            state => state,
        }
    }

    /// Apply a run result observed at `tick`.
    pub fn apply(&mut self, result: RunResult, tick: Tick) {
        match result {
            RunResult::Running => {
                self.state = ProcessState::Running;
                self.wake_tick = tick;
            }
            RunResult::Sleeping(ticks) => {
                self.state = ProcessState::Sleeping;
                self.wake_tick = tick.saturating_add(ticks);
            }
            RunResult::Terminated => {
                self.state = ProcessState::Terminated;
            }
        }
    }

    /// Allocate the id for the next child of this process.
    pub(crate) fn allocate_child_id(&mut self, kind: &RoutineKind) -> ProcessId {
        let id = ProcessId::child(&self.id, kind, self.next_child);
        self.next_child += 1;
        id
    }
}
