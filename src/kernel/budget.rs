//! Per-tick compute budget.
//!
//! The host imposes a hard ceiling on how much compute one tick may use. The
//! scheduler consults a [`TickBudget`] only between routine invocations; a
//! routine that is already running is never interrupted.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Source of "compute used so far this tick".
pub trait CpuClock: fmt::Debug {
    fn used(&self) -> Duration;
}

/// Measures wall time since construction.
#[derive(Debug, Clone, Copy)]
pub struct WallClock {
    started: Instant,
}

impl WallClock {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl CpuClock for WallClock {
    fn used(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Clock driven by the host, for environments that report their own usage.
///
/// Clones share the same counter.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    used: Rc<Cell<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.used.set(self.used.get().saturating_add(by));
    }

    pub fn set(&self, used: Duration) {
        self.used.set(used);
    }
}

impl CpuClock for ManualClock {
    fn used(&self) -> Duration {
        self.used.get()
    }
}

/// Remaining compute for one dispatch pass.
#[derive(Debug)]
pub struct TickBudget {
    limit: Duration,
    clock: Box<dyn CpuClock>,
}

impl TickBudget {
    pub fn new(limit: Duration, clock: Box<dyn CpuClock>) -> Self {
        Self { limit, clock }
    }

    /// Wall-clock budget starting now.
    pub fn wall_clock(limit: Duration) -> Self {
        Self::new(limit, Box::new(WallClock::start()))
    }

    /// Budget that never runs out.
    pub fn unlimited() -> Self {
        Self::new(Duration::MAX, Box::new(ManualClock::new()))
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    pub fn used(&self) -> Duration {
        self.clock.used()
    }

    pub fn remaining(&self) -> Duration {
        self.limit.saturating_sub(self.clock.used())
    }

    pub fn is_exhausted(&self) -> bool {
        self.clock.used() >= self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_drives_budget() {
        let clock = ManualClock::new();
        let budget = TickBudget::new(Duration::from_millis(10), Box::new(clock.clone()));

        assert!(!budget.is_exhausted());
        clock.advance(Duration::from_millis(4));
        assert_eq!(budget.remaining(), Duration::from_millis(6));

        clock.advance(Duration::from_millis(6));
        assert!(budget.is_exhausted());
        assert_eq!(budget.remaining(), Duration::ZERO);
    }

    #[test]
    fn test_unlimited_never_exhausts() {
        let budget = TickBudget::unlimited();
        assert!(!budget.is_exhausted());
        assert_eq!(budget.limit(), Duration::MAX);
    }

    #[test]
    fn test_zero_budget_is_exhausted_immediately() {
        let budget = TickBudget::new(Duration::ZERO, Box::new(ManualClock::new()));
        assert!(budget.is_exhausted());
    }
}
