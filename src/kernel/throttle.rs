//! Tick-based throttling.
//!
//! A [`Throttle`] lets a process that runs every tick execute an expensive
//! side-routine (status reporting, order book refresh) at most once per
//! `period` ticks. It counts external ticks, not invocations, so a process
//! that slept in between is not penalised.
//!
//! Both types are serde-friendly and meant to live in process memory.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::Tick;

/// Single throttled action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Throttle {
    period: Tick,
    #[serde(default)]
    last_run: Option<Tick>,
}

impl Throttle {
    pub fn new(period: Tick) -> Self {
        Self {
            period,
            last_run: None,
        }
    }

    pub fn period(&self) -> Tick {
        self.period
    }

    pub fn last_run(&self) -> Option<Tick> {
        self.last_run
    }

    /// Check if a call at `tick` would execute.
    pub fn is_due(&self, tick: Tick) -> bool {
        match self.last_run {
            None => true,
            Some(last) => tick >= last.saturating_add(self.period),
        }
    }

    /// Run `action` if due at `tick`, returning its output; otherwise `None`.
    pub fn call<T>(&mut self, tick: Tick, action: impl FnOnce() -> T) -> Option<T> {
        if !self.is_due(tick) {
            return None;
        }
        self.last_run = Some(tick);
        Some(action())
    }

    /// Make the next call execute regardless of the period.
    pub fn reset(&mut self) {
        self.last_run = None;
    }
}

/// Named throttles, one per side-routine of a process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Throttles {
    entries: BTreeMap<String, Throttle>,
}

impl Throttles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` under the throttle called `name`, creating it with
    /// `period` on first use. A changed `period` takes effect immediately.
    pub fn call<T>(
        &mut self,
        name: &str,
        period: Tick,
        tick: Tick,
        action: impl FnOnce() -> T,
    ) -> Option<T> {
        let throttle = self
            .entries
            .entry(name.to_string())
            .or_insert_with(|| Throttle::new(period));
        throttle.period = period;
        throttle.call(tick, action)
    }

    pub fn reset(&mut self, name: &str) {
        if let Some(throttle) = self.entries.get_mut(name) {
            throttle.reset();
        }
    }

    pub fn get(&self, name: &str) -> Option<&Throttle> {
        self.entries.get(name)
    }
}
