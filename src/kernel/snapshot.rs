//! Persisted kernel state.
//!
//! Written at the end of every tick and read back at the start of the next
//! one. Routine instances are not part of it; see [`super::routine`].

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::types::ProcessControlBlock;
use crate::topics::TopicBus;
use crate::types::{Error, Result, Tick};

/// Process table with its id counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSnapshot {
    pub next_root: u64,
    pub next_registration: u64,
    pub processes: Vec<ProcessControlBlock>,
}

/// Everything that survives between ticks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelSnapshot {
    pub last_tick: Option<Tick>,
    pub scheduler: SchedulerSnapshot,
    pub topics: TopicBus,
}

impl KernelSnapshot {
    pub fn from_value(raw: &serde_json::Value) -> Result<Self> {
        Self::deserialize(raw).map_err(|e| Error::snapshot(format!("malformed snapshot: {}", e)))
    }

    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Read a snapshot file. A missing file yields `Ok(None)`.
    pub fn read_from(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)?;
        let value: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|e| Error::snapshot(format!("{}: {}", path.display(), e)))?;
        Self::from_value(&value).map(Some)
    }

    /// Write the snapshot, replacing the file atomically.
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec(self)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}
