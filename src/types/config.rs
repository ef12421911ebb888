//! Configuration structures.
//!
//! Configuration is loaded from JSON files; every section falls back to its
//! defaults when omitted.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::errors::Result;

/// Global kernel configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Scheduler configuration.
    #[serde(default)]
    pub kernel: KernelConfig,

    /// Topic bus configuration.
    #[serde(default)]
    pub topics: TopicsConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Parse a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KernelConfig {
    /// Compute ceiling for one tick's dispatch pass.
    #[serde(with = "humantime_serde")]
    pub tick_budget: Duration,

    /// Maximum number of live processes. Spawns beyond it are rejected.
    pub max_processes: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            tick_budget: Duration::from_millis(20),
            max_processes: 1000,
        }
    }
}

/// Topic bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TopicsConfig {
    /// Message TTLs above this are clamped on send.
    pub max_ttl: u64,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self { max_ttl: 1500 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}
