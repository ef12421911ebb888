//! Core types for the tick kernel.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (ProcessId, RoutineKind)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Configuration for the kernel, topic bus, and logging

mod config;
mod errors;
mod ids;

pub use config::{Config, KernelConfig, ObservabilityConfig, TopicsConfig};
pub use errors::{Error, Result};
pub use ids::{ProcessId, RoutineKind};

/// Discrete external time step.
pub type Tick = u64;
