//! # Tickos Core - Tick-Driven Cooperative Process Kernel
//!
//! Kernel for programs that are invoked once per discrete tick under a hard
//! compute budget, with no threads and no memory surviving between
//! invocations except what they serialize themselves:
//! - Priority-ordered, crash-isolated dispatch of resumable processes
//! - Parent/child process trees with cascading termination
//! - Topic bus of expiring, prioritized work requests
//! - Per-tick compute budget, checked between invocations
//! - Snapshot/restore of the whole kernel as plain JSON
//!
//! ## Architecture
//!
//! The host owns one `Kernel` and calls it once per tick:
//! ```text
//!                    ┌─────────────────────────────────┐
//!   host tick()   →  │             Kernel              │
//!                    │  ┌─────────┐ ┌─────────┐        │
//!                    │  │Scheduler│ │ Topic   │        │
//!                    │  │ + PCBs  │ │  Bus    │        │
//!                    │  └─────────┘ └─────────┘        │
//!                    │  ┌─────────┐ ┌─────────┐        │
//!                    │  │  Tick   │ │Routine  │        │
//!                    │  │ Budget  │ │Registry │        │
//!                    │  └─────────┘ └─────────┘        │
//!                    └─────────────────────────────────┘
//!                                   ↓
//!                          KernelSnapshot (JSON)
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

// Re-export public API
pub mod kernel;
pub mod tasks;
pub mod topics;
pub mod tracer;
pub mod types;

// Internal utilities
pub mod observability;
pub mod validation;

pub use kernel::{Kernel, KernelSnapshot, Routine, RoutineRegistry, RunContext, RunResult, SpawnRequest};
pub use topics::{Message, TopicBus};
pub use tracer::Tracer;
pub use types::{Config, Error, Result};
