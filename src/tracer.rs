//! Hierarchical span logger handed to every routine.
//!
//! The kernel only ever calls into a [`Tracer`]; it never inspects what the
//! implementation does with the calls. [`SpanTracer`] forwards to the `tracing`
//! crate, [`NullTracer`] drops everything, and [`RecordingTracer`] keeps the
//! calls in memory for assertions.

use serde_json::Value;
use std::fmt;

/// Span logging capability.
pub trait Tracer: fmt::Debug {
    /// Open a child span.
    fn begin(&self, name: &str) -> Box<dyn Tracer>;

    fn log(&self, msg: &str, data: &Value);

    fn error(&self, msg: &str, data: &Value);

    /// Close this span. Calls after `end` are still accepted.
    fn end(&self);
}

/// Tracer backed by `tracing` spans and events.
#[derive(Debug, Clone)]
pub struct SpanTracer {
    span: tracing::Span,
}

impl SpanTracer {
    /// Root span for one tick of the host loop.
    pub fn root(name: &str) -> Self {
        Self {
            span: tracing::info_span!("trace", name = %name),
        }
    }
}

impl Tracer for SpanTracer {
    fn begin(&self, name: &str) -> Box<dyn Tracer> {
        Box::new(Self {
            span: tracing::debug_span!(parent: &self.span, "span", name = %name),
        })
    }

    fn log(&self, msg: &str, data: &Value) {
        tracing::debug!(parent: &self.span, data = %data, "{}", msg);
    }

    fn error(&self, msg: &str, data: &Value) {
        tracing::error!(parent: &self.span, data = %data, "{}", msg);
    }

    fn end(&self) {}
}

/// Tracer that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTracer;

impl Tracer for NullTracer {
    fn begin(&self, _name: &str) -> Box<dyn Tracer> {
        Box::new(NullTracer)
    }

    fn log(&self, _msg: &str, _data: &Value) {}

    fn error(&self, _msg: &str, _data: &Value) {}

    fn end(&self) {}
}

#[cfg(any(test, feature = "test-harness"))]
pub use recording::{RecordingTracer, TraceEntry, TraceLevel};

#[cfg(any(test, feature = "test-harness"))]
mod recording {
    use super::Tracer;
    use serde_json::Value;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum TraceLevel {
        Log,
        Error,
    }

    /// One captured `log`/`error` call. `path` is the span chain, `/`-joined.
    #[derive(Debug, Clone, PartialEq)]
    pub struct TraceEntry {
        pub path: String,
        pub level: TraceLevel,
        pub msg: String,
        pub data: Value,
    }

    /// Tracer that records calls into a shared buffer.
    #[derive(Debug, Clone, Default)]
    pub struct RecordingTracer {
        path: String,
        entries: Rc<RefCell<Vec<TraceEntry>>>,
    }

    impl RecordingTracer {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn entries(&self) -> Vec<TraceEntry> {
            self.entries.borrow().clone()
        }

        pub fn errors(&self) -> Vec<TraceEntry> {
            self.entries
                .borrow()
                .iter()
                .filter(|e| e.level == TraceLevel::Error)
                .cloned()
                .collect()
        }

        fn push(&self, level: TraceLevel, msg: &str, data: &Value) {
            self.entries.borrow_mut().push(TraceEntry {
                path: self.path.clone(),
                level,
                msg: msg.to_string(),
                data: data.clone(),
            });
        }
    }

    impl Tracer for RecordingTracer {
        fn begin(&self, name: &str) -> Box<dyn Tracer> {
            let path = if self.path.is_empty() {
                name.to_string()
            } else {
                format!("{}/{}", self.path, name)
            };
            Box::new(Self {
                path,
                entries: Rc::clone(&self.entries),
            })
        }

        fn log(&self, msg: &str, data: &Value) {
            self.push(TraceLevel::Log, msg, data);
        }

        fn error(&self, msg: &str, data: &Value) {
            self.push(TraceLevel::Error, msg, data);
        }

        fn end(&self) {}
    }
}
