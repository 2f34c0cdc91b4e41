//! Structured tracer event stream.

use crate::identifier::{Atom, ProjectRoot};
use crate::solver::failure::{FailureKind, SolveError};

/// One event in the trace of a solve. Consumers receive these through a
/// `Tracer` sink; the core never formats them for display itself.
#[derive(Clone, Debug)]
pub enum TraceEvent {
    Select { atom: Atom, packages: Vec<String> },
    ExpandPkgs { atom: Atom, packages: Vec<String> },
    BackjumpTo { atom: Atom },
    Failure { kind: FailureKind, causal_set: Vec<ProjectRoot>, message: String },
    Done,
}

/// A sink for `TraceEvent`s. `Trace(bool + sink)` in `SolveParameters`'s
/// terms: when tracing is off, callers pass `NullTracer`.
pub trait Tracer: Send + Sync {
    fn emit(&self, event: TraceEvent);
}

pub struct NullTracer;

impl Tracer for NullTracer {
    fn emit(&self, _event: TraceEvent) {}
}

/// Collects events in memory, for tests and for front-ends that want to
/// replay a trace after the fact rather than stream it live.
#[derive(Default)]
pub struct RecordingTracer {
    events: std::sync::Mutex<Vec<TraceEvent>>,
}

impl RecordingTracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().expect("tracer mutex poisoned").clone()
    }
}

impl Tracer for RecordingTracer {
    fn emit(&self, event: TraceEvent) {
        self.events.lock().expect("tracer mutex poisoned").push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_tracer_preserves_order() {
        let tracer = RecordingTracer::new();
        tracer.emit(TraceEvent::Done);
        assert_eq!(tracer.events().len(), 1);
    }
}
