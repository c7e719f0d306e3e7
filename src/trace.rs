//! Structured operation trace.
//!
//! Pipeline stages report what they did through a [`TraceSink`] instead of
//! building log strings inline. [`TraceLog`] is the standard sink: it keeps
//! the events so they can be returned to API callers (`logs` in upload and
//! query responses) and mirrors every event to `tracing` at debug level.

use serde::Serialize;
use serde_json::Value;

/// Kind of a trace event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Info,
    Request,
    Response,
}

/// One structured record of a sub-operation.
#[derive(Debug, Clone, Serialize)]
pub struct TraceEvent {
    /// Subsystem that produced the event (e.g. `"DocumentProcessor"`, `"VectorIndex"`).
    pub system: &'static str,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub operation: &'static str,
    pub data: Value,
}

/// Receiver for trace events.
pub trait TraceSink: Send {
    fn record(&mut self, event: TraceEvent);

    fn info(&mut self, system: &'static str, operation: &'static str, data: Value) {
        self.record(TraceEvent {
            system,
            kind: EventKind::Info,
            operation,
            data,
        });
    }

    fn request(&mut self, system: &'static str, operation: &'static str, data: Value) {
        self.record(TraceEvent {
            system,
            kind: EventKind::Request,
            operation,
            data,
        });
    }

    fn response(&mut self, system: &'static str, operation: &'static str, data: Value) {
        self.record(TraceEvent {
            system,
            kind: EventKind::Response,
            operation,
            data,
        });
    }
}

/// Collecting sink that also forwards each event to `tracing`.
#[derive(Debug, Default)]
pub struct TraceLog {
    events: Vec<TraceEvent>,
}

impl TraceLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }
}

impl TraceSink for TraceLog {
    fn record(&mut self, event: TraceEvent) {
        tracing::debug!(
            system = event.system,
            kind = ?event.kind,
            operation = event.operation,
            data = %event.data,
            "trace"
        );
        self.events.push(event);
    }
}
