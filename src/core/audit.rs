//! Audit sink implementations.
//!
//! The engine records one event per lifecycle step (process start, function
//! execution, escalation, recycle, abandonment, process completion) when a
//! sink is attached.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::util::clock::now_ms;

/// Audit event structure.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: String,
    /// Owning process identifier.
    pub process_id: String,
    /// Thread state within the process.
    pub thread_id: String,
    /// Function (or object) the event concerns.
    pub function: String,
    /// Action taken (process_start, execute, escalate, recycle, abandon, process_complete).
    pub action: String,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
    /// Additional context.
    pub payload: Option<String>,
}

/// Audit sink abstraction.
///
/// Sinks are shared between worker threads, so recording takes `&self`.
pub trait AuditSink: Send + Sync {
    /// Record an audit event.
    fn record(&self, event: AuditEvent);
}

/// In-memory audit sink for testing and dev.
pub struct InMemoryAuditSink {
    events: Mutex<VecDeque<AuditEvent>>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(max_events)),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Functions of all events with the given action, in record order.
    #[must_use]
    pub fn functions_for(&self, action: &str) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.action == action)
            .map(|e| e.function.clone())
            .collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Helper to build an audit event from context.
pub fn build_audit_event(
    event_id: impl Into<String>,
    process_id: impl Into<String>,
    thread_id: impl Into<String>,
    function: impl Into<String>,
    action: impl Into<String>,
    payload: Option<String>,
) -> AuditEvent {
    AuditEvent {
        event_id: event_id.into(),
        process_id: process_id.into(),
        thread_id: thread_id.into(),
        function: function.into(),
        action: action.into(),
        created_at_ms: now_ms(),
        payload,
    }
}
