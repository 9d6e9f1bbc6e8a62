//! Tests for audit sink

use prometheus_function_engine::core::{AuditSink, InMemoryAuditSink, build_audit_event};

#[test]
fn test_in_memory_audit_sink() {
    let sink = InMemoryAuditSink::new(10);

    let event = build_audit_event(
        "evt1",
        "process1",
        "t0",
        "load",
        "execute",
        Some("payload".to_string()),
    );

    sink.record(event.clone());
    assert_eq!(sink.events().len(), 1);

    let events = sink.events();
    assert_eq!(events[0].event_id, "evt1");
    assert_eq!(events[0].function, "load");
    assert_eq!(events[0].action, "execute");
}

#[test]
fn test_audit_sink_overflow() {
    let sink = InMemoryAuditSink::new(2);

    sink.record(build_audit_event("evt1", "p1", "t0", "a", "execute", None));
    sink.record(build_audit_event("evt2", "p1", "t0", "b", "execute", None));
    sink.record(build_audit_event("evt3", "p1", "t0", "c", "execute", None));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_id, "evt2"); // First one popped
    assert_eq!(events[1].event_id, "evt3");
}

#[test]
fn test_functions_for_filters_by_action() {
    let sink = InMemoryAuditSink::new(10);
    sink.record(build_audit_event("evt1", "p1", "t0", "load", "execute", None));
    sink.record(build_audit_event("evt2", "p1", "t1", "db", "recycle", None));
    sink.record(build_audit_event("evt3", "p1", "t0", "save", "execute", None));

    assert_eq!(sink.functions_for("execute"), vec!["load", "save"]);
    assert_eq!(sink.functions_for("recycle"), vec!["db"]);
    assert!(sink.functions_for("abandon").is_empty());
}

#[test]
fn test_build_audit_event() {
    let event = build_audit_event(
        "evt1",
        "process1",
        "t2",
        "save",
        "escalate",
        Some("boom".to_string()),
    );

    assert_eq!(event.event_id, "evt1");
    assert_eq!(event.process_id, "process1");
    assert_eq!(event.thread_id, "t2");
    assert_eq!(event.function, "save");
    assert_eq!(event.action, "escalate");
    assert_eq!(event.payload, Some("boom".to_string()));
    assert!(event.created_at_ms > 0);
}
