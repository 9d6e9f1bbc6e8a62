//! Tests for utility functions

use prometheus_function_engine::util::{init_tracing, now_ms, ProcessId, ThreadStateId};

#[test]
fn test_process_ids_are_unique() {
    let a = ProcessId::new();
    let b = ProcessId::new();
    assert_ne!(a, b);
    assert_eq!(a.to_string(), a.as_uuid().to_string());
}

#[test]
fn test_thread_state_id_ordering() {
    assert!(ThreadStateId(0) < ThreadStateId(1));
    assert_eq!(ThreadStateId(3).to_string(), "t3");
}

#[test]
fn test_process_id_serde() {
    let id = ProcessId::new();
    let json = serde_json::to_string(&id).unwrap();
    let back: ProcessId = serde_json::from_str(&json).unwrap();
    assert_eq!(id, back);
}

#[test]
fn test_now_ms_advances() {
    let before = now_ms();
    std::thread::sleep(std::time::Duration::from_millis(2));
    assert!(now_ms() > before);
}

#[test]
fn test_init_tracing_twice_keeps_first_subscriber() {
    init_tracing();
    assert!(tracing::dispatcher::has_been_set());
    init_tracing();
}
