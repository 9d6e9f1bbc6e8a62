//! Integration tests for teams
//!
//! These tests validate:
//! - Bounded queues reject jobs and the rejection escalates to the process
//! - Drain and abandon stop policies
//! - Thread-per-job and tokio teams built from configuration
//! - Team statistics

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use rand::Rng;
use prometheus_function_engine::builders::EngineBuilder;
use prometheus_function_engine::config::{EngineConfig, TeamConfig, TeamKind};
use prometheus_function_engine::core::{
    EscalationKind, FunctionEngine, FunctionMetaData, ProcessOutcome, StopPolicy,
};
use prometheus_function_engine::infra::{PassiveTeam, ThreadPerJobTeam, WorkerPoolTeam};
use prometheus_function_engine::util::init_tracing;

const WAIT: Duration = Duration::from_secs(5);

fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// A function that reports when it starts, then blocks until released.
struct Blocker {
    started: Receiver<()>,
    release: Sender<()>,
    runs: Arc<AtomicU64>,
}

fn blocking_function(name: &'static str, team: &'static str) -> (FunctionMetaData, Blocker) {
    let (started_tx, started_rx) = unbounded::<()>();
    let (release_tx, release_rx) = unbounded::<()>();
    let runs = Arc::new(AtomicU64::new(0));
    let body_runs = Arc::clone(&runs);
    let function = FunctionMetaData::from_fn(name, move |_ctx| {
        body_runs.fetch_add(1, Ordering::SeqCst);
        let _ = started_tx.send(());
        let _ = release_rx.recv_timeout(WAIT);
        Ok(())
    })
    .with_team(team);
    (
        function,
        Blocker {
            started: started_rx,
            release: release_tx,
            runs,
        },
    )
}

fn single_worker(policy: StopPolicy, depth: Option<usize>) -> WorkerPoolTeam {
    let mut config = TeamConfig::new(TeamKind::WorkerPool)
        .with_worker_count(1)
        .with_stop_policy(policy)
        .with_stop_timeout_ms(5_000);
    if let Some(depth) = depth {
        config = config.with_max_queue_depth(depth);
    }
    WorkerPoolTeam::new("single", config).expect("valid team config")
}

// ============================================================================
// QUEUE LIMITS
// ============================================================================

#[test]
fn test_full_queue_rejects_and_escalates_to_process() {
    init_tracing();
    let (function, blocker) = blocking_function("block", "single");
    let engine = EngineBuilder::new()
        .with_team(single_worker(StopPolicy::Drain, Some(1)))
        .with_function(function)
        .build()
        .expect("engine builds");
    engine.open().expect("engine opens");

    let running = engine.invoke_process("block", ()).expect("first process starts");
    blocker.started.recv_timeout(WAIT).expect("first job running");
    let queued = engine.invoke_process("block", ()).expect("second process queued");
    let rejected = engine.invoke_process("block", ()).expect("third process invoked");

    match rejected.wait(WAIT).expect("rejected process completes") {
        ProcessOutcome::Escalated(e) => {
            assert_eq!(e.kind(), EscalationKind::Rejected);
            assert_eq!(e.label(), "single");
        }
        ProcessOutcome::Completed => panic!("a rejected job must escalate"),
    }

    blocker.release.send(()).expect("release first");
    blocker.release.send(()).expect("release second");
    assert!(running.wait(WAIT).expect("completes").is_completed());
    assert!(queued.wait(WAIT).expect("completes").is_completed());
    assert_eq!(blocker.runs.load(Ordering::SeqCst), 2);

    let stats = engine.team_stats("single").expect("team exists");
    assert_eq!(stats.rejected_jobs, 1);
    assert_eq!(stats.assigned_jobs, 2);
    assert_eq!(stats.worker_count, 1);
}

// ============================================================================
// STOP POLICIES
// ============================================================================

fn stop_with_queued_job(policy: StopPolicy) -> (Arc<FunctionEngine>, Blocker, ProcessOutcome) {
    let (function, blocker) = blocking_function("block", "single");
    let engine = Arc::new(
        EngineBuilder::new()
            .with_team(single_worker(policy, None))
            .with_function(function)
            .build()
            .expect("engine builds"),
    );
    engine.open().expect("engine opens");

    let running = engine.invoke_process("block", ()).expect("first process starts");
    blocker.started.recv_timeout(WAIT).expect("first job running");
    let queued = engine.invoke_process("block", ()).expect("second process queued");

    let closer = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || engine.close())
    };
    assert!(wait_until(|| !engine.is_open()));
    // Let stop_working record the policy before the running job finishes.
    thread::sleep(Duration::from_millis(100));

    blocker.release.send(()).expect("release first");
    blocker.release.send(()).expect("release second");
    assert!(running.wait(WAIT).expect("completes").is_completed());
    let queued_outcome = queued.wait(WAIT).expect("queued process completes");
    closer.join().expect("close returns");
    (engine, blocker, queued_outcome)
}

#[test]
fn test_drain_policy_runs_queued_jobs() {
    let (engine, blocker, queued) = stop_with_queued_job(StopPolicy::Drain);

    assert!(queued.is_completed());
    assert_eq!(blocker.runs.load(Ordering::SeqCst), 2);
    let stats = engine.team_stats("single").expect("team exists");
    assert_eq!(stats.abandoned_jobs, 0);
    assert_eq!(stats.completed_jobs, 2);
}

#[test]
fn test_abandon_policy_skips_queued_jobs() {
    let (engine, blocker, queued) = stop_with_queued_job(StopPolicy::Abandon);

    assert!(queued.is_completed(), "abandoning a chain does not fail its process");
    assert_eq!(blocker.runs.load(Ordering::SeqCst), 1);
    let stats = engine.team_stats("single").expect("team exists");
    assert_eq!(stats.abandoned_jobs, 1);
}

#[test]
fn test_stopped_passive_team_refuses_jobs() {
    let ran = Arc::new(AtomicU64::new(0));
    let body_ran = Arc::clone(&ran);
    let engine = EngineBuilder::new()
        .with_team(PassiveTeam::new("inline"))
        .with_function(FunctionMetaData::from_fn("work", move |_ctx| {
            body_ran.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
        .build()
        .expect("engine builds");
    engine.open().expect("engine opens");
    assert!(engine.invoke_process("work", ()).expect("starts").wait(WAIT).expect("completes").is_completed());

    engine.close();
    assert!(engine.invoke_process("work", ()).is_err());
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert_eq!(engine.team_stats("inline").map(|s| s.completed_jobs), Some(1));
}

#[test]
fn test_thread_per_job_stop_waits_for_accepted_job() {
    let (function, blocker) = blocking_function("block", "per_job");
    let engine = Arc::new(
        EngineBuilder::new()
            .with_team(ThreadPerJobTeam::new("per_job", 256 * 1024, WAIT))
            .with_function(function)
            .build()
            .expect("engine builds"),
    );
    engine.open().expect("engine opens");

    let handle = engine.invoke_process("block", ()).expect("process starts");
    let closer = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || engine.close())
    };
    blocker.started.recv_timeout(WAIT).expect("accepted job still runs");
    thread::sleep(Duration::from_millis(50));
    assert!(!closer.is_finished(), "stop returned while a job was running");

    blocker.release.send(()).expect("release");
    closer.join().expect("close returns");
    assert!(handle.wait(WAIT).expect("process completes").is_completed());
    let stats = engine.team_stats("per_job").expect("team exists");
    assert_eq!(stats.active_jobs, 0);
    assert_eq!(stats.completed_jobs, 1);
}

// ============================================================================
// CONFIGURED TEAMS
// ============================================================================

fn thread_names(engine: &FunctionEngine, function: &str, runs: usize, names: &Arc<Mutex<Vec<String>>>) {
    for _ in 0..runs {
        let outcome = engine
            .invoke_process(function, ())
            .expect("process starts")
            .wait(WAIT)
            .expect("process completes");
        assert!(outcome.is_completed());
    }
    assert_eq!(names.lock().len(), runs);
}

fn recording_thread_name(name: &'static str, names: &Arc<Mutex<Vec<String>>>) -> FunctionMetaData {
    let names = Arc::clone(names);
    FunctionMetaData::from_fn(name, move |_ctx| {
        let thread_name = thread::current().name().unwrap_or_default().to_string();
        names.lock().push(thread_name);
        Ok(())
    })
}

#[test]
fn test_thread_per_job_team_from_config() {
    let config = EngineConfig::from_json_str(
        r#"{"teams": {"per_job": {"kind": "thread_per_job"}}, "default_team": "per_job"}"#,
    )
    .expect("valid config");
    let names = Arc::new(Mutex::new(Vec::new()));
    let engine = EngineBuilder::from_config(&config)
        .expect("teams build")
        .with_function(recording_thread_name("work", &names))
        .build()
        .expect("engine builds");
    engine.open().expect("engine opens");

    thread_names(&engine, "work", 2, &names);
    let names = names.lock().clone();
    assert!(names.iter().all(|n| n.starts_with("per_job-job-")), "{names:?}");
    assert_ne!(names[0], names[1], "each job runs on a fresh thread");
    engine.close();
}

#[cfg(feature = "tokio-runtime")]
#[test]
fn test_tokio_team_runs_blocking_jobs() {
    let config = EngineConfig::from_json_str(
        r#"{"teams": {"async": {"kind": "tokio", "worker_count": 2, "max_queue_depth": 8}}, "default_team": "async"}"#,
    )
    .expect("valid config");
    let names = Arc::new(Mutex::new(Vec::new()));
    let engine = EngineBuilder::from_config(&config)
        .expect("teams build")
        .with_function(recording_thread_name("work", &names))
        .build()
        .expect("engine builds");
    engine.open().expect("engine opens");

    thread_names(&engine, "work", 3, &names);
    assert!(names.lock().iter().all(|n| n == "async-tokio"));

    let stats = engine.team_stats("async").expect("team exists");
    assert_eq!(stats.worker_count, 2);
    assert_eq!(stats.assigned_jobs, 3);
    engine.close();
    assert!(engine.invoke_process("work", ()).is_err());
}

#[test]
fn test_worker_pool_spreads_parallel_work() {
    let config = EngineConfig::from_json_str(
        r#"{"teams": {"pool": {"kind": "worker_pool", "worker_count": 3}}, "default_team": "pool"}"#,
    )
    .expect("valid config");
    let names = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&names);
    let jittered = FunctionMetaData::from_fn("work", move |_ctx| {
        let pause = rand::rng().random_range(0..4_u64);
        thread::sleep(Duration::from_millis(pause));
        let thread_name = thread::current().name().unwrap_or_default().to_string();
        recorded.lock().push(thread_name);
        Ok(())
    });
    let engine = EngineBuilder::from_config(&config)
        .expect("teams build")
        .with_function(jittered)
        .build()
        .expect("engine builds");
    engine.open().expect("engine opens");

    let handles: Vec<_> = (0..12)
        .map(|_| engine.invoke_process("work", ()).expect("process starts"))
        .collect();
    for handle in handles {
        assert!(handle.wait(WAIT).expect("process completes").is_completed());
    }

    assert_eq!(names.lock().len(), 12);
    assert!(names.lock().iter().all(|n| n.starts_with("pool-")));
    // Counters settle once each worker returns from its job.
    assert!(wait_until(|| engine
        .team_stats("pool")
        .is_some_and(|s| s.completed_jobs == 12 && s.active_jobs == 0)));
    assert_eq!(engine.stats().processes_completed, 12);
    engine.close();
}

#[test]
fn test_unknown_team_fails_build() {
    let result = EngineBuilder::new()
        .with_function(FunctionMetaData::from_fn("work", |_ctx| Ok(())).with_team("nowhere"))
        .build();
    assert!(result.is_err());
}
