//! Integration tests for flows and the escalation chain
//!
//! These tests validate:
//! - Invocation order of next functions, sequential and parallel flows
//! - Thread-affine state carried by thread synchronisers
//! - Parallel join ordering and spawned thread states
//! - Escalation bubbling through handlers, boundaries, callbacks,
//!   escalation flows, the process handler and the terminal handler

use std::cell::RefCell;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use prometheus_function_engine::builders::EngineBuilder;
use prometheus_function_engine::config::{TeamConfig, TeamKind};
use prometheus_function_engine::core::{
    AdministrationContext, AdministrationDeclaration, EngineError, Escalation, EscalationKind,
    EscalationMatcher, FlowCallback, FlowStrategy, FnFunction, FunctionContext, FunctionLayout,
    FunctionMetaData, InMemoryAuditSink, ManagedFunction, ProcessOptions, ProcessOutcome,
    ThreadSynchroniser,
};
use prometheus_function_engine::infra::{PassiveTeam, WorkerPoolTeam};
use prometheus_function_engine::util::{init_tracing, ProcessId};

const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// HELPERS
// ============================================================================

#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<String>>>);

impl Recorder {
    fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    fn position(&self, entry: &str) -> Option<usize> {
        self.0.lock().iter().position(|e| e == entry)
    }
}

fn recording(name: &'static str, recorder: &Recorder) -> FunctionMetaData {
    let recorder = recorder.clone();
    FunctionMetaData::from_fn(name, move |_ctx| {
        recorder.push(name);
        Ok(())
    })
}

fn failing(name: &'static str, label: &'static str) -> FunctionMetaData {
    FunctionMetaData::from_fn(name, move |_ctx| Err(Escalation::new(label, "failed on purpose")))
}

fn callback<F>(f: F) -> Option<FlowCallback>
where
    F: FnOnce(Option<Escalation>) -> Result<(), Escalation> + Send + 'static,
{
    Some(Box::new(f))
}

thread_local! {
    static CONTEXT: RefCell<Option<(String, i32)>> = const { RefCell::new(None) };
}

fn current_context() -> Option<(String, i32)> {
    CONTEXT.with(|c| c.borrow().clone())
}

/// Moves the thread-local context with its logical thread.
#[derive(Default)]
struct ContextSynchroniser {
    captured: Option<(String, i32)>,
}

impl ThreadSynchroniser for ContextSynchroniser {
    fn suspend_thread(&mut self) {
        self.captured = CONTEXT.with(|c| c.borrow_mut().take());
    }

    fn resume_thread(&mut self) {
        let captured = self.captured.take();
        CONTEXT.with(|c| *c.borrow_mut() = captured);
    }
}

fn context_synchroniser() -> Box<dyn ThreadSynchroniser> {
    Box::new(ContextSynchroniser::default())
}

// ============================================================================
// FLOW ORDER
// ============================================================================

#[test]
fn test_passive_team_invocation_order_and_thread_context() {
    init_tracing();
    let order = Recorder::default();
    let observed = Arc::new(Mutex::new(Vec::new()));

    let function = {
        let order = order.clone();
        FunctionMetaData::from_fn("function", move |ctx| {
            CONTEXT.with(|c| *c.borrow_mut() = Some(("TEST".to_string(), 1)));
            order.push("function");
            ctx.set_next_function("next", ())
        })
    };
    let next = {
        let order = order.clone();
        let observed = Arc::clone(&observed);
        FunctionMetaData::from_fn("next", move |ctx| {
            order.push("next");
            observed.lock().push(current_context());
            let callback_order = order.clone();
            ctx.do_flow(
                0,
                (),
                callback(move |outcome: Option<Escalation>| {
                    assert!(outcome.is_none());
                    callback_order.push("callback");
                    Ok(())
                }),
            )?;
            ctx.do_flow(1, (), None)
        })
        .with_flow("parallelFlow", FlowStrategy::Parallel)
        .with_flow("sequentialFlow", FlowStrategy::Sequential)
    };
    let flow = |name: &'static str| {
        let order = order.clone();
        let observed = Arc::clone(&observed);
        FunctionMetaData::from_fn(name, move |_ctx| {
            order.push(name);
            observed.lock().push(current_context());
            Ok(())
        })
    };

    let engine = EngineBuilder::new()
        .with_team(PassiveTeam::new("passive"))
        .with_synchroniser(context_synchroniser)
        .with_function(function)
        .with_function(next)
        .with_function(flow("parallelFlow"))
        .with_function(flow("sequentialFlow"))
        .build()
        .expect("engine builds");
    engine.open().expect("engine opens");

    let outcome = engine
        .invoke_process("function", ())
        .expect("process starts")
        .wait(WAIT)
        .expect("process completes");

    assert_eq!(outcome, ProcessOutcome::Completed);
    assert_eq!(
        order.entries(),
        vec!["function", "next", "parallelFlow", "callback", "sequentialFlow"]
    );
    let expected = Some(("TEST".to_string(), 1));
    assert_eq!(*observed.lock(), vec![expected.clone(), expected.clone(), expected]);
    assert_eq!(current_context(), None, "context cleared once every chain completed");
}

#[test]
fn test_thread_context_follows_chain_across_teams() {
    let observed = Arc::new(Mutex::new(Vec::new()));
    let observe = |name: &'static str, next: Option<&'static str>| {
        let observed = Arc::clone(&observed);
        let metadata = FunctionMetaData::from_fn(name, move |_ctx| {
            observed.lock().push((
                std::thread::current().name().map(str::to_string),
                current_context(),
            ));
            Ok(())
        });
        match next {
            Some(next) => metadata.with_next(next),
            None => metadata,
        }
    };

    let engine = EngineBuilder::new()
        .with_team(WorkerPoolTeam::one_person("left"))
        .with_team(WorkerPoolTeam::one_person("right"))
        .with_default_team("left")
        .with_synchroniser(context_synchroniser)
        .with_function(
            FunctionMetaData::from_fn("start", |_ctx| {
                CONTEXT.with(|c| *c.borrow_mut() = Some(("TEST".to_string(), 1)));
                Ok(())
            })
            .with_next("remote"),
        )
        .with_function(observe("remote", Some("home")).with_team("right"))
        .with_function(observe("home", None))
        .build()
        .expect("engine builds");
    engine.open().expect("engine opens");

    let outcome = engine
        .invoke_process("start", ())
        .expect("process starts")
        .wait(WAIT)
        .expect("process completes");
    assert!(outcome.is_completed());

    let observed = observed.lock().clone();
    assert_eq!(observed.len(), 2);
    assert_eq!(observed[0].0.as_deref(), Some("right-0"));
    assert_eq!(observed[1].0.as_deref(), Some("left-0"));
    for (_, context) in observed {
        assert_eq!(context, Some(("TEST".to_string(), 1)));
    }
}

#[test]
fn test_concurrent_parallel_chains_keep_thread_context() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let observe = |name: &'static str| {
        let seen = Arc::clone(&seen);
        FunctionMetaData::from_fn(name, move |_ctx| {
            std::thread::sleep(Duration::from_millis(10));
            seen.lock().push((name, current_context()));
            Ok(())
        })
    };

    let engine = EngineBuilder::new()
        .with_team(
            WorkerPoolTeam::new("workers", TeamConfig::new(TeamKind::WorkerPool).with_worker_count(4))
                .expect("valid team config"),
        )
        .with_synchroniser(context_synchroniser)
        .with_function(
            FunctionMetaData::from_fn("start", |ctx| {
                CONTEXT.with(|c| *c.borrow_mut() = Some(("TEST".to_string(), 1)));
                ctx.do_flow(0, (), None)?;
                ctx.do_flow(1, (), None)
            })
            .with_flow("a", FlowStrategy::Parallel)
            .with_flow("b", FlowStrategy::Parallel),
        )
        .with_function(observe("a"))
        .with_function(observe("b"))
        .build()
        .expect("engine builds");
    engine.open().expect("engine opens");

    for _ in 0..10 {
        let outcome = engine
            .invoke_process("start", ())
            .expect("process starts")
            .wait(WAIT)
            .expect("process completes");
        assert!(outcome.is_completed());
    }

    let seen = seen.lock().clone();
    assert_eq!(seen.len(), 20);
    for (name, context) in seen {
        assert_eq!(context, Some(("TEST".to_string(), 1)), "chain {name} lost the context");
    }
    engine.close();
}

#[test]
fn test_sequential_flows_run_before_next_in_order() {
    let order = Recorder::default();
    let start = {
        let order = order.clone();
        FunctionMetaData::from_fn("start", move |ctx| {
            order.push("start");
            let callback_order = order.clone();
            ctx.do_flow(
                0,
                (),
                callback(move |_outcome: Option<Escalation>| {
                    callback_order.push("first-done");
                    Ok(())
                }),
            )?;
            ctx.do_flow(1, (), None)
        })
        .with_flow("first", FlowStrategy::Sequential)
        .with_flow("second", FlowStrategy::Sequential)
        .with_next("finish")
    };

    let engine = EngineBuilder::new()
        .with_function(start)
        .with_function(recording("first", &order))
        .with_function(recording("second", &order))
        .with_function(recording("finish", &order))
        .build()
        .expect("engine builds");
    engine.open().expect("engine opens");

    let handle = engine.invoke_process("start", ()).expect("process starts");
    assert!(handle.wait(WAIT).expect("completes").is_completed());
    assert_eq!(
        order.entries(),
        vec!["start", "first", "first-done", "second", "finish"]
    );
}

#[test]
fn test_parallel_callback_runs_after_parallel_chain() {
    let order = Recorder::default();
    let start = {
        let order = order.clone();
        FunctionMetaData::from_fn("start", move |ctx| {
            let callback_order = order.clone();
            ctx.do_flow(
                0,
                (),
                callback(move |outcome: Option<Escalation>| {
                    assert!(outcome.is_none());
                    callback_order.push("callback");
                    Ok(())
                }),
            )?;
            order.push("start-done");
            Ok(())
        })
        .with_flow("slow", FlowStrategy::Parallel)
    };
    let slow = {
        let order = order.clone();
        FunctionMetaData::from_fn("slow", move |_ctx| {
            std::thread::sleep(Duration::from_millis(30));
            order.push("slow");
            Ok(())
        })
        .with_next("slow-tail")
    };

    let engine = EngineBuilder::new()
        .with_team(
            WorkerPoolTeam::new("workers", TeamConfig::new(TeamKind::WorkerPool).with_worker_count(4))
                .expect("valid team config"),
        )
        .with_function(start)
        .with_function(slow)
        .with_function(recording("slow-tail", &order))
        .build()
        .expect("engine builds");
    engine.open().expect("engine opens");

    let outcome = engine
        .invoke_process("start", ())
        .expect("process starts")
        .wait(WAIT)
        .expect("process completes");
    assert!(outcome.is_completed());

    let tail = order.position("slow-tail").expect("parallel tail ran");
    let callback = order.position("callback").expect("callback ran");
    assert!(tail < callback, "callback ran before the parallel chain ended: {:?}", order.entries());
    assert_eq!(order.entries().iter().filter(|e| *e == "callback").count(), 1);
}

#[test]
fn test_spawned_thread_state_reports_to_callback() {
    let threads = Arc::new(Mutex::new(Vec::new()));
    let order = Recorder::default();
    let start = {
        let threads = Arc::clone(&threads);
        let order = order.clone();
        FunctionMetaData::from_fn("start", move |ctx| {
            threads.lock().push(ctx.thread_id());
            let callback_order = order.clone();
            ctx.do_flow(
                0,
                21_u32,
                callback(move |outcome: Option<Escalation>| {
                    assert!(outcome.is_none());
                    callback_order.push("spawned-done");
                    Ok(())
                }),
            )
        })
        .with_flow("child", FlowStrategy::Spawn)
    };
    let child = {
        let threads = Arc::clone(&threads);
        let order = order.clone();
        FunctionMetaData::from_fn("child", move |ctx| {
            threads.lock().push(ctx.thread_id());
            let value = ctx.parameter::<u32>().copied().unwrap_or_default();
            order.push(format!("child:{}", value * 2));
            Ok(())
        })
    };

    let engine = EngineBuilder::new()
        .with_function(start)
        .with_function(child)
        .build()
        .expect("engine builds");
    engine.open().expect("engine opens");

    let handle = engine.invoke_process("start", ()).expect("process starts");
    assert!(handle.wait(WAIT).expect("completes").is_completed());
    assert_eq!(order.entries(), vec!["child:42", "spawned-done"]);
    let threads = threads.lock().clone();
    assert_eq!(threads.len(), 2);
    assert_ne!(threads[0], threads[1], "spawned flow runs on its own thread state");
}

#[test]
fn test_function_factory_receives_resolved_layout() {
    let layouts = Arc::new(Mutex::new(Vec::new()));
    let factory = {
        let layouts = Arc::clone(&layouts);
        move |layout: &FunctionLayout| -> Result<Arc<dyn ManagedFunction>, EngineError> {
            layouts.lock().push(layout.clone());
            Ok(Arc::new(FnFunction::new(|_ctx: &mut FunctionContext| Ok(()))))
        }
    };

    let engine = EngineBuilder::new()
        .with_function(
            FunctionMetaData::from_factory("made", Arc::new(factory))
                .with_flow("other", FlowStrategy::Sequential),
        )
        .with_function(FunctionMetaData::from_fn("other", |_ctx| Ok(())))
        .build()
        .expect("engine builds");
    engine.open().expect("engine opens");

    let layouts = layouts.lock().clone();
    assert_eq!(layouts.len(), 1);
    assert_eq!(layouts[0].name, "made");
    assert_eq!(layouts[0].flows, vec!["other".to_string()]);
    assert!(engine.invoke_process("made", ()).expect("starts").wait(WAIT).expect("completes").is_completed());
}

// ============================================================================
// ESCALATIONS
// ============================================================================

#[test]
fn test_unhandled_escalation_reaches_process_handler() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let handler_seen = Arc::clone(&seen);
    let engine = EngineBuilder::new()
        .with_function(failing("explode", "boom"))
        .with_process_escalation_handler(move |e: &Escalation| -> Result<(), Escalation> {
            handler_seen.lock().push(e.label().to_string());
            Ok(())
        })
        .build()
        .expect("engine builds");
    engine.open().expect("engine opens");

    let outcome = engine
        .invoke_process("explode", ())
        .expect("process starts")
        .wait(WAIT)
        .expect("process completes");

    assert_eq!(outcome, ProcessOutcome::Completed);
    assert_eq!(*seen.lock(), vec!["boom".to_string()]);
}

#[test]
fn test_escalation_without_handlers_reaches_terminal_handler() {
    init_tracing();
    let reported: Arc<Mutex<Vec<(ProcessId, Escalation)>>> = Arc::new(Mutex::new(Vec::new()));
    let terminal = Arc::clone(&reported);
    let engine = EngineBuilder::new()
        .with_function(failing("explode", "boom"))
        .with_terminal_handler(move |process: ProcessId, e: &Escalation| {
            terminal.lock().push((process, e.clone()));
        })
        .build()
        .expect("engine builds");
    engine.open().expect("engine opens");

    let handle = engine.invoke_process("explode", ()).expect("process starts");
    let outcome = handle.wait(WAIT).expect("process completes");

    match outcome {
        ProcessOutcome::Escalated(e) => {
            assert_eq!(e.label(), "boom");
            assert_eq!(e.kind(), EscalationKind::Execution);
        }
        ProcessOutcome::Completed => panic!("escalation should not be handled"),
    }
    let reported = reported.lock();
    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0].0, handle.id());
}

#[test]
fn test_per_process_handler_replaces_engine_handler() {
    let engine_seen = Arc::new(Mutex::new(0_u32));
    let counter = Arc::clone(&engine_seen);
    let engine = EngineBuilder::new()
        .with_function(failing("explode", "boom"))
        .with_process_escalation_handler(move |_e: &Escalation| -> Result<(), Escalation> {
            *counter.lock() += 1;
            Ok(())
        })
        .build()
        .expect("engine builds");
    engine.open().expect("engine opens");

    let rethrow = |e: &Escalation| -> Result<(), Escalation> {
        Err(Escalation::new("rethrown", e.message()))
    };
    let completed = Arc::new(Mutex::new(None));
    let on_complete = Arc::clone(&completed);
    let options = ProcessOptions::new()
        .with_escalation_handler(Arc::new(rethrow))
        .on_complete(move |outcome| *on_complete.lock() = Some(outcome.clone()));

    let outcome = engine
        .invoke_process_with("explode", None, options)
        .expect("process starts")
        .wait(WAIT)
        .expect("process completes");

    assert!(matches!(&outcome, ProcessOutcome::Escalated(e) if e.label() == "rethrown"));
    assert_eq!(*engine_seen.lock(), 0);
    assert_eq!(completed.lock().clone(), Some(outcome));
}

#[test]
fn test_function_escalation_handler_continues_chain() {
    let order = Recorder::default();
    let recover = {
        let order = order.clone();
        FunctionMetaData::from_fn("recover", move |ctx| {
            let escalation = ctx.parameter::<Escalation>().expect("escalation parameter");
            order.push(format!("recover:{}", escalation.label()));
            Ok(())
        })
    };

    let engine = EngineBuilder::new()
        .with_function(
            failing("explode", "boom")
                .with_escalation_handler(EscalationMatcher::label("other"), "never")
                .with_escalation_handler(EscalationMatcher::label("boom"), "recover"),
        )
        .with_function(recording("never", &order))
        .with_function(recover)
        .build()
        .expect("engine builds");
    engine.open().expect("engine opens");

    let outcome = engine
        .invoke_process("explode", ())
        .expect("process starts")
        .wait(WAIT)
        .expect("process completes");
    assert!(outcome.is_completed());
    assert_eq!(order.entries(), vec!["recover:boom"]);
}

#[test]
fn test_boundary_handles_escalation_from_later_function() {
    let order = Recorder::default();
    let guard = {
        let order = order.clone();
        FunctionMetaData::from_fn("guard", move |ctx| {
            order.push("guard");
            ctx.handle_escalations(EscalationMatcher::Kind(EscalationKind::Execution), "fallback")?;
            ctx.set_next_function("risky", ())
        })
    };
    let fallback = {
        let order = order.clone();
        FunctionMetaData::from_fn("fallback", move |ctx| {
            let label = ctx.parameter::<Escalation>().map(|e| e.label().to_string());
            order.push(format!("fallback:{}", label.unwrap_or_default()));
            Ok(())
        })
    };

    let engine = EngineBuilder::new()
        .with_function(guard)
        .with_function(failing("risky", "broken"))
        .with_function(fallback)
        .build()
        .expect("engine builds");
    engine.open().expect("engine opens");

    let outcome = engine
        .invoke_process("guard", ())
        .expect("process starts")
        .wait(WAIT)
        .expect("process completes");
    assert!(outcome.is_completed());
    assert_eq!(order.entries(), vec!["guard", "fallback:broken"]);
}

#[test]
fn test_callback_receives_flow_escalation() {
    let order = Recorder::default();
    let start = {
        let order = order.clone();
        FunctionMetaData::from_fn("start", move |ctx| {
            let callback_order = order.clone();
            ctx.do_flow(
                0,
                (),
                callback(move |outcome: Option<Escalation>| {
                    let label = outcome.map(|e| e.label().to_string());
                    callback_order.push(format!("callback:{}", label.unwrap_or_default()));
                    Ok(())
                }),
            )
        })
        .with_flow("risky", FlowStrategy::Sequential)
        .with_next("after")
    };

    let engine = EngineBuilder::new()
        .with_function(start)
        .with_function(failing("risky", "broken"))
        .with_function(recording("after", &order))
        .build()
        .expect("engine builds");
    engine.open().expect("engine opens");

    let outcome = engine
        .invoke_process("start", ())
        .expect("process starts")
        .wait(WAIT)
        .expect("process completes");
    assert!(outcome.is_completed());
    assert_eq!(order.entries(), vec!["callback:broken", "after"]);
}

#[test]
fn test_callback_reraise_skips_rest_of_chain() {
    let order = Recorder::default();
    let start = FunctionMetaData::from_fn("start", |ctx| {
        ctx.do_flow(
            0,
            (),
            callback(|outcome: Option<Escalation>| match outcome {
                Some(e) => Err(Escalation::new("wrapped", e.message())),
                None => Ok(()),
            }),
        )
    })
    .with_flow("risky", FlowStrategy::Sequential)
    .with_next("after");

    let engine = EngineBuilder::new()
        .with_function(start)
        .with_function(failing("risky", "broken"))
        .with_function(recording("after", &order))
        .build()
        .expect("engine builds");
    engine.open().expect("engine opens");

    let outcome = engine
        .invoke_process("start", ())
        .expect("process starts")
        .wait(WAIT)
        .expect("process completes");
    assert!(matches!(outcome, ProcessOutcome::Escalated(e) if e.label() == "wrapped"));
    assert!(order.entries().is_empty());
}

#[test]
fn test_engine_escalation_flow_runs_on_failing_thread() {
    let order = Recorder::default();
    let on_error = {
        let order = order.clone();
        FunctionMetaData::from_fn("on_error", move |ctx| {
            let label = ctx.parameter::<Escalation>().map(|e| e.label().to_string());
            order.push(format!("on_error:{}", label.unwrap_or_default()));
            Ok(())
        })
    };

    let engine = EngineBuilder::new()
        .with_function(failing("explode", "boom"))
        .with_function(on_error)
        .with_escalation_flow(EscalationMatcher::Kind(EscalationKind::Execution), "on_error")
        .build()
        .expect("engine builds");
    engine.open().expect("engine opens");

    let outcome = engine
        .invoke_process("explode", ())
        .expect("process starts")
        .wait(WAIT)
        .expect("process completes");
    assert!(outcome.is_completed());
    assert_eq!(order.entries(), vec!["on_error:boom"]);
}

#[test]
fn test_failing_escalation_flow_goes_to_process() {
    let engine = EngineBuilder::new()
        .with_function(failing("explode", "boom"))
        .with_function(failing("on_error", "handler_failed"))
        .with_escalation_flow(EscalationMatcher::Any, "on_error")
        .build()
        .expect("engine builds");
    engine.open().expect("engine opens");

    let outcome = engine
        .invoke_process("explode", ())
        .expect("process starts")
        .wait(WAIT)
        .expect("process completes");
    assert!(matches!(outcome, ProcessOutcome::Escalated(e) if e.label() == "handler_failed"));
}

#[test]
fn test_panicking_function_escalates_and_worker_survives() {
    let engine = EngineBuilder::new()
        .with_team(WorkerPoolTeam::one_person("solo"))
        .with_function(FunctionMetaData::from_fn("panics", |_ctx| panic!("kaboom")))
        .with_function(FunctionMetaData::from_fn("fine", |_ctx| Ok(())))
        .build()
        .expect("engine builds");
    engine.open().expect("engine opens");

    let outcome = engine
        .invoke_process("panics", ())
        .expect("process starts")
        .wait(WAIT)
        .expect("process completes");
    match outcome {
        ProcessOutcome::Escalated(e) => {
            assert_eq!(e.label(), "panic");
            assert!(e.message().contains("kaboom"));
        }
        ProcessOutcome::Completed => panic!("panic should escalate"),
    }

    let outcome = engine
        .invoke_process("fine", ())
        .expect("process starts")
        .wait(WAIT)
        .expect("worker still serves jobs");
    assert!(outcome.is_completed());
}

/// Panics on resume or suspend.
struct FaultySynchroniser {
    fail_on_resume: bool,
}

impl ThreadSynchroniser for FaultySynchroniser {
    fn suspend_thread(&mut self) {
        assert!(self.fail_on_resume, "suspend failed");
    }

    fn resume_thread(&mut self) {
        assert!(!self.fail_on_resume, "resume failed");
    }
}

fn run_with_faulty_synchroniser(fail_on_resume: bool) -> (ProcessOutcome, Vec<String>) {
    let order = Recorder::default();
    let engine = EngineBuilder::new()
        .with_team(PassiveTeam::new("inline"))
        .with_synchroniser(move || Box::new(FaultySynchroniser { fail_on_resume }) as Box<dyn ThreadSynchroniser>)
        .with_function(recording("f", &order))
        .build()
        .expect("engine builds");
    engine.open().expect("engine opens");

    let handle = engine.invoke_process("f", ()).expect("process starts");
    let outcome = handle.wait(WAIT).expect("process completes");
    assert_eq!(engine.stats().processes_completed, 1);
    (outcome, order.entries())
}

#[test]
fn test_panicking_synchroniser_resume_escalates() {
    let (outcome, order) = run_with_faulty_synchroniser(true);
    match outcome {
        ProcessOutcome::Escalated(e) => {
            assert_eq!(e.label(), "panic");
            assert!(e.message().contains("resume failed"), "{}", e.message());
        }
        ProcessOutcome::Completed => panic!("a failing resume must escalate"),
    }
    assert!(order.is_empty(), "body ran without its thread state");
}

#[test]
fn test_panicking_synchroniser_suspend_escalates() {
    let (outcome, order) = run_with_faulty_synchroniser(false);
    match outcome {
        ProcessOutcome::Escalated(e) => {
            assert_eq!(e.label(), "panic");
            assert!(e.message().contains("suspend failed"), "{}", e.message());
        }
        ProcessOutcome::Completed => panic!("a failing suspend must escalate"),
    }
    assert_eq!(order, vec!["f"]);
}

#[test]
fn test_failing_pre_administration_escalates() {
    let order = Recorder::default();
    let engine = EngineBuilder::new()
        .with_function(recording("guarded", &order).with_pre_administration(
            AdministrationDeclaration::from_fn(
                "authorise",
                |_ctx: &mut AdministrationContext| {
                    Err(Escalation::administration("authorise", "denied"))
                },
                Vec::<String>::new(),
            ),
        ))
        .build()
        .expect("engine builds");
    engine.open().expect("engine opens");

    let outcome = engine
        .invoke_process("guarded", ())
        .expect("process starts")
        .wait(WAIT)
        .expect("process completes");
    assert!(matches!(outcome, ProcessOutcome::Escalated(e) if e.kind() == EscalationKind::Administration));
    assert!(order.entries().is_empty(), "body must not run after a failed duty");
}

#[test]
fn test_unknown_flow_index_escalates() {
    let engine = EngineBuilder::new()
        .with_function(FunctionMetaData::from_fn("start", |ctx| ctx.do_flow(3, (), None)))
        .build()
        .expect("engine builds");
    engine.open().expect("engine opens");

    let outcome = engine
        .invoke_process("start", ())
        .expect("process starts")
        .wait(WAIT)
        .expect("process completes");
    assert!(matches!(outcome, ProcessOutcome::Escalated(e) if e.label() == "unknown_flow"));
}

// ============================================================================
// ENGINE LIFECYCLE
// ============================================================================

#[test]
fn test_invoke_before_open_is_rejected() {
    let engine = EngineBuilder::new()
        .with_function(FunctionMetaData::from_fn("start", |_ctx| Ok(())))
        .build()
        .expect("engine builds");

    assert!(engine.invoke_process("start", ()).is_err());
    engine.open().expect("engine opens");
    assert!(engine.invoke_process("missing", ()).is_err());
    engine.close();
    assert!(!engine.is_open());
    assert!(engine.invoke_process("start", ()).is_err());
}

#[test]
fn test_audit_trail_records_lifecycle() {
    let sink = Arc::new(InMemoryAuditSink::new(100));
    let engine = EngineBuilder::new()
        .with_function(FunctionMetaData::from_fn("start", |_ctx| Ok(())).with_next("end"))
        .with_function(FunctionMetaData::from_fn("end", |_ctx| Ok(())))
        .with_audit_sink(sink.clone())
        .build()
        .expect("engine builds");
    engine.open().expect("engine opens");

    engine
        .invoke_process("start", ())
        .expect("process starts")
        .wait(WAIT)
        .expect("process completes");

    assert_eq!(sink.functions_for("execute"), vec!["start", "end"]);
    assert_eq!(sink.functions_for("process_start"), vec!["start"]);
    assert_eq!(sink.functions_for("process_complete").len(), 1);

    let stats = engine.stats();
    assert_eq!(stats.processes_started, 1);
    assert_eq!(stats.processes_completed, 1);
    assert_eq!(stats.active_processes, 0);
}
