//! Flow E2E test suite.
//!
//! Drives complete flows against the reference store on the lab runtime:
//! cancellation trees, concurrent sub-operations, timers, and the step-wise
//! test driver.
//!
//! Run with: `cargo test --test flow_e2e`

mod common {
    pub fn init_test_logging() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_test_writer()
            .try_init();
    }
}

macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(test = $name, "=== TEST START ===");
    };
}

macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = $name, "=== TEST COMPLETE ===");
    };
}

macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        if !$cond {
            tracing::error!(
                message = $msg,
                expected = ?$expected,
                actual = ?$actual,
                "Assertion failed"
            );
        }
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use flowrt::{
    Action, CancellationSource, Effect, EventStore, Flow, LabConfig, LabRuntime, Raced,
    RunOutcome, Step, Store, StoreSettings, Time,
};

#[derive(Debug, Clone, Default, PartialEq)]
struct Counter {
    count: u32,
}

fn init_test(name: &str) {
    common::init_test_logging();
    test_phase!(name);
}

fn counter_store() -> Rc<EventStore<Counter>> {
    let store = EventStore::new(Counter::default(), StoreSettings::default());
    store
        .on("INCREMENT", |state: &mut Counter, _action, _old| {
            state.count += 1;
            Ok(())
        })
        .keep();
    store
}

fn lab() -> LabRuntime {
    LabRuntime::new(LabConfig::new()).expect("lab runtime")
}

fn auto_lab() -> LabRuntime {
    LabRuntime::new(LabConfig::new().auto_advance(true)).expect("lab runtime")
}

type OutcomeSlot<T> = Rc<RefCell<Option<RunOutcome<T>>>>;

fn spawn_run<T: 'static>(lab: &LabRuntime, flow: &Flow<Counter, T>) -> OutcomeSlot<T> {
    let slot: OutcomeSlot<T> = Rc::new(RefCell::new(None));
    let out = Rc::clone(&slot);
    let run = flow.run();
    lab.spawn(async move {
        let outcome = run.await.expect("flow run");
        *out.borrow_mut() = Some(outcome);
    });
    slot
}

#[test]
fn late_subscription_to_cancelled_source_fires_once() {
    init_test("late_subscription_to_cancelled_source_fires_once");
    let source = CancellationSource::new();
    source.cancel();

    let calls = Rc::new(Cell::new(0));
    let c = Rc::clone(&calls);
    let detach = source.add_event_handler(move |_| c.set(c.get() + 1));
    assert_with_log!(calls.get() == 1, "ran synchronously", 1, calls.get());
    assert!(!detach.is_attached());
    assert_eq!(source.handler_count(), 0);

    source.cancel();
    assert_with_log!(calls.get() == 1, "never registered", 1, calls.get());
    test_complete!("late_subscription_to_cancelled_source_fires_once");
}

#[test]
fn wait_until_resumes_after_publish() {
    init_test("wait_until_resumes_after_publish");
    let lab = lab();
    let store = counter_store();
    let flow = Flow::new(&lab.handle(), store.clone(), |ctx| async move {
        ctx.wait_until("INCREMENT").await;
        ctx.select(|s: &Counter| s.count).await
    });
    let outcome = spawn_run(&lab, &flow);
    lab.run_until_idle();
    assert!(!flow.is_done());
    assert_eq!(store.subscriber_count("INCREMENT"), 2);

    store.publish(Action::new("INCREMENT")).expect("publish");
    lab.run_until_idle();
    assert!(flow.is_done());
    assert_eq!(store.subscriber_count("INCREMENT"), 1);
    let outcome = outcome.borrow_mut().take();
    assert_with_log!(
        outcome == Some(RunOutcome::Completed(1)),
        "selected count",
        Some(RunOutcome::Completed(1)),
        outcome
    );
    test_complete!("wait_until_resumes_after_publish");
}

#[test]
fn parent_cancel_cascades_to_spawned_child() {
    init_test("parent_cancel_cascades_to_spawned_child");
    let lab = lab();
    let store = counter_store();
    let child_slot: Rc<RefCell<Option<Flow<Counter, ()>>>> = Rc::new(RefCell::new(None));

    let slot = Rc::clone(&child_slot);
    let parent = Flow::new(&lab.handle(), store.clone(), move |ctx| async move {
        let child = ctx
            .spawn(|child_ctx| async move {
                child_ctx.wait_until("NEVER").await;
            })
            .await;
        *slot.borrow_mut() = Some(child);
        ctx.wait_until("NEVER").await;
    });
    spawn_run(&lab, &parent);
    lab.run_until_idle();

    let child = child_slot.borrow().clone().expect("child spawned");
    assert!(child.is_running());
    assert!(child.cancellation_source().is_linked_to_parent());

    parent.cancel();
    assert_with_log!(
        child.is_cancelled(),
        "child cancelled with parent",
        true,
        child.is_cancelled()
    );
    lab.run_until_idle();
    assert!(parent.is_done());
    assert!(child.is_done());
    assert!(!child.cancellation_source().is_linked_to_parent());
    assert_eq!(store.subscriber_count("NEVER"), 0);
    test_complete!("parent_cancel_cascades_to_spawned_child");
}

#[test]
fn finished_child_is_unlinked_from_parent() {
    init_test("finished_child_is_unlinked_from_parent");
    let lab = lab();
    let store = counter_store();
    let child_slot: Rc<RefCell<Option<Flow<Counter, u32>>>> = Rc::new(RefCell::new(None));

    let slot = Rc::clone(&child_slot);
    let parent = Flow::new(&lab.handle(), store.clone(), move |ctx| async move {
        let child = ctx
            .spawn(|child_ctx| async move {
                child_ctx.wait_until("INCREMENT").await;
                7
            })
            .await;
        *slot.borrow_mut() = Some(child.clone());
        ctx.call(move || child.join()).await
    });
    spawn_run(&lab, &parent);
    lab.run_until_idle();
    let parent_handlers = parent.cancellation_source().handler_count();

    store.publish(Action::new("INCREMENT")).expect("publish");
    lab.run_until_idle();

    let child = child_slot.borrow().clone().expect("child spawned");
    assert!(child.is_done());
    assert!(!child.cancellation_source().is_linked_to_parent());
    assert!(!child.is_cancelled());
    assert!(parent.is_done());
    assert!(parent.cancellation_source().handler_count() < parent_handlers);

    parent.cancel();
    assert!(!child.is_cancelled());
    test_complete!("finished_child_is_unlinked_from_parent");
}

#[test]
fn all_collects_outputs_by_name() {
    init_test("all_collects_outputs_by_name");
    let lab = auto_lab();
    let store = counter_store();
    let handle = lab.handle();
    let flow = Flow::new(&lab.handle(), store, move |ctx| async move {
        let slow = handle.clone();
        let fast = handle.clone();
        ctx.all([
            (
                "a",
                ctx.call(move || async move {
                    slow.sleep(Duration::from_millis(20)).await;
                    1
                }),
            ),
            (
                "b",
                ctx.call(move || async move {
                    fast.sleep(Duration::from_millis(10)).await;
                    2
                }),
            ),
        ])
        .await
    });
    let outcome = lab.block_on(flow.run()).expect("no stall").expect("run");
    let map = outcome.into_completed().expect("completed");
    let entries: Vec<(&str, i32)> = map.iter().map(|(k, v)| (k.as_str(), *v)).collect();
    assert_with_log!(
        entries == vec![("a", 1), ("b", 2)],
        "all result",
        vec![("a", 1), ("b", 2)],
        entries
    );
    assert_eq!(lab.now(), Time::from_millis(20));
    test_complete!("all_collects_outputs_by_name");
}

#[test]
fn race_returns_first_and_lets_losers_finish() {
    init_test("race_returns_first_and_lets_losers_finish");
    let lab = auto_lab();
    let store = counter_store();
    let handle = lab.handle();
    let loser_done = Rc::new(Cell::new(false));

    let done = Rc::clone(&loser_done);
    let flow = Flow::new(&lab.handle(), store, move |ctx| async move {
        let winner = handle.clone();
        let loser = handle.clone();
        ctx.race([
            (
                "a",
                ctx.call(move || async move {
                    winner.sleep(Duration::from_millis(5)).await;
                    5
                }),
            ),
            (
                "b",
                ctx.call(move || async move {
                    loser.sleep(Duration::from_millis(30)).await;
                    done.set(true);
                    9
                }),
            ),
        ])
        .await
    });
    let outcome = lab.block_on(flow.run()).expect("no stall").expect("run");
    assert_with_log!(
        outcome == RunOutcome::Completed(Raced::new("a", 5)),
        "race winner",
        Raced::new("a", 5),
        outcome
    );
    assert!(!loser_done.get());

    let summary = lab.run_with_auto_advance();
    assert!(summary.is_quiescent());
    assert_with_log!(loser_done.get(), "loser ran to completion", true, loser_done.get());
    test_complete!("race_returns_first_and_lets_losers_finish");
}

#[test]
fn cancelled_race_leaves_no_tasks_behind() {
    init_test("cancelled_race_leaves_no_tasks_behind");
    let lab = lab();
    let store = counter_store();
    let flow = Flow::new(&lab.handle(), store.clone(), |ctx| async move {
        ctx.race([("a", ctx.wait_until("A")), ("b", ctx.wait_until("B"))])
            .await
    });
    let outcome = spawn_run(&lab, &flow);
    lab.run_until_idle();
    assert_eq!(store.subscriber_count("A"), 1);
    assert_eq!(store.subscriber_count("B"), 1);
    assert_eq!(lab.handle().task_count(), 3);

    flow.cancel();
    let summary = lab.run_until_quiescent();
    assert!(flow.is_done());
    assert_eq!(outcome.borrow_mut().take(), Some(RunOutcome::Cancelled));
    assert_eq!(store.subscriber_count("A"), 0);
    assert_eq!(store.subscriber_count("B"), 0);
    assert_with_log!(
        summary.pending_tasks == 0,
        "race branches released",
        0,
        summary.pending_tasks
    );
    assert_eq!(lab.handle().task_count(), 0);
    test_complete!("cancelled_race_leaves_no_tasks_behind");
}

#[test]
fn cancelled_delay_never_resumes() {
    init_test("cancelled_delay_never_resumes");
    let lab = lab();
    let store = counter_store();
    let resumed = Rc::new(Cell::new(false));

    let flag = Rc::clone(&resumed);
    let flow = Flow::new(&lab.handle(), store, move |ctx| async move {
        ctx.delay(Duration::from_millis(100)).await;
        flag.set(true);
    });
    let outcome = spawn_run(&lab, &flow);
    lab.run_until_idle();
    assert_eq!(lab.handle().timer_count(), 1);

    lab.advance_time(Duration::from_millis(10));
    lab.run_until_idle();
    flow.cancel();
    assert_eq!(lab.handle().timer_count(), 0);

    lab.advance_time(Duration::from_millis(200));
    lab.run_until_idle();
    assert_with_log!(!resumed.get(), "never resumed", false, resumed.get());
    assert!(flow.is_done());
    assert_eq!(outcome.borrow_mut().take(), Some(RunOutcome::Cancelled));
    let output = lab.block_on(flow.join()).expect("done");
    assert_eq!(output, None);
    test_complete!("cancelled_delay_never_resumes");
}

#[test]
fn test_driver_walks_increment_scenario() {
    init_test("test_driver_walks_increment_scenario");
    let lab = lab();
    let store = counter_store();
    let flow = Flow::new(&lab.handle(), store.clone(), |ctx| async move {
        ctx.wait_until("INCREMENT").await;
        ctx.select(|s: &Counter| s.count).await
    });
    let mut driver = flow.test().expect("driver");

    let step = driver.next().expect("step 1");
    assert_eq!(step, &Step::Yielded(Effect::wait_until("INCREMENT")));

    store.publish(Action::new("INCREMENT")).expect("publish");
    assert_eq!(store.state().count, 1);

    let step = driver.next().expect("step 2");
    assert!(matches!(step, Step::Yielded(Effect::Select(_))));

    let step = driver.next_with(1_u32).expect("step 3");
    assert_with_log!(
        step == &Step::Complete(1),
        "flow output",
        Step::<u32>::Complete(1),
        step
    );
    assert!(flow.is_done());
    assert!(driver.next().is_err());
    assert_eq!(store.subscriber_count("INCREMENT"), 1);
    test_complete!("test_driver_walks_increment_scenario");
}
