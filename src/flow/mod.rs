//! Flows: cooperative units of work that describe their effects.
//!
//! A flow body is an `async` closure receiving a [`FlowContext`]. Every
//! interaction with the outside world goes through a context method, which
//! returns an [`Op`]. Awaiting the op first yields an
//! [`Effect`](crate::effect::Effect) descriptor to whoever drives the flow:
//!
//! - [`Flow::run`] performs the real operation and resumes the body with its
//!   output, racing every wait against the flow's cancellation.
//! - [`Flow::test`] hands the descriptor to the test, which resumes the body
//!   with any value it likes through [`TestDriver::next_with`].
//!
//! ```ignore
//! let flow = Flow::new(&handle, store.clone(), |ctx| async move {
//!     ctx.wait_until("INCREMENT").await;
//!     ctx.select(|s: &Counter| s.count).await
//! });
//!
//! let mut driver = flow.test().unwrap();
//! assert_eq!(driver.next()?.effect(), Some(&Effect::wait_until("INCREMENT")));
//! ```
//!
//! Flows form a cancellation tree: [`FlowContext::spawn`] links the child's
//! cancellation to the parent's until the child finishes.

mod context;
mod handle;
mod op;
mod operation;
pub mod registry;
mod run;
mod task;
pub mod test_driver;

pub use context::{FlowContext, Raced};
pub use handle::{Flow, FlowRef, RunOutcome};
pub use op::Op;
pub use registry::FlowRegistry;
pub use test_driver::{Step, TestDriver};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::{Effect, EffectKind};
    use crate::error::ErrorKind;
    use crate::lab::{LabConfig, LabRuntime};
    use crate::store::{EventStore, Store, StoreSettings};
    use crate::test_utils::init_test_logging;
    use crate::trace::TraceEventKind;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::time::Duration;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Counter {
        count: u32,
    }

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    fn setup() -> (LabRuntime, Rc<EventStore<Counter>>) {
        let lab = LabRuntime::new(LabConfig::new()).expect("lab");
        let store = EventStore::new(Counter::default(), StoreSettings::default());
        store
            .on("INCREMENT", |state: &mut Counter, _action, _old| {
                state.count += 1;
                Ok(())
            })
            .keep();
        (lab, store)
    }

    #[test]
    fn run_completes_with_body_output() {
        init_test("run_completes_with_body_output");
        let (lab, store) = setup();
        let flow = Flow::new(&lab.handle(), store.clone(), |ctx| async move {
            ctx.publish("INCREMENT", None, None).await.expect("publish");
            ctx.select(|s: &Counter| s.count).await
        });
        let outcome = lab.block_on(flow.run()).expect("no stall").expect("run");
        crate::assert_with_log!(
            outcome == RunOutcome::Completed(1),
            "outcome",
            RunOutcome::Completed(1),
            outcome
        );
        assert!(flow.is_done());
        assert!(!flow.is_running());
        crate::test_complete!("run_completes_with_body_output");
    }

    #[test]
    fn running_a_finished_flow_fails() {
        init_test("running_a_finished_flow_fails");
        let (lab, store) = setup();
        let flow = Flow::new(&lab.handle(), store, |_ctx| async move {});
        lab.block_on(flow.run()).expect("no stall").expect("first run");
        let err = lab
            .block_on(flow.run())
            .expect("no stall")
            .expect_err("second run");
        assert_eq!(err.kind(), ErrorKind::FlowCompleted);
        assert_eq!(err.flow(), Some(flow.id()));
        crate::test_complete!("running_a_finished_flow_fails");
    }

    #[test]
    fn second_run_while_running_is_a_no_op() {
        let (lab, store) = setup();
        let flow = Flow::new(&lab.handle(), store.clone(), |ctx| async move {
            ctx.wait_until("GO").await;
        });
        let first = flow.run();
        lab.spawn(async move {
            first.await.expect("run");
        });
        lab.run_until_idle();
        assert!(flow.is_running());
        let second = lab.block_on(flow.run()).expect("no stall").expect("run");
        assert_eq!(second, RunOutcome::AlreadyRunning);
        assert!(flow.test().is_none());

        store.publish(crate::store::Action::new("GO")).expect("publish");
        lab.run_until_idle();
        assert!(flow.is_done());
    }

    #[test]
    fn dropping_run_mid_flight_cancels_the_flow() {
        init_test("dropping_run_mid_flight_cancels_the_flow");
        let (lab, store) = setup();
        let flow = Flow::new(&lab.handle(), store.clone(), |ctx| async move {
            ctx.wait_until("GO").await;
        });
        let run = flow.run();
        lab.spawn(async move {
            run.await.expect("run");
        });
        lab.run_until_idle();
        assert!(flow.is_running());
        assert_eq!(store.subscriber_count("GO"), 1);

        // Dropping the runtime drops the driving future with it.
        drop(lab);
        crate::assert_with_log!(
            !flow.is_running(),
            "driver released",
            false,
            flow.is_running()
        );
        assert!(flow.is_done());
        assert!(flow.is_cancelled());
        assert_eq!(store.subscriber_count("GO"), 0);

        let lab = LabRuntime::new(LabConfig::new()).expect("lab");
        let err = lab
            .block_on(flow.run())
            .expect("no stall")
            .expect_err("flow already finished");
        assert_eq!(err.kind(), ErrorKind::FlowCompleted);
        crate::test_complete!("dropping_run_mid_flight_cancels_the_flow");
    }

    #[test]
    fn run_dropped_before_first_poll_leaves_flow_idle() {
        let (lab, store) = setup();
        let flow = Flow::new(&lab.handle(), store, |_ctx| async move { 3 });
        drop(flow.run());
        assert!(!flow.is_running());
        assert!(!flow.is_done());
        let outcome = lab.block_on(flow.run()).expect("no stall").expect("run");
        assert_eq!(outcome, RunOutcome::Completed(3));
    }

    #[test]
    fn cancel_before_run_never_starts_body() {
        let (lab, store) = setup();
        let started = Rc::new(Cell::new(false));
        let flag = Rc::clone(&started);
        let flow = Flow::new(&lab.handle(), store, move |_ctx| async move {
            flag.set(true);
        });
        flow.cancel();
        let outcome = lab.block_on(flow.run()).expect("no stall").expect("run");
        assert_eq!(outcome, RunOutcome::Cancelled);
        assert!(!started.get());
        assert!(flow.is_done());
    }

    #[test]
    fn on_cancel_runs_once_and_is_released_on_completion() {
        init_test("on_cancel_runs_once_and_is_released_on_completion");
        let (lab, store) = setup();
        let calls = Rc::new(Cell::new(0));

        let c = Rc::clone(&calls);
        let cancelled = Flow::new(&lab.handle(), store.clone(), move |ctx| async move {
            ctx.on_cancel(move || c.set(c.get() + 1)).await;
            ctx.wait_until("NEVER").await;
        });
        let run = cancelled.run();
        lab.spawn(async move {
            let _ = run.await;
        });
        lab.run_until_idle();
        cancelled.cancel();
        cancelled.cancel();
        lab.run_until_idle();
        crate::assert_with_log!(calls.get() == 1, "handler calls", 1, calls.get());
        assert!(cancelled.is_done());

        crate::test_section!("released on completion");
        let c = Rc::clone(&calls);
        let finished = Flow::new(&lab.handle(), store, move |ctx| async move {
            ctx.on_cancel(move || c.set(c.get() + 100)).await;
        });
        lab.block_on(finished.run()).expect("no stall").expect("run");
        finished.cancel();
        assert_eq!(calls.get(), 1);
        assert_eq!(finished.task().source().handler_count(), 0);
        crate::test_complete!("on_cancel_runs_once_and_is_released_on_completion");
    }

    #[test]
    fn cancel_effect_reports_stale_is_done() {
        let (lab, store) = setup();
        let handle = lab.handle();
        let target = Flow::new(&handle, store.clone(), |ctx| async move {
            ctx.wait_until("NEVER").await;
        });
        let run = target.run();
        lab.spawn(async move {
            let _ = run.await;
        });
        lab.run_until_idle();

        let victim = target.clone();
        let canceller = Flow::new(&handle, store, move |ctx| async move {
            ctx.cancel(&victim).await
        });
        let outcome = lab.block_on(canceller.run()).expect("no stall").expect("run");
        assert_eq!(outcome, RunOutcome::Completed(false));
        lab.run_until_idle();
        assert!(target.is_done());
        assert!(target.is_cancelled());
    }

    #[test]
    fn call_result_is_dropped_after_cancellation() {
        init_test("call_result_is_dropped_after_cancellation");
        let (lab, store) = setup();
        let handle = lab.handle();
        let finished = Rc::new(Cell::new(false));
        let resumed = Rc::new(Cell::new(false));

        let sleeper = handle.clone();
        let done = Rc::clone(&finished);
        let after = Rc::clone(&resumed);
        let flow = Flow::new(&handle, store, move |ctx| async move {
            let value = ctx
                .call(move || async move {
                    sleeper.sleep(Duration::from_millis(50)).await;
                    done.set(true);
                    7
                })
                .await;
            after.set(value == 7);
        });
        let run = flow.run();
        lab.spawn(async move {
            let _ = run.await;
        });
        lab.run_until_idle();
        lab.advance_time(Duration::from_millis(10));
        flow.cancel();
        lab.run_until_idle();
        assert!(flow.is_done());

        lab.advance_time(Duration::from_millis(40));
        lab.run_until_idle();
        crate::assert_with_log!(finished.get(), "call ran to completion", true, finished.get());
        assert!(!resumed.get());
        crate::test_complete!("call_result_is_dropped_after_cancellation");
    }

    #[test]
    fn debug_flow_records_effects_in_trace() {
        let lab = LabRuntime::new(LabConfig::new()).expect("lab");
        let store = EventStore::new(Counter::default(), StoreSettings::default().with_flow_debug(true));
        let flow = Flow::new(&lab.handle(), store, |ctx| async move {
            ctx.select(|s: &Counter| s.count).await;
            ctx.publish("PING", None, None).await.expect("publish");
        });
        lab.block_on(flow.run()).expect("no stall").expect("run");
        let effects: Vec<String> = lab
            .trace()
            .snapshot()
            .into_iter()
            .filter_map(|event| match event.kind {
                TraceEventKind::EffectYielded { effect, .. } => Some(effect),
                _ => None,
            })
            .collect();
        assert_eq!(
            effects,
            vec![
                EffectKind::Select.as_str().to_owned(),
                EffectKind::Publish.as_str().to_owned()
            ]
        );
    }

    #[test]
    fn test_driver_injects_values_and_rejects_wrong_types() {
        init_test("test_driver_injects_values_and_rejects_wrong_types");
        let (lab, store) = setup();
        let flow = Flow::new(&lab.handle(), store, |ctx| async move {
            let n = ctx.select(|s: &Counter| s.count).await;
            ctx.delay(Duration::from_secs(n.into())).await;
            n * 2
        });
        let mut driver = flow.test().expect("not running");
        assert!(flow.is_running());
        assert!(flow.test().is_none());

        let step = driver.next().expect("first step");
        assert!(matches!(step, Step::Yielded(Effect::Select(_))));

        let err = driver.next_with("three").expect_err("wrong type");
        assert_eq!(err.kind(), ErrorKind::ResumeTypeMismatch);

        let step = driver.next_with(3_u32).expect("select resumed");
        assert_eq!(step, &Step::Yielded(Effect::Delay(Duration::from_secs(3))));

        let step = driver.next().expect("delay resumed");
        assert_eq!(step, &Step::Complete(6));
        assert!(flow.is_done());

        let err = driver.next().expect_err("done");
        assert!(err.is_flow_completed());
        assert_eq!(driver.result(), Some(&Step::Complete(6)));
        crate::test_complete!("test_driver_injects_values_and_rejects_wrong_types");
    }

    #[test]
    fn test_driver_reports_stall_outside_effects() {
        let (lab, store) = setup();
        let flow = Flow::new(&lab.handle(), store, |_ctx| async move {
            std::future::pending::<()>().await;
        });
        let mut driver = flow.test().expect("driver");
        let err = driver.next().expect_err("stalled");
        assert_eq!(err.kind(), ErrorKind::Stalled);
    }

    #[test]
    fn concurrent_effects_are_a_protocol_violation() {
        let (lab, store) = setup();
        let flow = Flow::new(&lab.handle(), store, |ctx| async move {
            futures_lite::future::zip(ctx.wait_until("A"), ctx.wait_until("B")).await;
        });
        let mut driver = flow.test().expect("driver");
        let err = driver.next().expect_err("two effects");
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
    }

    #[test]
    fn registry_runs_flows_by_name() {
        init_test("registry_runs_flows_by_name");
        let (lab, store) = setup();
        let mut registry = FlowRegistry::new(&lab.handle(), store.clone());
        registry.add_flow("bump", |ctx| async move {
            ctx.publish("INCREMENT", None, None).await.expect("publish");
        });
        registry.add_flow("bump twice", |ctx| async move {
            ctx.publish("INCREMENT", None, None).await.expect("publish");
            ctx.publish("INCREMENT", None, None).await.expect("publish");
        });
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["bump", "bump twice"]);

        registry.run_flow("bump").expect("registered");
        lab.run_until_idle();
        assert_eq!(store.state().count, 1);

        let err = registry.run_flow("missing").expect_err("unknown");
        assert_eq!(err.kind(), ErrorKind::UnknownFlow);

        registry.run_all();
        lab.run_until_idle();
        assert_eq!(store.state().count, 3);
        assert!(registry.flow("bump twice").is_some_and(Flow::is_done));

        let anonymous = registry.run_body(|ctx| async move {
            ctx.publish("INCREMENT", None, None).await.expect("publish");
        });
        lab.run_until_idle();
        assert!(anonymous.is_done());
        assert_eq!(store.state().count, 4);
        crate::test_complete!("registry_runs_flows_by_name");
    }
}
