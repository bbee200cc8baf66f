//! The effect surface a flow body calls.

use std::fmt;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use indexmap::IndexMap;
use serde_json::Value;

use super::handle::{Flow, FlowRef};
use super::op::Op;
use super::operation::{CancellableDelay, EventWait, Settled};
use super::task::TaskState;
use crate::cancel::CancellationSource;
use crate::combinator::{join_named, select, Either};
use crate::effect::{Effect, FnRef};
use crate::error::PublishError;
use crate::runtime::RuntimeHandle;
use crate::store::{Action, EventType, Store};
use crate::tracing_compat::{debug, error, trace};
use crate::types::FlowId;

/// Winner of a [`FlowContext::race`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raced<T> {
    /// Name of the operation that settled first.
    pub name: String,
    /// Its output.
    pub value: T,
}

impl<T> Raced<T> {
    /// Creates a race result.
    pub fn new(name: impl Into<String>, value: T) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Handle passed into a flow body.
///
/// Every method returns an [`Op`] that must be awaited inside the body. In
/// test mode the op resolves with whatever the test driver injects and
/// nothing else happens.
pub struct FlowContext<S: 'static> {
    pub(crate) task: Rc<TaskState>,
    pub(crate) store: Rc<dyn Store<State = S>>,
    pub(crate) runtime: RuntimeHandle,
}

impl<S: 'static> Clone for FlowContext<S> {
    fn clone(&self) -> Self {
        Self {
            task: Rc::clone(&self.task),
            store: Rc::clone(&self.store),
            runtime: self.runtime.clone(),
        }
    }
}

impl<S: 'static> FlowContext<S> {
    /// Id of the flow this context belongs to.
    #[must_use]
    pub fn id(&self) -> FlowId {
        self.task.id()
    }

    /// Returns true once the flow has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.task.source().is_cancelled()
    }

    /// Type-erased handle to this flow, for `cancel`.
    #[must_use]
    pub fn flow_ref(&self) -> FlowRef {
        FlowRef::from_task(Rc::clone(&self.task))
    }

    /// The runtime the flow runs on.
    #[must_use]
    pub fn runtime(&self) -> &RuntimeHandle {
        &self.runtime
    }

    fn op<R, F>(&self, effect: Effect, start: F) -> Op<R>
    where
        R: 'static,
        F: FnOnce() -> futures_lite::future::BoxedLocal<R> + 'static,
    {
        Op::new(Rc::clone(&self.task), effect, start)
    }

    fn source(&self) -> &CancellationSource {
        self.task.source()
    }

    /// Suspends until `event` is published once.
    pub fn wait_until(&self, event: impl Into<EventType>) -> Op<()> {
        let event = event.into();
        let ctx = self.clone();
        self.op(Effect::WaitUntil(event.clone()), move || {
            let store = Rc::clone(&ctx.store);
            let wait = EventWait::new(ctx.source(), |fire| {
                store.subscribe(
                    &event,
                    Box::new(move |_state: &mut S, _action: &Action, _old: &S| {
                        fire();
                        Ok(())
                    }),
                )
            });
            Box::pin(wait)
        })
    }

    /// Evaluates `selector` against the store's current state.
    pub fn select<R, F>(&self, selector: F) -> Op<R>
    where
        R: 'static,
        F: FnOnce(&S) -> R + 'static,
    {
        let store = Rc::clone(&self.store);
        let flow = self.id();
        self.op(Effect::Select(FnRef::of::<F>()), move || {
            let mut selector = Some(selector);
            let mut selected = None;
            store.read(&mut |state| {
                if let Some(selector) = selector.take() {
                    selected = Some(selector(state));
                }
            });
            match selected {
                Some(value) => Box::pin(std::future::ready(value)),
                None => {
                    error!(flow = %flow, "store did not expose its state to select");
                    Box::pin(std::future::pending())
                }
            }
        })
    }

    /// Publishes `event` to the store.
    pub fn publish(
        &self,
        event: impl Into<EventType>,
        payload: Option<Value>,
        custom: Option<Value>,
    ) -> Op<Result<(), PublishError>> {
        self.publish_action(Action {
            event: event.into(),
            payload,
            custom,
        })
    }

    /// Publishes a prepared action to the store.
    pub fn publish_action(&self, action: Action) -> Op<Result<(), PublishError>> {
        let store = Rc::clone(&self.store);
        self.op(Effect::Publish(action.clone()), move || {
            Box::pin(std::future::ready(store.publish(action)))
        })
    }

    /// Runs `f` in the background and resumes with its output.
    ///
    /// If the flow is cancelled before the output is ready, the flow never
    /// resumes. `f` itself keeps running to completion.
    pub fn call<R, F, Fut>(&self, f: F) -> Op<R>
    where
        R: 'static,
        F: FnOnce() -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
    {
        let runtime = self.runtime.clone();
        let source = self.source().clone();
        self.op(Effect::Call(FnRef::of::<F>()), move || {
            let slot = Settled::new();
            let settle = Rc::clone(&slot);
            let operation = f();
            runtime.spawn(async move {
                let value = operation.await;
                if source.is_cancelled() {
                    trace!("call finished after cancellation; result dropped");
                } else {
                    settle.settle(value);
                }
            });
            Box::pin(slot.wait())
        })
    }

    /// Starts `body` as a child flow and resumes with its handle.
    ///
    /// Cancelling this flow cancels the child. The link is removed when the
    /// child finishes or is cancelled itself.
    pub fn spawn<T, B, Fut>(&self, body: B) -> Op<Flow<S, T>>
    where
        T: 'static,
        B: FnOnce(FlowContext<S>) -> Fut + 'static,
        Fut: Future<Output = T> + 'static,
    {
        let ctx = self.clone();
        self.op(Effect::Spawn(FnRef::of::<B>()), move || {
            let child = Flow::with_source(
                &ctx.runtime,
                Rc::clone(&ctx.store),
                ctx.source().child(),
                body,
            );
            let child_source = child.task().source().clone();
            child
                .task()
                .add_done_listener(move || {
                    child_source.detach_from_parent();
                });
            debug!(parent = %ctx.id(), child = %child.id(), "child flow spawned");
            let driven = child.clone();
            ctx.runtime.spawn(async move {
                if let Err(err) = driven.drive().await {
                    error!(flow = %driven.id(), error = %err, "child flow failed");
                }
            });
            Box::pin(std::future::ready(child))
        })
    }

    /// Cancels `target` and resumes with its `is_done` flag as read right
    /// after cancelling.
    ///
    /// The flag is usually still `false`: the target finishes on its run
    /// loop's next turn, not inside this call.
    pub fn cancel(&self, target: impl Into<FlowRef>) -> Op<bool> {
        let target = target.into();
        self.op(Effect::Cancel(target.id()), move || {
            target.cancel();
            Box::pin(std::future::ready(target.is_done()))
        })
    }

    /// Runs `callback` once if this flow is cancelled.
    ///
    /// The registration is released when the flow finishes normally. Issue
    /// this as the first effect of the body so no cancellation is missed.
    pub fn on_cancel<F>(&self, callback: F) -> Op<()>
    where
        F: FnOnce() + 'static,
    {
        let task = Rc::clone(&self.task);
        self.op(Effect::OnCancel(FnRef::of::<F>()), move || {
            let mut callback = Some(callback);
            let registration = task.source().add_event_handler(move |detach| {
                detach.detach();
                if let Some(callback) = callback.take() {
                    callback();
                }
            });
            task.add_done_listener(move || {
                registration.detach();
            });
            Box::pin(std::future::ready(()))
        })
    }

    /// Suspends for `duration` of runtime time.
    pub fn delay(&self, duration: Duration) -> Op<()> {
        let ctx = self.clone();
        self.op(Effect::Delay(duration), move || {
            let sleep = ctx.runtime.sleep(duration);
            Box::pin(CancellableDelay::new(&ctx.runtime, ctx.source(), sleep))
        })
    }

    /// Runs every named op concurrently and resumes with all outputs, keyed
    /// by name in the given order.
    pub fn all<R, K, I>(&self, ops: I) -> Op<IndexMap<String, R>>
    where
        R: 'static,
        K: Into<String>,
        I: IntoIterator<Item = (K, Op<R>)>,
    {
        let ops: Vec<(String, Op<R>)> = ops.into_iter().map(|(k, op)| (k.into(), op)).collect();
        let names = ops.iter().map(|(name, _)| name.clone()).collect();
        self.op(Effect::All(names), move || {
            Box::pin(join_named(
                ops.into_iter()
                    .map(|(name, op)| (name, op.into_operation())),
            ))
        })
    }

    /// Runs every named op concurrently and resumes with the first to settle.
    ///
    /// The others keep running in the background; they are not cancelled.
    /// Branches still pending when this flow is cancelled are abandoned.
    pub fn race<R, K, I>(&self, ops: I) -> Op<Raced<R>>
    where
        R: 'static,
        K: Into<String>,
        I: IntoIterator<Item = (K, Op<R>)>,
    {
        let ops: Vec<(String, Op<R>)> = ops.into_iter().map(|(k, op)| (k.into(), op)).collect();
        let names = ops.iter().map(|(name, _)| name.clone()).collect();
        let runtime = self.runtime.clone();
        let source = self.source().clone();
        self.op(Effect::Race(names), move || {
            let slot = Settled::new();
            for (name, op) in ops {
                let operation = op.into_operation();
                let settle = Rc::clone(&slot);
                let cancelled = source.cancelled();
                runtime.spawn(async move {
                    // A cancelled branch can no longer settle.
                    let value = match select(operation, cancelled).await {
                        Either::Left(value) => value,
                        Either::Right(()) => {
                            trace!(branch = %name, "race branch abandoned by cancellation");
                            return;
                        }
                    };
                    if !settle.settle(Raced { name, value }) {
                        trace!("race branch settled after the winner");
                    }
                });
            }
            Box::pin(slot.wait())
        })
    }
}

impl<S: 'static> fmt::Debug for FlowContext<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowContext")
            .field("flow", &self.task.id())
            .field("is_cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}
