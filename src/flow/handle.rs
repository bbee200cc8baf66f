//! Flow handles.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::rc::Rc;
use std::task::Poll;

use futures_lite::future::{self, BoxedLocal};

use super::context::FlowContext;
use super::task::TaskState;
use super::test_driver::TestDriver;
use crate::cancel::CancellationSource;
use crate::error::Result;
use crate::runtime::RuntimeHandle;
use crate::store::Store;
use crate::types::FlowId;

/// How a call to [`Flow::run`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome<T> {
    /// The body returned.
    Completed(T),
    /// The flow was cancelled before its body returned.
    Cancelled,
    /// The flow was already being driven; this call did nothing.
    AlreadyRunning,
}

impl<T> RunOutcome<T> {
    /// Returns true if the body returned.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Returns true if the flow was cancelled.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The body's output, if it returned.
    pub fn into_completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            _ => None,
        }
    }
}

pub(crate) struct FlowInner<S: 'static, T> {
    pub(crate) ctx: FlowContext<S>,
    pub(crate) coroutine: RefCell<Option<BoxedLocal<T>>>,
    pub(crate) output: RefCell<Option<T>>,
}

/// A flow: a body plus the task that drives it.
///
/// Cloning yields another handle to the same flow.
pub struct Flow<S: 'static, T: 'static> {
    pub(crate) inner: Rc<FlowInner<S, T>>,
}

impl<S: 'static, T: 'static> Clone for Flow<S, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<S: 'static, T: 'static> Flow<S, T> {
    /// Creates a root flow. `body` is invoked once, now, to obtain the
    /// coroutine; nothing runs until the flow is driven.
    pub fn new<B, Fut>(runtime: &RuntimeHandle, store: Rc<dyn Store<State = S>>, body: B) -> Self
    where
        B: FnOnce(FlowContext<S>) -> Fut,
        Fut: Future<Output = T> + 'static,
    {
        Self::with_source(runtime, store, CancellationSource::new(), body)
    }

    pub(crate) fn with_source<B, Fut>(
        runtime: &RuntimeHandle,
        store: Rc<dyn Store<State = S>>,
        source: CancellationSource,
        body: B,
    ) -> Self
    where
        B: FnOnce(FlowContext<S>) -> Fut,
        Fut: Future<Output = T> + 'static,
    {
        let task = Rc::new(TaskState::new(runtime.next_flow_id(), source));
        let ctx = FlowContext {
            task,
            store,
            runtime: runtime.clone(),
        };
        let coroutine: BoxedLocal<T> = Box::pin(body(ctx.clone()));
        Self {
            inner: Rc::new(FlowInner {
                ctx,
                coroutine: RefCell::new(Some(coroutine)),
                output: RefCell::new(None),
            }),
        }
    }

    pub(crate) fn task(&self) -> &Rc<TaskState> {
        &self.inner.ctx.task
    }

    pub(crate) fn context(&self) -> &FlowContext<S> {
        &self.inner.ctx
    }

    /// Id of this flow.
    #[must_use]
    pub fn id(&self) -> FlowId {
        self.task().id()
    }

    /// Returns true once the flow finished, normally or by cancellation.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.task().is_done()
    }

    /// Returns true while a driver is driving the flow.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task().is_running()
    }

    /// Returns true once the flow has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.task().source().is_cancelled()
    }

    /// The flow's cancellation source.
    #[must_use]
    pub fn cancellation_source(&self) -> &CancellationSource {
        self.task().source()
    }

    /// Cancels the flow and its descendants.
    ///
    /// The run loop ends the flow at its next turn.
    pub fn cancel(&self) {
        self.task().source().cancel();
    }

    /// Type-erased handle to this flow.
    #[must_use]
    pub fn as_flow_ref(&self) -> FlowRef {
        FlowRef::from_task(Rc::clone(self.task()))
    }

    /// Drives the flow against real time until it finishes.
    ///
    /// The returned future owns a handle to the flow, so it can be spawned.
    /// Fails with [`ErrorKind::FlowCompleted`](crate::error::ErrorKind) if the
    /// flow already finished.
    pub fn run(&self) -> impl Future<Output = Result<RunOutcome<T>>> + 'static {
        let flow = self.clone();
        async move {
            if !flow.drive().await? {
                return Ok(RunOutcome::AlreadyRunning);
            }
            Ok(match flow.inner.output.borrow_mut().take() {
                Some(value) => RunOutcome::Completed(value),
                None => RunOutcome::Cancelled,
            })
        }
    }

    /// Starts driving the flow step by step without side effects.
    ///
    /// Returns `None` if the flow is already running.
    #[must_use]
    pub fn test(&self) -> Option<TestDriver<S, T>> {
        if self.task().is_running() {
            return None;
        }
        self.task().start(true);
        Some(TestDriver::new(self.clone()))
    }

    /// Resolves with the output once the flow finished.
    ///
    /// Resolves with `None` if the flow was cancelled, or if another caller
    /// already took the output.
    pub fn join(&self) -> impl Future<Output = Option<T>> + 'static {
        let flow = self.clone();
        future::poll_fn(move |cx| {
            if flow.is_done() {
                return Poll::Ready(flow.inner.output.borrow_mut().take());
            }
            flow.task().register_joiner(cx.waker());
            Poll::Pending
        })
    }
}

impl<S: 'static, T: 'static> fmt::Debug for Flow<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow")
            .field("task", self.task())
            .finish_non_exhaustive()
    }
}

/// Type-erased handle to a flow, used as the target of
/// [`FlowContext::cancel`].
#[derive(Clone)]
pub struct FlowRef {
    task: Rc<TaskState>,
}

impl FlowRef {
    pub(crate) const fn from_task(task: Rc<TaskState>) -> Self {
        Self { task }
    }

    /// Id of the referenced flow.
    #[must_use]
    pub fn id(&self) -> FlowId {
        self.task.id()
    }

    /// Returns true once the referenced flow finished.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.task.is_done()
    }

    /// Returns true once the referenced flow has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.task.source().is_cancelled()
    }

    /// Cancels the referenced flow and its descendants.
    pub fn cancel(&self) {
        self.task.source().cancel();
    }
}

impl<S: 'static, T: 'static> From<&Flow<S, T>> for FlowRef {
    fn from(flow: &Flow<S, T>) -> Self {
        flow.as_flow_ref()
    }
}

impl<S: 'static, T: 'static> From<Flow<S, T>> for FlowRef {
    fn from(flow: Flow<S, T>) -> Self {
        flow.as_flow_ref()
    }
}

impl fmt::Debug for FlowRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FlowRef").field(&self.task.id()).finish()
    }
}
