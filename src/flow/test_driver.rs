//! Step-wise driver for testing flow bodies.
//!
//! Each step resumes the coroutine once with an injected value and returns
//! whatever it yields. Effects are never performed: a test asserts on the
//! descriptor and then injects the value the effect would have produced.

use std::any::Any;
use std::fmt;
use std::task::{Context, Poll};

use super::handle::Flow;
use super::task::Yielded;
use crate::effect::Effect;
use crate::error::{Error, ErrorKind, Result};
use crate::tracing_compat::trace;

/// One step of a flow under test.
#[derive(Debug, Clone, PartialEq)]
pub enum Step<T> {
    /// The flow yielded this effect descriptor.
    Yielded(Effect),
    /// The flow's body returned.
    Complete(T),
}

impl<T> Step<T> {
    /// The yielded effect, if this step yielded one.
    #[must_use]
    pub const fn effect(&self) -> Option<&Effect> {
        match self {
            Self::Yielded(effect) => Some(effect),
            Self::Complete(_) => None,
        }
    }

    /// The body's output, if this step completed the flow.
    #[must_use]
    pub const fn output(&self) -> Option<&T> {
        match self {
            Self::Complete(value) => Some(value),
            Self::Yielded(_) => None,
        }
    }

    /// Returns true if this step completed the flow.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }
}

/// Drives a flow in test mode. Obtained from [`Flow::test`].
pub struct TestDriver<S: 'static, T: 'static> {
    flow: Flow<S, T>,
    last: Option<Step<T>>,
}

impl<S: 'static, T: 'static> TestDriver<S, T> {
    pub(crate) const fn new(flow: Flow<S, T>) -> Self {
        Self { flow, last: None }
    }

    /// The flow under test.
    #[must_use]
    pub const fn flow(&self) -> &Flow<S, T> {
        &self.flow
    }

    /// Resumes the flow with `()`.
    pub fn next(&mut self) -> Result<&Step<T>> {
        self.next_with(())
    }

    /// Resumes the flow with `value` as the output of the pending effect.
    ///
    /// The first step starts the body; its resume value is ignored.
    pub fn next_with<V: Any>(&mut self, value: V) -> Result<&Step<T>> {
        let task = self.flow.task();
        if task.is_done() {
            return Err(Error::flow_completed(task.id()));
        }
        task.set_resume(Box::new(value));

        let taken = self.flow.inner.coroutine.borrow_mut().take();
        let Some(mut coroutine) = taken else {
            return Err(Error::internal("coroutine missing").with_flow(task.id()));
        };
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let polled = coroutine.as_mut().poll(&mut cx);
        task.take_resume();

        let step = match polled {
            Poll::Ready(output) => {
                drop(coroutine);
                self.flow.finish(true);
                Step::Complete(output)
            }
            Poll::Pending => {
                *self.flow.inner.coroutine.borrow_mut() = Some(coroutine);
                match task.take_yield() {
                    Some(Yielded::Effect(effect)) => {
                        trace!(flow = %task.id(), effect = %effect, "test step");
                        Step::Yielded(effect)
                    }
                    Some(Yielded::Fault(err)) => return Err(err),
                    Some(Yielded::Operation(_)) => {
                        return Err(Error::protocol_violation(
                            "real operation started in test mode",
                        )
                        .with_flow(task.id()));
                    }
                    None => {
                        return Err(Error::new(ErrorKind::Stalled)
                            .with_message("flow suspended outside an effect")
                            .with_flow(task.id()));
                    }
                }
            }
        };
        Ok(self.last.insert(step))
    }

    /// The last step returned, if any.
    #[must_use]
    pub const fn result(&self) -> Option<&Step<T>> {
        self.last.as_ref()
    }

    /// Consumes the driver, returning the output if the flow completed.
    pub fn into_output(self) -> Option<T> {
        match self.last {
            Some(Step::Complete(value)) => Some(value),
            _ => None,
        }
    }
}

impl<S: 'static, T: 'static> fmt::Debug for TestDriver<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestDriver")
            .field("flow", &self.flow)
            .field("last", &self.last.as_ref().map(Step::effect))
            .finish()
    }
}

fn noop_waker() -> std::task::Waker {
    struct Noop;
    impl std::task::Wake for Noop {
        fn wake(self: std::sync::Arc<Self>) {}
    }
    std::sync::Arc::new(Noop).into()
}
