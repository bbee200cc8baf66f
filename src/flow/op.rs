//! The operation future returned by every effect method.
//!
//! Awaiting an [`Op`] walks a fixed protocol with the driver:
//!
//! 1. **Describe**: yield the [`Effect`] descriptor and suspend.
//! 2. **Operate**: in test mode, resume with the value the test driver
//!    injected. Otherwise start the real operation, yield it, and suspend.
//! 3. **Resume**: complete with the operation's output, fed back by the run
//!    loop.
//!
//! The op never registers a waker itself: the driver re-polls the coroutine
//! after every yield.

use std::any::type_name;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures_lite::future::BoxedLocal;

use super::task::{Resume, TaskState, Yielded};
use crate::effect::Effect;
use crate::error::Error;
use crate::tracing_compat::error;

type Start<R> = Box<dyn FnOnce() -> BoxedLocal<R>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Describe,
    Operate,
    Resume,
    Done,
}

/// A pending effect of a flow.
///
/// Created by the [`FlowContext`](super::FlowContext) effect methods and
/// resolved by awaiting it inside the flow body.
#[must_use = "an effect does nothing unless awaited"]
pub struct Op<R> {
    task: Rc<TaskState>,
    effect: Option<Effect>,
    start: Option<Start<R>>,
    stage: Stage,
}

impl<R: 'static> Op<R> {
    pub(crate) fn new<F>(task: Rc<TaskState>, effect: Effect, start: F) -> Self
    where
        F: FnOnce() -> BoxedLocal<R> + 'static,
    {
        Self {
            task,
            effect: Some(effect),
            start: Some(Box::new(start)),
            stage: Stage::Describe,
        }
    }

    /// The descriptor this op yields first.
    #[must_use]
    pub fn effect(&self) -> Option<&Effect> {
        self.effect.as_ref()
    }

    /// Transforms the output.
    ///
    /// In test mode the injected value must already have the mapped type.
    pub fn map<U, F>(mut self, f: F) -> Op<U>
    where
        U: 'static,
        F: FnOnce(R) -> U + 'static,
    {
        let start = self.start.take();
        Op {
            task: Rc::clone(&self.task),
            effect: self.effect.take(),
            start: start.map(|start| -> Start<U> {
                Box::new(move || {
                    let operation = start();
                    Box::pin(async move { f(operation.await) })
                })
            }),
            stage: self.stage,
        }
    }

    /// Starts the real operation directly, skipping the descriptor.
    ///
    /// Used for the named sub-operations of `race` and `all`.
    pub(crate) fn into_operation(mut self) -> BoxedLocal<R> {
        match self.start.take() {
            Some(start) => start(),
            None => Box::pin(std::future::pending()),
        }
    }

    fn fault(&self, err: Error) {
        error!(flow = %self.task.id(), error = %err, "effect protocol fault");
        self.task.push_yield(Yielded::Fault(err.with_flow(self.task.id())));
    }

    fn resolve(&mut self, value: Resume) -> Result<R, Resume> {
        match value.downcast::<R>() {
            Ok(value) => {
                self.stage = Stage::Done;
                Ok(*value)
            }
            Err(value) => Err(value),
        }
    }
}

impl<R: 'static> Future for Op<R> {
    type Output = R;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<R> {
        let this = self.get_mut();
        match this.stage {
            Stage::Describe => {
                let Some(effect) = this.effect.clone() else {
                    this.fault(Error::internal("effect descriptor missing"));
                    return Poll::Pending;
                };
                this.task.push_yield(Yielded::Effect(effect));
                this.stage = Stage::Operate;
                Poll::Pending
            }
            Stage::Operate if this.task.is_test() => {
                let Some(value) = this.task.take_resume() else {
                    return Poll::Pending;
                };
                match this.resolve(value) {
                    Ok(value) => Poll::Ready(value),
                    Err(_) => {
                        this.fault(Error::resume_type_mismatch(type_name::<R>()));
                        Poll::Pending
                    }
                }
            }
            Stage::Operate => {
                this.task.take_resume();
                let Some(start) = this.start.take() else {
                    this.fault(Error::internal("operation already started"));
                    return Poll::Pending;
                };
                let operation = start();
                this.task.push_yield(Yielded::Operation(Box::pin(async move {
                    Box::new(operation.await) as Resume
                })));
                this.stage = Stage::Resume;
                Poll::Pending
            }
            Stage::Resume => {
                let Some(value) = this.task.take_resume() else {
                    return Poll::Pending;
                };
                match this.resolve(value) {
                    Ok(value) => Poll::Ready(value),
                    Err(_) => {
                        this.fault(Error::internal(format!(
                            "operation resumed with a value that is not a `{}`",
                            type_name::<R>()
                        )));
                        Poll::Pending
                    }
                }
            }
            Stage::Done => {
                this.fault(Error::protocol_violation("effect polled after completion"));
                Poll::Pending
            }
        }
    }
}

impl<R> fmt::Debug for Op<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Op")
            .field("flow", &self.task.id())
            .field("effect", &self.effect)
            .field("stage", &self.stage)
            .finish()
    }
}
