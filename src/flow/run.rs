//! The run loop: drives a flow against real time.
//!
//! Each turn resumes the coroutine until it yields an effect descriptor,
//! logs the descriptor, resumes again to obtain the real operation, and
//! awaits that operation raced against the flow's cancellation. The
//! operation's output is the resume value of the next turn. Cancellation at
//! any point drops the coroutine, which runs its `Drop` cleanup; the pending
//! operation is abandoned, not cancelled.

use std::task::{Context, Poll};

use futures_lite::future;

use super::handle::Flow;
use super::task::{Resume, Yielded};
use crate::combinator::{select, Either};
use crate::error::{Error, Result};
use crate::trace::TraceEventKind;
use crate::tracing_compat::{debug, error, info, warn};

/// Ends the flow as cancelled if the driving future is dropped before the
/// run loop exits.
struct DriveGuard<'a, S: 'static, T: 'static> {
    flow: &'a Flow<S, T>,
    armed: bool,
}

impl<S: 'static, T: 'static> Drop for DriveGuard<'_, S, T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let flow = self.flow;
        warn!(flow = %flow.id(), "flow driver dropped mid-run; cancelling flow");
        flow.task().source().cancel();
        flow.terminate();
        flow.finish(false);
    }
}

/// What one resumption of the coroutine produced.
enum Turn {
    /// The body returned; its output is stored on the flow.
    Complete,
    /// The body yielded to the driver.
    Yield(Yielded),
    /// The flow was cancelled while the body was suspended.
    Cancelled,
}

impl<S: 'static, T: 'static> Flow<S, T> {
    /// Drives the flow until it finishes.
    ///
    /// Returns `Ok(false)` without doing anything if the flow is already
    /// running. The output, if any, stays on the flow.
    pub(crate) async fn drive(&self) -> Result<bool> {
        let task = self.task();
        if task.is_done() {
            return Err(Error::flow_completed(task.id()));
        }
        if task.is_running() {
            debug!(flow = %task.id(), "flow already running");
            return Ok(false);
        }
        task.start(false);
        debug!(flow = %task.id(), "flow started");
        self.context()
            .runtime
            .record(TraceEventKind::FlowStarted { flow: task.id() });

        let mut guard = DriveGuard {
            flow: self,
            armed: true,
        };
        let result = self.run_loop().await;
        guard.armed = false;
        if let Err(err) = &result {
            error!(flow = %task.id(), error = %err, "flow failed");
        }
        let completed = self.inner.output.borrow().is_some();
        self.finish(completed);
        result.map(|()| true)
    }

    async fn run_loop(&self) -> Result<()> {
        let task = self.task();
        let mut resume: Option<Resume> = None;
        loop {
            if task.source().is_cancelled() {
                self.terminate();
                return Ok(());
            }
            if let Some(value) = resume.take() {
                task.set_resume(value);
            }

            match self.turn().await {
                Turn::Complete => return Ok(()),
                Turn::Cancelled => {
                    self.terminate();
                    return Ok(());
                }
                Turn::Yield(Yielded::Effect(effect)) => {
                    let ctx = self.context();
                    if ctx.store.settings().debug.flow || ctx.runtime.config().debug_flow {
                        info!(flow = %task.id(), effect = %effect.kind(), "Action: {}", effect.kind());
                        ctx.runtime
                            .record(TraceEventKind::effect(task.id(), effect.kind()));
                    }
                }
                Turn::Yield(Yielded::Operation(_)) => {
                    return Err(Error::protocol_violation(
                        "operation yielded where an effect descriptor was expected",
                    )
                    .with_flow(task.id()));
                }
                Turn::Yield(Yielded::Fault(err)) => return Err(err),
            }

            let operation = match self.turn().await {
                Turn::Complete => return Ok(()),
                Turn::Cancelled => {
                    self.terminate();
                    return Ok(());
                }
                Turn::Yield(Yielded::Operation(operation)) => operation,
                Turn::Yield(Yielded::Effect(effect)) => {
                    return Err(Error::protocol_violation(format!(
                        "effect {} yielded while another was outstanding",
                        effect.kind()
                    ))
                    .with_flow(task.id()));
                }
                Turn::Yield(Yielded::Fault(err)) => return Err(err),
            };

            if task.source().is_cancelled() {
                self.terminate();
                return Ok(());
            }
            match select(operation, task.source().cancelled()).await {
                Either::Left(value) => resume = Some(value),
                Either::Right(()) => {
                    self.terminate();
                    return Ok(());
                }
            }
        }
    }

    /// Resumes the coroutine until it completes or yields, racing
    /// cancellation while it is suspended on something other than an effect.
    async fn turn(&self) -> Turn {
        let resumed = future::poll_fn(|cx| self.poll_coroutine(cx));
        match select(resumed, self.task().source().cancelled()).await {
            Either::Left(turn) => turn,
            Either::Right(()) => Turn::Cancelled,
        }
    }

    fn poll_coroutine(&self, cx: &mut Context<'_>) -> Poll<Turn> {
        let task = self.task();
        let taken = self.inner.coroutine.borrow_mut().take();
        let Some(mut coroutine) = taken else {
            return Poll::Ready(Turn::Complete);
        };
        let polled = coroutine.as_mut().poll(cx);
        // A resume value the coroutine did not consume is stale.
        task.take_resume();
        match polled {
            Poll::Ready(output) => {
                drop(coroutine);
                *self.inner.output.borrow_mut() = Some(output);
                Poll::Ready(Turn::Complete)
            }
            Poll::Pending => {
                *self.inner.coroutine.borrow_mut() = Some(coroutine);
                match task.take_yield() {
                    Some(yielded) => Poll::Ready(Turn::Yield(yielded)),
                    None => Poll::Pending,
                }
            }
        }
    }

    /// Drops the coroutine, running its cleanup.
    fn terminate(&self) {
        let coroutine = self.inner.coroutine.borrow_mut().take();
        if coroutine.is_some() {
            debug!(flow = %self.id(), "flow terminated by cancellation");
        }
        drop(coroutine);
    }

    /// Marks the flow done and fires its done listeners.
    pub(crate) fn finish(&self, completed: bool) {
        let task = self.task();
        let coroutine = self.inner.coroutine.borrow_mut().take();
        drop(coroutine);
        let kind = if completed {
            debug!(flow = %task.id(), "flow completed");
            TraceEventKind::FlowCompleted { flow: task.id() }
        } else {
            debug!(flow = %task.id(), "flow cancelled");
            TraceEventKind::FlowCancelled { flow: task.id() }
        };
        self.context().runtime.record(kind);
        task.finish();
    }
}
