//! Timer future.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use super::timer::TimerId;
use super::RuntimeHandle;
use crate::types::Time;

/// Resolves once the runtime clock reaches its deadline.
///
/// The timer is registered when the `Sleep` is created, not when it is first
/// polled, and removed when it resolves or is dropped.
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct Sleep {
    handle: RuntimeHandle,
    deadline: Time,
    timer: Option<TimerId>,
}

impl Sleep {
    pub(crate) fn new(handle: RuntimeHandle, deadline: Time) -> Self {
        let timer = Some(handle.register_timer(deadline));
        Self {
            handle,
            deadline,
            timer,
        }
    }

    /// When the sleep resolves.
    #[must_use]
    pub const fn deadline(&self) -> Time {
        self.deadline
    }

    /// The backing timer, while registered.
    #[must_use]
    pub const fn timer_id(&self) -> Option<TimerId> {
        self.timer
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        if this.handle.now() >= this.deadline {
            if let Some(timer) = this.timer.take() {
                this.handle.cancel_timer(timer);
            }
            return Poll::Ready(());
        }
        let registered = this
            .timer
            .is_some_and(|timer| this.handle.set_timer_waker(timer, cx.waker()));
        if !registered {
            // Cancelled from outside; re-arm so the sleep still resolves.
            let timer = this.handle.register_timer(this.deadline);
            this.handle.set_timer_waker(timer, cx.waker());
            this.timer = Some(timer);
        }
        Poll::Pending
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            self.handle.cancel_timer(timer);
        }
    }
}
