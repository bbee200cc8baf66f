//! Future that resolves when a cancellation source fires.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use super::source::{CancellationSource, Detach};

/// Resolves once its source is cancelled.
///
/// Created by [`CancellationSource::cancelled`]. The handler backing the
/// wake-up is registered on first poll and detached when the future is
/// dropped or completes.
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct Cancelled {
    source: CancellationSource,
    waker: Rc<RefCell<Option<Waker>>>,
    registration: Option<Detach>,
}

impl Cancelled {
    pub(super) fn new(source: CancellationSource) -> Self {
        Self {
            source,
            waker: Rc::new(RefCell::new(None)),
            registration: None,
        }
    }
}

impl Future for Cancelled {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        if this.source.is_cancelled() {
            if let Some(registration) = this.registration.take() {
                registration.detach();
            }
            return Poll::Ready(());
        }

        *this.waker.borrow_mut() = Some(cx.waker().clone());
        if this.registration.is_none() {
            let slot = Rc::clone(&this.waker);
            this.registration = Some(this.source.add_event_handler(move |_| {
                if let Some(waker) = slot.borrow_mut().take() {
                    waker.wake();
                }
            }));
        }
        Poll::Pending
    }
}

impl Drop for Cancelled {
    fn drop(&mut self) {
        if let Some(registration) = self.registration.take() {
            registration.detach();
        }
    }
}
