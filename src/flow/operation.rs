//! Real-mode operations behind the suspending effects.
//!
//! Each operation registers on the task's cancellation source when it is
//! created. When cancellation fires first the operation tears down its own
//! resources and then never resolves; ending the flow is the run loop's job.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, Waker};

use crate::cancel::{CancellationSource, Detach};
use crate::runtime::{RuntimeHandle, Sleep};
use crate::store::Subscription;
use crate::tracing_compat::trace;

/// Waker slot plus "has it happened" flag shared with a callback.
#[derive(Debug, Default)]
pub(crate) struct Signal {
    fired: Cell<bool>,
    waker: RefCell<Option<Waker>>,
}

impl Signal {
    pub(crate) fn fire(&self) {
        self.fired.set(true);
        let waker = self.waker.borrow_mut().take();
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    fn is_fired(&self) -> bool {
        self.fired.get()
    }

    fn register(&self, waker: &Waker) {
        let mut slot = self.waker.borrow_mut();
        if !slot.as_ref().is_some_and(|w| w.will_wake(waker)) {
            *slot = Some(waker.clone());
        }
    }
}

/// Suspends until the store publishes one event.
pub(crate) struct EventWait {
    signal: Rc<Signal>,
    subscription: Rc<RefCell<Option<Subscription>>>,
    registration: Option<Detach>,
}

impl EventWait {
    /// `subscribe` receives the callback to install on the store.
    pub(crate) fn new<F>(source: &CancellationSource, subscribe: F) -> Self
    where
        F: FnOnce(Box<dyn Fn()>) -> Subscription,
    {
        let signal = Rc::new(Signal::default());
        let weak: Weak<Signal> = Rc::downgrade(&signal);
        let subscription = Rc::new(RefCell::new(Some(subscribe(Box::new(move || {
            if let Some(signal) = weak.upgrade() {
                signal.fire();
            }
        })))));

        let held = Rc::clone(&subscription);
        let registration = source.add_event_handler(move |detach| {
            detach.detach();
            let subscription = held.borrow_mut().take();
            drop(subscription);
        });

        Self {
            signal,
            subscription,
            registration: Some(registration),
        }
    }

    fn teardown(&mut self) {
        let subscription = self.subscription.borrow_mut().take();
        drop(subscription);
        if let Some(registration) = self.registration.take() {
            registration.detach();
        }
    }
}

impl Future for EventWait {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        if this.signal.is_fired() {
            this.teardown();
            return Poll::Ready(());
        }
        this.signal.register(cx.waker());
        Poll::Pending
    }
}

impl Drop for EventWait {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// A [`Sleep`] whose timer is cleared when the flow is cancelled.
pub(crate) struct CancellableDelay {
    sleep: Sleep,
    cancelled: Rc<Cell<bool>>,
    registration: Option<Detach>,
}

impl CancellableDelay {
    pub(crate) fn new(runtime: &RuntimeHandle, source: &CancellationSource, sleep: Sleep) -> Self {
        let cancelled = Rc::new(Cell::new(false));
        let flag = Rc::clone(&cancelled);
        let handle = runtime.clone();
        let timer = sleep.timer_id();
        let registration = source.add_event_handler(move |detach| {
            flag.set(true);
            if let Some(timer) = timer {
                handle.cancel_timer(timer);
                trace!(?timer, "delay timer cleared by cancellation");
            }
            detach.detach();
        });
        Self {
            sleep,
            cancelled,
            registration: Some(registration),
        }
    }
}

impl Future for CancellableDelay {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        if this.cancelled.get() {
            return Poll::Pending;
        }
        match Pin::new(&mut this.sleep).poll(cx) {
            Poll::Ready(()) => {
                if let Some(registration) = this.registration.take() {
                    registration.detach();
                }
                Poll::Ready(())
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for CancellableDelay {
    fn drop(&mut self) {
        if let Some(registration) = self.registration.take() {
            registration.detach();
        }
    }
}

/// One-value slot filled by a background task.
///
/// The first `settle` wins; later ones are ignored.
pub(crate) struct Settled<T> {
    value: RefCell<Option<T>>,
    settled: Cell<bool>,
    signal: Signal,
}

impl<T> Settled<T> {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self {
            value: RefCell::new(None),
            settled: Cell::new(false),
            signal: Signal::default(),
        })
    }

    /// Stores `value` unless the slot already settled. Returns true if
    /// stored.
    pub(crate) fn settle(&self, value: T) -> bool {
        if self.settled.replace(true) {
            return false;
        }
        *self.value.borrow_mut() = Some(value);
        self.signal.fire();
        true
    }

    /// Resolves with the settled value.
    pub(crate) fn wait(self: Rc<Self>) -> SettledWait<T> {
        SettledWait { slot: self }
    }
}

pub(crate) struct SettledWait<T> {
    slot: Rc<Settled<T>>,
}

impl<T> Future for SettledWait<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let slot = &self.slot;
        let value = slot.value.borrow_mut().take();
        match value {
            Some(value) => Poll::Ready(value),
            None => {
                slot.signal.register(cx.waker());
                Poll::Pending
            }
        }
    }
}
