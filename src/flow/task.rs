//! Per-flow task record.
//!
//! The task is shared between the flow's coroutine (through every
//! [`FlowContext`](super::FlowContext) clone and every pending [`Op`](super::Op))
//! and the driver (run loop or test driver). They talk through two slots:
//!
//! - `yielded`: what the coroutine handed to the driver on its last poll
//! - `resume`: the value the driver hands back on the next poll
//!
//! Each slot holds at most one value. A second yield while the first is still
//! outstanding is a protocol violation.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::task::Waker;

use futures_lite::future::BoxedLocal;

use crate::cancel::CancellationSource;
use crate::effect::Effect;
use crate::error::Error;
use crate::types::FlowId;

/// Type-erased resume value.
pub(crate) type Resume = Box<dyn Any>;

/// What a coroutine hands to its driver when it suspends.
pub(crate) enum Yielded {
    /// Step one of an effect: the descriptor.
    Effect(Effect),
    /// Step two of an effect: the operation whose output resumes the flow.
    Operation(BoxedLocal<Resume>),
    /// The coroutine detected a protocol error.
    Fault(Error),
}

impl fmt::Debug for Yielded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Effect(effect) => f.debug_tuple("Effect").field(effect).finish(),
            Self::Operation(_) => f.write_str("Operation(..)"),
            Self::Fault(err) => f.debug_tuple("Fault").field(err).finish(),
        }
    }
}

pub(crate) struct TaskState {
    id: FlowId,
    source: CancellationSource,
    is_test: Cell<bool>,
    is_running: Cell<bool>,
    is_done: Cell<bool>,
    yielded: RefCell<Option<Yielded>>,
    resume: RefCell<Option<Resume>>,
    done_listeners: RefCell<Vec<Box<dyn FnOnce()>>>,
    joiners: RefCell<Vec<Waker>>,
}

impl TaskState {
    pub(crate) fn new(id: FlowId, source: CancellationSource) -> Self {
        Self {
            id,
            source,
            is_test: Cell::new(false),
            is_running: Cell::new(false),
            is_done: Cell::new(false),
            yielded: RefCell::new(None),
            resume: RefCell::new(None),
            done_listeners: RefCell::new(Vec::new()),
            joiners: RefCell::new(Vec::new()),
        }
    }

    pub(crate) const fn id(&self) -> FlowId {
        self.id
    }

    pub(crate) const fn source(&self) -> &CancellationSource {
        &self.source
    }

    pub(crate) fn is_test(&self) -> bool {
        self.is_test.get()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.is_running.get()
    }

    pub(crate) fn is_done(&self) -> bool {
        self.is_done.get()
    }

    /// Marks the task as running in run or test mode.
    pub(crate) fn start(&self, test: bool) {
        self.is_running.set(true);
        self.is_test.set(test);
    }

    /// Stores a yield for the driver.
    ///
    /// If a yield is already outstanding, both are replaced by a protocol
    /// fault so the driver sees the violation instead of either value.
    pub(crate) fn push_yield(&self, yielded: Yielded) {
        let mut slot = self.yielded.borrow_mut();
        if slot.is_some() {
            *slot = Some(Yielded::Fault(
                Error::protocol_violation("two effects outstanding at once").with_flow(self.id),
            ));
        } else {
            *slot = Some(yielded);
        }
    }

    pub(crate) fn take_yield(&self) -> Option<Yielded> {
        self.yielded.borrow_mut().take()
    }

    pub(crate) fn set_resume(&self, value: Resume) {
        *self.resume.borrow_mut() = Some(value);
    }

    pub(crate) fn take_resume(&self) -> Option<Resume> {
        self.resume.borrow_mut().take()
    }

    /// Registers `listener` to run once when the task finishes.
    ///
    /// Runs it immediately if the task already finished.
    pub(crate) fn add_done_listener(&self, listener: impl FnOnce() + 'static) {
        if self.is_done() {
            listener();
            return;
        }
        self.done_listeners.borrow_mut().push(Box::new(listener));
    }

    pub(crate) fn register_joiner(&self, waker: &Waker) {
        let mut joiners = self.joiners.borrow_mut();
        if !joiners.iter().any(|w| w.will_wake(waker)) {
            joiners.push(waker.clone());
        }
    }

    /// Marks the task done, fires done listeners once, and wakes joiners.
    pub(crate) fn finish(&self) {
        if self.is_done.replace(true) {
            return;
        }
        let listeners = std::mem::take(&mut *self.done_listeners.borrow_mut());
        for listener in listeners {
            listener();
        }
        self.is_running.set(false);
        self.yielded.borrow_mut().take();
        self.resume.borrow_mut().take();
        let joiners = std::mem::take(&mut *self.joiners.borrow_mut());
        for waker in joiners {
            waker.wake();
        }
    }
}

impl fmt::Debug for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskState")
            .field("id", &self.id)
            .field("is_test", &self.is_test.get())
            .field("is_running", &self.is_running.get())
            .field("is_done", &self.is_done.get())
            .field("is_cancelled", &self.source.is_cancelled())
            .finish_non_exhaustive()
    }
}
