//! Task wakers with deduplication.
//!
//! `std::task::Waker` must be `Send + Sync`, so the ready queue it feeds is
//! the one piece of runtime state behind a lock. Wakes are queued in arrival
//! order; waking a task that is already queued is a no-op.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::task::{Wake, Waker};

use parking_lot::Mutex;

use crate::tracing_compat::trace;
use crate::types::TaskId;

#[derive(Debug, Default)]
struct ReadyQueue {
    order: VecDeque<TaskId>,
    queued: HashSet<TaskId>,
}

/// Shared ready queue fed by task wakers.
#[derive(Debug, Default)]
pub struct WakerState {
    ready: Mutex<ReadyQueue>,
}

impl WakerState {
    /// Creates an empty ready queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a waker that queues `task`.
    #[must_use]
    pub fn waker_for(self: &Arc<Self>, task: TaskId) -> Waker {
        Waker::from(Arc::new(TaskWaker {
            state: Arc::clone(self),
            task,
        }))
    }

    /// Queues `task` unless it is already queued.
    pub fn schedule(&self, task: TaskId) {
        let mut ready = self.ready.lock();
        if ready.queued.insert(task) {
            ready.order.push_back(task);
            trace!(task_id = ?task, "task woken");
        }
    }

    /// Takes every queued task, in wake order.
    pub fn drain_woken(&self) -> Vec<TaskId> {
        let mut ready = self.ready.lock();
        ready.queued.clear();
        ready.order.drain(..).collect()
    }

    /// Returns true if any task is queued.
    #[must_use]
    pub fn has_woken(&self) -> bool {
        !self.ready.lock().order.is_empty()
    }
}

struct TaskWaker {
    state: Arc<WakerState>,
    task: TaskId,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.state.schedule(self.task);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.state.schedule(self.task);
    }
}
