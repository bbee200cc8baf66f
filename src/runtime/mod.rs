//! Single-threaded cooperative executor.
//!
//! Flows, their background calls, and the sub-operations of `race`/`all`
//! all run as tasks on one executor:
//!
//! - [`waker`]: deduplicating ready queue fed by `std::task::Waker`s
//! - [`timer`]: deadline heap backing [`Sleep`]
//! - [`clock`]: wall or virtual time
//!
//! Tasks live in an arena and are polled in wake order. A task is taken out
//! of its slot while it is polled, so a running task can spawn new tasks or
//! register timers without re-entering any borrow.
//!
//! [`Runtime`] owns the executor; [`RuntimeHandle`] is the cheap clonable
//! handle flows carry. The lab runtime ([`crate::lab::LabRuntime`]) wraps the
//! same machinery with a virtual clock.

pub mod clock;
mod sleep;
pub mod timer;
pub mod waker;

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::pin::{pin, Pin};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};
use std::thread::Thread;
use std::time::Duration;

use futures_lite::future::BoxedLocal;

use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::trace::{TraceBufferHandle, TraceEventKind};
use crate::tracing_compat::{debug, trace};
use crate::types::{FlowId, TaskId, Time};
use crate::util::Arena;

pub use clock::Clock;
pub use sleep::Sleep;
pub use timer::{TimerHeap, TimerId};
pub use waker::WakerState;

/// Outcome of a bounded executor run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Task polls performed.
    pub steps: u64,
    /// Tasks still alive when the run stopped.
    pub pending_tasks: usize,
    /// Timers still registered when the run stopped.
    pub pending_timers: usize,
    /// Runtime time when the run stopped.
    pub now: Time,
    /// True if the run stopped because it reached `max_steps`.
    pub hit_step_limit: bool,
}

impl RunSummary {
    /// Returns true if no task and no timer is left.
    #[must_use]
    pub const fn is_quiescent(&self) -> bool {
        self.pending_tasks == 0 && self.pending_timers == 0
    }
}

struct RuntimeInner {
    tasks: RefCell<Arena<Option<BoxedLocal<()>>>>,
    wakers: Arc<WakerState>,
    timers: RefCell<TimerHeap>,
    clock: Clock,
    trace: TraceBufferHandle,
    config: RuntimeConfig,
    next_flow: Cell<u64>,
}

/// Clonable handle to a runtime.
#[derive(Clone)]
pub struct RuntimeHandle {
    inner: Rc<RuntimeInner>,
}

impl RuntimeHandle {
    fn with_clock(config: RuntimeConfig, clock: Clock) -> Self {
        Self {
            inner: Rc::new(RuntimeInner {
                tasks: RefCell::new(Arena::new()),
                wakers: Arc::new(WakerState::new()),
                timers: RefCell::new(TimerHeap::new()),
                clock,
                trace: TraceBufferHandle::new(config.trace_capacity),
                config,
                next_flow: Cell::new(0),
            }),
        }
    }

    /// Spawns a detached task. It is first polled on the next executor turn.
    pub fn spawn<F>(&self, future: F) -> TaskId
    where
        F: Future<Output = ()> + 'static,
    {
        let index = self.inner.tasks.borrow_mut().insert(Some(Box::pin(future)));
        let task = TaskId::from_arena(index);
        self.inner.wakers.schedule(task);
        trace!(task_id = ?task, "task spawned");
        task
    }

    /// Current runtime time.
    #[must_use]
    pub fn now(&self) -> Time {
        self.inner.clock.now()
    }

    /// Returns true if the runtime runs on virtual time.
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        self.inner.clock.is_virtual()
    }

    /// A future that resolves after `duration` of runtime time.
    pub fn sleep(&self, duration: Duration) -> Sleep {
        Sleep::new(self.clone(), self.now().saturating_add(duration))
    }

    /// The runtime's trace buffer.
    #[must_use]
    pub fn trace(&self) -> &TraceBufferHandle {
        &self.inner.trace
    }

    /// The runtime's configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Number of live tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.inner.tasks.borrow().len()
    }

    /// Number of registered timers.
    #[must_use]
    pub fn timer_count(&self) -> usize {
        self.inner.timers.borrow().len()
    }

    /// Earliest registered timer deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Time> {
        self.inner.timers.borrow().peek_deadline()
    }

    /// Cancels a timer. Returns false if it already fired or was cancelled.
    pub fn cancel_timer(&self, timer: TimerId) -> bool {
        self.inner.timers.borrow_mut().cancel(timer)
    }

    pub(crate) fn register_timer(&self, deadline: Time) -> TimerId {
        self.inner.timers.borrow_mut().insert(deadline)
    }

    pub(crate) fn set_timer_waker(&self, timer: TimerId, waker: &Waker) -> bool {
        self.inner.timers.borrow_mut().set_waker(timer, waker)
    }

    pub(crate) fn next_flow_id(&self) -> FlowId {
        let raw = self.inner.next_flow.get();
        self.inner.next_flow.set(raw + 1);
        FlowId::from_raw(raw)
    }

    pub(crate) fn record(&self, kind: TraceEventKind) {
        self.inner.trace.record(self.now(), kind);
    }

    /// Moves a virtual clock forward to `target`.
    pub(crate) fn advance_clock_to(&self, target: Time) -> bool {
        self.inner.clock.advance_to(target)
    }

    fn poll_task(&self, task: TaskId) -> bool {
        let index = task.arena_index();
        let taken = self
            .inner
            .tasks
            .borrow_mut()
            .get_mut(index)
            .and_then(Option::take);
        let Some(mut future) = taken else {
            return false;
        };
        let waker = self.inner.wakers.waker_for(task);
        let mut cx = Context::from_waker(&waker);
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(()) => {
                self.inner.tasks.borrow_mut().remove(index);
                drop(future);
                trace!(task_id = ?task, "task completed");
            }
            Poll::Pending => {
                let mut tasks = self.inner.tasks.borrow_mut();
                if let Some(slot) = tasks.get_mut(index) {
                    *slot = Some(future);
                }
            }
        }
        true
    }

    /// Wakes every timer that is due. Returns how many fired.
    fn fire_timers(&self) -> usize {
        let expired = self.inner.timers.borrow_mut().pop_expired(self.now());
        let count = expired.len();
        if count > 0 {
            trace!(count, now = %self.now(), "timers fired");
            self.record(TraceEventKind::TimerFired { count });
        }
        for waker in expired {
            waker.wake();
        }
        count
    }

    /// Polls woken tasks until none is ready. Never advances time.
    ///
    /// Stops early once `budget` polls have been spent.
    fn run_ready(&self, budget: Option<u64>) -> (u64, bool) {
        let mut steps = 0_u64;
        loop {
            self.fire_timers();
            let batch = self.inner.wakers.drain_woken();
            if batch.is_empty() {
                return (steps, false);
            }
            for (position, task) in batch.iter().enumerate() {
                if budget.is_some_and(|limit| steps >= limit) {
                    for unpolled in &batch[position..] {
                        self.inner.wakers.schedule(*unpolled);
                    }
                    return (steps, true);
                }
                if self.poll_task(*task) {
                    steps += 1;
                }
            }
        }
    }

    fn summary(&self, steps: u64, hit_step_limit: bool) -> RunSummary {
        RunSummary {
            steps,
            pending_tasks: self.task_count(),
            pending_timers: self.timer_count(),
            now: self.now(),
            hit_step_limit,
        }
    }

    /// Runs ready tasks until none is ready; never advances time.
    pub fn run_until_idle(&self) -> RunSummary {
        let (steps, hit) = self.run_ready(None);
        self.summary(steps, hit)
    }

    /// Runs until no task is ready and no timer is registered, waiting for
    /// (wall clock) or jumping to (virtual clock) each next deadline.
    ///
    /// Stops after `max_steps` polls when the configuration sets one.
    pub fn run_until_quiescent(&self) -> RunSummary {
        self.run_quiescent(true)
    }

    /// Like [`run_until_quiescent`](Self::run_until_quiescent), but a
    /// virtual clock is only moved when `advance_virtual` is set; otherwise
    /// the run stops once nothing can progress without time passing.
    pub(crate) fn run_quiescent(&self, advance_virtual: bool) -> RunSummary {
        let limit = self.inner.config.max_steps;
        let mut steps = 0_u64;
        loop {
            let budget = limit.map(|limit| limit.saturating_sub(steps));
            let (spent, hit) = self.run_ready(budget);
            steps += spent;
            if hit {
                debug!(steps, "run_until_quiescent hit step limit");
                return self.summary(steps, true);
            }
            let Some(deadline) = self.next_deadline() else {
                return self.summary(steps, false);
            };
            if self.is_virtual() && !advance_virtual {
                return self.summary(steps, false);
            }
            self.wait_for(deadline);
        }
    }

    fn wait_for(&self, deadline: Time) {
        if !self.advance_clock_to(deadline) {
            let remaining = self.inner.clock.until(deadline);
            if !remaining.is_zero() {
                std::thread::sleep(remaining);
            }
        }
    }

    /// Drives `future` to completion while running spawned tasks.
    ///
    /// With `advance_virtual` unset, returns `None` as soon as neither the
    /// future nor any task can make progress without time passing. On a wall
    /// clock the thread sleeps until the next deadline, or parks until woken
    /// if there is none.
    pub(crate) fn drive<F: Future>(
        &self,
        mut future: Pin<&mut F>,
        advance_virtual: bool,
    ) -> Option<F::Output> {
        let main = Arc::new(MainWaker {
            woken: AtomicBool::new(true),
            thread: std::thread::current(),
        });
        let waker = Waker::from(Arc::clone(&main));
        let mut cx = Context::from_waker(&waker);

        loop {
            if main.woken.swap(false, Ordering::AcqRel) {
                if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                    return Some(output);
                }
            }
            self.run_ready(None);
            if main.woken.load(Ordering::Acquire) {
                continue;
            }
            match self.next_deadline() {
                Some(deadline) if self.is_virtual() => {
                    if !advance_virtual {
                        return None;
                    }
                    self.advance_clock_to(deadline);
                }
                Some(deadline) => {
                    let remaining = self.inner.clock.until(deadline);
                    if !remaining.is_zero() {
                        std::thread::park_timeout(remaining);
                    }
                }
                None if self.is_virtual() => return None,
                None => std::thread::park(),
            }
        }
    }

    fn shutdown(&self) {
        let drained: Vec<_> = {
            let mut tasks = self.inner.tasks.borrow_mut();
            let indices = tasks.indices();
            indices
                .into_iter()
                .filter_map(|index| tasks.remove(index).flatten())
                .collect()
        };
        // Task futures may touch the runtime when dropped.
        drop(drained);
        self.inner.timers.borrow_mut().clear();
        self.inner.wakers.drain_woken();
    }
}

impl fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeHandle")
            .field("now", &self.now())
            .field("tasks", &self.task_count())
            .field("timers", &self.timer_count())
            .field("virtual", &self.is_virtual())
            .finish()
    }
}

struct MainWaker {
    woken: AtomicBool,
    thread: Thread,
}

impl Wake for MainWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.woken.store(true, Ordering::Release);
        self.thread.unpark();
    }
}

/// Executor running on the wall clock.
///
/// Dropping the runtime drops every task still alive.
#[derive(Debug)]
pub struct Runtime {
    handle: RuntimeHandle,
}

impl Runtime {
    /// Creates a runtime after validating `config`.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            handle: RuntimeHandle::with_clock(config, Clock::wall()),
        })
    }

    /// Creates a runtime on a virtual clock starting at `start`.
    pub(crate) fn new_virtual(config: RuntimeConfig, start: Time) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            handle: RuntimeHandle::with_clock(config, Clock::virtual_at(start)),
        })
    }

    /// Handle for spawning tasks and creating flows.
    #[must_use]
    pub fn handle(&self) -> RuntimeHandle {
        self.handle.clone()
    }

    /// Spawns a detached task.
    pub fn spawn<F>(&self, future: F) -> TaskId
    where
        F: Future<Output = ()> + 'static,
    {
        self.handle.spawn(future)
    }

    /// Drives `future` to completion, running spawned tasks meanwhile.
    ///
    /// Parks the thread while nothing is ready; a future that can never
    /// complete blocks forever.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        let mut future = pin!(future);
        loop {
            if let Some(output) = self.handle.drive(future.as_mut(), true) {
                return output;
            }
        }
    }

    /// Runs ready tasks until none is ready.
    pub fn run_until_idle(&self) -> RunSummary {
        self.handle.run_until_idle()
    }

    /// Runs until no task is ready and no timer is registered.
    pub fn run_until_quiescent(&self) -> RunSummary {
        self.handle.run_until_quiescent()
    }

    /// Current runtime time.
    #[must_use]
    pub fn now(&self) -> Time {
        self.handle.now()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.handle.shutdown();
    }
}
