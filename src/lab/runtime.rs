//! Lab runtime: the executor on virtual time.

use std::future::Future;
use std::pin::pin;
use std::time::Duration;

use super::config::LabConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::runtime::{RunSummary, Runtime, RuntimeHandle};
use crate::trace::TraceBufferHandle;
use crate::tracing_compat::{debug, warn};
use crate::types::{TaskId, Time};

/// Executor on a virtual clock.
#[derive(Debug)]
pub struct LabRuntime {
    runtime: Runtime,
    handle: RuntimeHandle,
    config: LabConfig,
}

impl LabRuntime {
    /// Creates a lab runtime after validating `config`.
    pub fn new(config: LabConfig) -> Result<Self> {
        config.validate()?;
        let runtime = Runtime::new_virtual(config.runtime_config(), config.start_time)?;
        let handle = runtime.handle();
        debug!(start = %config.start_time, auto_advance = config.auto_advance, "lab runtime created");
        Ok(Self {
            runtime,
            handle,
            config,
        })
    }

    /// The configuration the runtime was created with.
    #[must_use]
    pub const fn config(&self) -> &LabConfig {
        &self.config
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
        self.runtime.spawn(future)
    }

    /// Current virtual time.
    #[must_use]
    pub fn now(&self) -> Time {
        self.handle.now()
    }

    /// The runtime's trace buffer.
    #[must_use]
    pub fn trace(&self) -> TraceBufferHandle {
        self.handle.trace().clone()
    }

    /// Moves virtual time forward by `duration`.
    ///
    /// Timers that become due fire on the next run.
    pub fn advance_time(&self, duration: Duration) {
        let from = self.now();
        let to = from.saturating_add(duration);
        self.handle.advance_clock_to(to);
        debug!(from = %from, to = %to, "virtual clock advanced");
    }

    /// Moves virtual time to `time`. Time never goes backward.
    pub fn advance_time_to(&self, time: Time) {
        let now = self.now();
        if time < now {
            warn!(now = %now, requested = %time, "virtual clock cannot go backward");
            return;
        }
        self.handle.advance_clock_to(time);
    }

    /// Jumps to the earliest timer deadline and runs the woken tasks.
    ///
    /// Returns the new time, or `None` if no timer is registered.
    pub fn advance_to_next_timer(&self) -> Option<Time> {
        let deadline = self.handle.next_deadline()?;
        self.advance_time_to(deadline);
        self.handle.run_until_idle();
        Some(self.now())
    }

    /// Runs ready tasks until none is ready. Time does not move.
    pub fn run_until_idle(&self) -> RunSummary {
        self.handle.run_until_idle()
    }

    /// Runs until no task and no timer is left, or nothing can progress.
    ///
    /// Virtual time moves to pending deadlines only with `auto_advance`.
    pub fn run_until_quiescent(&self) -> RunSummary {
        self.handle.run_quiescent(self.config.auto_advance)
    }

    /// Runs to quiescence, jumping time to each deadline regardless of
    /// `auto_advance`.
    pub fn run_with_auto_advance(&self) -> RunSummary {
        self.handle.run_quiescent(true)
    }

    /// Drives `future` to completion.
    ///
    /// Fails with [`ErrorKind::Stalled`] when the future is still pending but
    /// nothing can progress without time passing (and `auto_advance` is
    /// off), or nothing can progress at all.
    pub fn block_on<F: Future>(&self, future: F) -> Result<F::Output> {
        let future = pin!(future);
        self.handle
            .drive(future, self.config.auto_advance)
            .ok_or_else(|| {
                Error::new(ErrorKind::Stalled)
                    .with_message(format!("block_on stalled at {}", self.now()))
            })
    }
}
