//! Configuration for the lab runtime.
//!
//! `LabConfig` uses the same move-based builder style as
//! [`RuntimeConfig`]: each method consumes `self` and returns the updated
//! configuration.

use crate::config::{ConfigError, RuntimeConfig};
use crate::types::Time;

/// Configuration for the lab runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabConfig {
    /// Virtual time at creation.
    pub start_time: Time,
    /// When true, `block_on` and `run_until_quiescent` jump virtual time to
    /// the next timer deadline whenever nothing else can make progress.
    pub auto_advance: bool,
    /// Maximum task polls per quiescent run.
    pub max_steps: Option<u64>,
    /// Trace buffer capacity.
    pub trace_capacity: usize,
    /// Log and trace every effect regardless of store settings.
    pub debug_flow: bool,
}

impl LabConfig {
    /// Default lab configuration: starts at time zero, no auto-advance,
    /// 100 000 step limit.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            start_time: Time::ZERO,
            auto_advance: false,
            max_steps: Some(100_000),
            trace_capacity: 4096,
            debug_flow: false,
        }
    }

    /// Sets the virtual time at creation.
    #[must_use]
    pub const fn start_time(mut self, time: Time) -> Self {
        self.start_time = time;
        self
    }

    /// Enables or disables automatic time advancement.
    #[must_use]
    pub const fn auto_advance(mut self, enabled: bool) -> Self {
        self.auto_advance = enabled;
        self
    }

    /// Sets the maximum number of steps.
    #[must_use]
    pub const fn max_steps(mut self, steps: u64) -> Self {
        self.max_steps = Some(steps);
        self
    }

    /// Disables the step limit.
    #[must_use]
    pub const fn no_step_limit(mut self) -> Self {
        self.max_steps = None;
        self
    }

    /// Sets the trace buffer capacity.
    #[must_use]
    pub const fn trace_capacity(mut self, capacity: usize) -> Self {
        self.trace_capacity = capacity;
        self
    }

    /// Enables effect logging for every flow.
    #[must_use]
    pub const fn debug_flow(mut self, enabled: bool) -> Self {
        self.debug_flow = enabled;
        self
    }

    /// The executor configuration this lab configuration implies.
    #[must_use]
    pub const fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig::new()
            .trace_capacity(self.trace_capacity)
            .max_steps(self.max_steps)
            .debug_flow(self.debug_flow)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.runtime_config().validate()
    }
}

impl Default for LabConfig {
    fn default() -> Self {
        Self::new()
    }
}
