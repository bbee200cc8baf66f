//! Identifier and time types.
//!
//! `FlowId` names a flow task for logs, traces and `Cancel` descriptors.
//! `TaskId` names an executor task and is backed by an arena index.
//! `Time` is a monotonic instant in nanoseconds since the runtime's epoch;
//! under the lab runtime the epoch is virtual.

use crate::util::ArenaIndex;
use core::fmt;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Identifier of a flow task.
///
/// Allocated sequentially per runtime, so ids are deterministic for a given
/// program order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowId(u64);

impl FlowId {
    /// Creates a flow id from its raw value.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FlowId({})", self.0)
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "flow-{}", self.0)
    }
}

/// Identifier of an executor task.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(ArenaIndex);

impl TaskId {
    /// Wraps an arena index.
    #[must_use]
    pub const fn from_arena(index: ArenaIndex) -> Self {
        Self(index)
    }

    /// Creates a task id for tests.
    #[must_use]
    pub const fn new_for_test(index: u32, generation: u32) -> Self {
        Self(ArenaIndex::new(index, generation))
    }

    /// Returns the backing arena index.
    #[must_use]
    pub const fn arena_index(self) -> ArenaIndex {
        self.0
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TaskId({}:{})",
            self.0.index(),
            self.0.generation()
        )
    }
}

/// A point in time, in nanoseconds since the runtime epoch.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Time(u64);

impl Time {
    /// The runtime epoch.
    pub const ZERO: Self = Self(0);

    /// Creates a time from nanoseconds.
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Creates a time from milliseconds.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    /// Returns the time in nanoseconds.
    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Returns the time in whole milliseconds.
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0 / 1_000_000
    }

    /// Adds nanoseconds, saturating at `u64::MAX`.
    #[must_use]
    pub const fn saturating_add_nanos(self, nanos: u64) -> Self {
        Self(self.0.saturating_add(nanos))
    }

    /// Adds a duration, saturating at `u64::MAX`.
    #[must_use]
    pub fn saturating_add(self, duration: Duration) -> Self {
        self.saturating_add_nanos(duration_to_nanos(duration))
    }

    /// Returns the elapsed duration since `earlier`, or zero if `earlier` is later.
    #[must_use]
    pub const fn duration_since(self, earlier: Self) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.as_millis())
    }
}

pub(crate) fn duration_to_nanos(duration: Duration) -> u64 {
    duration.as_nanos().min(u128::from(u64::MAX)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_arithmetic_saturates() {
        let t = Time::from_nanos(u64::MAX - 1);
        assert_eq!(t.saturating_add_nanos(10), Time::from_nanos(u64::MAX));
        assert_eq!(
            Time::from_millis(5).saturating_add(Duration::from_millis(7)),
            Time::from_millis(12)
        );
    }

    #[test]
    fn duration_since_never_goes_negative() {
        let early = Time::from_millis(10);
        let late = Time::from_millis(25);
        assert_eq!(late.duration_since(early), Duration::from_millis(15));
        assert_eq!(early.duration_since(late), Duration::ZERO);
    }

    #[test]
    fn flow_id_display() {
        assert_eq!(FlowId::from_raw(7).to_string(), "flow-7");
        assert_eq!(format!("{:?}", FlowId::from_raw(7)), "FlowId(7)");
    }
}
