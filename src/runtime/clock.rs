//! Runtime clocks.
//!
//! The wall clock measures elapsed time since the runtime was created. The
//! virtual clock only moves when told to, which makes time-dependent flows
//! deterministic under the lab runtime.

use std::cell::Cell;
use std::time::{Duration, Instant};

use crate::types::id::duration_to_nanos;
use crate::types::Time;

/// Source of the runtime's notion of "now".
#[derive(Debug)]
pub enum Clock {
    /// Real elapsed time since `origin`.
    Wall {
        /// When the runtime started.
        origin: Instant,
    },
    /// Manually advanced time.
    Virtual {
        /// Current virtual time.
        now: Cell<Time>,
    },
}

impl Clock {
    /// A wall clock starting now.
    #[must_use]
    pub fn wall() -> Self {
        Self::Wall {
            origin: Instant::now(),
        }
    }

    /// A virtual clock starting at `start`.
    #[must_use]
    pub const fn virtual_at(start: Time) -> Self {
        Self::Virtual {
            now: Cell::new(start),
        }
    }

    /// Current time.
    #[must_use]
    pub fn now(&self) -> Time {
        match self {
            Self::Wall { origin } => Time::from_nanos(duration_to_nanos(origin.elapsed())),
            Self::Virtual { now } => now.get(),
        }
    }

    /// Returns true for a virtual clock.
    #[must_use]
    pub const fn is_virtual(&self) -> bool {
        matches!(self, Self::Virtual { .. })
    }

    /// Moves a virtual clock to `target` if that is later than now.
    ///
    /// Returns false on a wall clock.
    pub fn advance_to(&self, target: Time) -> bool {
        match self {
            Self::Wall { .. } => false,
            Self::Virtual { now } => {
                if target > now.get() {
                    now.set(target);
                }
                true
            }
        }
    }

    /// Time remaining until `deadline` on a wall clock; zero if passed.
    #[must_use]
    pub fn until(&self, deadline: Time) -> Duration {
        deadline.duration_since(self.now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_clock_only_moves_forward() {
        let clock = Clock::virtual_at(Time::from_millis(5));
        assert!(clock.is_virtual());
        assert!(clock.advance_to(Time::from_millis(20)));
        assert_eq!(clock.now(), Time::from_millis(20));
        assert!(clock.advance_to(Time::from_millis(10)));
        assert_eq!(clock.now(), Time::from_millis(20));
        assert_eq!(clock.until(Time::from_millis(25)), Duration::from_millis(5));
    }

    #[test]
    fn wall_clock_cannot_be_advanced() {
        let clock = Clock::wall();
        assert!(!clock.is_virtual());
        assert!(!clock.advance_to(Time::from_millis(1_000)));
        assert!(clock.now() < Time::from_millis(1_000));
    }
}
