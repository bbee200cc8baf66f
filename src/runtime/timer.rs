//! Timer heap for `delay`.
//!
//! A min-heap of `(deadline, registration order)` entries. Each timer keeps
//! the waker of the future waiting on it; cancelling a timer removes its
//! entry outright so the heap only ever holds live timers.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::task::Waker;

use crate::types::Time;

/// Identifies one registered timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

#[derive(Debug, Clone, Eq, PartialEq)]
struct TimerEntry {
    deadline: Time,
    id: TimerId,
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Live timers ordered by deadline, then registration order.
#[derive(Debug, Default)]
pub struct TimerHeap {
    heap: BinaryHeap<TimerEntry>,
    wakers: HashMap<TimerId, Option<Waker>>,
    next_id: u64,
}

impl TimerHeap {
    /// Creates an empty heap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live timers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Returns true if no timer is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Registers a timer due at `deadline`.
    pub fn insert(&mut self, deadline: Time) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.heap.push(TimerEntry { deadline, id });
        self.wakers.insert(id, None);
        id
    }

    /// Stores the waker to notify when `id` fires.
    ///
    /// Returns false if the timer already fired or was cancelled.
    pub fn set_waker(&mut self, id: TimerId, waker: &Waker) -> bool {
        match self.wakers.get_mut(&id) {
            Some(slot) => {
                if !slot.as_ref().is_some_and(|w| w.will_wake(waker)) {
                    *slot = Some(waker.clone());
                }
                true
            }
            None => false,
        }
    }

    /// Removes a timer. Returns false if it already fired or was cancelled.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        if self.wakers.remove(&id).is_none() {
            return false;
        }
        self.heap.retain(|entry| entry.id != id);
        true
    }

    /// Returns true while the timer is registered.
    #[must_use]
    pub fn contains(&self, id: TimerId) -> bool {
        self.wakers.contains_key(&id)
    }

    /// Earliest deadline, if any.
    #[must_use]
    pub fn peek_deadline(&self) -> Option<Time> {
        self.heap.peek().map(|entry| entry.deadline)
    }

    /// Removes every timer due at or before `now` and returns their wakers,
    /// earliest first.
    pub fn pop_expired(&mut self, now: Time) -> Vec<Waker> {
        let mut expired = Vec::new();
        while self.heap.peek().is_some_and(|entry| entry.deadline <= now) {
            let Some(entry) = self.heap.pop() else {
                break;
            };
            if let Some(Some(waker)) = self.wakers.remove(&entry.id) {
                expired.push(waker);
            }
        }
        expired
    }

    /// Removes every timer.
    pub fn clear(&mut self) {
        self.heap.clear();
        self.wakers.clear();
    }
}
