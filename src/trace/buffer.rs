//! Bounded trace storage.
//!
//! The runtime records flow lifecycle and effect events into a fixed-capacity
//! ring; once full, each new event evicts the oldest.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::event::{TraceEvent, TraceEventKind};
use crate::types::Time;

/// Fixed-capacity ring of trace events, oldest first.
#[derive(Debug)]
pub struct TraceBuffer {
    events: VecDeque<TraceEvent>,
    capacity: usize,
    evicted: u64,
}

impl TraceBuffer {
    /// Creates a buffer holding at most `capacity` events (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
            evicted: 0,
        }
    }

    /// Maximum number of events retained.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of retained events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if no event is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of events dropped to make room.
    #[must_use]
    pub const fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Appends an event, evicting the oldest when full.
    pub fn push(&mut self, event: TraceEvent) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
            self.evicted += 1;
        }
        self.events.push_back(event);
    }

    /// Iterates retained events, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &TraceEvent> {
        self.events.iter()
    }

    /// Most recent event.
    #[must_use]
    pub fn last(&self) -> Option<&TraceEvent> {
        self.events.back()
    }

    /// Drops every retained event.
    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl Default for TraceBuffer {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Shared handle to a [`TraceBuffer`] that numbers events as they arrive.
#[derive(Debug, Clone)]
pub struct TraceBufferHandle {
    inner: Arc<TraceBufferInner>,
}

#[derive(Debug)]
struct TraceBufferInner {
    buffer: Mutex<TraceBuffer>,
    next_seq: AtomicU64,
}

impl TraceBufferHandle {
    /// Creates a handle to a new buffer of the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(TraceBufferInner {
                buffer: Mutex::new(TraceBuffer::new(capacity)),
                next_seq: AtomicU64::new(0),
            }),
        }
    }

    /// Records `kind` at `time` under the next sequence number.
    pub fn record(&self, time: Time, kind: TraceEventKind) -> u64 {
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        self.inner.buffer.lock().push(TraceEvent::new(seq, time, kind));
        seq
    }

    /// Copy of the retained events, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<TraceEvent> {
        self.inner.buffer.lock().iter().cloned().collect()
    }

    /// Retained events as JSON lines.
    pub fn to_json_lines(&self) -> serde_json::Result<String> {
        let buffer = self.inner.buffer.lock();
        let mut out = String::new();
        for event in buffer.iter() {
            out.push_str(&event.to_json()?);
            out.push('\n');
        }
        Ok(out)
    }

    /// Number of retained events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.buffer.lock().len()
    }

    /// Returns true if no event is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every retained event; sequence numbering continues.
    pub fn clear(&self) {
        self.inner.buffer.lock().clear();
    }
}
