//! Runtime trace recording.
//!
//! The runtime records flow starts, yielded effects, completions,
//! cancellations and timer firings into a bounded buffer that tests and
//! tooling can inspect or export as JSON lines.

pub mod buffer;
pub mod event;

pub use buffer::{TraceBuffer, TraceBufferHandle};
pub use event::{TraceEvent, TraceEventKind};
