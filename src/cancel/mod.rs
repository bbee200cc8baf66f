//! Hierarchical cancellation.
//!
//! A [`CancellationSource`] is a one-shot flag with observer callbacks.
//! Sources form trees: [`CancellationSource::child`] creates a source that is
//! cancelled whenever its parent is, until the link is severed. Every flow
//! owns one source; a flow spawned by another gets a child of its parent's.
//!
//! Cancellation is cooperative. Firing a source runs its handlers and wakes
//! any [`Cancelled`] futures; it does not abort anything by itself.

mod signal;
mod source;

pub use signal::Cancelled;
pub use source::{CancellationSource, Detach, HandlerToken};
