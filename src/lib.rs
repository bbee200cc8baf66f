//! Structured-concurrency runtime for cooperative flows.
//!
//! A *flow* is a sequential unit of suspendable work: an `async` body that
//! waits for store events, calls background work, sleeps, and starts child
//! flows. Flows never touch the outside world directly. Every operation is
//! requested through a [`FlowContext`] method, and every request is first
//! announced as an inert [`Effect`] descriptor. That gives each flow two
//! drivers:
//!
//! - the **run loop** ([`Flow::run`]) performs each operation for real,
//!   racing it against the flow's cancellation;
//! - the **test driver** ([`Flow::test`]) stops at every descriptor and lets
//!   a test inject the operation's result, with no side effects at all.
//!
//! # Core Guarantees
//!
//! - **Cancellation is a tree**: cancelling a flow cancels every flow it
//!   spawned that is still running. Cancellation is one-shot and never
//!   surfaces as an error.
//! - **Two-step effects**: every effect yields its descriptor before the real
//!   operation starts, so the run loop can log it and the test driver can
//!   stop on it.
//! - **Deterministic time under test**: the [`lab`] runtime runs the same
//!   executor on a virtual clock.
//!
//! # Module Structure
//!
//! - [`cancel`]: hierarchical cancellation sources
//! - [`effect`]: effect descriptors
//! - [`store`]: the store contract and the [`EventStore`] reference store
//! - [`flow`]: flows, their context, the run loop and the test driver
//! - [`runtime`]: the single-threaded executor
//! - [`lab`]: the executor on virtual time
//! - [`trace`]: bounded event trace
//! - [`config`]: runtime configuration and environment overrides
//! - [`error`]: error types
//!
//! # Example
//!
//! ```ignore
//! use flowrt::{EventStore, Flow, LabConfig, LabRuntime, StoreSettings};
//!
//! let lab = LabRuntime::new(LabConfig::new())?;
//! let store = EventStore::new(Counter::default(), StoreSettings::default());
//! let flow = Flow::new(&lab.handle(), store.clone(), |ctx| async move {
//!     ctx.wait_until("INCREMENT").await;
//!     ctx.select(|s: &Counter| s.count).await
//! });
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cancel;
pub mod combinator;
pub mod config;
pub mod effect;
pub mod error;
pub mod flow;
pub mod lab;
pub mod runtime;
pub mod store;
pub mod trace;
pub mod types;
pub mod util;

mod tracing_compat;

#[cfg(test)]
mod test_utils;

pub use cancel::{CancellationSource, Detach};
pub use config::RuntimeConfig;
pub use effect::{Effect, EffectKind, FnRef};
pub use error::{Error, ErrorKind, HandlerError, PublishError, Result};
pub use flow::{Flow, FlowContext, FlowRef, FlowRegistry, Op, Raced, RunOutcome, Step, TestDriver};
pub use lab::{LabConfig, LabRuntime};
pub use runtime::{RunSummary, Runtime, RuntimeHandle};
pub use store::{Action, EventStore, EventType, Store, StoreSettings, Subscription};
pub use types::{FlowId, TaskId, Time};
