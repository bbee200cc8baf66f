//! Future combinators used by the run loop and the `race`/`all` effects.
//!
//! - [`select`]: first of two futures, used to race an operation against
//!   cancellation
//! - [`join`]: wait for every future of a named set, keeping the names

pub mod join;
pub mod select;

pub use join::{join_named, JoinNamed};
pub use select::{select, Either, Select};
