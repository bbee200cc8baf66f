//! Internal utilities.
//!
//! - [`arena`]: Generational slot storage for cancellation sources and tasks

pub mod arena;

pub use arena::{Arena, ArenaIndex};
