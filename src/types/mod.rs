//! Core types shared across the runtime.
//!
//! - [`id`]: Identifier types (`FlowId`, `TaskId`) and virtual/wall `Time`

pub mod id;

pub use id::{FlowId, TaskId, Time};
