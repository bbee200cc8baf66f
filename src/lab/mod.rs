//! Deterministic lab runtime.
//!
//! The lab runtime is the regular executor on a virtual clock. Time only
//! moves when a test says so (or, with auto-advance, when nothing else can
//! make progress), so flows that `delay` run instantly and reproducibly.
//!
//! ```ignore
//! use flowrt::lab::{LabConfig, LabRuntime};
//! use std::time::Duration;
//!
//! let lab = LabRuntime::new(LabConfig::new())?;
//! let handle = lab.handle();
//! lab.spawn(async move { handle.sleep(Duration::from_secs(3600)).await });
//! lab.advance_time(Duration::from_secs(3600));
//! lab.run_until_idle();
//! ```

pub mod config;
pub mod runtime;

pub use config::LabConfig;
pub use runtime::LabRuntime;
