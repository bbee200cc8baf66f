//! Logging shim.
//!
//! With the `tracing-integration` feature (default) the macros forward to
//! `tracing`. Without it they expand to nothing, so call sites never need
//! their own `cfg` guards.

#[cfg(feature = "tracing-integration")]
#[allow(unused_imports)]
pub(crate) use tracing::{debug, error, info, trace, warn};

#[cfg(not(feature = "tracing-integration"))]
mod noop {
    macro_rules! noop_event {
        ($($arg:tt)*) => {{}};
    }

    #[allow(unused_imports)]
    pub(crate) use noop_event as debug;
    #[allow(unused_imports)]
    pub(crate) use noop_event as error;
    #[allow(unused_imports)]
    pub(crate) use noop_event as info;
    #[allow(unused_imports)]
    pub(crate) use noop_event as trace;
    #[allow(unused_imports)]
    pub(crate) use noop_event as warn;
}

#[cfg(not(feature = "tracing-integration"))]
#[allow(unused_imports)]
pub(crate) use noop::{debug, error, info, trace, warn};
