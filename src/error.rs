//! Error types for the flow runtime.
//!
//! Errors here describe misuse of a flow or its drivers, and failures
//! reported by the store collaborator. Cancellation is never an error: a
//! cancelled flow finishes with [`RunOutcome::Cancelled`], and an operation
//! interrupted by cancellation simply never resumes.
//!
//! # Error Categories
//!
//! - **Lifecycle**: driving a flow that already finished, or one that was
//!   never registered
//! - **Protocol**: a coroutine that broke the describe/operate/resume protocol,
//!   or a test driver injecting a value of the wrong type
//! - **Store**: publish failures surfaced by the store
//! - **Runtime**: clock misuse and configuration errors
//! - **Internal**: runtime bugs
//!
//! [`RunOutcome::Cancelled`]: crate::flow::RunOutcome::Cancelled

use core::fmt;

use crate::types::FlowId;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Lifecycle ===
    /// The flow has already completed and cannot be driven again.
    FlowCompleted,
    /// No flow is registered under the requested name.
    UnknownFlow,

    // === Protocol ===
    /// A test driver injected a resume value of the wrong type.
    ResumeTypeMismatch,
    /// The coroutine suspended without yielding an effect.
    Stalled,
    /// The coroutine yielded something the driver did not expect.
    ProtocolViolation,

    // === Store ===
    /// A store subscriber or listener failed during publish.
    PublishFailed,

    // === Runtime ===
    /// A virtual-clock operation was used on a wall-clock runtime.
    InvalidClock,
    /// Configuration error (invalid env var, out-of-range value).
    Config,

    // === Internal ===
    /// Internal runtime error (bug).
    Internal,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::FlowCompleted | Self::UnknownFlow => ErrorCategory::Lifecycle,
            Self::ResumeTypeMismatch | Self::Stalled | Self::ProtocolViolation => {
                ErrorCategory::Protocol
            }
            Self::PublishFailed => ErrorCategory::Store,
            Self::InvalidClock | Self::Config => ErrorCategory::Runtime,
            Self::Internal => ErrorCategory::Internal,
        }
    }
}

/// High-level error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Flow lifecycle misuse.
    Lifecycle,
    /// Effect protocol failures.
    Protocol,
    /// Store collaborator failures.
    Store,
    /// Executor and configuration failures.
    Runtime,
    /// Internal runtime errors.
    Internal,
}

/// The main error type for flow runtime operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    flow: Option<FlowId>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            flow: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Records the flow the error originated in.
    #[must_use]
    pub const fn with_flow(mut self, flow: FlowId) -> Self {
        self.flow = Some(flow);
        self
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns the flow the error originated in, if known.
    #[must_use]
    pub const fn flow(&self) -> Option<FlowId> {
        self.flow
    }

    /// Returns true if the error reports driving a finished flow.
    #[must_use]
    pub const fn is_flow_completed(&self) -> bool {
        matches!(self.kind, ErrorKind::FlowCompleted)
    }

    /// Creates a "flow already completed" error.
    #[must_use]
    pub fn flow_completed(flow: FlowId) -> Self {
        Self::new(ErrorKind::FlowCompleted)
            .with_message("flow already completed")
            .with_flow(flow)
    }

    /// Creates a resume type mismatch error.
    #[must_use]
    pub fn resume_type_mismatch(expected: &'static str) -> Self {
        Self::new(ErrorKind::ResumeTypeMismatch)
            .with_message(format!("resume value is not a `{expected}`"))
    }

    /// Creates an "unknown flow" error for a registry lookup.
    #[must_use]
    pub fn unknown_flow(name: &str) -> Self {
        Self::new(ErrorKind::UnknownFlow).with_message(format!("no flow named `{name}`"))
    }

    /// Creates a protocol violation error.
    #[must_use]
    pub fn protocol_violation(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProtocolViolation).with_message(detail)
    }

    /// Creates an internal error (runtime bug).
    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal).with_message(detail)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(flow) = self.flow {
            write!(f, " [{flow}]")?;
        }
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

/// Failure reported by a store subscriber or listener.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    /// Creates a handler error with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Error returned by a store publish.
///
/// Mutations applied by earlier subscribers are not rolled back.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    /// A subscriber registered for the published event failed.
    #[error("subscriber for `{event}` failed: {source}")]
    Subscriber {
        /// The published event type.
        event: String,
        /// The subscriber's failure.
        source: HandlerError,
    },
    /// A global listener failed.
    #[error("listener failed on `{event}`: {source}")]
    Listener {
        /// The published event type.
        event: String,
        /// The listener's failure.
        source: HandlerError,
    },
    /// `publish` was called from inside a subscriber or listener.
    #[error("publish of `{event}` while another publish is in progress")]
    Reentrant {
        /// The event that could not be published.
        event: String,
    },
}

impl From<PublishError> for Error {
    fn from(err: PublishError) -> Self {
        Self::new(ErrorKind::PublishFailed).with_message(err.to_string())
    }
}

/// A specialized Result type for flow runtime operations.
pub type Result<T> = core::result::Result<T, Error>;
