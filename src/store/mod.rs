//! The store collaborator.
//!
//! Flows never own application state. They read it, wait for events on it,
//! and publish actions to it through the [`Store`] trait. [`EventStore`] is
//! the in-process implementation shipped with the crate; anything that honors
//! the same contract can stand in for it.

mod memory;

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::error::{HandlerError, PublishError};

pub use memory::EventStore;

/// Name of a published event.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(String);

impl EventType {
    /// Creates an event type.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the event name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventType({:?})", self.0)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventType {
    fn from(name: &str) -> Self {
        Self(name.to_owned())
    }
}

impl From<String> for EventType {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl Borrow<str> for EventType {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A published event with its optional payload and custom data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Event type.
    #[serde(rename = "type")]
    pub event: EventType,
    /// Event payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// Application-defined extra data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<serde_json::Value>,
}

impl Action {
    /// Creates an action without payload or custom data.
    #[must_use]
    pub fn new(event: impl Into<EventType>) -> Self {
        Self {
            event: event.into(),
            payload: None,
            custom: None,
        }
    }

    /// Sets the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Sets the custom data.
    #[must_use]
    pub fn with_custom(mut self, custom: serde_json::Value) -> Self {
        self.custom = Some(custom);
        self
    }
}

/// Diagnostic switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugSettings {
    /// Log each effect a running flow yields.
    pub flow: bool,
}

/// Store-wide settings.
///
/// Deserializes from partial JSON; missing fields keep their defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Diagnostic switches.
    pub debug: DebugSettings,
}

impl StoreSettings {
    /// Settings with effect logging enabled.
    #[must_use]
    pub const fn with_flow_debug(mut self, enabled: bool) -> Self {
        self.debug.flow = enabled;
        self
    }

    /// Parses settings from JSON, filling gaps with defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|err| ConfigError::Parse(err.to_string()))
    }
}

/// Callback invoked during a matching publish with
/// `(state, action, old_state)`.
///
/// `state` is mutable so a subscriber can apply the action; `old_state` is a
/// copy taken before the first subscriber ran.
pub type Subscriber<S> = Box<dyn FnMut(&mut S, &Action, &S) -> Result<(), HandlerError>>;

/// Registration returned by [`Store::subscribe`].
///
/// Dropping it unsubscribes. Use [`keep`](Self::keep) for a registration that
/// lasts as long as the store.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    /// Wraps the closure that removes the registration.
    pub fn new(unsubscribe: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: Some(Box::new(unsubscribe)),
        }
    }

    /// Removes the registration now.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    /// Keeps the registration alive for the lifetime of the store.
    pub fn keep(mut self) {
        self.cancel = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// The store contract consumed by flows.
pub trait Store {
    /// Application state.
    type State;

    /// Exposes the current state to `reader`.
    fn read(&self, reader: &mut dyn FnMut(&Self::State));

    /// Registers `subscriber` for `event`.
    fn subscribe(&self, event: &EventType, subscriber: Subscriber<Self::State>) -> Subscription;

    /// Runs every subscriber registered for the action's event, then every
    /// global listener.
    ///
    /// Fails on the first subscriber or listener that fails; mutations made
    /// before the failure are kept.
    fn publish(&self, action: Action) -> Result<(), PublishError>;

    /// Store-wide settings.
    fn settings(&self) -> &StoreSettings;
}
