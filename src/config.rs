//! Runtime configuration.
//!
//! [`RuntimeConfig`] is built fluently and validated before a runtime is
//! created. Environment overrides use the `FLOWRT_` prefix:
//!
//! | Variable | Field |
//! |---|---|
//! | `FLOWRT_TRACE_CAPACITY` | `trace_capacity` |
//! | `FLOWRT_MAX_STEPS` | `max_steps` (`0` or `none` disables the limit) |
//! | `FLOWRT_DEBUG_FLOW` | `debug_flow` |
//!
//! Overrides are applied from a key/value map, so the same code path serves
//! the process environment and programmatic overrides in tests.

use std::collections::BTreeMap;

/// Prefix of recognised environment variables.
pub const ENV_PREFIX: &str = "FLOWRT_";

const DEFAULT_TRACE_CAPACITY: usize = 4096;

/// Configuration for a [`Runtime`](crate::runtime::Runtime).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Number of trace events retained.
    pub trace_capacity: usize,
    /// Upper bound on task polls in one `run_until_quiescent` call.
    pub max_steps: Option<u64>,
    /// Log and trace every effect yielded by running flows, regardless of
    /// store settings.
    pub debug_flow: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeConfig {
    /// Creates the default configuration.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            trace_capacity: DEFAULT_TRACE_CAPACITY,
            max_steps: None,
            debug_flow: false,
        }
    }

    /// Sets the trace capacity.
    #[must_use]
    pub const fn trace_capacity(mut self, capacity: usize) -> Self {
        self.trace_capacity = capacity;
        self
    }

    /// Sets the step limit for `run_until_quiescent`.
    #[must_use]
    pub const fn max_steps(mut self, max_steps: Option<u64>) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Enables effect logging for every flow on the runtime.
    #[must_use]
    pub const fn debug_flow(mut self, enabled: bool) -> Self {
        self.debug_flow = enabled;
        self
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trace_capacity == 0 {
            return Err(ConfigError::InvalidTraceCapacity);
        }
        if self.max_steps == Some(0) {
            return Err(ConfigError::InvalidMaxSteps);
        }
        Ok(())
    }

    /// Applies `FLOWRT_*` variables from the process environment, then
    /// validates.
    pub fn from_env(self) -> Result<Self, ConfigError> {
        let overrides: BTreeMap<String, String> = std::env::vars()
            .filter(|(key, _)| key.starts_with(ENV_PREFIX))
            .collect();
        self.with_overrides(&overrides)
    }

    /// Applies `FLOWRT_*` overrides from `overrides`, then validates.
    ///
    /// Unknown keys carrying the prefix are rejected; keys without it are
    /// ignored.
    pub fn with_overrides(mut self, overrides: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        for (key, value) in overrides {
            if key.starts_with(ENV_PREFIX) {
                apply_override(&mut self, key, value)?;
            }
        }
        self.validate()?;
        Ok(self)
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A value could not be parsed.
    #[error("config parse error: {0}")]
    Parse(String),
    /// `trace_capacity` is zero.
    #[error("trace_capacity must be > 0")]
    InvalidTraceCapacity,
    /// `max_steps` is `Some(0)`.
    #[error("max_steps must be > 0 when set")]
    InvalidMaxSteps,
    /// An override key is not recognised.
    #[error("invalid override: {0}")]
    InvalidOverride(String),
}

impl From<ConfigError> for crate::error::Error {
    fn from(err: ConfigError) -> Self {
        Self::new(crate::error::ErrorKind::Config).with_message(err.to_string())
    }
}

fn apply_override(config: &mut RuntimeConfig, key: &str, value: &str) -> Result<(), ConfigError> {
    match key {
        "FLOWRT_TRACE_CAPACITY" => config.trace_capacity = parse_usize(value, key)?,
        "FLOWRT_MAX_STEPS" => {
            config.max_steps = match value.trim().to_lowercase().as_str() {
                "" | "0" | "none" => None,
                other => Some(parse_u64(other, key)?),
            };
        }
        "FLOWRT_DEBUG_FLOW" => config.debug_flow = parse_bool(value, key)?,
        _ => return Err(ConfigError::InvalidOverride(key.to_owned())),
    }
    Ok(())
}

fn parse_usize(value: &str, key: &str) -> Result<usize, ConfigError> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|_| ConfigError::Parse(format!("invalid usize for {key}: {value}")))
}

fn parse_u64(value: &str, key: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::Parse(format!("invalid u64 for {key}: {value}")))
}

fn parse_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Parse(format!("invalid bool for {key}: {value}"))),
    }
}
