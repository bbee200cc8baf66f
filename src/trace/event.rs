//! Trace events.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::effect::EffectKind;
use crate::types::{FlowId, Time};

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEventKind {
    /// A flow started running.
    FlowStarted {
        /// The flow.
        flow: FlowId,
    },
    /// A running flow yielded an effect descriptor.
    EffectYielded {
        /// The flow.
        flow: FlowId,
        /// Kind of the effect, as named by [`EffectKind::as_str`].
        effect: String,
    },
    /// A flow's body returned.
    FlowCompleted {
        /// The flow.
        flow: FlowId,
    },
    /// A flow was terminated by cancellation.
    FlowCancelled {
        /// The flow.
        flow: FlowId,
    },
    /// Timers reached their deadline.
    TimerFired {
        /// Number of timers that fired together.
        count: usize,
    },
}

impl TraceEventKind {
    /// Builds an `EffectYielded` event.
    #[must_use]
    pub fn effect(flow: FlowId, kind: EffectKind) -> Self {
        Self::EffectYielded {
            flow,
            effect: kind.as_str().to_owned(),
        }
    }

    /// The flow the event concerns, if any.
    #[must_use]
    pub const fn flow(&self) -> Option<FlowId> {
        match self {
            Self::FlowStarted { flow }
            | Self::EffectYielded { flow, .. }
            | Self::FlowCompleted { flow }
            | Self::FlowCancelled { flow } => Some(*flow),
            Self::TimerFired { .. } => None,
        }
    }
}

/// A recorded event with its sequence number and runtime time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Position in the runtime's event sequence.
    pub seq: u64,
    /// Runtime time when the event was recorded.
    pub time: Time,
    /// What happened.
    #[serde(flatten)]
    pub kind: TraceEventKind,
}

impl TraceEvent {
    /// Creates an event.
    #[must_use]
    pub const fn new(seq: u64, time: Time, kind: TraceEventKind) -> Self {
        Self { seq, time, kind }
    }

    /// Serializes the event as a single JSON line.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} @{} ", self.seq, self.time)?;
        match &self.kind {
            TraceEventKind::FlowStarted { flow } => write!(f, "{flow} started"),
            TraceEventKind::EffectYielded { flow, effect } => write!(f, "{flow} yielded {effect}"),
            TraceEventKind::FlowCompleted { flow } => write!(f, "{flow} completed"),
            TraceEventKind::FlowCancelled { flow } => write!(f, "{flow} cancelled"),
            TraceEventKind::TimerFired { count } => write!(f, "{count} timer(s) fired"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_flat_with_tag() {
        let event = TraceEvent::new(
            4,
            Time::from_millis(10),
            TraceEventKind::effect(FlowId::from_raw(1), EffectKind::Delay),
        );
        let value: serde_json::Value =
            serde_json::from_str(&event.to_json().expect("json")).expect("parse");
        assert_eq!(
            value,
            json!({
                "seq": 4,
                "time": 10_000_000,
                "event": "effect_yielded",
                "flow": 1,
                "effect": "Delay"
            })
        );
    }

    #[test]
    fn display_is_readable() {
        let event = TraceEvent::new(
            0,
            Time::ZERO,
            TraceEventKind::FlowCancelled {
                flow: FlowId::from_raw(3),
            },
        );
        assert_eq!(event.to_string(), "#0 @0ms flow-3 cancelled");
        assert_eq!(event.kind.flow(), Some(FlowId::from_raw(3)));
    }
}
