//! Effect descriptors.
//!
//! Every operation a flow can request is announced by an [`Effect`] before it
//! runs. Descriptors are inert values: the run loop only logs them, and the
//! test driver hands them to the test so it can assert on what the flow asked
//! for without anything actually happening.
//!
//! Data payloads compare by value. Closure payloads compare by identity
//! through [`FnRef`]: two descriptors are equal only if they came from the
//! same registration.

use std::any::{type_name, TypeId};
use std::cell::Cell;
use std::fmt;
use std::time::Duration;

use crate::store::{Action, EventType};
use crate::types::FlowId;

thread_local! {
    static NEXT_FN_REF: Cell<u64> = const { Cell::new(1) };
}

/// Identity of a closure handed to an effect.
#[derive(Clone)]
pub struct FnRef {
    id: u64,
    type_id: TypeId,
    type_name: &'static str,
}

impl FnRef {
    /// Issues a fresh identity for a closure of type `F`.
    #[must_use]
    pub fn of<F: ?Sized + 'static>() -> Self {
        let id = NEXT_FN_REF.with(|next| {
            let id = next.get();
            next.set(id + 1);
            id
        });
        Self {
            id,
            type_id: TypeId::of::<F>(),
            type_name: type_name::<F>(),
        }
    }

    /// Type name of the closure this reference was issued for.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns true if `f` has the same type as the described closure.
    ///
    /// Function items and closures each have a unique type, so this
    /// identifies a named function passed to `call` or `spawn`, and tells
    /// apart closures even when their type names coincide.
    #[must_use]
    pub fn describes<F: 'static>(&self, _f: &F) -> bool {
        self.type_id == TypeId::of::<F>()
    }
}

impl PartialEq for FnRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for FnRef {}

impl fmt::Debug for FnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FnRef(#{} {})", self.id, self.type_name)
    }
}

/// Payload-free tag of an [`Effect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectKind {
    /// Wait for an event.
    WaitUntil,
    /// Publish an action.
    Publish,
    /// Call an async function.
    Call,
    /// Spawn a child flow.
    Spawn,
    /// Cancel another flow.
    Cancel,
    /// Register a cancellation callback.
    OnCancel,
    /// Sleep.
    Delay,
    /// Run named operations to completion.
    All,
    /// Run named operations until the first settles.
    Race,
    /// Read from store state.
    Select,
}

impl EffectKind {
    /// Stable name used in logs and traces.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WaitUntil => "WaitUntil",
            Self::Publish => "Publish",
            Self::Call => "Call",
            Self::Spawn => "Spawn",
            Self::Cancel => "Cancel",
            Self::OnCancel => "OnCancel",
            Self::Delay => "Delay",
            Self::All => "All",
            Self::Race => "Race",
            Self::Select => "Select",
        }
    }
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Description of an operation requested by a flow.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Suspend until the event is published.
    WaitUntil(EventType),
    /// Publish the action to the store.
    Publish(Action),
    /// Run the referenced async function.
    Call(FnRef),
    /// Start the referenced flow body as a child flow.
    Spawn(FnRef),
    /// Cancel the flow with this id.
    Cancel(FlowId),
    /// Run the referenced callback on cancellation.
    OnCancel(FnRef),
    /// Sleep for the duration.
    Delay(Duration),
    /// Wait for every named operation.
    All(Vec<String>),
    /// Wait for the first named operation.
    Race(Vec<String>),
    /// Evaluate the referenced selector against store state.
    Select(FnRef),
}

/// Borrowed view of an effect's payload, for custom comparisons.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Payload<'a> {
    /// Event type of `WaitUntil`.
    Event(&'a EventType),
    /// Action of `Publish`.
    Action(&'a Action),
    /// Closure of `Call`, `Spawn`, `OnCancel` or `Select`.
    Fn(&'a FnRef),
    /// Target of `Cancel`.
    Flow(FlowId),
    /// Duration of `Delay`.
    Duration(Duration),
    /// Operation names of `All` and `Race`.
    Names(&'a [String]),
}

impl Effect {
    /// Returns the payload-free tag.
    #[must_use]
    pub const fn kind(&self) -> EffectKind {
        match self {
            Self::WaitUntil(_) => EffectKind::WaitUntil,
            Self::Publish(_) => EffectKind::Publish,
            Self::Call(_) => EffectKind::Call,
            Self::Spawn(_) => EffectKind::Spawn,
            Self::Cancel(_) => EffectKind::Cancel,
            Self::OnCancel(_) => EffectKind::OnCancel,
            Self::Delay(_) => EffectKind::Delay,
            Self::All(_) => EffectKind::All,
            Self::Race(_) => EffectKind::Race,
            Self::Select(_) => EffectKind::Select,
        }
    }

    /// Returns a borrowed view of the payload.
    #[must_use]
    pub fn payload(&self) -> Payload<'_> {
        match self {
            Self::WaitUntil(event) => Payload::Event(event),
            Self::Publish(action) => Payload::Action(action),
            Self::Call(f) | Self::Spawn(f) | Self::OnCancel(f) | Self::Select(f) => {
                Payload::Fn(f)
            }
            Self::Cancel(flow) => Payload::Flow(*flow),
            Self::Delay(duration) => Payload::Duration(*duration),
            Self::All(names) | Self::Race(names) => Payload::Names(names),
        }
    }

    /// Compares kinds, then payloads with `eq`.
    pub fn equals_by<F>(&self, other: &Self, eq: F) -> bool
    where
        F: FnOnce(Payload<'_>, Payload<'_>) -> bool,
    {
        self.kind() == other.kind() && eq(self.payload(), other.payload())
    }

    /// Shorthand for a `WaitUntil` descriptor.
    #[must_use]
    pub fn wait_until(event: impl Into<EventType>) -> Self {
        Self::WaitUntil(event.into())
    }

    /// Shorthand for a `Delay` descriptor.
    #[must_use]
    pub const fn delay(duration: Duration) -> Self {
        Self::Delay(duration)
    }

    /// Returns the closure reference if the payload is one.
    #[must_use]
    pub const fn fn_ref(&self) -> Option<&FnRef> {
        match self {
            Self::Call(f) | Self::Spawn(f) | Self::OnCancel(f) | Self::Select(f) => Some(f),
            _ => None,
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WaitUntil(event) => write!(f, "WaitUntil({event})"),
            Self::Publish(action) => write!(f, "Publish({})", action.event),
            Self::Cancel(flow) => write!(f, "Cancel({flow})"),
            Self::Delay(duration) => write!(f, "Delay({duration:?})"),
            Self::All(names) | Self::Race(names) => {
                write!(f, "{}({})", self.kind(), names.join(", "))
            }
            Self::Call(_) | Self::Spawn(_) | Self::OnCancel(_) | Self::Select(_) => {
                f.write_str(self.kind().as_str())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn fetch_user() -> u32 {
        7
    }

    #[test]
    fn data_payloads_compare_by_value() {
        assert_eq!(Effect::wait_until("LOGIN"), Effect::wait_until("LOGIN"));
        assert_ne!(Effect::wait_until("LOGIN"), Effect::wait_until("LOGOUT"));
        assert_eq!(
            Effect::Publish(Action::new("ADD").with_payload(json!(1))),
            Effect::Publish(Action::new("ADD").with_payload(json!(1)))
        );
        assert_eq!(
            Effect::delay(Duration::from_millis(5)),
            Effect::Delay(Duration::from_millis(5))
        );
        assert_ne!(
            Effect::All(vec!["a".into()]),
            Effect::Race(vec!["a".into()])
        );
    }

    #[test]
    fn closure_payloads_compare_by_identity() {
        let first = FnRef::of::<fn()>();
        let second = FnRef::of::<fn()>();
        assert_eq!(Effect::Call(first.clone()), Effect::Call(first.clone()));
        assert_ne!(Effect::Call(first.clone()), Effect::Call(second));
        assert_ne!(Effect::Call(first.clone()), Effect::Spawn(first));
    }

    #[test]
    fn fn_ref_describes_function_items() {
        let r = FnRef::of::<fn() -> u32>();
        assert!(!r.describes(&fetch_user));
        let r = {
            fn issue<F: 'static>(_: &F) -> FnRef {
                FnRef::of::<F>()
            }
            issue(&fetch_user)
        };
        assert!(r.describes(&fetch_user));
        assert!(r.type_name().ends_with("fetch_user"));
    }

    #[test]
    fn fn_ref_tells_sibling_closures_apart() {
        fn issue<F: 'static>(_: &F) -> FnRef {
            FnRef::of::<F>()
        }
        let a = || 1;
        let b = || 2;
        let ra = issue(&a);
        assert_eq!(ra.type_name(), issue(&b).type_name());
        assert!(ra.describes(&a));
        assert!(!ra.describes(&b));
    }

    #[test]
    fn equals_by_uses_custom_payload_comparison() {
        let a = Effect::wait_until("Login");
        let b = Effect::wait_until("LOGIN");
        assert_ne!(a, b);
        let case_insensitive = a.equals_by(&b, |x, y| match (x, y) {
            (Payload::Event(x), Payload::Event(y)) => {
                x.as_str().eq_ignore_ascii_case(y.as_str())
            }
            _ => false,
        });
        assert!(case_insensitive);
        assert!(!a.equals_by(&Effect::delay(Duration::ZERO), |_, _| true));
    }

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(EffectKind::WaitUntil.as_str(), "WaitUntil");
        assert_eq!(Effect::Cancel(FlowId::from_raw(2)).to_string(), "Cancel(flow-2)");
        assert_eq!(
            Effect::Race(vec!["a".into(), "b".into()]).to_string(),
            "Race(a, b)"
        );
    }
}
