//! In-process store.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;

use super::{Action, EventType, Store, StoreSettings, Subscriber, Subscription};
use crate::error::{HandlerError, PublishError};
use crate::tracing_compat::trace;

type SharedSubscriber<S> = Rc<RefCell<Subscriber<S>>>;

struct Registrations<S> {
    by_event: BTreeMap<EventType, Vec<(u64, SharedSubscriber<S>)>>,
    listeners: Vec<(u64, SharedSubscriber<S>)>,
}

/// Single-threaded store holding state of type `S`.
///
/// Subscribers registered for an event run in registration order on every
/// publish of that event; global listeners run after them on every publish.
/// Each publish notifies a snapshot of the registrations, so callbacks may
/// unsubscribe themselves or each other while it runs.
pub struct EventStore<S> {
    this: Weak<Self>,
    state: RefCell<S>,
    settings: StoreSettings,
    registrations: RefCell<Registrations<S>>,
    next_id: Cell<u64>,
}

impl<S: Clone + 'static> EventStore<S> {
    /// Creates a store with the given initial state and settings.
    #[must_use]
    pub fn new(state: S, settings: StoreSettings) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            state: RefCell::new(state),
            settings,
            registrations: RefCell::new(Registrations {
                by_event: BTreeMap::new(),
                listeners: Vec::new(),
            }),
            next_id: Cell::new(0),
        })
    }

    /// Returns a copy of the current state.
    #[must_use]
    pub fn state(&self) -> S {
        self.state.borrow().clone()
    }

    /// Registers a listener that runs on every publish.
    pub fn listen<F>(&self, listener: F) -> Subscription
    where
        F: FnMut(&mut S, &Action, &S) -> Result<(), HandlerError> + 'static,
    {
        let id = self.issue_id();
        let listener: Subscriber<S> = Box::new(listener);
        self.registrations
            .borrow_mut()
            .listeners
            .push((id, Rc::new(RefCell::new(listener))));
        let store = self.this.clone();
        Subscription::new(move || {
            if let Some(store) = store.upgrade() {
                let removed = {
                    let mut regs = store.registrations.borrow_mut();
                    let pos = regs.listeners.iter().position(|(i, _)| *i == id);
                    pos.map(|pos| regs.listeners.remove(pos))
                };
                drop(removed);
            }
        })
    }

    /// Registers a subscriber for `event` from a plain closure.
    pub fn on<F>(&self, event: impl Into<EventType>, subscriber: F) -> Subscription
    where
        F: FnMut(&mut S, &Action, &S) -> Result<(), HandlerError> + 'static,
    {
        self.subscribe(&event.into(), Box::new(subscriber))
    }

    /// Number of subscribers registered for `event`.
    #[must_use]
    pub fn subscriber_count(&self, event: &str) -> usize {
        self.registrations
            .borrow()
            .by_event
            .get(event)
            .map_or(0, Vec::len)
    }

    fn issue_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }
}

fn notify<S>(
    callbacks: &[(u64, SharedSubscriber<S>)],
    state: &mut S,
    action: &Action,
    old_state: &S,
) -> Result<(), HandlerError> {
    for (_, callback) in callbacks {
        // A callback already on the stack is not re-entered.
        let Ok(mut callback) = callback.try_borrow_mut() else {
            continue;
        };
        (*callback)(state, action, old_state)?;
    }
    Ok(())
}

impl<S: Clone + 'static> Store for EventStore<S> {
    type State = S;

    fn read(&self, reader: &mut dyn FnMut(&S)) {
        reader(&self.state.borrow());
    }

    fn subscribe(&self, event: &EventType, subscriber: Subscriber<S>) -> Subscription {
        let id = self.issue_id();
        self.registrations
            .borrow_mut()
            .by_event
            .entry(event.clone())
            .or_default()
            .push((id, Rc::new(RefCell::new(subscriber))));
        let store = self.this.clone();
        let event = event.clone();
        Subscription::new(move || {
            if let Some(store) = store.upgrade() {
                let removed = {
                    let mut regs = store.registrations.borrow_mut();
                    let list = regs.by_event.get_mut(&event);
                    let removed = list.and_then(|list| {
                        let pos = list.iter().position(|(i, _)| *i == id)?;
                        Some(list.remove(pos))
                    });
                    if regs.by_event.get(&event).is_some_and(Vec::is_empty) {
                        regs.by_event.remove(&event);
                    }
                    removed
                };
                drop(removed);
            }
        })
    }

    fn publish(&self, action: Action) -> Result<(), PublishError> {
        let Ok(mut state) = self.state.try_borrow_mut() else {
            return Err(PublishError::Reentrant {
                event: action.event.to_string(),
            });
        };
        let old_state = state.clone();
        let (subscribers, listeners) = {
            let regs = self.registrations.borrow();
            let subscribers: SmallVec<[(u64, SharedSubscriber<S>); 4]> = regs
                .by_event
                .get(&action.event)
                .map(|list| list.iter().cloned().collect())
                .unwrap_or_default();
            let listeners: SmallVec<[(u64, SharedSubscriber<S>); 4]> =
                regs.listeners.iter().cloned().collect();
            (subscribers, listeners)
        };
        trace!(
            event = %action.event,
            subscribers = subscribers.len(),
            listeners = listeners.len(),
            "store publish"
        );

        notify(&subscribers, &mut state, &action, &old_state).map_err(|source| {
            PublishError::Subscriber {
                event: action.event.to_string(),
                source,
            }
        })?;
        notify(&listeners, &mut state, &action, &old_state).map_err(|source| {
            PublishError::Listener {
                event: action.event.to_string(),
                source,
            }
        })
    }

    fn settings(&self) -> &StoreSettings {
        &self.settings
    }
}

impl<S: fmt::Debug> fmt::Debug for EventStore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let regs = self.registrations.borrow();
        f.debug_struct("EventStore")
            .field("state", &self.state)
            .field("settings", &self.settings)
            .field("events", &regs.by_event.keys().collect::<Vec<_>>())
            .field("listeners", &regs.listeners.len())
            .finish()
    }
}
