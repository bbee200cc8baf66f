//! Named flows bound to one store.

use std::fmt;
use std::future::Future;
use std::rc::Rc;

use indexmap::IndexMap;

use super::context::FlowContext;
use super::handle::Flow;
use crate::error::{Error, Result};
use crate::runtime::RuntimeHandle;
use crate::store::Store;
use crate::tracing_compat::{debug, error};
use crate::types::TaskId;

/// Flows registered by name against a shared store.
///
/// Running a flow spawns its run loop on the runtime; failures are logged.
pub struct FlowRegistry<S: 'static> {
    runtime: RuntimeHandle,
    store: Rc<dyn Store<State = S>>,
    flows: IndexMap<String, Flow<S, ()>>,
}

impl<S: 'static> FlowRegistry<S> {
    /// Creates an empty registry.
    pub fn new(runtime: &RuntimeHandle, store: Rc<dyn Store<State = S>>) -> Self {
        Self {
            runtime: runtime.clone(),
            store,
            flows: IndexMap::new(),
        }
    }

    /// Registers `body` under `name`, replacing any flow registered before.
    pub fn add_flow<B, Fut>(&mut self, name: impl Into<String>, body: B) -> &Flow<S, ()>
    where
        B: FnOnce(FlowContext<S>) -> Fut,
        Fut: Future<Output = ()> + 'static,
    {
        let name = name.into();
        let flow = Flow::new(&self.runtime, Rc::clone(&self.store), body);
        debug!(name = %name, flow = %flow.id(), "flow registered");
        let index = self.flows.insert_full(name, flow).0;
        &self.flows[index]
    }

    /// The flow registered under `name`.
    #[must_use]
    pub fn flow(&self, name: &str) -> Option<&Flow<S, ()>> {
        self.flows.get(name)
    }

    /// Names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.flows.keys().map(String::as_str)
    }

    /// Number of registered flows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.flows.len()
    }

    /// Returns true if no flow is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Starts the flow registered under `name`.
    pub fn run_flow(&self, name: &str) -> Result<TaskId> {
        let flow = self.flows.get(name).ok_or_else(|| Error::unknown_flow(name))?;
        Ok(self.spawn_run(name, flow))
    }

    /// Starts every registered flow, in registration order.
    pub fn run_all(&self) -> Vec<TaskId> {
        self.flows
            .iter()
            .map(|(name, flow)| self.spawn_run(name, flow))
            .collect()
    }

    /// Creates an unregistered flow from `body` and starts it.
    pub fn run_body<B, Fut>(&self, body: B) -> Flow<S, ()>
    where
        B: FnOnce(FlowContext<S>) -> Fut,
        Fut: Future<Output = ()> + 'static,
    {
        let flow = Flow::new(&self.runtime, Rc::clone(&self.store), body);
        self.spawn_run("<anonymous>", &flow);
        flow
    }

    fn spawn_run(&self, name: &str, flow: &Flow<S, ()>) -> TaskId {
        let name = name.to_owned();
        let run = flow.run();
        self.runtime.spawn(async move {
            if let Err(err) = run.await {
                error!(name = %name, error = %err, "registered flow failed");
            }
        })
    }
}

impl<S: 'static> fmt::Debug for FlowRegistry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowRegistry")
            .field("flows", &self.flows)
            .finish_non_exhaustive()
    }
}
