//! Event dispatcher
//!
//! Handlers live in a registry that does not depend on connection state.
//! Each new connection is attached by id; events are delivered only when
//! they come from the attached connection, so a handler sees each logical
//! event once per connection and never from a stale one.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace};

use super::transport::{EventName, InboundEvent};

/// Callback for an inbound event
pub type Handler = Arc<dyn Fn(&InboundEvent) + Send + Sync>;

/// Returned by `on`, used to unregister
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: BTreeMap<EventName, Vec<(HandlerId, Handler)>>,
    attached: Option<u64>,
}

/// Routes named inbound events to registered handlers
#[derive(Default)]
pub struct EventDispatcher {
    registry: Mutex<Registry>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a handler; works whether or not a connection exists
    pub fn on<F>(&self, name: EventName, handler: F) -> HandlerId
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        let mut registry = self.registry();
        registry.next_id += 1;
        let id = HandlerId(registry.next_id);
        registry
            .handlers
            .entry(name)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Unregister a handler; false if it wasn't registered
    pub fn off(&self, name: EventName, id: HandlerId) -> bool {
        let mut registry = self.registry();
        let Some(list) = registry.handlers.get_mut(&name) else {
            return false;
        };
        let before = list.len();
        list.retain(|(h, _)| *h != id);
        before != list.len()
    }

    /// Wire every registered handler to a new connection
    ///
    /// Attaching the already-attached connection again is a no-op.
    /// Returns the number of handlers now wired.
    pub fn attach(&self, connection_id: u64) -> usize {
        let mut registry = self.registry();
        if registry.attached == Some(connection_id) {
            return 0;
        }
        registry.attached = Some(connection_id);
        let count = registry.handlers.values().map(Vec::len).sum();
        debug!(
            "Attached {} handlers to connection {}",
            count, connection_id
        );
        count
    }

    /// Unwire a connection (no-op if another one is attached)
    pub fn detach(&self, connection_id: u64) {
        let mut registry = self.registry();
        if registry.attached == Some(connection_id) {
            registry.attached = None;
        }
    }

    /// The connection handlers are wired to
    pub fn attached(&self) -> Option<u64> {
        self.registry().attached
    }

    /// Deliver an event from `connection_id`
    ///
    /// Returns how many handlers ran.
    pub fn dispatch(&self, connection_id: u64, event: &InboundEvent) -> usize {
        let handlers: Vec<Handler> = {
            let registry = self.registry();
            if registry.attached != Some(connection_id) {
                trace!(
                    "Dropping {} from detached connection {}",
                    event.name(),
                    connection_id
                );
                return 0;
            }
            registry
                .handlers
                .get(&event.name())
                .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };

        // Handlers run outside the lock so they may (un)register freely
        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    /// Number of handlers registered for an event
    pub fn handler_count(&self, name: EventName) -> usize {
        self.registry().handlers.get(&name).map_or(0, Vec::len)
    }
}
