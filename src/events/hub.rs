//! Single-slot callback bridge between domain producers and the delivery layer.
//!
//! Each [`EventKind`] has at most one handler. Registering again replaces the
//! previous handler, and publishing to an empty slot does nothing.

use crate::events::payload::{EventKind, HubEvent};
use crate::runtime::telemetry::Telemetry;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

pub type EventHandler = Arc<dyn Fn(&HubEvent) + Send + Sync>;

#[derive(Default)]
pub struct EventHub {
    slots: RwLock<HashMap<EventKind, EventHandler>>,
    telemetry: Option<Arc<Telemetry>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_telemetry(telemetry: Arc<Telemetry>) -> Self {
        Self {
            slots: RwLock::default(),
            telemetry: Some(telemetry),
        }
    }

    /// Installs `handler` for `kind`, returning the handler it replaced.
    pub fn register<F>(&self, kind: EventKind, handler: F) -> Option<EventHandler>
    where
        F: Fn(&HubEvent) + Send + Sync + 'static,
    {
        let previous = self
            .slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, Arc::new(handler));
        if previous.is_some() {
            tracing::debug!(kind = kind.as_str(), "replaced event handler");
        }
        previous
    }

    pub fn clear(&self, kind: EventKind) -> Option<EventHandler> {
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&kind)
    }

    pub fn has_handler(&self, kind: EventKind) -> bool {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&kind)
    }

    /// Invokes the handler registered for the event's kind, synchronously.
    /// Returns whether a handler ran.
    pub fn publish(&self, event: HubEvent) -> bool {
        let kind = event.kind();
        let handler = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned();

        // Lock is released here so a handler may re-register itself.
        let Some(handler) = handler else {
            tracing::trace!(kind = kind.as_str(), "no handler registered; dropping event");
            return false;
        };

        handler(&event);
        if let Some(telemetry) = &self.telemetry {
            telemetry.record_event_published();
        }
        true
    }
}

impl core::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut kinds: Vec<EventKind> = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        kinds.sort_unstable();
        f.debug_struct("EventHub").field("registered", &kinds).finish()
    }
}
