//! In-process event bus.
//!
//! Listeners subscribe to one event kind. Publishing calls every listener
//! of the event's kind in subscription order on the publishing task. A
//! failing listener is logged and skipped.

use hookci_core::{Event, EventKind, Listener};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// What happened to one publish call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<HashMap<EventKind, Vec<Arc<dyn Listener>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for `kind`. Listeners are never removed.
    pub fn subscribe(&self, kind: EventKind, listener: Arc<dyn Listener>) {
        debug!(%kind, listener = listener.name(), "Listener subscribed");
        self.listeners.write().entry(kind).or_default().push(listener);
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.read().get(&kind).map_or(0, Vec::len)
    }

    pub fn publish(&self, event: &Event) -> PublishReport {
        // Snapshot so listeners may subscribe others without deadlocking.
        let listeners = self
            .listeners
            .read()
            .get(&event.kind())
            .cloned()
            .unwrap_or_default();

        let mut report = PublishReport::default();
        for listener in listeners {
            match listener.on_event(event) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        kind = %event.kind(),
                        entity_id = %event.entity_id(),
                        listener = listener.name(),
                        error = %e,
                        "Listener failed"
                    );
                }
            }
        }
        report
    }
}
