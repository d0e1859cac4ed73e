//! In-process event bus.
//!
//! `publish` runs every handler registered for the event type, in
//! registration order, on the caller's task. The first handler error stops
//! dispatch and is returned to the publisher; later handlers do not run.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use super::DomainEvent;
use crate::error::LedgerError;

/// Event handler. Returning an error aborts dispatch of the current event.
pub type EventHandler = Arc<dyn Fn(&DomainEvent) -> Result<(), LedgerError> + Send + Sync>;

/// Handle returned by `subscribe`, used to remove exactly that handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Publish/subscribe collaborator
pub trait EventBus: Send + Sync {
    fn publish(&self, event: &DomainEvent) -> Result<(), LedgerError>;

    fn subscribe(
        &self,
        event_type: &str,
        handler: EventHandler,
    ) -> Result<SubscriptionId, LedgerError>;

    /// Returns `true` if the handler was registered.
    fn unsubscribe(&self, event_type: &str, id: SubscriptionId) -> bool;
}

#[derive(Default)]
pub struct InMemoryEventBus {
    handlers: RwLock<HashMap<String, Vec<(SubscriptionId, EventHandler)>>>,
    next_id: AtomicU64,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of handlers registered for `event_type`.
    pub fn handler_count(&self, event_type: &str) -> usize {
        self.handlers
            .read()
            .map(|h| h.get(event_type).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(&self, event: &DomainEvent) -> Result<(), LedgerError> {
        // Snapshot the list so handlers may (un)subscribe without deadlocking.
        let handlers: Vec<(SubscriptionId, EventHandler)> = {
            let map = self
                .handlers
                .read()
                .map_err(|_| LedgerError::EventHandler("handler registry poisoned".into()))?;
            match map.get(&event.event_type) {
                Some(list) => list.clone(),
                None => return Ok(()),
            }
        };

        for (id, handler) in handlers {
            if let Err(e) = handler(event) {
                warn!(
                    event_type = %event.event_type,
                    event_id = %event.id,
                    subscription = %id,
                    error = %e,
                    "Event handler failed, aborting dispatch"
                );
                return Err(match e {
                    LedgerError::EventHandler(_) => e,
                    other => LedgerError::EventHandler(other.to_string()),
                });
            }
        }
        debug!(event_type = %event.event_type, event_id = %event.id, "Event published");
        Ok(())
    }

    fn subscribe(
        &self,
        event_type: &str,
        handler: EventHandler,
    ) -> Result<SubscriptionId, LedgerError> {
        if event_type.is_empty() {
            return Err(LedgerError::EventHandler(
                "event type must not be empty".into(),
            ));
        }
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .map_err(|_| LedgerError::EventHandler("handler registry poisoned".into()))?
            .entry(event_type.to_string())
            .or_default()
            .push((id, handler));
        Ok(id)
    }

    fn unsubscribe(&self, event_type: &str, id: SubscriptionId) -> bool {
        let Ok(mut map) = self.handlers.write() else {
            return false;
        };
        let Some(list) = map.get_mut(event_type) else {
            return false;
        };
        let before = list.len();
        list.retain(|(sub, _)| *sub != id);
        let removed = list.len() != before;
        if list.is_empty() {
            map.remove(event_type);
        }
        removed
    }
}
