//! Event fan-out
//!
//! Observers register a callback, optionally scoped to a session. A scoped
//! observer only sees events its session's selection accepts; an unscoped one
//! sees everything. Callbacks run synchronously on the publishing thread and
//! must not call back into the engine.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use modelbus_core::Event;

use crate::session::SessionRegistry;

/// Observer callback.
pub type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`].
pub type ObserverId = u64;

#[derive(Clone)]
struct Observer {
    id: ObserverId,
    session: Option<String>,
    callback: Callback,
}

/// Registered observers.
pub struct EventBus {
    observers: RwLock<Vec<Observer>>,
    next_id: AtomicU64,
    sessions: Arc<SessionRegistry>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("observers", &self.observers.read().len())
            .finish()
    }
}

impl EventBus {
    /// Bus filtering scoped observers through `sessions`.
    pub fn new(sessions: Arc<SessionRegistry>) -> Self {
        Self {
            observers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            sessions,
        }
    }

    /// Register an observer.
    pub fn subscribe(&self, session: Option<String>, callback: Callback) -> ObserverId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers.write().push(Observer {
            id,
            session,
            callback,
        });
        id
    }

    /// Remove an observer. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|o| o.id != id);
        observers.len() != before
    }

    /// Deliver one event.
    pub fn publish(&self, event: &Event) {
        // Callbacks run without the observer lock held so they may subscribe.
        let observers = self.observers.read().clone();
        for observer in observers {
            let accepted = match &observer.session {
                Some(session) => self.sessions.accepts(session, event),
                None => true,
            };
            if accepted {
                (observer.callback)(event);
            }
        }
    }

    /// Deliver events in order.
    pub fn publish_all(&self, events: &[Event]) {
        for event in events {
            self.publish(event);
        }
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    /// Whether no observer is registered.
    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }
}
