//! Per-session subscription registry for backend events.
//!
//! Every live model object that reacts to the backend (session, threads,
//! variable nodes) registers itself here for exactly the lifetime it is
//! attached to the model. The dispatcher is handed to every component at
//! construction time, there is no process-wide registry.

use crate::event::Event;
use indexmap::IndexMap;
use log::debug;
use parking_lot::Mutex;
use std::sync::Weak;
use uuid::Uuid;

pub trait EventListener: Send + Sync {
    fn handle_event(&self, event: &Event);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

#[derive(Default)]
pub struct EventDispatcher {
    /// Insertion order is delivery order.
    listeners: Mutex<IndexMap<SubscriptionId, Weak<dyn EventListener>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Weak<dyn EventListener>) -> SubscriptionId {
        let id = SubscriptionId(Uuid::new_v4());
        self.listeners.lock().insert(id, listener);
        debug!(target: "dispatch", "listener {} registered", id.0);
        id
    }

    pub fn deregister(&self, id: SubscriptionId) -> bool {
        // shift_remove keeps delivery order for the survivors
        let removed = self.listeners.lock().shift_remove(&id).is_some();
        if removed {
            debug!(target: "dispatch", "listener {} deregistered", id.0);
        }
        removed
    }

    /// Count of registered listeners whose objects are still alive.
    pub fn listener_count(&self) -> usize {
        let mut listeners = self.listeners.lock();
        listeners.retain(|_, l| l.strong_count() > 0);
        listeners.len()
    }

    /// Deliver a batch of events to every registered listener, synchronously,
    /// in registration order, preserving event order.
    ///
    /// Delivery iterates over a snapshot taken at the start of the batch, so a
    /// listener may register or deregister listeners (itself included) from
    /// inside its handler. Listeners removed mid-batch still see the remaining
    /// events of the snapshot and are expected to ignore them once disposed.
    pub fn publish(&self, batch: &[Event]) {
        let snapshot: Vec<Weak<dyn EventListener>> = {
            let mut listeners = self.listeners.lock();
            listeners.retain(|_, l| l.strong_count() > 0);
            listeners.values().cloned().collect()
        };
        debug!(
            target: "dispatch",
            "publish {} event(s) to {} listener(s)",
            batch.len(),
            snapshot.len()
        );
        for event in batch {
            for slot in &snapshot {
                if let Some(listener) = slot.upgrade() {
                    listener.handle_event(event);
                }
            }
        }
    }
}
