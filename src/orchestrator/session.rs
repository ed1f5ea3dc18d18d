//! Snapshot publication for the orchestrator's session state.

use crate::model::Session;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

pub type Observer = Arc<dyn Fn(Arc<Session>) + Send + Sync>;

#[derive(Default)]
struct Inner {
    snapshot: Arc<Session>,
    observers: Vec<(u64, Observer)>,
    next_id: u64,
}

/// Latest published snapshot plus the observers to notify on each publish.
///
/// Only the orchestrator loop publishes. Observers are called on the publishing
/// task, in registration order, after the new snapshot is visible through
/// [`SessionStore::current`].
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<Mutex<Inner>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Arc<Session> {
        self.inner.lock().snapshot.clone()
    }

    pub fn publish(&self, session: Session) {
        let snapshot = Arc::new(session);
        let observers: Vec<Observer> = {
            let mut inner = self.inner.lock();
            inner.snapshot = snapshot.clone();
            inner.observers.iter().map(|(_, f)| f.clone()).collect()
        };
        tracing::trace!(phase = ?snapshot.phase, observers = observers.len(), "snapshot published");
        // Called outside the lock so an observer may read `current` or unsubscribe.
        for observer in observers {
            observer(snapshot.clone());
        }
    }

    pub fn subscribe(&self, observer: Observer) -> Subscription {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.observers.push((id, observer));
        Subscription {
            id,
            store: Arc::downgrade(&self.inner),
        }
    }

    #[cfg(test)]
    fn observer_count(&self) -> usize {
        self.inner.lock().observers.len()
    }
}

/// Handle returned by `subscribe`. Dropping it keeps the observer registered.
#[must_use = "keep the subscription to be able to unsubscribe later"]
pub struct Subscription {
    id: u64,
    store: Weak<Mutex<Inner>>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(inner) = self.store.upgrade() {
            inner.lock().observers.retain(|(id, _)| *id != self.id);
        }
    }
}
