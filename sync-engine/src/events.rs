//! Event fan-out.
//!
//! Transports and nodes publish events through an [`EventHub`]. Each
//! listener owns a [`Subscription`]; dropping it (or calling
//! [`Subscription::unsubscribe`]) removes the listener.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc;

/// Lock a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Listener<E> {
    id: u64,
    tx: mpsc::UnboundedSender<E>,
}

struct HubInner<E> {
    next_id: u64,
    listeners: Vec<Listener<E>>,
}

/// Broadcasts events to every live subscription.
pub struct EventHub<E> {
    inner: Arc<Mutex<HubInner<E>>>,
}

impl<E: Clone> EventHub<E> {
    /// Create a hub with no listeners.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HubInner {
                next_id: 0,
                listeners: Vec::new(),
            })),
        }
    }

    /// Register a listener.
    pub fn subscribe(&self) -> Subscription<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = lock(&self.inner);
        let id = inner.next_id;
        inner.next_id += 1;
        inner.listeners.push(Listener { id, tx });
        Subscription {
            id,
            rx,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver an event to every listener, in registration order.
    pub fn emit(&self, event: E) {
        let mut inner = lock(&self.inner);
        inner
            .listeners
            .retain(|listener| listener.tx.send(event.clone()).is_ok());
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        lock(&self.inner).listeners.len()
    }
}

impl<E: Clone> Default for EventHub<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for EventHub<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> std::fmt::Debug for EventHub<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("listeners", &lock(&self.inner).listeners.len())
            .finish()
    }
}

/// Receiving end of one listener registration.
pub struct Subscription<E> {
    id: u64,
    rx: mpsc::UnboundedReceiver<E>,
    hub: Weak<Mutex<HubInner<E>>>,
}

impl<E> Subscription<E> {
    /// Wait for the next event.
    ///
    /// Returns `None` once the hub is gone and all queued events were read.
    pub async fn recv(&mut self) -> Option<E> {
        self.rx.recv().await
    }

    /// Take the next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<E> {
        self.rx.try_recv().ok()
    }

    /// Remove this listener. Same as dropping the subscription.
    pub fn unsubscribe(self) {}
}

impl<E> Drop for Subscription<E> {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            let id = self.id;
            lock(&hub).listeners.retain(|listener| listener.id != id);
        }
    }
}

impl<E> std::fmt::Debug for Subscription<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
