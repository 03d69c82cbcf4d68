//! Listener sets
//!
//! A small callback registry shared by the event hub and the shell backends.
//! Membership and delivery use separate locks: callbacks run on a snapshot
//! with the membership lock released, so they may unsubscribe themselves.
//! `close()` waits for any delivery running on another thread, so once it
//! returns no callback is running and none will start afterwards.

use parking_lot::{Mutex, ReentrantMutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Callback invoked for every delivered value
pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

fn next_listener_id() -> u64 {
    NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed)
}

struct Inner<T> {
    listeners: Vec<(u64, Callback<T>)>,
    closed: bool,
}

/// An ordered, closable set of callbacks
pub struct Listeners<T> {
    inner: Mutex<Inner<T>>,
    /// Held for a whole `emit`; reentrant so a callback may close its own set
    delivery: ReentrantMutex<()>,
}

impl<T: 'static> Listeners<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                listeners: Vec::new(),
                closed: false,
            }),
            delivery: ReentrantMutex::new(()),
        }
    }

    /// Register a callback. Returns an inert subscription if the set is closed.
    pub fn add(self: &Arc<Self>, callback: Callback<T>) -> Subscription
    where
        T: Send,
    {
        self.register(callback).1
    }

    /// Register a callback and feed it `replay()` before any concurrent
    /// `emit` reaches it. `replay` runs after registration, so a producer
    /// that buffers while the set is empty loses nothing in between.
    pub fn add_with_replay(
        self: &Arc<Self>,
        callback: Callback<T>,
        replay: impl FnOnce() -> Vec<T>,
    ) -> Subscription
    where
        T: Send,
    {
        let _delivering = self.delivery.lock();
        let (id, subscription) = self.register(callback.clone());
        if let Some(id) = id {
            for value in replay() {
                if !self.is_live(id) {
                    break;
                }
                callback(&value);
            }
        }
        subscription
    }

    fn register(self: &Arc<Self>, callback: Callback<T>) -> (Option<u64>, Subscription)
    where
        T: Send,
    {
        let mut inner = self.inner.lock();
        if inner.closed {
            return (None, Subscription::inert());
        }
        let id = next_listener_id();
        inner.listeners.push((id, callback));
        drop(inner);

        let weak: Weak<Self> = Arc::downgrade(self);
        let subscription = Subscription::new(move || {
            if let Some(set) = weak.upgrade() {
                set.remove(id);
            }
        });
        (Some(id), subscription)
    }

    fn remove(&self, id: u64) {
        self.inner.lock().listeners.retain(|(lid, _)| *lid != id);
    }

    /// Still registered and the set still open
    fn is_live(&self, id: u64) -> bool {
        let inner = self.inner.lock();
        !inner.closed && inner.listeners.iter().any(|(lid, _)| *lid == id)
    }

    fn snapshot(&self) -> Option<Vec<(u64, Callback<T>)>> {
        let inner = self.inner.lock();
        if inner.closed {
            return None;
        }
        Some(inner.listeners.clone())
    }

    /// Deliver `value` to every listener in registration order.
    ///
    /// Returns `false` if the set is closed. A listener removed or a set
    /// closed mid-delivery receives nothing further.
    pub fn emit(&self, value: &T) -> bool {
        let _delivering = self.delivery.lock();
        let Some(snapshot) = self.snapshot() else {
            return false;
        };
        for (id, callback) in snapshot {
            if self.is_live(id) {
                callback(value);
            }
        }
        true
    }

    /// Like `emit`, but without the delivery lock, so `close()` does not wait
    /// for it. No close guarantee.
    pub fn emit_detached(&self, value: &T) {
        let Some(snapshot) = self.snapshot() else {
            return;
        };
        for (_, callback) in snapshot {
            callback(value);
        }
    }

    /// Stop all future deliveries and drop every listener.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.listeners.clear();
        }
        // Wait out a delivery in progress on another thread
        drop(self.delivery.lock());
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: 'static> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by every `subscribe`-style call.
///
/// Dropping the handle keeps the listener registered; call `unsubscribe()`
/// to remove it.
#[must_use = "keep the subscription to be able to unsubscribe later"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription that was never registered (unknown or closed target)
    pub fn inert() -> Self {
        Self { cancel: None }
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }

    /// Remove the listener. Safe to call after the target went away.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
