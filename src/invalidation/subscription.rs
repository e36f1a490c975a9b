//! Listener registry with scoped subscription handles.
//!
//! `subscribe` returns a [`Subscription`]; the listener stays registered until
//! the handle is disposed or dropped.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct ListenerTable<E> {
    next_id: u64,
    callbacks: Vec<(u64, Callback<E>)>,
}

/// A set of event listeners.
pub struct Listeners<E> {
    table: Arc<Mutex<ListenerTable<E>>>,
}

impl<E: 'static> Listeners<E> {
    pub fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(ListenerTable {
                next_id: 0,
                callbacks: Vec::new(),
            })),
        }
    }

    /// Register a listener. It is removed when the returned handle goes away.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = {
            let mut table = self.table.lock();
            let id = table.next_id;
            table.next_id += 1;
            table.callbacks.push((id, Arc::new(listener)));
            id
        };

        let weak: Weak<Mutex<ListenerTable<E>>> = Arc::downgrade(&self.table);
        Subscription {
            id,
            detach: Some(Box::new(move || {
                if let Some(table) = weak.upgrade() {
                    table.lock().callbacks.retain(|(other, _)| *other != id);
                }
            })),
        }
    }

    /// Deliver `event` to every listener, in registration order.
    ///
    /// Listeners run outside the registry lock, so they may subscribe or
    /// dispose handles themselves.
    pub fn emit(&self, event: &E) {
        let callbacks: Vec<Callback<E>> = self
            .table
            .lock()
            .callbacks
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();

        for callback in callbacks {
            callback(event);
        }
    }

    pub fn len(&self) -> usize {
        self.table.lock().callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: 'static> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Listeners<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.table.lock().callbacks.len())
            .finish()
    }
}

/// Handle for one registered listener.
#[must_use = "dropping a Subscription unregisters its listener"]
pub struct Subscription {
    id: u64,
    detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Unregister the listener now.
    pub fn dispose(mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
