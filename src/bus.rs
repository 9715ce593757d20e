//! Synchronous publish/subscribe channel for monitor events.
//!
//! Handlers run on the publishing thread, in registration order. The handler
//! list is snapshotted before dispatch, so a handler may register or
//! unregister (itself included) while an event is being delivered.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Identifier returned by [`EventBus::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl std::fmt::Display for HandlerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}

/// Receives events published on an [`EventBus`].
pub trait EventHandler<E>: Send + Sync {
    fn handle(&self, event: &E);
}

impl<E, F> EventHandler<E> for F
where
    F: Fn(&E) + Send + Sync,
{
    fn handle(&self, event: &E) {
        self(event);
    }
}

type HandlerEntry<E> = (HandlerId, Arc<dyn EventHandler<E>>);

pub struct EventBus<E> {
    handlers: Mutex<Vec<HandlerEntry<E>>>,
    next_id: AtomicU64,
}

impl<E> EventBus<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a handler; it receives every event published from now on.
    pub fn register<H>(&self, handler: H) -> HandlerId
    where
        H: EventHandler<E> + 'static,
    {
        self.register_arc(Arc::new(handler))
    }

    /// Register an already shared handler.
    pub fn register_arc(&self, handler: Arc<dyn EventHandler<E>>) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, handler));
        tracing::trace!(handler_id = %id, "event handler registered");
        id
    }

    /// Remove a handler. Returns false if it was not registered.
    pub fn unregister(&self, id: HandlerId) -> bool {
        let mut handlers = self.lock();
        let before = handlers.len();
        handlers.retain(|(hid, _)| *hid != id);
        let removed = handlers.len() != before;
        drop(handlers);
        if removed {
            tracing::trace!(handler_id = %id, "event handler unregistered");
        }
        removed
    }

    /// Deliver `event` to every registered handler on the calling thread.
    ///
    /// A panicking handler is logged and skipped; the remaining handlers still
    /// receive the event.
    pub fn publish(&self, event: &E) {
        let snapshot: Vec<HandlerEntry<E>> = self.lock().clone();
        for (id, handler) in snapshot {
            let result = catch_unwind(AssertUnwindSafe(|| handler.handle(event)));
            if result.is_err() {
                tracing::error!(handler_id = %id, "event handler panicked");
            }
        }
    }

    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<HandlerEntry<E>>> {
        self.handlers.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers.len()", &self.handler_count())
            .finish()
    }
}
