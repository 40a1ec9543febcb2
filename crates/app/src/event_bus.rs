//! In-process event bus.
//!
//! [`EventBus`] dispatches synchronously: handlers run in subscription order
//! on the emitter's call stack, and the first failing handler aborts the
//! rest. [`PathChangeFeed`] bridges the `PathChange` kind onto a tokio
//! [`broadcast`] channel so transports can consume it asynchronously while
//! keeping emission order.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;

use meshbridge_domain::error::{BridgeError, InternalError};
use meshbridge_domain::event::{BusEvent, EventKind, PathChange};

/// Callback registered for one [`EventKind`].
pub type Handler = Arc<dyn Fn(&BusEvent) -> Result<(), BridgeError> + Send + Sync>;

static NEXT_BUS_ID: AtomicU64 = AtomicU64::new(0);

thread_local! {
    /// `(bus, kind)` pairs currently being dispatched on this thread.
    static DISPATCHING: RefCell<Vec<(u64, EventKind)>> = const { RefCell::new(Vec::new()) };
}

/// Pops the dispatch marker even when a handler fails.
struct DispatchGuard;

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        DISPATCHING.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Synchronous publish/subscribe over the closed [`EventKind`] vocabulary.
pub struct EventBus {
    id: u64,
    handlers: RwLock<HashMap<EventKind, Vec<Handler>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            id: NEXT_BUS_ID.fetch_add(1, Ordering::Relaxed),
            handlers: RwLock::new(HashMap::new()),
        }
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for every future event of `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&BusEvent) -> Result<(), BridgeError> + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push(Arc::new(handler));
    }

    #[must_use]
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Deliver `event` to every handler of its kind, in subscription order.
    ///
    /// # Errors
    ///
    /// - [`InternalError::Reentrant`] when called from within a handler that
    ///   is currently handling the same kind on this bus
    /// - the first error returned by a handler; later handlers do not run
    pub fn emit(&self, event: impl Into<BusEvent>) -> Result<(), BridgeError> {
        let event = event.into();
        let kind = event.kind();

        let reentrant = DISPATCHING.with(|stack| stack.borrow().contains(&(self.id, kind)));
        if reentrant {
            return Err(InternalError::Reentrant(kind).into());
        }

        // Snapshot so handlers may subscribe without deadlocking.
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned()
            .unwrap_or_default();
        if handlers.is_empty() {
            return Ok(());
        }

        DISPATCHING.with(|stack| stack.borrow_mut().push((self.id, kind)));
        let _guard = DispatchGuard;
        for handler in handlers {
            handler(&event)?;
        }
        Ok(())
    }
}

/// Fan-out of `PathChange` events to asynchronous consumers.
///
/// Receivers only see changes emitted after they subscribed; a consumer that
/// needs a consistent view subscribes first and snapshots second.
#[derive(Clone)]
pub struct PathChangeFeed {
    sender: broadcast::Sender<PathChange>,
}

impl PathChangeFeed {
    /// Create a feed with the given channel capacity and attach it to `bus`.
    #[must_use]
    pub fn attach(bus: &EventBus, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        let forward = sender.clone();
        bus.subscribe(EventKind::PathChange, move |event| {
            if let BusEvent::PathChange(change) = event {
                // send fails only when there are zero receivers, which is fine.
                let _ = forward.send(change.clone());
            }
            Ok(())
        });
        Self { sender }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PathChange> {
        self.sender.subscribe()
    }
}
