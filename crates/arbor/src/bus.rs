//! Synchronous multicast publish/subscribe.
//!
//! Every instance owns one [`EventBus`]. Handlers are keyed by event-type
//! string; handlers registered under [`WILDCARD`] see every event after the
//! type-matched handlers have run.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// Event type that matches every emitted event.
pub const WILDCARD: &str = "*";

type Handler<E> = Rc<dyn Fn(&E)>;

struct Listener<E> {
    kind: String,
    handler: Handler<E>,
    active: Rc<Cell<bool>>,
}

impl<E> Clone for Listener<E> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind.clone(),
            handler: Rc::clone(&self.handler),
            active: Rc::clone(&self.active),
        }
    }
}

pub struct EventBus<E> {
    listeners: RefCell<Vec<Listener<E>>>,
}

/// De-registration handle returned by [`EventBus::on`].
///
/// Dropping the handle keeps the handler registered; call
/// [`Subscription::unsubscribe`] to remove it. Unsubscribing twice is a no-op.
#[derive(Clone)]
pub struct Subscription {
    active: Rc<Cell<bool>>,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        self.active.set(false);
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            listeners: RefCell::new(Vec::new()),
        }
    }
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, kind: &str, handler: F) -> Subscription
    where
        F: Fn(&E) + 'static,
    {
        let active = Rc::new(Cell::new(true));
        let mut listeners = self.listeners.borrow_mut();
        listeners.retain(|l| l.active.get());
        listeners.push(Listener {
            kind: kind.to_string(),
            handler: Rc::new(handler),
            active: Rc::clone(&active),
        });
        Subscription { active }
    }

    /// Delivers `event` to the handlers registered for `kind`, then to the
    /// wildcard handlers.
    ///
    /// The listener list is captured before the first handler runs, so
    /// handlers may subscribe or unsubscribe freely while an event is in
    /// flight.
    pub fn emit(&self, kind: &str, event: &E) {
        let (typed, wildcard): (Vec<_>, Vec<_>) = self
            .listeners
            .borrow()
            .iter()
            .filter(|l| l.active.get() && (l.kind == kind || l.kind == WILDCARD))
            .cloned()
            .partition(|l| l.kind != WILDCARD || kind == WILDCARD);
        for listener in typed.iter().chain(wildcard.iter()) {
            if listener.active.get() {
                (listener.handler)(event);
            }
        }
    }

    /// Number of live handlers that would receive an event of type `kind`.
    pub fn listener_count(&self, kind: &str) -> usize {
        self.listeners
            .borrow()
            .iter()
            .filter(|l| l.active.get() && (l.kind == kind || l.kind == WILDCARD))
            .count()
    }

    pub fn has_listeners(&self, kind: &str) -> bool {
        self.listener_count(kind) > 0
    }
}

impl<E> fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count(WILDCARD))
            .finish()
    }
}
