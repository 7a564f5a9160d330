//! Connection notifications and the observer list that fans them out.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::connection::ConnectionState;
use crate::message::Message;

/// Something that happened on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The connection moved to a new state.
    StateChanged(ConnectionState),
    /// A complete text message arrived.
    Text(String),
    /// A complete binary message arrived.
    Binary(Vec<u8>),
    /// The writer put this message on the wire.
    MessageSent(Message),
}

type Handler<S, E> = Arc<dyn Fn(&S, &E) + Send + Sync>;

/// Ordered list of callbacks invoked with a source and an event.
///
/// Handlers run on whichever task produced the event. The list is
/// snapshotted before dispatch, so a handler may subscribe further
/// handlers without deadlocking.
pub(crate) struct Observers<S, E> {
    handlers: RwLock<Vec<Handler<S, E>>>,
}

impl<S, E> Observers<S, E> {
    pub(crate) fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn add<F>(&self, handler: F)
    where
        F: Fn(&S, &E) + Send + Sync + 'static,
    {
        self.handlers.write().push(Arc::new(handler));
    }

    pub(crate) fn dispatch(&self, source: &S, event: &E) {
        let snapshot = self.handlers.read().clone();
        for handler in &snapshot {
            handler(source, event);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.handlers.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_dispatch_in_subscription_order() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let observers: Observers<(), u32> = Observers::new();
        for tag in ["a", "b"] {
            let seen = seen.clone();
            observers.add(move |_, n| seen.lock().push(format!("{tag}{n}")));
        }
        observers.dispatch(&(), &1);
        observers.dispatch(&(), &2);
        assert_eq!(*seen.lock(), ["a1", "b1", "a2", "b2"]);
    }

    #[test]
    fn test_handler_may_subscribe_during_dispatch() {
        let observers: Arc<Observers<(), ()>> = Arc::new(Observers::new());
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let inner = observers.clone();
            let hits = hits.clone();
            observers.add(move |_, _| {
                let hits = hits.clone();
                inner.add(move |_, _| {
                    hits.fetch_add(1, Ordering::SeqCst);
                });
            });
        }
        observers.dispatch(&(), &());
        assert_eq!(observers.len(), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
