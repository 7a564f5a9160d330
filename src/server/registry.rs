//! Process-wide table of listening ports.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::Result;
use crate::server::{Receiver, Server};

/// Owns one [`Receiver`] per bound port.
///
/// A receiver is created by the first server started on its port and
/// removed when the last server on it unregisters, which also stops its
/// accept loop. Servers use [`ReceiverRegistry::global`] unless built with
/// an explicit registry.
///
/// Lock order is registry, then receiver.
#[derive(Debug, Default)]
pub struct ReceiverRegistry {
    receivers: Mutex<HashMap<u16, Arc<Receiver>>>,
}

impl ReceiverRegistry {
    /// Empty registry, independent of the global one.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared process-wide registry, created on first use.
    pub fn global() -> Arc<ReceiverRegistry> {
        static GLOBAL: OnceLock<Arc<ReceiverRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(ReceiverRegistry::new())).clone()
    }

    /// Attach `server` to the receiver for its port, binding the port first
    /// if nothing listens on it yet. Port 0 always binds a fresh ephemeral
    /// port.
    ///
    /// # Errors
    ///
    /// `Error::PathInUse` if another server holds the same path on the port,
    /// or `Error::Io` if binding fails.
    pub(crate) fn register(&self, server: &Server) -> Result<Arc<Receiver>> {
        let mut receivers = self.receivers.lock();
        let port = server.requested_port();

        let existing = if port == 0 {
            None
        } else {
            receivers.get(&port).cloned()
        };
        let receiver = match existing {
            Some(receiver) => receiver,
            None => {
                let addr = SocketAddr::new(server.config().bind_addr, port);
                let receiver = Receiver::bind(addr, server.config().clone())?;
                receivers.insert(receiver.port(), receiver.clone());
                receiver
            }
        };

        if let Err(err) = receiver.add(server) {
            if receiver.is_empty() {
                receivers.remove(&receiver.port());
                receiver.stop();
            }
            return Err(err);
        }
        Ok(receiver)
    }

    /// Detach the server at `path`; the last one out stops the receiver.
    pub(crate) fn unregister(&self, receiver: &Arc<Receiver>, path: &str) {
        let mut receivers = self.receivers.lock();
        if !receiver.remove(path) {
            return;
        }
        let port = receiver.port();
        if receivers
            .get(&port)
            .is_some_and(|current| Arc::ptr_eq(current, receiver))
        {
            receivers.remove(&port);
        }
        receiver.stop();
        debug!(port, "last server left, receiver removed");
    }

    /// Ports with a live receiver, ascending.
    pub fn ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.receivers.lock().keys().copied().collect();
        ports.sort_unstable();
        ports
    }

    /// Whether a receiver is listening on `port`.
    pub fn contains(&self, port: u16) -> bool {
        self.receivers.lock().contains_key(&port)
    }
}
