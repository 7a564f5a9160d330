use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

use crate::config::Config;
use crate::connection::{Connection, ConnectionState, Event, Observers};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::server::{Receiver, ReceiverRegistry, ServerEvent, ServerHandler};

/// Lifecycle of a [`Server`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ServerState {
    /// Not registered with a receiver. Initial and terminal.
    #[default]
    Closed,
    /// Registered and accepting connections for its path.
    Open,
    /// Waiting for its remaining connections to close.
    Closing,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerState::Closed => write!(f, "Closed"),
            ServerState::Open => write!(f, "Open"),
            ServerState::Closing => write!(f, "Closing"),
        }
    }
}

struct ServerInner {
    requested_port: u16,
    port: AtomicU16,
    path: String,
    config: Config,
    registry: Arc<ReceiverRegistry>,
    state: watch::Sender<ServerState>,
    connections: Mutex<BTreeMap<u64, Connection>>,
    handlers: Vec<Arc<dyn ServerHandler>>,
    observers: Observers<Server, ServerEvent>,
    receiver: Mutex<Option<Arc<Receiver>>>,
}

/// A logical WebSocket server: one request path on one port.
///
/// Several servers may share a port as long as their paths differ; the
/// port's [`Receiver`] hands each upgraded socket to the server registered
/// for its path. `Server` is a cheap handle; clones share state.
///
/// ```rust,no_run
/// use wsplex::{Server, ServerEvent};
///
/// # async fn run() -> wsplex::Result<()> {
/// let server = Server::with_path(9001, "/chat");
/// let mut events = server.events();
/// server.start()?;
/// while let Some(event) = events.recv().await {
///     if let ServerEvent::Text(_, text) = event {
///         server.broadcast(text)?;
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

/// Builder for a [`Server`] with handlers, configuration or a private
/// registry.
pub struct ServerBuilder {
    port: u16,
    path: String,
    config: Config,
    handlers: Vec<Arc<dyn ServerHandler>>,
    registry: Option<Arc<ReceiverRegistry>>,
}

impl ServerBuilder {
    /// Request path to serve. Default `/`.
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Configuration for accepted connections and, if this server binds the
    /// port, for its receiver.
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Add a handler. Handlers are called in the order added.
    #[must_use]
    pub fn handler(mut self, handler: impl ServerHandler) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Register with `registry` instead of the global one.
    #[must_use]
    pub fn registry(mut self, registry: Arc<ReceiverRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    #[must_use]
    pub fn build(self) -> Server {
        let (state, _) = watch::channel(ServerState::Closed);
        Server {
            inner: Arc::new(ServerInner {
                requested_port: self.port,
                port: AtomicU16::new(self.port),
                path: self.path,
                config: self.config,
                registry: self.registry.unwrap_or_else(ReceiverRegistry::global),
                state,
                connections: Mutex::new(BTreeMap::new()),
                handlers: self.handlers,
                observers: Observers::new(),
                receiver: Mutex::new(None),
            }),
        }
    }
}

impl Server {
    /// Server for path `/` on `port`. Port 0 binds an ephemeral port.
    #[must_use]
    pub fn new(port: u16) -> Server {
        Self::builder(port).build()
    }

    /// Server for `path` on `port`.
    #[must_use]
    pub fn with_path(port: u16, path: impl Into<String>) -> Server {
        Self::builder(port).path(path).build()
    }

    #[must_use]
    pub fn builder(port: u16) -> ServerBuilder {
        ServerBuilder {
            port,
            path: "/".to_string(),
            config: Config::server(),
            handlers: Vec::new(),
            registry: None,
        }
    }

    /// Port this server listens on. After starting on port 0 this is the
    /// port actually bound.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.inner.port.load(Ordering::Acquire)
    }

    pub(crate) fn requested_port(&self) -> u16 {
        self.inner.requested_port
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    #[must_use]
    pub fn state(&self) -> ServerState {
        *self.inner.state.borrow()
    }

    /// Register with the receiver for this port, binding it if needed.
    ///
    /// Does nothing unless the server is Closed.
    ///
    /// # Errors
    ///
    /// `Error::PathInUse` if another server already serves this path on the
    /// port, or `Error::Io` if the port cannot be bound.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start(&self) -> Result<()> {
        if self.state() != ServerState::Closed {
            return Ok(());
        }
        let receiver = self.inner.registry.register(self)?;
        self.inner.port.store(receiver.port(), Ordering::Release);
        *self.inner.receiver.lock() = Some(receiver);
        self.set_state(ServerState::Open);
        debug!(port = self.port(), path = %self.inner.path, "server started");
        Ok(())
    }

    /// Take ownership of an upgraded connection routed to this server.
    pub(crate) fn register_client(&self, conn: &Connection) {
        let server = Arc::downgrade(&self.inner);
        conn.subscribe(move |conn, event| {
            if let Some(inner) = server.upgrade() {
                Server { inner }.on_connection_event(conn, event);
            }
        });
        self.inner
            .connections
            .lock()
            .insert(conn.id(), conn.clone());
        trace!(conn = conn.id(), path = %self.inner.path, "client registered");

        for handler in &self.inner.handlers {
            handler.on_client_connected(self, conn);
        }
        self.inner
            .observers
            .dispatch(self, &ServerEvent::ClientConnected(conn.clone()));

        // Killed before the subscription took effect, or arrived while
        // shutting down.
        match conn.state() {
            ConnectionState::Closed => self.remove(conn),
            _ if self.state() != ServerState::Open => conn.close(),
            _ => {}
        }
    }

    fn on_connection_event(&self, conn: &Connection, event: &Event) {
        let server_event = match event {
            Event::StateChanged(state) => {
                for handler in &self.inner.handlers {
                    handler.on_state_changed(self, conn, *state);
                }
                ServerEvent::StateChanged(conn.clone(), *state)
            }
            Event::Text(text) => {
                for handler in &self.inner.handlers {
                    handler.on_text_received(self, conn, text);
                }
                ServerEvent::Text(conn.clone(), text.clone())
            }
            Event::Binary(data) => {
                for handler in &self.inner.handlers {
                    handler.on_binary_received(self, conn, data);
                }
                ServerEvent::Binary(conn.clone(), data.clone())
            }
            Event::MessageSent(_) => return,
        };
        self.inner.observers.dispatch(self, &server_event);

        if let Event::StateChanged(ConnectionState::Closed) = event {
            self.remove(conn);
        }
    }

    fn remove(&self, conn: &Connection) {
        let now_empty = {
            let mut connections = self.inner.connections.lock();
            connections.remove(&conn.id());
            connections.is_empty()
        };
        trace!(conn = conn.id(), path = %self.inner.path, "client removed");
        if now_empty && self.state() == ServerState::Closing {
            self.finish_close();
        }
    }

    /// Unregister and move to Closed. Runs once per start.
    fn finish_close(&self) {
        let Some(receiver) = self.inner.receiver.lock().take() else {
            return;
        };
        self.inner.registry.unregister(&receiver, &self.inner.path);
        self.set_state(ServerState::Closed);
        debug!(port = self.port(), path = %self.inner.path, "server closed");
    }

    fn set_state(&self, next: ServerState) {
        let previous = self.inner.state.send_replace(next);
        if previous != next {
            self.announce(next);
        }
    }

    /// Move Open to Closing. Returns false from any other state.
    fn begin_closing(&self) -> bool {
        let moved = self.inner.state.send_if_modified(|state| {
            if *state == ServerState::Open {
                *state = ServerState::Closing;
                true
            } else {
                false
            }
        });
        if moved {
            self.announce(ServerState::Closing);
        }
        moved
    }

    fn announce(&self, state: ServerState) {
        trace!(path = %self.inner.path, %state, "server state changed");
        for handler in &self.inner.handlers {
            handler.on_server_state_changed(self, state);
        }
        self.inner
            .observers
            .dispatch(self, &ServerEvent::ServerStateChanged(state));
    }

    /// Close every connection gracefully, then stop serving.
    ///
    /// Uses `Config::close_timeout`, if set, to kill connections that have
    /// not closed in time. With no connections the server is Closed on
    /// return.
    pub fn close(&self) {
        self.close_with_timeout(self.inner.config.close_timeout);
    }

    /// Like [`close`](Self::close), killing connections still open after
    /// `timeout`.
    pub fn close_timeout(&self, timeout: Duration) {
        self.close_with_timeout(Some(timeout));
    }

    fn close_with_timeout(&self, timeout: Option<Duration>) {
        if !self.begin_closing() {
            return;
        }
        let connections = self.connections();
        if connections.is_empty() {
            self.finish_close();
            return;
        }
        debug!(path = %self.inner.path, count = connections.len(), "closing connections");
        for conn in &connections {
            conn.begin_close(Message::close(), None);
        }
        if let Some(timeout) = timeout {
            let server = self.clone();
            tokio::spawn(async move {
                tokio::select! {
                    () = tokio::time::sleep(timeout) => {
                        debug!(path = %server.inner.path, "close timed out, killing");
                        for conn in server.connections() {
                            conn.kill();
                        }
                    }
                    () = server.closed() => {}
                }
            });
        }
    }

    /// Kill every connection without the closing handshake, then stop
    /// serving.
    pub fn kill(&self) {
        self.begin_closing();
        let connections = self.connections();
        if connections.is_empty() {
            if self.state() == ServerState::Closing {
                self.finish_close();
            }
            return;
        }
        for conn in &connections {
            conn.kill();
        }
    }

    /// Queue `message` on every open connection. Returns how many accepted
    /// it.
    ///
    /// # Errors
    ///
    /// `Error::ServerNotRunning` unless the server is Open.
    pub fn broadcast(&self, message: impl Into<Message>) -> Result<usize> {
        if self.state() != ServerState::Open {
            return Err(Error::ServerNotRunning);
        }
        let message = message.into();
        let sent = self
            .connections()
            .iter()
            .filter(|conn| conn.send(message.clone()).is_ok())
            .count();
        Ok(sent)
    }

    /// Wait until every connection has flushed what was queued before this
    /// call. Connections that close meanwhile are skipped.
    pub async fn flush(&self) {
        for conn in self.connections() {
            if let Err(err) = conn.flush().await {
                trace!(conn = conn.id(), %err, "flush skipped");
            }
        }
    }

    /// Snapshot of the current connections, oldest first.
    pub fn connections(&self) -> Vec<Connection> {
        self.inner.connections.lock().values().cloned().collect()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.lock().len()
    }

    /// Resolve once the server is Closed.
    pub async fn closed(&self) {
        let mut state = self.inner.state.subscribe();
        let _ = state.wait_for(|s| *s == ServerState::Closed).await;
    }

    /// Register a callback for every future server event.
    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(&Server, &ServerEvent) + Send + Sync + 'static,
    {
        self.inner.observers.add(handler);
    }

    /// Stream of future server events as an unbounded channel.
    pub fn events(&self) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribe(move |_, event| {
            let _ = tx.send(event.clone());
        });
        rx
    }
}

impl PartialEq for Server {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Server {}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("port", &self.port())
            .field("path", &self.inner.path)
            .field("state", &self.state())
            .field("connections", &self.connection_count())
            .finish()
    }
}
