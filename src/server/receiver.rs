//! The per-port accept loop that routes upgraded sockets by request path.

use std::collections::HashMap;
use std::fmt;
use std::future::poll_fn;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::task::Poll;

use parking_lot::Mutex;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::codec::server_handshake;
use crate::config::Config;
use crate::connection::{Connection, Role};
use crate::error::{Error, Result};
use crate::server::Server;

/// Listener shared by every [`Server`] on one port.
///
/// Each accepted socket is upgraded on its own task. The request path (with
/// any query string removed) picks the server; sockets that fail the
/// handshake or ask for an unknown path are dropped.
pub struct Receiver {
    port: u16,
    config: Config,
    servers: Mutex<HashMap<String, Server>>,
    // Taken by `stop` so the port is released before it returns.
    listener: Mutex<Option<TcpListener>>,
    cancel: CancellationToken,
}

impl Receiver {
    /// Bind `addr` and start accepting. The handshake uses `config`.
    ///
    /// # Errors
    ///
    /// `Error::Io` if the address cannot be bound.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub(crate) fn bind(addr: SocketAddr, config: Config) -> Result<Arc<Receiver>> {
        // Bound synchronously so `Server::start` can report the port at once.
        let std_listener = std::net::TcpListener::bind(addr)?;
        std_listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(std_listener)?;
        let port = listener.local_addr()?.port();

        let receiver = Arc::new(Receiver {
            port,
            config,
            servers: Mutex::new(HashMap::new()),
            listener: Mutex::new(Some(listener)),
            cancel: CancellationToken::new(),
        });
        debug!(port, "receiver listening");
        tokio::spawn(receiver.clone().accept_loop());
        Ok(receiver)
    }

    /// Port actually bound.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Paths with a registered server, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.servers.lock().keys().cloned().collect();
        paths.sort();
        paths
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.servers.lock().is_empty()
    }

    pub(crate) fn add(&self, server: &Server) -> Result<()> {
        let mut servers = self.servers.lock();
        if servers.contains_key(server.path()) {
            return Err(Error::PathInUse {
                port: self.port,
                path: server.path().to_string(),
            });
        }
        servers.insert(server.path().to_string(), server.clone());
        trace!(port = self.port, path = server.path(), "server registered");
        Ok(())
    }

    /// Remove the server at `path`. Returns whether none are left.
    pub(crate) fn remove(&self, path: &str) -> bool {
        let mut servers = self.servers.lock();
        servers.remove(path);
        servers.is_empty()
    }

    /// Close the listening socket and end the accept loop.
    pub(crate) fn stop(&self) {
        self.cancel.cancel();
        drop(self.listener.lock().take());
    }

    /// Next accepted socket, or `None` once the listener has been closed.
    async fn accept(&self) -> Option<io::Result<(TcpStream, SocketAddr)>> {
        poll_fn(|cx| match self.listener.lock().as_ref() {
            Some(listener) => listener.poll_accept(cx).map(Some),
            None => Poll::Ready(None),
        })
        .await
    }

    fn route(&self, path: &str) -> Option<Server> {
        let path = path.split('?').next().unwrap_or(path);
        self.servers.lock().get(path).cloned()
    }

    async fn accept_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                accepted = self.accept() => match accepted {
                    None => break,
                    Some(Ok((socket, peer))) => {
                        trace!(port = self.port, %peer, "accepted");
                        let receiver = self.clone();
                        tokio::spawn(async move { receiver.admit(socket, peer).await });
                    }
                    Some(Err(err)) => warn!(port = self.port, %err, "accept failed"),
                },
            }
        }
        debug!(port = self.port, "receiver stopped");
    }

    async fn admit(&self, socket: TcpStream, peer: SocketAddr) {
        if let Err(err) = socket.set_nodelay(true) {
            trace!(%peer, %err, "set_nodelay failed");
        }
        let mut stream = BufReader::new(socket);
        let upgraded = tokio::select! {
            () = self.cancel.cancelled() => return,
            upgraded = server_handshake(&mut stream, &self.config) => upgraded,
        };
        let request = match upgraded {
            Ok(request) => request,
            Err(err) => {
                debug!(port = self.port, %peer, %err, "handshake failed");
                return;
            }
        };

        let Some(server) = self.route(&request.path) else {
            let err = Error::Unroutable(request.path);
            warn!(port = self.port, %peer, %err, "dropping connection");
            return;
        };

        // Registered before the workers start so no event is missed.
        let (conn, pipeline) =
            Connection::prepare(stream, Role::Server, server.config().clone(), Some(peer));
        server.register_client(&conn);
        pipeline.start();
    }
}

impl fmt::Debug for Receiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("port", &self.port)
            .field("paths", &self.paths())
            .finish()
    }
}
