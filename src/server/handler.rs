use crate::connection::{Connection, ConnectionState};
use crate::server::{Server, ServerState};

/// Application hooks called by a [`Server`] for itself and its connections.
///
/// Every method has an empty default, so implementors override only what
/// they need. Hooks run on the connection's reader task (or the accept task
/// for `on_client_connected`) and should not block.
///
/// ```rust
/// use wsplex::{Connection, Server, ServerHandler};
///
/// struct Echo;
///
/// impl ServerHandler for Echo {
///     fn on_text_received(&self, _server: &Server, conn: &Connection, text: &str) {
///         let _ = conn.send_text(text);
///     }
/// }
/// ```
pub trait ServerHandler: Send + Sync + 'static {
    /// A connection was routed to this server and its workers are about to
    /// start.
    fn on_client_connected(&self, server: &Server, conn: &Connection) {
        let _ = (server, conn);
    }

    /// One of this server's connections changed state.
    fn on_state_changed(&self, server: &Server, conn: &Connection, state: ConnectionState) {
        let _ = (server, conn, state);
    }

    /// The server itself moved to `state`.
    fn on_server_state_changed(&self, server: &Server, state: ServerState) {
        let _ = (server, state);
    }

    /// A text message arrived on one of this server's connections.
    fn on_text_received(&self, server: &Server, conn: &Connection, text: &str) {
        let _ = (server, conn, text);
    }

    /// A binary message arrived on one of this server's connections.
    fn on_binary_received(&self, server: &Server, conn: &Connection, data: &[u8]) {
        let _ = (server, conn, data);
    }
}

/// Something that happened on a server or one of its connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// The server moved to a new state.
    ServerStateChanged(ServerState),
    ClientConnected(Connection),
    StateChanged(Connection, ConnectionState),
    Text(Connection, String),
    Binary(Connection, Vec<u8>),
}

impl ServerEvent {
    /// The connection the event concerns, if any.
    #[must_use]
    pub fn connection(&self) -> Option<&Connection> {
        match self {
            ServerEvent::ServerStateChanged(_) => None,
            ServerEvent::ClientConnected(conn)
            | ServerEvent::StateChanged(conn, _)
            | ServerEvent::Text(conn, _)
            | ServerEvent::Binary(conn, _) => Some(conn),
        }
    }
}
