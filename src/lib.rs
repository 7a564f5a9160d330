//! # wsplex - WebSocket engine with path-multiplexed listeners
//!
//! `wsplex` implements the RFC 6455 WebSocket protocol on top of Tokio: the
//! frame codec, the opening handshake, per-connection reader and writer
//! tasks, and servers that share one listening port by request path.
//!
//! ## Features
//!
//! - **Frame codec** with masking, all three length encodings and strict
//!   header validation
//! - **Priority send queue** so Close and Pong never wait behind bulk data
//! - **Closing handshake** with optional escalation to an abrupt kill
//! - **Path multiplexing**: any number of [`Server`]s per port, routed by
//!   the handshake's request path
//! - **Callbacks or channels** for connection and server events
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wsplex::{Connection, Event, Server, ServerEvent};
//!
//! # async fn run() -> wsplex::Result<()> {
//! let server = Server::with_path(9001, "/echo");
//! server.subscribe(|_, event| {
//!     if let ServerEvent::Text(conn, text) = event {
//!         let _ = conn.send_text(text.clone());
//!     }
//! });
//! server.start()?;
//!
//! let client = Connection::connect("ws://127.0.0.1:9001/echo").await?;
//! let mut events = client.events();
//! client.send_text("hello")?;
//! if let Some(Event::Text(reply)) = events.recv().await {
//!     assert_eq!(reply, "hello");
//! }
//! client.close();
//! server.close();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod protocol;

#[cfg(feature = "async-tokio")]
pub mod codec;
#[cfg(feature = "async-tokio")]
pub mod queue;
#[cfg(feature = "async-tokio")]
pub mod server;

pub use config::{Config, Limits};
pub use connection::{ConnectionState, Role};
#[cfg(feature = "async-tokio")]
pub use connection::{Connection, Event};
pub use error::{Error, HandshakeError, Result};
pub use message::{CloseCode, Message};
pub use protocol::{HandshakeRequest, HandshakeResponse, OpCode, WS_GUID, WsUrl, compute_accept_key};
#[cfg(feature = "async-tokio")]
pub use server::{ReceiverRegistry, Server, ServerEvent, ServerHandler, ServerState};
