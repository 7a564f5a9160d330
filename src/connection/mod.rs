//! WebSocket connections and their state machine.
//!
//! ## Connection Lifecycle
//!
//! 1. **Open** - initial state after a successful handshake
//! 2. **Closing** - a Close frame has been sent or received
//! 3. **Closed** - both workers have exited and the stream is released
//!
//! A connection is closed gracefully with [`Connection::close`], which
//! waits for the peer to answer the Close frame, or abruptly with
//! [`Connection::kill`].

mod role;
mod state;

pub use role::Role;
pub use state::ConnectionState;

#[cfg(feature = "async-tokio")]
#[allow(clippy::module_inception)]
mod connection;
#[cfg(feature = "async-tokio")]
mod event;
#[cfg(feature = "async-tokio")]
pub(crate) mod worker;

#[cfg(feature = "async-tokio")]
pub use connection::Connection;
#[cfg(feature = "async-tokio")]
pub use event::Event;
#[cfg(feature = "async-tokio")]
pub(crate) use event::Observers;
