//! Path-multiplexed servers.
//!
//! A [`Server`] serves one request path. Servers on the same port share a
//! [`Receiver`], which accepts sockets, runs the opening handshake and hands
//! each connection to the server registered for its path. Receivers live in
//! a [`ReceiverRegistry`], process-wide by default.

mod handler;
mod receiver;
mod registry;
#[allow(clippy::module_inception)]
mod server;

pub use handler::{ServerEvent, ServerHandler};
pub use receiver::Receiver;
pub use registry::ReceiverRegistry;
pub use server::{Server, ServerBuilder, ServerState};
