//! Async I/O layer.
//!
//! Frame reading and writing over split stream halves, and the opening
//! handshake over a buffered stream.

mod framed;
mod upgrade;

pub use framed::{FrameReader, FrameWriter};
pub use upgrade::{client_handshake, server_handshake};
