//! Which end of the connection we are.

use crate::error::{Error, Result};

/// Connection role, fixed at construction.
///
/// Clients mask every frame they send; servers never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Initiated the connection with `connect`.
    Client,
    /// Accepted by a receiver.
    Server,
}

impl Role {
    /// Whether outgoing frames carry a masking key.
    #[inline]
    #[must_use]
    pub const fn must_mask(self) -> bool {
        matches!(self, Role::Client)
    }

    /// Whether incoming frames are required to be masked.
    #[inline]
    #[must_use]
    pub const fn expects_masked(self) -> bool {
        matches!(self, Role::Server)
    }

    /// Apply the masking rule to an incoming frame.
    ///
    /// A server rejects unmasked frames unless `accept_unmasked` is set. A
    /// client takes frames either way, since some servers mask anyway.
    ///
    /// # Errors
    ///
    /// `Error::UnmaskedFrame` when a server receives an unmasked frame.
    pub fn check_incoming(self, masked: bool, accept_unmasked: bool) -> Result<()> {
        if self.expects_masked() && !masked && !accept_unmasked {
            Err(Error::UnmaskedFrame)
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Client => f.write_str("client"),
            Role::Server => f.write_str("server"),
        }
    }
}
