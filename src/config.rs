//! Configuration and limits for connections and listeners.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Resource limits applied to inbound traffic.
///
/// These bound memory usage per connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum payload of a single inbound frame in bytes.
    ///
    /// Default: 16 MB (16 * 1024 * 1024)
    pub max_frame_size: usize,

    /// Maximum size of a reassembled inbound message in bytes.
    ///
    /// Default: 64 MB (64 * 1024 * 1024)
    pub max_message_size: usize,

    /// Maximum size of the opening handshake in bytes.
    ///
    /// Default: 8 KB (8192)
    pub max_handshake_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024 * 1024,
            max_message_size: 64 * 1024 * 1024,
            max_handshake_size: 8192,
        }
    }
}

impl Limits {
    /// Create new limits with custom values.
    #[must_use]
    pub const fn new(
        max_frame_size: usize,
        max_message_size: usize,
        max_handshake_size: usize,
    ) -> Self {
        Self {
            max_frame_size,
            max_message_size,
            max_handshake_size,
        }
    }

    /// Validate that a frame payload length is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FrameTooLarge`](crate::Error::FrameTooLarge) if `size` exceeds the configured maximum.
    pub const fn check_frame_size(&self, size: u64) -> Result<(), crate::Error> {
        if size > self.max_frame_size as u64 {
            Err(crate::Error::FrameTooLarge {
                size,
                max: self.max_frame_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that a reassembled message size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageTooLarge`](crate::Error::MessageTooLarge) if `size` exceeds the configured maximum.
    pub const fn check_message_size(&self, size: usize) -> Result<(), crate::Error> {
        if size > self.max_message_size {
            Err(crate::Error::MessageTooLarge {
                size,
                max: self.max_message_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that handshake size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandshakeTooLarge`](crate::Error::HandshakeTooLarge) if `size` exceeds the configured maximum.
    pub const fn check_handshake_size(&self, size: usize) -> Result<(), crate::Error> {
        if size > self.max_handshake_size {
            Err(crate::Error::HandshakeTooLarge {
                size,
                max: self.max_handshake_size,
            })
        } else {
            Ok(())
        }
    }
}

/// Connection and listener configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Resource limits.
    pub limits: Limits,

    /// Fragment size for outgoing Text/Binary messages.
    ///
    /// `None` sends every message as a single final frame.
    ///
    /// Default: None
    pub fragment_size: Option<usize>,

    /// Accept unmasked frames from clients (server only).
    ///
    /// Masking is mandatory for client frames; enabling this is only useful
    /// against broken peers.
    ///
    /// Default: false
    pub accept_unmasked_frames: bool,

    /// Address receivers bind to.
    ///
    /// Default: 0.0.0.0
    pub bind_addr: IpAddr,

    /// Delay after a graceful close before remaining connections are killed.
    ///
    /// Used by `close()` on servers and connections. `None` never kills.
    ///
    /// Default: None
    pub close_timeout: Option<Duration>,

    /// Require `Sec-WebSocket-Version: 13` and a 16-byte key from clients.
    ///
    /// Default: false
    pub strict_handshake: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            fragment_size: None,
            accept_unmasked_frames: false,
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            close_timeout: None,
            strict_handshake: false,
        }
    }
}

impl Config {
    /// Create a new configuration with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set custom limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Split outgoing messages into frames of at most `size` bytes.
    #[must_use]
    pub const fn with_fragment_size(mut self, size: usize) -> Self {
        self.fragment_size = Some(size);
        self
    }

    /// Set the address receivers bind to.
    #[must_use]
    pub const fn with_bind_addr(mut self, addr: IpAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the default close-then-kill delay.
    #[must_use]
    pub const fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = Some(timeout);
        self
    }

    /// Accept unmasked client frames.
    #[must_use]
    pub const fn with_accept_unmasked_frames(mut self, accept: bool) -> Self {
        self.accept_unmasked_frames = accept;
        self
    }

    /// Enable strict validation of client handshakes.
    #[must_use]
    pub const fn with_strict_handshake(mut self, strict: bool) -> Self {
        self.strict_handshake = strict;
        self
    }

    /// Configure for server role (reject unmasked client frames).
    #[must_use]
    pub fn server() -> Self {
        Self {
            accept_unmasked_frames: false,
            ..Default::default()
        }
    }

    /// Configure for client role.
    #[must_use]
    pub fn client() -> Self {
        Self::default()
    }
}
