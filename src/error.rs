//! Error types for the WebSocket engine.
//!
//! Protocol faults, handshake faults and misuse of a closed connection are
//! kept apart so callers can tell a bad peer from a bad call.

use thiserror::Error;

/// Result type alias for WebSocket operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during WebSocket operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Invalid frame structure or header.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Protocol violation detected.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Invalid UTF-8 in text message.
    #[error("Invalid UTF-8 in text message")]
    InvalidUtf8,

    /// Frame size exceeds configured maximum.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual frame size.
        size: u64,
        /// Maximum allowed size.
        max: usize,
    },

    /// Reassembled message size exceeds configured maximum.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Actual message size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Handshake data exceeds configured maximum.
    #[error("Handshake too large: {size} bytes (max: {max})")]
    HandshakeTooLarge {
        /// Bytes read so far.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Send attempted on a connection that no longer accepts it.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The opening handshake failed.
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(#[from] HandshakeError),

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),

    /// Reserved opcode used.
    #[error("Reserved opcode: {0:#x}")]
    ReservedOpcode(u8),

    /// Control frame payload too large (>125 bytes).
    #[error("Control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(usize),

    /// A frame that must be masked arrived unmasked.
    #[error("Frame from client must be masked")]
    UnmaskedFrame,

    /// Reserved bits set without extension.
    #[error("Reserved bits set without negotiated extension")]
    ReservedBitsSet,

    /// Incomplete frame data.
    #[error("Incomplete frame: need {needed} more bytes")]
    IncompleteFrame {
        /// Number of additional bytes needed.
        needed: usize,
    },

    /// The connect URL could not be understood.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// No server is registered for the requested path.
    #[error("No server registered for path {0}")]
    Unroutable(String),

    /// A server already listens on this port and path.
    #[error("Path {path} already registered on port {port}")]
    PathInUse {
        /// Listening port.
        port: u16,
        /// Request path.
        path: String,
    },

    /// The server is not accepting connections.
    #[error("Server is not running")]
    ServerNotRunning,
}

/// Reasons an opening handshake was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum HandshakeError {
    /// The status line did not report `101 Switching Protocols`.
    #[error("expected status 101, got: {0}")]
    BadStatus(String),

    /// No `Upgrade: websocket` header.
    #[error("missing Upgrade: websocket header")]
    MissingUpgrade,

    /// No `Connection: Upgrade` header.
    #[error("missing Connection: Upgrade header")]
    MissingConnectionUpgrade,

    /// No `Sec-WebSocket-Accept` header.
    #[error("missing Sec-WebSocket-Accept header")]
    MissingAccept,

    /// `Sec-WebSocket-Accept` does not match the key that was sent.
    #[error("Sec-WebSocket-Accept mismatch: expected {expected}, got {actual}")]
    AcceptMismatch {
        /// Value derived from our key.
        expected: String,
        /// Value the peer sent.
        actual: String,
    },

    /// No `Sec-WebSocket-Key` header in the request.
    #[error("missing Sec-WebSocket-Key header")]
    MissingKey,

    /// The request line is not `GET <path> HTTP/1.1`.
    #[error("malformed request line: {0}")]
    MalformedRequestLine(String),

    /// The stream ended before the blank line closing the headers.
    #[error("stream ended during handshake")]
    UnexpectedEof,

    /// `Sec-WebSocket-Version` other than 13.
    #[error("unsupported WebSocket version: {0}")]
    UnsupportedVersion(String),

    /// `Sec-WebSocket-Key` does not decode to 16 bytes.
    #[error("invalid Sec-WebSocket-Key: {0}")]
    InvalidKey(String),

    /// Handshake text is not UTF-8.
    #[error("handshake is not valid UTF-8")]
    NotUtf8,

    /// A header value would break the response framing.
    #[error("header {0} contains CR or LF")]
    InvalidHeaderValue(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl Error {
    /// Whether this error means the peer broke the framing rules.
    ///
    /// Protocol faults end the connection abruptly.
    #[must_use]
    pub fn is_protocol_fault(&self) -> bool {
        matches!(
            self,
            Error::UnmaskedFrame
                | Error::ReservedBitsSet
                | Error::FrameTooLarge { .. }
                | Error::InvalidFrame(_)
                | Error::IncompleteFrame { .. }
        )
    }
}
