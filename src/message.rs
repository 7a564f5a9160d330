//! Outbound messages and close codes.

use std::fmt;

use bytes::Bytes;

use crate::protocol::OpCode;
use crate::protocol::frame::close_payload;

/// Close status codes this crate sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CloseCode {
    /// Normal closure (1000).
    #[default]
    Normal,
    /// Endpoint going away (1001).
    GoingAway,
    /// Malformed frame or protocol violation (1002).
    ProtocolError,
    /// Non-UTF-8 data in a text message (1007).
    InvalidPayload,
    /// Message exceeded the configured maximum (1009).
    MessageTooBig,
    /// Any other code.
    Other(u16),
}

impl CloseCode {
    /// Map a numeric code to its variant.
    #[must_use]
    pub const fn from_u16(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::ProtocolError,
            1007 => CloseCode::InvalidPayload,
            1009 => CloseCode::MessageTooBig,
            other => CloseCode::Other(other),
        }
    }

    /// Numeric value sent on the wire.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::InvalidPayload => 1007,
            CloseCode::MessageTooBig => 1009,
            CloseCode::Other(code) => code,
        }
    }

    /// Split a received close payload into code and reason.
    ///
    /// Returns `None` for an empty payload or one too short to hold a code.
    #[must_use]
    pub fn parse_payload(payload: &[u8]) -> Option<(Self, String)> {
        match payload {
            [hi, lo, reason @ ..] => Some((
                Self::from_u16(u16::from_be_bytes([*hi, *lo])),
                String::from_utf8_lossy(reason).into_owned(),
            )),
            _ => None,
        }
    }
}

/// A message queued for sending.
///
/// The payload is reference counted, so broadcasting one message to many
/// connections does not copy it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    opcode: OpCode,
    payload: Bytes,
}

impl Message {
    /// Message with an arbitrary opcode.
    #[must_use]
    pub fn new(opcode: OpCode, payload: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            payload: payload.into(),
        }
    }

    /// Text message.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(OpCode::Text, text.into())
    }

    /// Binary message.
    #[must_use]
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::new(OpCode::Binary, data)
    }

    /// Ping carrying `data`.
    #[must_use]
    pub fn ping(data: impl Into<Bytes>) -> Self {
        Self::new(OpCode::Ping, data)
    }

    /// Pong carrying `data`.
    #[must_use]
    pub fn pong(data: impl Into<Bytes>) -> Self {
        Self::new(OpCode::Pong, data)
    }

    /// Close with an empty payload.
    #[must_use]
    pub fn close() -> Self {
        Self::new(OpCode::Close, Bytes::new())
    }

    /// Close carrying a status code and reason.
    #[must_use]
    pub fn close_with(code: CloseCode, reason: &str) -> Self {
        Self::new(OpCode::Close, close_payload(Some(code.as_u16()), reason))
    }

    /// Frame opcode this message is sent with.
    #[must_use]
    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    /// Payload bytes.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Message::text(text)
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Message::text(text)
    }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Self {
        Message::binary(data)
    }
}

impl From<&[u8]> for Message {
    fn from(data: &[u8]) -> Self {
        Message::binary(Bytes::copy_from_slice(data))
    }
}

impl From<Bytes> for Message {
    fn from(data: Bytes) -> Self {
        Message::binary(data)
    }
}

/// Callback run by the writer once a message has been written, or when it
/// is discarded unsent.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// A queued message with its completion callbacks.
pub(crate) struct Outgoing {
    pub(crate) message: Message,
    pub(crate) on_success: Option<Callback>,
    pub(crate) on_fail: Option<Callback>,
}

impl Outgoing {
    pub(crate) fn new(message: Message) -> Self {
        Self {
            message,
            on_success: None,
            on_fail: None,
        }
    }

    pub(crate) fn succeed(&mut self) {
        if let Some(cb) = self.on_success.take() {
            cb();
        }
    }

    pub(crate) fn fail(&mut self) {
        if let Some(cb) = self.on_fail.take() {
            cb();
        }
    }
}

impl fmt::Debug for Outgoing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outgoing")
            .field("message", &self.message)
            .field("on_success", &self.on_success.is_some())
            .field("on_fail", &self.on_fail.is_some())
            .finish()
    }
}
