//! Splitting outgoing messages into a first frame plus continuations.

use crate::protocol::OpCode;

/// One frame's worth of an outgoing message, borrowed from the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment<'a> {
    /// Set on the last fragment.
    pub fin: bool,
    /// The message opcode on the first fragment, `Continuation` after.
    pub opcode: OpCode,
    /// Slice of the message payload.
    pub payload: &'a [u8],
}

/// Iterator over the fragments of one message.
///
/// A `fragment_size` of `None` yields the whole message as a single final
/// fragment. Control frames are never split.
pub struct Fragmenter<'a> {
    payload: &'a [u8],
    opcode: OpCode,
    fragment_size: usize,
    offset: usize,
    first: bool,
}

impl<'a> Fragmenter<'a> {
    /// Create a fragmenter for `payload`.
    #[must_use]
    pub fn new(payload: &'a [u8], opcode: OpCode, fragment_size: Option<usize>) -> Self {
        let fragment_size = match fragment_size {
            Some(size) if opcode.is_data() => size.max(1),
            _ => usize::MAX,
        };
        Self {
            payload,
            opcode,
            fragment_size,
            offset: 0,
            first: true,
        }
    }
}

impl<'a> Iterator for Fragmenter<'a> {
    type Item = Fragment<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.first && self.offset >= self.payload.len() {
            return None;
        }

        let remaining = self.payload.len() - self.offset;
        let chunk = remaining.min(self.fragment_size);
        let payload = &self.payload[self.offset..self.offset + chunk];
        self.offset += chunk;

        let opcode = if self.first {
            self.first = false;
            self.opcode
        } else {
            OpCode::Continuation
        };

        Some(Fragment {
            fin: self.offset >= self.payload.len(),
            opcode,
            payload,
        })
    }
}
