//! Frame encoding and decoding.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |                 Masking key (if MASK set)                     |
//! +---------------------------------------------------------------+
//! |                     Payload data                              |
//! +---------------------------------------------------------------+
//! ```

use std::cell::OnceCell;

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};
use crate::protocol::OpCode;
use crate::protocol::mask::apply_mask_fast;

/// Maximum payload size for control frames.
pub const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;

const FIN_BIT: u8 = 0x80;
const RSV_BITS: u8 = 0x70;
const MASK_BIT: u8 = 0x80;

/// Decoded fixed part of a frame: everything before the payload.
///
/// The opcode is kept raw so a frame with a reserved opcode can still be
/// skipped over on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Final fragment flag.
    pub fin: bool,
    /// RSV1..RSV3 as the high nibble bits 0x70.
    pub rsv: u8,
    /// Raw 4-bit opcode.
    pub opcode: u8,
    /// Masking key, if the MASK bit was set.
    pub mask: Option<[u8; 4]>,
    /// Declared payload length.
    pub payload_len: u64,
    /// Bytes occupied by the header, including extended length and mask.
    pub header_len: usize,
}

impl FrameHeader {
    /// Total header length implied by the second header byte.
    #[inline]
    #[must_use]
    pub const fn len_from_second_byte(byte1: u8) -> usize {
        let extended = match byte1 & 0x7F {
            126 => 2,
            127 => 8,
            _ => 0,
        };
        let mask = if byte1 & MASK_BIT != 0 { 4 } else { 0 };
        2 + extended + mask
    }

    /// Parse a header from the front of `buf`.
    ///
    /// # Errors
    ///
    /// `Error::IncompleteFrame` if `buf` is shorter than the header.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 2 {
            return Err(Error::IncompleteFrame {
                needed: 2 - buf.len(),
            });
        }
        let (byte0, byte1) = (buf[0], buf[1]);
        let header_len = Self::len_from_second_byte(byte1);
        if buf.len() < header_len {
            return Err(Error::IncompleteFrame {
                needed: header_len - buf.len(),
            });
        }

        let (payload_len, mask_offset) = match byte1 & 0x7F {
            126 => (u64::from(u16::from_be_bytes([buf[2], buf[3]])), 4),
            127 => {
                let mut len = [0u8; 8];
                len.copy_from_slice(&buf[2..10]);
                (u64::from_be_bytes(len), 10)
            }
            short => (u64::from(short), 2),
        };

        let mask = if byte1 & MASK_BIT != 0 {
            let mut key = [0u8; 4];
            key.copy_from_slice(&buf[mask_offset..mask_offset + 4]);
            Some(key)
        } else {
            None
        };

        Ok(Self {
            fin: byte0 & FIN_BIT != 0,
            rsv: byte0 & RSV_BITS,
            opcode: byte0 & 0x0F,
            mask,
            payload_len,
            header_len,
        })
    }

    /// Payload length as `usize`.
    ///
    /// # Errors
    ///
    /// `Error::FrameTooLarge` if the length does not fit the platform.
    pub fn payload_len_usize(&self) -> Result<usize> {
        usize::try_from(self.payload_len).map_err(|_| Error::FrameTooLarge {
            size: self.payload_len,
            max: usize::MAX,
        })
    }
}

/// One WebSocket frame.
///
/// Received frames keep their payload as it arrived; the unmasked form is
/// computed on first access and cached.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Final fragment flag.
    pub fin: bool,
    /// Reserved bits 0x70 of the first byte.
    pub rsv: u8,
    /// Frame opcode.
    pub opcode: OpCode,
    mask: Option<[u8; 4]>,
    raw: Vec<u8>,
    unmasked: OnceCell<Vec<u8>>,
}

impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        self.fin == other.fin
            && self.rsv == other.rsv
            && self.opcode == other.opcode
            && self.payload() == other.payload()
    }
}

impl Eq for Frame {}

impl Frame {
    /// Create an unmasked frame.
    #[must_use]
    pub fn new(fin: bool, opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            fin,
            rsv: 0,
            opcode,
            mask: None,
            raw: payload,
            unmasked: OnceCell::new(),
        }
    }

    /// Build a frame from a parsed header and its payload exactly as read.
    ///
    /// # Errors
    ///
    /// `Error::ReservedOpcode` if the header carries an undefined opcode.
    pub fn from_parts(header: &FrameHeader, raw: Vec<u8>) -> Result<Self> {
        Ok(Self {
            fin: header.fin,
            rsv: header.rsv,
            opcode: OpCode::from_u8(header.opcode)?,
            mask: header.mask,
            raw,
            unmasked: OnceCell::new(),
        })
    }

    /// Final text frame.
    #[must_use]
    pub fn text(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Text, data.into())
    }

    /// Final binary frame.
    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Binary, data.into())
    }

    /// Close frame with optional status code and reason.
    #[must_use]
    pub fn close(code: Option<u16>, reason: &str) -> Self {
        Self::new(true, OpCode::Close, close_payload(code, reason))
    }

    /// Ping frame.
    #[must_use]
    pub fn ping(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Ping, data.into())
    }

    /// Pong frame.
    #[must_use]
    pub fn pong(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Pong, data.into())
    }

    /// Masking key this frame arrived with.
    #[must_use]
    pub fn mask(&self) -> Option<[u8; 4]> {
        self.mask
    }

    /// Whether the frame arrived masked.
    #[must_use]
    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    /// Unmasked payload.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        match self.mask {
            None => &self.raw,
            Some(mask) => self.unmasked.get_or_init(|| {
                let mut data = self.raw.clone();
                apply_mask_fast(&mut data, mask);
                data
            }),
        }
    }

    /// Take ownership of the unmasked payload.
    #[must_use]
    pub fn into_payload(mut self) -> Vec<u8> {
        match self.mask {
            None => self.raw,
            Some(mask) => match self.unmasked.take() {
                Some(data) => data,
                None => {
                    apply_mask_fast(&mut self.raw, mask);
                    self.raw
                }
            },
        }
    }

    /// Parse one frame from the front of `buf`.
    ///
    /// Returns the frame and the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// - `Error::IncompleteFrame` if not enough data is available
    /// - `Error::ReservedOpcode` if a reserved opcode is used
    pub fn parse(buf: &[u8]) -> Result<(Self, usize)> {
        let header = FrameHeader::parse(buf)?;
        let payload_len = header.payload_len_usize()?;
        let total = header
            .header_len
            .checked_add(payload_len)
            .ok_or(Error::FrameTooLarge {
                size: header.payload_len,
                max: usize::MAX - header.header_len,
            })?;

        if buf.len() < total {
            return Err(Error::IncompleteFrame {
                needed: total - buf.len(),
            });
        }

        let raw = buf[header.header_len..total].to_vec();
        Ok((Self::from_parts(&header, raw)?, total))
    }

    /// Check the frame against the base protocol rules.
    ///
    /// # Errors
    ///
    /// - `Error::ReservedBitsSet` if RSV bits are set
    /// - `Error::ProtocolViolation` if a control frame is fragmented
    /// - `Error::ControlFrameTooLarge` if a control payload exceeds 125 bytes
    pub fn validate(&self) -> Result<()> {
        if self.rsv != 0 {
            return Err(Error::ReservedBitsSet);
        }
        if self.opcode.is_control() {
            if !self.fin {
                return Err(Error::ProtocolViolation(format!(
                    "fragmented {} frame",
                    self.opcode
                )));
            }
            if self.raw.len() > MAX_CONTROL_FRAME_PAYLOAD {
                return Err(Error::ControlFrameTooLarge(self.raw.len()));
            }
        }
        Ok(())
    }

    /// Append the wire form of this frame to `dst`, masking with `mask`.
    pub fn encode(&self, dst: &mut BytesMut, mask: Option<[u8; 4]>) {
        encode_frame(dst, self.fin, self.opcode, self.payload(), mask);
    }

    /// Size of the wire form.
    #[must_use]
    pub fn wire_size(&self, masked: bool) -> usize {
        wire_size(self.payload().len(), masked)
    }
}

/// Encoded size of a frame carrying `payload_len` bytes.
#[must_use]
pub fn wire_size(payload_len: usize, masked: bool) -> usize {
    let extended = if payload_len <= 125 {
        0
    } else if payload_len <= 65535 {
        2
    } else {
        8
    };
    let mask = if masked { 4 } else { 0 };
    2 + extended + mask + payload_len
}

/// Append one frame to `dst`.
///
/// RSV bits are always zero; masking is applied to the copied payload only.
pub fn encode_frame(
    dst: &mut BytesMut,
    fin: bool,
    opcode: OpCode,
    payload: &[u8],
    mask: Option<[u8; 4]>,
) {
    dst.reserve(wire_size(payload.len(), mask.is_some()));

    let byte0 = opcode.as_u8() | if fin { FIN_BIT } else { 0 };
    dst.put_u8(byte0);

    let mask_bit = if mask.is_some() { MASK_BIT } else { 0 };
    let len = payload.len();
    if len <= 125 {
        dst.put_u8(mask_bit | len as u8);
    } else if len <= 65535 {
        dst.put_u8(mask_bit | 126);
        dst.put_u16(len as u16);
    } else {
        dst.put_u8(mask_bit | 127);
        dst.put_u64(len as u64);
    }

    match mask {
        Some(key) => {
            dst.put_slice(&key);
            let start = dst.len();
            dst.put_slice(payload);
            apply_mask_fast(&mut dst[start..], key);
        }
        None => dst.put_slice(payload),
    }
}

/// Close payload: big-endian status code followed by the UTF-8 reason.
#[must_use]
pub fn close_payload(code: Option<u16>, reason: &str) -> Vec<u8> {
    match code {
        Some(code) => {
            let mut data = Vec::with_capacity(2 + reason.len());
            data.extend_from_slice(&code.to_be_bytes());
            data.extend_from_slice(reason.as_bytes());
            data
        }
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(frame: &Frame, mask: Option<[u8; 4]>) -> Vec<u8> {
        let mut buf = BytesMut::new();
        frame.encode(&mut buf, mask);
        buf.to_vec()
    }

    // --------------------------------------------------------------------------
    // Decoding
    // --------------------------------------------------------------------------
    #[test]
    fn test_parse_unmasked_text_frame() {
        let data = &[0x81, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f];
        let (frame, len) = Frame::parse(data).unwrap();
        assert_eq!(len, 7);
        assert!(frame.fin);
        assert!(!frame.is_masked());
        assert_eq!(frame.opcode, OpCode::Text);
        assert_eq!(frame.payload(), b"Hello");
    }

    #[test]
    fn test_parse_masked_text_frame_unmasks_lazily() {
        let data = &[
            0x81, 0x85, // FIN + Text, MASK + len=5
            0x37, 0xfa, 0x21, 0x3d, // Mask key
            0x7f, 0x9f, 0x4d, 0x51, 0x58, // Masked "Hello"
        ];
        let (frame, len) = Frame::parse(data).unwrap();
        assert_eq!(len, 11);
        assert_eq!(frame.mask(), Some([0x37, 0xfa, 0x21, 0x3d]));
        assert_eq!(frame.payload(), b"Hello");
        // cached on second access
        assert_eq!(frame.payload(), b"Hello");
        assert_eq!(frame.into_payload(), b"Hello");
    }

    #[test]
    fn test_into_payload_without_prior_access() {
        let data = &[0x82, 0x82, 0x01, 0x02, 0x03, 0x04, 0x01 ^ 0xAA, 0x02 ^ 0xBB];
        let (frame, _) = Frame::parse(data).unwrap();
        assert_eq!(frame.into_payload(), vec![0xAA, 0xBB]);
    }

    #[test]
    fn test_parse_extended_length_126() {
        let mut data = vec![0x82, 0x7e, 0x01, 0x00];
        data.extend(vec![0xab; 256]);

        let (frame, len) = Frame::parse(&data).unwrap();
        assert_eq!(len, 4 + 256);
        assert_eq!(frame.opcode, OpCode::Binary);
        assert_eq!(frame.payload().len(), 256);
    }

    #[test]
    fn test_parse_extended_length_127() {
        let mut data = vec![0x82, 0x7f];
        data.extend(65536u64.to_be_bytes());
        data.extend(vec![0xcd; 65536]);

        let (frame, len) = Frame::parse(&data).unwrap();
        assert_eq!(len, 10 + 65536);
        assert!(frame.payload().iter().all(|&b| b == 0xcd));
    }

    #[test]
    fn test_parse_fragment_and_continuation() {
        let (first, _) = Frame::parse(&[0x01, 0x03, b'H', b'e', b'l']).unwrap();
        assert!(!first.fin);
        assert_eq!(first.opcode, OpCode::Text);

        let (last, _) = Frame::parse(&[0x80, 0x02, b'l', b'o']).unwrap();
        assert!(last.fin);
        assert_eq!(last.opcode, OpCode::Continuation);
    }

    #[test]
    fn test_parse_incomplete() {
        assert_eq!(
            Frame::parse(&[0x81]),
            Err(Error::IncompleteFrame { needed: 1 })
        );
        assert_eq!(
            Frame::parse(&[0x81, 0x85, 0x00]),
            Err(Error::IncompleteFrame { needed: 3 })
        );
        assert_eq!(
            Frame::parse(&[0x81, 0x05, b'H']),
            Err(Error::IncompleteFrame { needed: 4 })
        );
    }

    #[test]
    fn test_parse_reserved_opcode() {
        assert_eq!(Frame::parse(&[0x83, 0x00]), Err(Error::ReservedOpcode(0x3)));
    }

    #[test]
    fn test_header_lengths() {
        assert_eq!(FrameHeader::len_from_second_byte(0x05), 2);
        assert_eq!(FrameHeader::len_from_second_byte(0x85), 6);
        assert_eq!(FrameHeader::len_from_second_byte(0x7e), 4);
        assert_eq!(FrameHeader::len_from_second_byte(0xff), 14);
    }

    // --------------------------------------------------------------------------
    // Validation
    // --------------------------------------------------------------------------
    #[test]
    fn test_validate_reserved_bits_set() {
        let (frame, _) = Frame::parse(&[0xC1, 0x00]).unwrap();
        assert_eq!(frame.rsv, 0x40);
        assert_eq!(frame.validate(), Err(Error::ReservedBitsSet));
    }

    #[test]
    fn test_validate_control_frames() {
        let mut ping = Frame::ping(b"test".to_vec());
        ping.fin = false;
        assert!(matches!(ping.validate(), Err(Error::ProtocolViolation(_))));

        let big = Frame::ping(vec![0u8; 126]);
        assert_eq!(big.validate(), Err(Error::ControlFrameTooLarge(126)));

        assert!(Frame::close(Some(1000), "bye").validate().is_ok());
    }

    // --------------------------------------------------------------------------
    // Encoding
    // --------------------------------------------------------------------------
    #[test]
    fn test_encode_length_classes() {
        let small = encoded(&Frame::binary(vec![0; 125]), None);
        assert_eq!(&small[..2], &[0x82, 125]);

        let medium = encoded(&Frame::binary(vec![0; 126]), None);
        assert_eq!(&medium[..4], &[0x82, 126, 0x00, 0x7e]);

        let edge = encoded(&Frame::binary(vec![0; 65535]), None);
        assert_eq!(&edge[..4], &[0x82, 126, 0xff, 0xff]);

        let large = encoded(&Frame::binary(vec![0; 65536]), None);
        assert_eq!(&large[..10], &[0x82, 127, 0, 0, 0, 0, 0, 1, 0, 0]);
        assert_eq!(large.len(), Frame::binary(vec![0; 65536]).wire_size(false));
    }

    #[test]
    fn test_encode_masked_matches_known_bytes() {
        let bytes = encoded(&Frame::text("Hello"), Some([0x37, 0xfa, 0x21, 0x3d]));
        assert_eq!(
            bytes,
            vec![0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58]
        );
    }

    #[test]
    fn test_encode_non_final() {
        let frame = Frame::new(false, OpCode::Text, b"Hel".to_vec());
        assert_eq!(encoded(&frame, None)[0], 0x01);
    }

    #[test]
    fn test_close_payload() {
        assert_eq!(close_payload(None, "ignored"), Vec::<u8>::new());
        assert_eq!(close_payload(Some(1000), "ok"), vec![0x03, 0xe8, b'o', b'k']);
    }

    #[test]
    fn test_equality_ignores_masking() {
        let masked = encoded(&Frame::text("abc"), Some([1, 2, 3, 4]));
        let (parsed, _) = Frame::parse(&masked).unwrap();
        assert_eq!(parsed, Frame::text("abc"));
    }
}
