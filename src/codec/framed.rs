use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::{Config, Limits};
use crate::connection::Role;
use crate::error::{Error, Result};
use crate::protocol::frame::{FrameHeader, encode_frame};
use crate::protocol::{Frame, Fragmenter, MaskGenerator, OpCode};

/// Longest possible header: 2 + 8 extended length + 4 mask.
const MAX_HEADER_LEN: usize = 14;

/// Write buffers above this size are released after use.
const RETAINED_WRITE_CAPACITY: usize = 256 * 1024;

fn map_read_err(err: std::io::Error) -> Error {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::Io("peer closed the stream".into())
    } else {
        err.into()
    }
}

/// Decodes frames from the read half of a stream.
pub struct FrameReader<R> {
    io: R,
    role: Role,
    limits: Limits,
    accept_unmasked: bool,
}

impl<R> FrameReader<R> {
    #[must_use]
    pub fn new(io: R, role: Role, config: &Config) -> Self {
        Self {
            io,
            role,
            limits: config.limits.clone(),
            accept_unmasked: config.accept_unmasked_frames,
        }
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn into_inner(self) -> R {
        self.io
    }
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Read exactly one frame.
    ///
    /// Header faults (reserved bits, missing mask, oversize length) are
    /// reported before the payload is read. A reserved opcode is reported
    /// after its payload has been consumed, so the stream stays aligned.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        let mut head = [0u8; MAX_HEADER_LEN];
        self.io
            .read_exact(&mut head[..2])
            .await
            .map_err(map_read_err)?;

        let header_len = FrameHeader::len_from_second_byte(head[1]);
        self.io
            .read_exact(&mut head[2..header_len])
            .await
            .map_err(map_read_err)?;
        let header = FrameHeader::parse(&head[..header_len])?;

        if header.rsv != 0 {
            return Err(Error::ReservedBitsSet);
        }
        self.role
            .check_incoming(header.mask.is_some(), self.accept_unmasked)?;
        self.limits.check_frame_size(header.payload_len)?;

        let mut raw = vec![0u8; header.payload_len_usize()?];
        self.io.read_exact(&mut raw).await.map_err(map_read_err)?;

        let frame = Frame::from_parts(&header, raw)?;
        frame.validate()?;
        Ok(frame)
    }
}

/// Encodes messages onto the write half of a stream.
pub struct FrameWriter<W> {
    io: W,
    role: Role,
    masks: MaskGenerator,
    buf: BytesMut,
    fragment_size: Option<usize>,
}

impl<W> FrameWriter<W> {
    #[must_use]
    pub fn new(io: W, role: Role, config: &Config) -> Self {
        Self {
            io,
            role,
            masks: MaskGenerator::new(),
            buf: BytesMut::with_capacity(8 * 1024),
            fragment_size: config.fragment_size,
        }
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn into_inner(self) -> W {
        self.io
    }

    fn next_mask(&mut self) -> Option<[u8; 4]> {
        self.role.must_mask().then(|| self.masks.next_key())
    }
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Encode one message, split per the configured fragment size, and
    /// write it in a single `write_all`.
    pub async fn write_message(&mut self, opcode: OpCode, payload: &[u8]) -> Result<()> {
        self.buf.clear();
        for fragment in Fragmenter::new(payload, opcode, self.fragment_size) {
            let mask = self.next_mask();
            encode_frame(
                &mut self.buf,
                fragment.fin,
                fragment.opcode,
                fragment.payload,
                mask,
            );
        }
        self.write_buf().await
    }

    /// Write a prebuilt frame as is, masking per role.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.buf.clear();
        let mask = self.next_mask();
        frame.encode(&mut self.buf, mask);
        self.write_buf().await
    }

    async fn write_buf(&mut self) -> Result<()> {
        self.io.write_all(&self.buf).await?;
        if self.buf.capacity() > RETAINED_WRITE_CAPACITY {
            self.buf = BytesMut::with_capacity(8 * 1024);
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.io.flush().await?;
        Ok(())
    }

    /// Flush and shut down the write direction.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.io.shutdown().await?;
        Ok(())
    }
}
