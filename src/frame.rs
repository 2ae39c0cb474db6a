//! WebSocket frame reading and writing
//!
//! This module implements RFC 6455 framing for the client role:
//! - Frames are read straight off an async byte stream, one header field at a time
//! - Server frames are normally unmasked, masked ones are unmasked in place
//! - Outgoing frames are always masked and their payload is streamed in
//!   bounded chunks from one or more sources

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{CloseReason, Error, Result};
use crate::mask::{apply_mask, apply_mask_offset};
use crate::payload::{OutgoingFrame, PayloadSource};
use crate::{MAX_FRAME_HEADER_SIZE, MEDIUM_MESSAGE_THRESHOLD, SMALL_MESSAGE_THRESHOLD};

/// WebSocket opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Continuation frame
    Continuation = 0x0,
    /// Text frame
    Text = 0x1,
    /// Binary frame
    Binary = 0x2,
    /// Connection close
    Close = 0x8,
    /// Ping
    Ping = 0x9,
    /// Pong
    Pong = 0xA,
}

impl OpCode {
    /// Parse opcode from the low nibble of the first header byte
    #[inline]
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(OpCode::Continuation),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xA => Some(OpCode::Pong),
            _ => None,
        }
    }

    /// Check if this is a control frame
    #[inline]
    pub fn is_control(&self) -> bool {
        (*self as u8) >= 0x8
    }

    /// Check if this is a data frame
    #[inline]
    pub fn is_data(&self) -> bool {
        (*self as u8) <= 0x2
    }
}

/// A frame read from the server, payload already unmasked
#[derive(Debug, Clone)]
pub struct Frame {
    /// Final fragment flag
    pub fin: bool,
    /// Frame opcode
    pub opcode: OpCode,
    /// Frame payload
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame
    pub fn new(opcode: OpCode, payload: impl Into<Bytes>, fin: bool) -> Self {
        Self {
            fin,
            opcode,
            payload: payload.into(),
        }
    }

    /// Check if this is a control frame
    #[inline]
    pub fn is_control(&self) -> bool {
        self.opcode.is_control()
    }

    /// Parse close frame payload
    ///
    /// The status code is optional; anything after it is the reason text.
    pub fn parse_close(&self) -> Option<CloseReason> {
        if self.payload.len() < 2 {
            return None;
        }
        let code = u16::from_be_bytes([self.payload[0], self.payload[1]]);
        let reason = String::from_utf8_lossy(&self.payload[2..]).into_owned();
        Some(CloseReason::new(code, reason))
    }
}

/// Read one frame from `reader`
///
/// Fails with an I/O error on a short read, [`Error::FrameTooLarge`] when
/// the declared length has any of its high 33 bits set or exceeds
/// `max_frame_size`, and a protocol error on malformed headers.
pub async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; 2];
    reader.read_exact(&mut head).await?;
    let [b0, b1] = head;

    let fin = b0 & 0x80 != 0;
    if b0 & 0x70 != 0 {
        return Err(Error::Protocol("reserved bits must be 0"));
    }

    let opcode = OpCode::from_u8(b0 & 0x0F).ok_or(Error::Protocol("unknown opcode"))?;
    if opcode.is_control() && !fin {
        return Err(Error::Protocol("control frame must not be fragmented"));
    }

    let masked = b1 & 0x80 != 0;
    let payload_len = match b1 & 0x7F {
        126 => {
            let mut ext = [0u8; 2];
            reader.read_exact(&mut ext).await?;
            u64::from(u16::from_be_bytes(ext))
        }
        127 => {
            let mut ext = [0u8; 8];
            reader.read_exact(&mut ext).await?;
            let len = u64::from_be_bytes(ext);
            if len >> 31 != 0 {
                return Err(Error::FrameTooLarge);
            }
            len
        }
        len => u64::from(len),
    };

    if opcode.is_control() && payload_len > SMALL_MESSAGE_THRESHOLD as u64 {
        return Err(Error::Protocol("control frame too large"));
    }
    if payload_len > max_frame_size as u64 {
        return Err(Error::FrameTooLarge);
    }

    let mask = if masked {
        let mut key = [0u8; 4];
        reader.read_exact(&mut key).await?;
        Some(key)
    } else {
        None
    };

    let mut payload = BytesMut::zeroed(payload_len as usize);
    reader.read_exact(&mut payload).await?;
    if let Some(mask) = mask {
        apply_mask(&mut payload, mask);
    }

    Ok(Frame {
        fin,
        opcode,
        payload: payload.freeze(),
    })
}

/// Encode a frame header into a buffer
///
/// Picks the 7, 16 or 64-bit length form from `payload_len`.
#[inline]
pub fn encode_header(
    buf: &mut BytesMut,
    opcode: OpCode,
    fin: bool,
    payload_len: u64,
    mask: Option<[u8; 4]>,
) {
    buf.reserve(MAX_FRAME_HEADER_SIZE);

    let mut b0 = opcode as u8;
    if fin {
        b0 |= 0x80;
    }
    buf.put_u8(b0);

    let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };
    if payload_len <= SMALL_MESSAGE_THRESHOLD as u64 {
        buf.put_u8(mask_bit | payload_len as u8);
    } else if payload_len <= MEDIUM_MESSAGE_THRESHOLD as u64 {
        buf.put_u8(mask_bit | 126);
        buf.put_u16(payload_len as u16);
    } else {
        buf.put_u8(mask_bit | 127);
        buf.put_u64(payload_len);
    }

    if let Some(mask) = mask {
        buf.put_slice(&mask);
    }
}

/// Encode a complete in-memory frame into a buffer
///
/// The payload is copied and masked when `mask` is set.
pub fn encode_frame(
    buf: &mut BytesMut,
    opcode: OpCode,
    payload: &[u8],
    fin: bool,
    mask: Option<[u8; 4]>,
) {
    encode_header(buf, opcode, fin, payload.len() as u64, mask);
    buf.reserve(payload.len());

    let start = buf.len();
    buf.put_slice(payload);
    if let Some(mask) = mask {
        apply_mask(&mut buf[start..], mask);
    }
}

/// Write an outgoing frame, masking its payload as it streams
///
/// Sources are consumed in order and copied through `chunk`, which never
/// grows past `chunk_size` bytes, so the payload is never held in memory
/// whole. Flushing is left to the caller.
pub async fn write_frame<W>(
    writer: &mut W,
    frame: OutgoingFrame,
    mask: [u8; 4],
    chunk: &mut BytesMut,
    chunk_size: usize,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let chunk_size = chunk_size.max(1);
    let mut header = BytesMut::with_capacity(MAX_FRAME_HEADER_SIZE);
    encode_header(&mut header, frame.opcode, frame.fin, frame.len, Some(mask));
    writer.write_all(&header).await?;

    // Only the position within the 4-byte mask matters
    let mut offset = 0usize;

    for source in frame.sources {
        match source {
            PayloadSource::Bytes(bytes) => {
                for piece in bytes.chunks(chunk_size) {
                    chunk.clear();
                    chunk.extend_from_slice(piece);
                    apply_mask_offset(&mut chunk[..], mask, offset);
                    writer.write_all(&chunk[..]).await?;
                    offset = (offset + piece.len()) & 3;
                }
            }
            PayloadSource::Reader { mut reader, len } => {
                let mut remaining = len;
                while remaining > 0 {
                    let want = remaining.min(chunk_size as u64) as usize;
                    chunk.clear();
                    chunk.resize(want, 0);
                    let n = reader.read(&mut chunk[..want]).await?;
                    if n == 0 {
                        return Err(Error::Io(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "payload source ended early",
                        )));
                    }
                    apply_mask_offset(&mut chunk[..n], mask, offset);
                    writer.write_all(&chunk[..n]).await?;
                    offset = (offset + n) & 3;
                    remaining -= n as u64;
                }
            }
        }
    }

    Ok(())
}
