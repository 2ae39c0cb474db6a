//! Outgoing frame payloads
//!
//! An outgoing frame carries an ordered list of sources instead of one
//! buffer. Byte sources are cheap `Bytes` handles; reader sources are
//! pulled at write time, so a large upload is read straight from its origin
//! into the socket.

use std::fmt;

use bytes::Bytes;
use tokio::io::AsyncRead;

use crate::frame::OpCode;

/// Boxed async reader feeding a payload
pub type PayloadReader = Box<dyn AsyncRead + Send + Unpin>;

/// One piece of an outgoing payload
pub enum PayloadSource {
    /// In-memory bytes
    Bytes(Bytes),
    /// Exactly `len` bytes read from `reader` when the frame is written
    Reader { reader: PayloadReader, len: u64 },
}

impl PayloadSource {
    /// Number of payload bytes this source contributes
    pub fn len(&self) -> u64 {
        match self {
            PayloadSource::Bytes(b) => b.len() as u64,
            PayloadSource::Reader { len, .. } => *len,
        }
    }

    /// Check if this source contributes no bytes
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for PayloadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadSource::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            PayloadSource::Reader { len, .. } => f.debug_struct("Reader").field("len", len).finish(),
        }
    }
}

/// A frame queued for the writer
#[derive(Debug)]
pub struct OutgoingFrame {
    /// Frame opcode
    pub opcode: OpCode,
    /// Final fragment flag
    pub fin: bool,
    /// Payload sources, written in order
    pub sources: Vec<PayloadSource>,
    /// Total payload length, the sum of all source lengths
    pub len: u64,
}

impl OutgoingFrame {
    /// Create a single-source final frame
    pub fn new(opcode: OpCode, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        let len = payload.len() as u64;
        let sources = if payload.is_empty() {
            Vec::new()
        } else {
            vec![PayloadSource::Bytes(payload)]
        };
        Self {
            opcode,
            fin: true,
            sources,
            len,
        }
    }

    /// Create a text frame
    #[inline]
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(OpCode::Text, Bytes::from(text.into()))
    }

    /// Create a binary frame
    #[inline]
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::new(OpCode::Binary, data)
    }

    /// Create a ping frame
    #[inline]
    pub fn ping(data: impl Into<Bytes>) -> Self {
        Self::new(OpCode::Ping, data)
    }

    /// Create a pong frame echoing a ping payload
    #[inline]
    pub fn pong(data: impl Into<Bytes>) -> Self {
        Self::new(OpCode::Pong, data)
    }

    /// Create a close frame with an optional status code
    pub fn close(code: Option<u16>) -> Self {
        match code {
            Some(code) => Self::new(OpCode::Close, Bytes::copy_from_slice(&code.to_be_bytes())),
            None => Self::new(OpCode::Close, Bytes::new()),
        }
    }
}

/// Accumulates heterogeneous sources for one binary frame
///
/// Keeps a running total so the frame header can be written before any
/// source is read.
#[derive(Debug, Default)]
pub struct BinaryParts {
    sources: Vec<PayloadSource>,
    len: u64,
}

impl BinaryParts {
    /// Append literal bytes
    pub fn push_bytes(&mut self, bytes: impl Into<Bytes>) {
        let bytes = bytes.into();
        if !bytes.is_empty() {
            self.len += bytes.len() as u64;
            self.sources.push(PayloadSource::Bytes(bytes));
        }
    }

    /// Append an integer as a single byte
    ///
    /// Only the low 8 bits are kept, matching a narrowing cast.
    pub fn push_byte(&mut self, value: u32) {
        self.push_bytes(Bytes::copy_from_slice(&[value as u8]));
    }

    /// Append the UTF-8 encoding of a string
    pub fn push_text(&mut self, text: impl Into<String>) {
        self.push_bytes(Bytes::from(text.into()));
    }

    /// Append `len` bytes to be read from `reader` at write time
    pub fn push_reader(&mut self, reader: PayloadReader, len: u64) {
        if len > 0 {
            self.len += len;
            self.sources.push(PayloadSource::Reader { reader, len });
        }
    }

    /// Total payload length so far
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Check if nothing has been added
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Finish into a final binary frame
    pub fn into_frame(self) -> OutgoingFrame {
        OutgoingFrame {
            opcode: OpCode::Binary,
            fin: true,
            sources: self.sources,
            len: self.len,
        }
    }
}
