//! Message reassembly
//!
//! Data frames are folded into complete messages here; control frames are
//! handled by the reader before they reach this point.

use bytes::{Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::frame::{Frame, OpCode};

/// WebSocket message (complete, possibly assembled from fragments)
///
/// Text payloads are UTF-8 validated before a message is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Text message
    Text(Bytes),
    /// Binary message
    Binary(Bytes),
}

impl Message {
    /// Build a message, validating text payloads
    pub fn from_parts(opcode: OpCode, data: Bytes) -> Result<Self> {
        match opcode {
            OpCode::Text => {
                if simdutf8::basic::from_utf8(&data).is_err() {
                    return Err(Error::InvalidUtf8);
                }
                Ok(Message::Text(data))
            }
            OpCode::Binary => Ok(Message::Binary(data)),
            _ => Err(Error::Protocol("invalid message opcode")),
        }
    }

    /// Check if this is a text message
    #[inline]
    pub fn is_text(&self) -> bool {
        matches!(self, Message::Text(_))
    }

    /// Check if this is a binary message
    #[inline]
    pub fn is_binary(&self) -> bool {
        matches!(self, Message::Binary(_))
    }

    /// Get message as text (returns None for binary messages)
    pub fn as_text(&self) -> Option<&str> {
        match self {
            // Validated in from_parts
            Message::Text(b) => std::str::from_utf8(b).ok(),
            Message::Binary(_) => None,
        }
    }

    /// Get the raw payload
    #[inline]
    pub fn as_bytes(&self) -> &Bytes {
        match self {
            Message::Text(b) | Message::Binary(b) => b,
        }
    }

    /// Convert into the raw payload
    pub fn into_bytes(self) -> Bytes {
        match self {
            Message::Text(b) | Message::Binary(b) => b,
        }
    }
}

/// Folds data frames into messages
///
/// Holds fragments between a non-final data frame and the final
/// continuation. The message opcode comes from the first fragment.
#[derive(Debug)]
pub struct Reassembler {
    fragment_opcode: Option<OpCode>,
    fragments: Vec<Bytes>,
    buffered: usize,
    max_message_size: usize,
}

impl Reassembler {
    /// Create a reassembler bounded by `max_message_size`
    pub fn new(max_message_size: usize) -> Self {
        Self {
            fragment_opcode: None,
            fragments: Vec::new(),
            buffered: 0,
            max_message_size,
        }
    }

    /// Check if a fragmented message is in progress
    #[inline]
    pub fn is_buffering(&self) -> bool {
        self.fragment_opcode.is_some()
    }

    /// Feed one data frame
    ///
    /// Returns a message when `frame` completes one.
    pub fn push(&mut self, frame: Frame) -> Result<Option<Message>> {
        match frame.opcode {
            OpCode::Text | OpCode::Binary => {
                if self.is_buffering() {
                    self.reset();
                    return Err(Error::Protocol("expected continuation frame"));
                }
                if frame.fin {
                    if frame.payload.len() > self.max_message_size {
                        return Err(Error::MessageTooLarge);
                    }
                    return Message::from_parts(frame.opcode, frame.payload).map(Some);
                }
                self.fragment_opcode = Some(frame.opcode);
                self.append(frame.payload)?;
                Ok(None)
            }
            OpCode::Continuation => {
                let opcode = self
                    .fragment_opcode
                    .ok_or(Error::Protocol("unexpected continuation frame"))?;
                self.append(frame.payload)?;
                if !frame.fin {
                    return Ok(None);
                }

                let data = self.take();
                Message::from_parts(opcode, data).map(Some)
            }
            _ => Err(Error::Protocol("control frame passed to reassembler")),
        }
    }

    fn append(&mut self, payload: Bytes) -> Result<()> {
        self.buffered += payload.len();
        if self.buffered > self.max_message_size {
            self.reset();
            return Err(Error::MessageTooLarge);
        }
        self.fragments.push(payload);
        Ok(())
    }

    /// Concatenate buffered fragments and reset
    fn take(&mut self) -> Bytes {
        let mut data = BytesMut::with_capacity(self.buffered);
        for fragment in self.fragments.drain(..) {
            data.extend_from_slice(&fragment);
        }
        self.reset();
        data.freeze()
    }

    fn reset(&mut self) {
        self.fragment_opcode = None;
        self.fragments.clear();
        self.buffered = 0;
    }
}
