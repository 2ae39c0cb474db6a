//! Connection handle, handler events and the multi-part binary builder

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncRead;
use url::Url;

use crate::SMALL_MESSAGE_THRESHOLD;
use crate::error::{BoxError, CloseReason, Error, Result};
use crate::payload::{BinaryParts, OutgoingFrame};
use crate::protocol::Message;
use crate::state::{Shared, Token};

/// Result returned by a [`Handler`]
pub type HandlerResult = std::result::Result<(), BoxError>;

/// Receives every complete message on a connection
///
/// Called from the dispatcher task, one message at a time, in arrival
/// order. Returning an error (or panicking) faults the connection.
///
/// Closures of the form `|event: &Event| -> HandlerResult { .. }` implement
/// this trait.
pub trait Handler: Send + 'static {
    /// Handle one message
    fn on_message(&mut self, event: &Event) -> HandlerResult;
}

impl<F> Handler for F
where
    F: FnMut(&Event) -> HandlerResult + Send + 'static,
{
    fn on_message(&mut self, event: &Event) -> HandlerResult {
        self(event)
    }
}

/// Handle to an open WebSocket connection
///
/// Cheap to clone; every clone drives the same connection. Dropping the
/// handles does not close the connection, call [`Connection::close`].
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// URL the connection was finally established to, after redirects
    pub fn url(&self) -> &Url {
        self.shared.url()
    }

    /// Subprotocol selected by the server
    pub fn protocol(&self) -> Option<&str> {
        self.shared.protocol()
    }

    /// Check if the connection is neither closed nor faulted
    pub fn is_open(&self) -> bool {
        self.shared.is_open()
    }

    /// Close code and reason sent by the peer, if it closed the connection
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.shared.close_reason()
    }

    /// Fault that took this connection down, if any
    pub fn error(&self) -> Option<Arc<Error>> {
        self.shared.error()
    }

    /// Error hit after an orderly close, such as a broken pipe while the
    /// close frame went out; never raised by other calls
    pub fn suppressed_error(&self) -> Option<Arc<Error>> {
        self.shared.suppressed_error()
    }

    /// Queue a text message
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.shared.send(OutgoingFrame::text(text))
    }

    /// Queue a binary message
    pub fn send_binary(&self, data: impl Into<Bytes>) -> Result<()> {
        self.shared.send(OutgoingFrame::binary(data))
    }

    /// Queue a ping; control payloads are limited to 125 bytes
    pub fn send_ping(&self, data: impl Into<Bytes>) -> Result<()> {
        let data = data.into();
        if data.len() > SMALL_MESSAGE_THRESHOLD {
            return Err(Error::InvalidFrame("ping payload exceeds 125 bytes"));
        }
        self.shared.send(OutgoingFrame::ping(data))
    }

    /// Start a binary message built from several parts
    pub fn binary(&self) -> BinaryBuilder {
        BinaryBuilder {
            shared: self.shared.clone(),
            parts: BinaryParts::default(),
        }
    }

    /// Mark `token` as completed and wake waiters
    pub fn complete(&self, token: impl Into<Token>) {
        self.shared.complete(token.into());
    }

    /// Wait until one of `tokens` is completed
    ///
    /// Returns the completed token (consuming it), `None` if the connection
    /// closed in an orderly way first, or the recorded fault. There is no
    /// timeout; wrap the call in `tokio::time::timeout` if one is needed.
    pub async fn wait_for(&self, tokens: &[Token]) -> Result<Option<Token>> {
        self.shared.wait_for(tokens).await
    }

    /// Store a value under `key` for later handler calls
    pub fn store<T>(&self, key: impl Into<String>, value: T)
    where
        T: Any + Send + Sync,
    {
        self.shared.store(key.into(), Arc::new(value));
    }

    /// Fetch a stored value; `None` if missing or of another type
    pub fn get<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.shared.get(key)?.downcast::<T>().ok()
    }

    /// Close the connection
    ///
    /// Sends a normal close frame, stops the workers and releases the
    /// socket. Calling it again does nothing.
    pub fn close(&self) {
        self.shared.close();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.shared)
            .finish()
    }
}

/// A message delivered to a [`Handler`]
///
/// Gives access to the payload and to the connection it arrived on.
#[derive(Debug, Clone)]
pub struct Event {
    connection: Connection,
    message: Message,
}

impl Event {
    pub(crate) fn new(connection: Connection, message: Message) -> Self {
        Self {
            connection,
            message,
        }
    }

    /// Check if this is a text message
    #[inline]
    pub fn is_text(&self) -> bool {
        self.message.is_text()
    }

    /// Check if this is a binary message
    #[inline]
    pub fn is_binary(&self) -> bool {
        self.message.is_binary()
    }

    /// Text payload (None for binary messages)
    pub fn text(&self) -> Option<&str> {
        self.message.as_text()
    }

    /// Raw payload
    pub fn data(&self) -> &Bytes {
        self.message.as_bytes()
    }

    /// The whole message
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Connection the message arrived on
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Queue a text reply
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.connection.send_text(text)
    }

    /// Queue a binary reply
    pub fn send_binary(&self, data: impl Into<Bytes>) -> Result<()> {
        self.connection.send_binary(data)
    }

    /// Start a multi-part binary reply
    pub fn binary(&self) -> BinaryBuilder {
        self.connection.binary()
    }

    /// Complete a result token
    pub fn complete(&self, token: impl Into<Token>) {
        self.connection.complete(token);
    }

    /// Store a value on the connection
    pub fn store<T>(&self, key: impl Into<String>, value: T)
    where
        T: Any + Send + Sync,
    {
        self.connection.store(key, value);
    }

    /// Fetch a value stored on the connection
    pub fn get<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.connection.get(key)
    }

    /// Close the connection
    pub fn close(&self) {
        self.connection.close();
    }
}

/// Builder for one binary frame made of several parts
///
/// Parts are written in the order they are added. Stream parts are read
/// when the frame is written, so large uploads are never buffered whole.
///
/// ```ignore
/// conn.binary()
///     .byte(0x01)
///     .text("thread-42")
///     .stream(file, file_len)
///     .send()?;
/// ```
#[must_use = "a binary builder does nothing until `send` is called"]
pub struct BinaryBuilder {
    shared: Arc<Shared>,
    parts: BinaryParts,
}

impl BinaryBuilder {
    /// Append raw bytes
    pub fn bytes(mut self, bytes: impl Into<Bytes>) -> Self {
        self.parts.push_bytes(bytes);
        self
    }

    /// Append the low 8 bits of `value` as one byte
    pub fn byte(mut self, value: u32) -> Self {
        self.parts.push_byte(value);
        self
    }

    /// Append a string as UTF-8
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.parts.push_text(text);
        self
    }

    /// Append exactly `len` bytes read from `reader` at write time
    ///
    /// If the reader ends early the connection faults.
    pub fn stream<R>(mut self, reader: R, len: u64) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        self.parts.push_reader(Box::new(reader), len);
        self
    }

    /// Payload length so far
    pub fn len(&self) -> u64 {
        self.parts.len()
    }

    /// Check if no parts were added
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Queue the frame
    pub fn send(self) -> Result<()> {
        self.shared.send(self.parts.into_frame())
    }
}

impl fmt::Debug for BinaryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinaryBuilder")
            .field("parts", &self.parts)
            .finish_non_exhaustive()
    }
}
