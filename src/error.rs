//! Error types for the WebSocket client

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Result type alias for WebSocket operations
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error returned by a connection [`Handler`](crate::Handler)
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// WebSocket error types
#[derive(Debug, Error)]
pub enum Error {
    // -- configuration --
    /// URL could not be parsed or has no host
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    /// URL scheme is not ws, wss, http or https
    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    // -- handshake --
    /// Malformed HTTP response
    #[error("Invalid HTTP: {0}")]
    InvalidHttp(&'static str),
    /// Server answered the upgrade with something other than 101
    #[error("Handshake failed with status {code} {reason}")]
    HandshakeStatus { code: u16, reason: String },
    /// Server accept key does not match the request key
    #[error("Handshake failed: Sec-WebSocket-Accept mismatch")]
    AcceptMismatch,
    /// Redirect from wss to ws while certificates are verified
    #[error("Handshake failed: refusing redirect from {from} to {to}")]
    UnsafeRedirect { from: String, to: String },
    /// Redirect budget exhausted
    #[error("Handshake failed: too many redirects ({0})")]
    TooManyRedirects(usize),
    /// Other handshake failure
    #[error("Handshake failed: {0}")]
    HandshakeFailed(&'static str),
    /// TLS setup or server name failure
    #[error("TLS error: {0}")]
    Tls(String),

    // -- transport --
    /// I/O error from the underlying socket
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Connect or handshake read timed out
    #[error("Timed out: {0}")]
    Timeout(&'static str),
    /// Frame exceeds the accepted size
    #[error("Frame too large")]
    FrameTooLarge,
    /// Reassembled message exceeds the accepted size
    #[error("Message too large")]
    MessageTooLarge,

    // -- protocol --
    /// Invalid WebSocket frame
    #[error("Invalid frame: {0}")]
    InvalidFrame(&'static str),
    /// Protocol violation
    #[error("Protocol error: {0}")]
    Protocol(&'static str),
    /// Invalid UTF-8 in text message
    #[error("Invalid UTF-8 in text message")]
    InvalidUtf8,

    // -- application --
    /// The connection handler returned an error or panicked
    #[error("Handler failed: {0}")]
    Handler(String),

    // -- lifecycle --
    /// Connection was closed locally
    #[error("Connection closed")]
    ConnectionClosed,
    /// Connection was closed by the peer
    #[error("{}", closed_message(.0))]
    Closed(Option<CloseReason>),
    /// A fault recorded earlier on this connection
    #[error("Connection faulted: {0}")]
    Fault(Arc<Error>),
}

fn closed_message(reason: &Option<CloseReason>) -> String {
    match reason {
        Some(r) => format!("Connection closed by peer: {} ({})", r.code, r.reason),
        None => "Connection closed by peer".to_string(),
    }
}

impl Error {
    /// True for an end-of-stream style I/O error
    pub fn is_eof(&self) -> bool {
        matches!(
            self,
            Error::Io(e) if matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            )
        )
    }

    /// True for errors produced by the HTTP upgrade exchange
    pub fn is_handshake(&self) -> bool {
        matches!(
            self,
            Error::InvalidHttp(_)
                | Error::HandshakeStatus { .. }
                | Error::AcceptMismatch
                | Error::UnsafeRedirect { .. }
                | Error::TooManyRedirects(_)
                | Error::HandshakeFailed(_)
                | Error::Tls(_)
        )
    }

    /// Close code to send the peer when this error ends a connection
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Error::Protocol(_) | Error::InvalidFrame(_) => Some(CloseReason::PROTOCOL_ERROR),
            Error::InvalidUtf8 => Some(CloseReason::INVALID_PAYLOAD),
            Error::FrameTooLarge | Error::MessageTooLarge => Some(CloseReason::TOO_BIG),
            Error::Handler(_) => Some(CloseReason::INTERNAL),
            _ => None,
        }
    }

    /// The recorded fault behind [`Error::Fault`], or `self`
    pub fn root(&self) -> &Error {
        match self {
            Error::Fault(inner) => inner.root(),
            other => other,
        }
    }
}

/// Close frame reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    /// Close status code
    pub code: u16,
    /// Optional reason string
    pub reason: String,
}

impl CloseReason {
    /// Normal closure
    pub const NORMAL: u16 = 1000;
    /// Going away (e.g., server shutdown)
    pub const GOING_AWAY: u16 = 1001;
    /// Protocol error
    pub const PROTOCOL_ERROR: u16 = 1002;
    /// No status received
    pub const NO_STATUS: u16 = 1005;
    /// Invalid frame payload
    pub const INVALID_PAYLOAD: u16 = 1007;
    /// Message too big
    pub const TOO_BIG: u16 = 1009;
    /// Internal error
    pub const INTERNAL: u16 = 1011;

    /// Create a new close reason
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}
