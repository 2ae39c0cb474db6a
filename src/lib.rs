//! # boardws: raw WebSocket client for imageboard backends
//!
//! An RFC 6455 client written directly against TCP/TLS sockets:
//! handshake with redirects, client-side masking, fragmentation and
//! control frames, with an event-driven connection API on top.
//!
//! ## Features
//!
//! - **Streaming writes**: multi-part binary frames are masked and written
//!   chunk by chunk, reader sources are never buffered whole
//! - **Event dispatch**: every complete message goes to one [`Handler`],
//!   which can reply, store data or complete result tokens
//! - **Pluggable sockets**: bring your own [`Connector`] (proxies, pinned
//!   resolvers) or use the default TCP + rustls one
//! - **Site identity**: cookies and user agent come from a [`SiteContext`]
//!
//! ## Example
//!
//! ```ignore
//! use boardws::prelude::*;
//!
//! let client = WebSocketClient::new(Config::default());
//! let conn = client
//!     .connect_to_url("wss://boards.example.com/live", |event: &Event| -> HandlerResult {
//!         if event.text() == Some("ready") {
//!             event.complete("ready");
//!         }
//!         Ok(())
//!     })
//!     .await?;
//!
//! conn.send_text("subscribe g")?;
//! conn.wait_for(&[Token::from("ready")]).await?;
//! conn.close();
//! ```

use std::time::Duration;

pub mod client;
pub mod connection;
pub mod connector;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod mask;
pub mod payload;
pub mod protocol;
pub mod site;

mod state;
mod worker;

#[cfg(test)]
mod testing;

pub use client::WebSocketClient;
pub use connection::{BinaryBuilder, Connection, Event, Handler, HandlerResult};
pub use connector::{BoxedSocket, ConnectTarget, Connector, Socket, TcpConnector};
pub use error::{BoxError, CloseReason, Error, Result};
pub use frame::{Frame, OpCode};
pub use protocol::Message;
pub use site::{NoSite, SiteContext, StaticSite};
pub use state::Token;

/// Default write buffer and payload chunk size (16KB)
pub const WRITE_BUFFER_SIZE: usize = 16 * 1024;

/// Maximum WebSocket frame header size (2 + 8 + 4 = 14 bytes)
pub const MAX_FRAME_HEADER_SIZE: usize = 14;

/// Small message threshold (<= 125 bytes uses the 7-bit length form)
pub const SMALL_MESSAGE_THRESHOLD: usize = 125;

/// Medium message threshold (< 64KB uses the 16-bit length form)
pub const MEDIUM_MESSAGE_THRESHOLD: usize = 65535;

/// WebSocket GUID for handshake
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Default redirect budget for the handshake
pub const DEFAULT_MAX_REDIRECTS: usize = 5;

/// Largest frame and message length accepted by default (2^31 - 1)
pub const MAX_PAYLOAD_LENGTH: usize = i32::MAX as usize;

/// Default time queued frames get to go out after close (250ms)
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_millis(250);

/// Configuration for WebSocket connections
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use boardws::Config;
///
/// let config = Config::builder()
///     .connect_timeout(Duration::from_secs(5))
///     .max_message_size(4 * 1024 * 1024)
///     .max_redirects(3)
///     .build();
/// assert_eq!(config.max_redirects, 3);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP connect plus TLS handshake limit (default: 10s)
    pub connect_timeout: Option<Duration>,
    /// Limit for reading the handshake response (default: 10s)
    pub read_timeout: Option<Duration>,
    /// Verify server certificates and host names (default: true)
    pub verify_certificate: bool,
    /// Redirects followed during the handshake (default: 5)
    pub max_redirects: usize,
    /// Maximum message size after reassembly (default: 2^31 - 1)
    pub max_message_size: usize,
    /// Maximum frame size (default: 2^31 - 1, the largest length the
    /// frame reader accepts at all)
    pub max_frame_size: usize,
    /// Write buffer size, also the masking chunk size (default: 16KB)
    pub write_buffer_size: usize,
    /// Time the writer gets to flush queued frames and the close frame
    /// once the connection is closing; the socket is dropped after that
    /// (default: 250ms)
    pub close_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect_timeout: Some(Duration::from_secs(10)),
            read_timeout: Some(Duration::from_secs(10)),
            verify_certificate: true,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            max_message_size: MAX_PAYLOAD_LENGTH,
            max_frame_size: MAX_PAYLOAD_LENGTH,
            write_buffer_size: WRITE_BUFFER_SIZE,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

/// Builder for WebSocket configuration
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Set the connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = Some(timeout);
        self
    }

    /// Set the handshake read timeout
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = Some(timeout);
        self
    }

    /// Disable both timeouts
    pub fn no_timeouts(mut self) -> Self {
        self.config.connect_timeout = None;
        self.config.read_timeout = None;
        self
    }

    /// Enable or disable certificate verification
    ///
    /// With verification off, wss to ws redirects are also followed.
    pub fn verify_certificate(mut self, verify: bool) -> Self {
        self.config.verify_certificate = verify;
        self
    }

    /// Set the handshake redirect budget
    pub fn max_redirects(mut self, redirects: usize) -> Self {
        self.config.max_redirects = redirects;
        self
    }

    /// Set maximum payload/message length for both frames and messages
    pub fn max_payload_length(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self.config.max_frame_size = size;
        self
    }

    /// Set maximum message size
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    /// Set maximum frame size
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set write buffer size
    pub fn write_buffer_size(mut self, size: usize) -> Self {
        self.config.write_buffer_size = size.max(1);
        self
    }

    /// Set the close grace for queued frames
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.config.close_timeout = timeout;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        BinaryBuilder, CloseReason, Config, Connection, Connector, Error, Event, Handler,
        HandlerResult, Message, Result, SiteContext, Token, WebSocketClient,
    };
}
