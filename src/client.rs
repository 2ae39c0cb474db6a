//! WebSocket client
//!
//! [`WebSocketClient`] carries the configuration and the collaborators
//! (socket connector, site context) shared by every connection it opens.
//! Each `connect*` call performs the handshake and starts the workers.

use std::fmt;
use std::sync::Arc;

use url::Url;

use crate::Config;
use crate::connection::{Connection, Handler};
use crate::connector::{Connector, TcpConnector};
use crate::error::{Error, Result};
use crate::handshake::{HandshakeRequest, negotiate};
use crate::site::{NoSite, SiteContext};
use crate::worker;

/// WebSocket client
///
/// # Example
///
/// ```ignore
/// use boardws::{Config, Event, HandlerResult, WebSocketClient};
///
/// let client = WebSocketClient::new(Config::default());
/// let conn = client
///     .connect_to_url("wss://boards.example.com/live", |event: &Event| -> HandlerResult {
///         if let Some(text) = event.text() {
///             println!("{text}");
///         }
///         Ok(())
///     })
///     .await?;
/// conn.send_text("subscribe b")?;
/// ```
#[derive(Clone)]
pub struct WebSocketClient {
    config: Config,
    connector: Arc<dyn Connector>,
    site: Arc<dyn SiteContext>,
    headers: Vec<(String, String)>,
    protocols: Vec<String>,
}

impl WebSocketClient {
    /// Create a client with the given configuration
    pub fn new(config: Config) -> Self {
        Self {
            config,
            connector: Arc::new(TcpConnector::new()),
            site: Arc::new(NoSite),
            headers: Vec::new(),
            protocols: Vec::new(),
        }
    }

    /// Create a client with default configuration
    pub fn default_config() -> Self {
        Self::new(Config::default())
    }

    /// Get the client configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Open sockets through `connector` instead of plain TCP/TLS
    pub fn with_connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    /// Take site names, cookies and user agents from `site`
    pub fn with_site(mut self, site: impl SiteContext + 'static) -> Self {
        self.site = Arc::new(site);
        self
    }

    /// Add a request header sent with every handshake
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Request a subprotocol
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    /// Connect to a ws, wss, http or https URL
    pub async fn connect_to_url<H: Handler>(&self, url: &str, handler: H) -> Result<Connection> {
        let url = Url::parse(url).map_err(|e| Error::InvalidUrl(format!("{url}: {e}")))?;
        self.connect(url, handler).await
    }

    /// Connect to `url`, delivering every message to `handler`
    ///
    /// Returns once the handshake has completed and the workers are
    /// running. Handshake failures are returned directly; no frame is read
    /// or written in that case.
    pub async fn connect<H: Handler>(&self, url: Url, handler: H) -> Result<Connection> {
        let request = HandshakeRequest {
            url,
            headers: self.headers.clone(),
            protocols: self.protocols.clone(),
        };

        let handshake = negotiate(
            &request,
            &self.config,
            self.connector.as_ref(),
            self.site.as_ref(),
        )
        .await?;

        let shared = worker::spawn(handshake, &self.config, handler);
        Ok(Connection::from_shared(shared))
    }
}

impl Default for WebSocketClient {
    fn default() -> Self {
        Self::default_config()
    }
}

impl fmt::Debug for WebSocketClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketClient")
            .field("config", &self.config)
            .field("headers", &self.headers)
            .field("protocols", &self.protocols)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use bytes::Bytes;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::sync::oneshot;

    use super::*;
    use crate::connection::{Event, HandlerResult};
    use crate::error::CloseReason;
    use crate::frame::{Frame, OpCode};
    use crate::state::Token;
    use crate::testing::{MockConnector, accept_upgrade, read_request, recv_frame, respond, send_frame};

    const WAIT: Duration = Duration::from_secs(5);

    /// Client whose server side runs `serve` after accepting the upgrade
    fn client_with<F, Fut>(serve: F) -> WebSocketClient
    where
        F: Fn(DuplexStream) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        client_with_config(Config::default(), serve)
    }

    fn client_with_config<F, Fut>(config: Config, serve: F) -> WebSocketClient
    where
        F: Fn(DuplexStream) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let serve = Arc::new(serve);
        let connector = MockConnector::new(move |_, mut server| {
            let serve = serve.clone();
            async move {
                let (_, key) = read_request(&mut server).await;
                accept_upgrade(&mut server, &key, None).await;
                serve(server).await;
            }
        });
        WebSocketClient::new(config).with_connector(connector)
    }

    fn ignore() -> impl Handler {
        |_: &Event| -> HandlerResult { Ok(()) }
    }

    async fn wait(conn: &Connection, token: &'static str) -> Result<Option<Token>> {
        tokio::time::timeout(WAIT, conn.wait_for(&[Token::from(token)]))
            .await
            .expect("wait_for timed out")
    }

    #[tokio::test]
    async fn test_ping_answered_without_dispatch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = oneshot::channel();
        let done_tx = Arc::new(parking_lot::Mutex::new(Some(done_tx)));

        let client = client_with(move |mut server| {
            let done_tx = done_tx.clone();
            async move {
                send_frame(&mut server, OpCode::Ping, b"are-you-there", true).await;
                let pong = recv_frame(&mut server).await;
                send_frame(&mut server, OpCode::Text, b"after", true).await;
                // Whatever follows the pong must be the caller's close
                let next = recv_frame(&mut server).await;
                if let Some(tx) = done_tx.lock().take() {
                    let _ = tx.send((pong, next));
                }
            }
        });

        let seen = calls.clone();
        let conn = client
            .connect_to_url("ws://example.com/", move |event: &Event| -> HandlerResult {
                seen.fetch_add(1, Ordering::SeqCst);
                assert_eq!(event.text(), Some("after"));
                event.complete("after");
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(wait(&conn, "after").await.unwrap(), Some(Token::from("after")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        conn.close();

        let (pong, next): (Frame, Frame) = tokio::time::timeout(WAIT, done_rx).await.unwrap().unwrap();
        assert_eq!(pong.opcode, OpCode::Pong);
        assert_eq!(pong.payload.as_ref(), b"are-you-there");
        assert_eq!(next.opcode, OpCode::Close);
        assert_eq!(next.payload.as_ref(), &CloseReason::NORMAL.to_be_bytes());
    }

    #[tokio::test]
    async fn test_close_drops_socket_when_peer_stops_reading() {
        let (server_tx, server_rx) = oneshot::channel();
        let server_tx = Arc::new(parking_lot::Mutex::new(Some(server_tx)));

        let config = Config::builder()
            .close_timeout(Duration::from_millis(50))
            .build();
        let client = client_with_config(config, move |server| {
            let server_tx = server_tx.clone();
            async move {
                // Hand the stream out without ever reading from it
                if let Some(tx) = server_tx.lock().take() {
                    let _ = tx.send(server);
                }
            }
        });

        let conn = client.connect_to_url("ws://example.com/", ignore()).await.unwrap();
        let mut server: DuplexStream = tokio::time::timeout(WAIT, server_rx).await.unwrap().unwrap();

        // Far more than the pipe buffers, so the writer stalls mid-frame
        conn.send_binary(Bytes::from(vec![0u8; 1024 * 1024])).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        conn.close();
        assert!(!conn.is_open());

        tokio::time::sleep(Duration::from_millis(300)).await;
        let write = server.write_all(b"still there?").await;
        assert_eq!(write.unwrap_err().kind(), std::io::ErrorKind::BrokenPipe);
        assert!(conn.error().is_none());
    }

    #[tokio::test]
    async fn test_fragmented_message_dispatched_once() {
        let client = client_with(|mut server| async move {
            send_frame(&mut server, OpCode::Binary, b"one-", false).await;
            send_frame(&mut server, OpCode::Ping, b"", true).await;
            send_frame(&mut server, OpCode::Continuation, b"two-", false).await;
            send_frame(&mut server, OpCode::Continuation, b"three", true).await;
            let mut rest = Vec::new();
            let _ = server.read_to_end(&mut rest).await;
        });

        let messages = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = messages.clone();
        let conn = client
            .connect_to_url("ws://example.com/", move |event: &Event| -> HandlerResult {
                sink.lock().push((event.is_binary(), event.data().clone()));
                event.complete("message");
                Ok(())
            })
            .await
            .unwrap();

        assert!(wait(&conn, "message").await.unwrap().is_some());
        assert_eq!(
            messages.lock().as_slice(),
            &[(true, Bytes::from_static(b"one-two-three"))]
        );
        conn.close();
    }

    #[tokio::test]
    async fn test_handler_error_releases_waiters() {
        let client = client_with(|mut server| async move {
            send_frame(&mut server, OpCode::Text, b"bad", true).await;
            // Close frame with 1011 follows the fault
            let close = recv_frame(&mut server).await;
            assert_eq!(close.parse_close().map(|r| r.code), Some(CloseReason::INTERNAL));
        });

        let conn = client
            .connect_to_url("ws://example.com/", |_: &Event| -> HandlerResult {
                Err("cannot parse board update".into())
            })
            .await
            .unwrap();

        let result = wait(&conn, "never").await;
        match result {
            Err(Error::Fault(e)) => {
                assert!(matches!(&*e, Error::Handler(msg) if msg.contains("cannot parse")));
            }
            other => panic!("expected handler fault, got {other:?}"),
        }
        assert!(!conn.is_open());
        assert!(matches!(conn.send_text("x"), Err(Error::Fault(_))));
    }

    #[tokio::test]
    async fn test_handler_panic_releases_waiters() {
        let client = client_with(|mut server| async move {
            send_frame(&mut server, OpCode::Text, b"boom", true).await;
            let mut rest = Vec::new();
            let _ = server.read_to_end(&mut rest).await;
        });

        let conn = client
            .connect_to_url("ws://example.com/", |_: &Event| -> HandlerResult {
                panic!("handler exploded");
            })
            .await
            .unwrap();

        let result = wait(&conn, "never").await;
        assert!(matches!(
            result,
            Err(Error::Fault(e)) if matches!(&*e, Error::Handler(msg) if msg.contains("handler exploded"))
        ));
    }

    #[tokio::test]
    async fn test_peer_close_is_orderly() {
        let client = client_with(|mut server| async move {
            send_frame(&mut server, OpCode::Text, b"last", true).await;
            let mut payload = 1001u16.to_be_bytes().to_vec();
            payload.extend_from_slice(b"maintenance");
            send_frame(&mut server, OpCode::Close, &payload, true).await;

            // Close is echoed with the same code
            let echo = recv_frame(&mut server).await;
            assert_eq!(echo.opcode, OpCode::Close);
            assert_eq!(echo.parse_close().map(|r| r.code), Some(1001));
        });

        let conn = client
            .connect_to_url("ws://example.com/", |event: &Event| -> HandlerResult {
                event.store("last", event.text().unwrap_or_default().to_string());
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(wait(&conn, "never").await.unwrap(), None);
        assert_eq!(conn.get::<String>("last").as_deref().map(String::as_str), Some("last"));
        assert_eq!(conn.close_reason(), Some(CloseReason::new(1001, "maintenance")));
        assert!(conn.error().is_none());
        assert!(matches!(conn.send_text("late"), Err(Error::Closed(Some(_)))));
    }

    #[tokio::test]
    async fn test_multi_part_binary_streams_in_order() {
        let (frame_tx, frame_rx) = oneshot::channel();
        let frame_tx = Arc::new(parking_lot::Mutex::new(Some(frame_tx)));

        let client = client_with(move |mut server| {
            let frame_tx = frame_tx.clone();
            async move {
                let frame = recv_frame(&mut server).await;
                if let Some(tx) = frame_tx.lock().take() {
                    let _ = tx.send(frame);
                }
                let mut rest = Vec::new();
                let _ = server.read_to_end(&mut rest).await;
            }
        });

        let conn = client.connect_to_url("ws://example.com/", ignore()).await.unwrap();
        let upload: &'static [u8] = b"0123456789abcdef";
        conn.binary()
            .byte(0x102)
            .text("post:")
            .stream(upload, 10)
            .bytes(Bytes::from_static(b"|end"))
            .send()
            .unwrap();

        let frame = tokio::time::timeout(WAIT, frame_rx).await.unwrap().unwrap();
        assert_eq!(frame.opcode, OpCode::Binary);
        assert!(frame.fin);
        assert_eq!(frame.payload.as_ref(), b"\x02post:0123456789|end");
        conn.close();
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let client = client_with(|mut server| async move {
            let close = recv_frame(&mut server).await;
            assert_eq!(close.parse_close().map(|r| r.code), Some(CloseReason::NORMAL));
        });

        let conn = client.connect_to_url("ws://example.com/", ignore()).await.unwrap();
        assert!(conn.is_open());
        conn.close();
        conn.close();

        assert!(!conn.is_open());
        assert!(matches!(conn.send_text("x"), Err(Error::ConnectionClosed)));
        assert!(matches!(conn.send_ping(&b"x"[..]), Err(Error::ConnectionClosed)));
        assert!(conn.binary().text("x").send().is_err());
        assert_eq!(wait(&conn, "never").await.unwrap(), None);
        assert!(conn.error().is_none());
    }

    #[tokio::test]
    async fn test_handler_replies_through_event() {
        let (reply_tx, reply_rx) = oneshot::channel();
        let reply_tx = Arc::new(parking_lot::Mutex::new(Some(reply_tx)));

        let client = client_with(move |mut server| {
            let reply_tx = reply_tx.clone();
            async move {
                send_frame(&mut server, OpCode::Text, b"hello", true).await;
                let reply = recv_frame(&mut server).await;
                if let Some(tx) = reply_tx.lock().take() {
                    let _ = tx.send(reply);
                }
                let mut rest = Vec::new();
                let _ = server.read_to_end(&mut rest).await;
            }
        });

        let conn = client
            .connect_to_url("ws://example.com/", |event: &Event| -> HandlerResult {
                event.send_text(format!("echo:{}", event.text().unwrap_or_default()))?;
                Ok(())
            })
            .await
            .unwrap();

        let reply = tokio::time::timeout(WAIT, reply_rx).await.unwrap().unwrap();
        assert_eq!(reply.opcode, OpCode::Text);
        assert_eq!(reply.payload.as_ref(), b"echo:hello");
        conn.close();
    }

    #[tokio::test]
    async fn test_protocol_error_faults_connection() {
        let client = client_with(|mut server| async move {
            send_frame(&mut server, OpCode::Continuation, b"orphan", true).await;
            let close = recv_frame(&mut server).await;
            assert_eq!(close.parse_close().map(|r| r.code), Some(CloseReason::PROTOCOL_ERROR));
        });

        let conn = client.connect_to_url("ws://example.com/", ignore()).await.unwrap();
        let result = wait(&conn, "never").await;
        assert!(matches!(result, Err(Error::Fault(e)) if matches!(&*e, Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_wrong_accept_key_never_dispatches() {
        let calls = Arc::new(AtomicUsize::new(0));
        let connector = MockConnector::new(|_, mut server| async move {
            let _ = read_request(&mut server).await;
            respond(
                &mut server,
                "HTTP/1.1 101 Switching Protocols\r\n\
                 Upgrade: websocket\r\n\
                 Connection: Upgrade\r\n\
                 Sec-WebSocket-Accept: bm90LXRoZS1yaWdodC1rZXk=\r\n\r\n",
            )
            .await;
            send_frame(&mut server, OpCode::Text, b"should not arrive", true).await;
        });

        let seen = calls.clone();
        let result = WebSocketClient::default_config()
            .with_connector(connector)
            .connect_to_url("ws://example.com/", move |_: &Event| -> HandlerResult {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(Error::AcceptMismatch)));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let result = WebSocketClient::default_config()
            .connect_to_url("not a url", ignore())
            .await;
        assert!(matches!(result, Err(Error::InvalidUrl(_))));
    }
}
