//! WebSocket handshake implementation
//!
//! Client side of the HTTP/1.1 upgrade:
//! - Open the socket through a [`Connector`]
//! - Write the upgrade request with a fresh `Sec-WebSocket-Key`
//! - Read the response head byte by byte, so nothing past the blank line
//!   is consumed before the socket turns into a frame stream
//! - Follow redirects within a budget and verify `Sec-WebSocket-Accept`

use base64::Engine;
use bytes::{BufMut, Bytes, BytesMut};
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use url::{Host, Url};

use crate::connector::{BoxedSocket, ConnectTarget, Connector, with_timeout};
use crate::error::{Error, Result};
use crate::mask::fill_random;
use crate::site::SiteContext;
use crate::{Config, WS_GUID};

/// Maximum HTTP response head size (8KB should be enough for any reasonable response)
const MAX_HEADER_SIZE: usize = 8192;

/// Headers the handshake always writes itself
fn is_reserved_header(name: &str) -> bool {
    name.eq_ignore_ascii_case("connection")
        || name.eq_ignore_ascii_case("upgrade")
        || name
            .get(..14)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("sec-websocket-"))
}

/// Statuses that send the client elsewhere
fn is_redirect(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

/// Scheme, host and port of a handshake target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// TLS required
    pub secure: bool,
    /// Host without IPv6 brackets
    pub host: String,
    /// Explicit or default port
    pub port: u16,
}

impl Endpoint {
    /// Resolve scheme and authority of `url`
    ///
    /// `ws`/`http` are plain with port 80, `wss`/`https` use TLS with port 443.
    pub fn resolve(url: &Url) -> Result<Self> {
        let (secure, default_port) = match url.scheme() {
            "ws" | "http" => (false, 80),
            "wss" | "https" => (true, 443),
            other => return Err(Error::UnsupportedScheme(other.to_string())),
        };

        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => return Err(Error::InvalidUrl(format!("missing host: {url}"))),
        };

        Ok(Self {
            secure,
            host,
            port: url.port().unwrap_or(default_port),
        })
    }

    fn default_port(&self) -> u16 {
        if self.secure { 443 } else { 80 }
    }

    /// Value for the Host header, port only when non-default
    pub fn host_header(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == self.default_port() {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }

    /// Value for a synthesized Origin header
    pub fn origin(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}", self.host_header())
    }
}

/// Caller input for a handshake
#[derive(Debug, Clone)]
pub struct HandshakeRequest {
    /// Target URL (ws, wss, http or https)
    pub url: Url,
    /// Extra request headers, in order
    pub headers: Vec<(String, String)>,
    /// Requested subprotocols
    pub protocols: Vec<String>,
}

impl HandshakeRequest {
    /// Create a request without extra headers or subprotocols
    pub fn new(url: Url) -> Self {
        Self {
            url,
            headers: Vec::new(),
            protocols: Vec::new(),
        }
    }

    fn caller_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Outcome of a successful handshake
pub struct Handshake {
    /// Upgraded socket, positioned at the first frame
    pub socket: BoxedSocket,
    /// URL after redirects
    pub url: Url,
    /// Subprotocol chosen by the server
    pub protocol: Option<String>,
}

impl std::fmt::Debug for Handshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handshake")
            .field("url", &self.url.as_str())
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

/// Generate the Sec-WebSocket-Accept key
///
/// This computes: Base64(SHA-1(key + GUID))
#[inline]
pub fn generate_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    let hash = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(hash)
}

/// Validate the server's accept key
pub fn validate_accept_key(sent_key: &str, received_accept: &str) -> bool {
    generate_accept_key(sent_key) == received_accept.trim()
}

/// Generate a random WebSocket key
pub fn generate_key() -> String {
    let mut bytes = [0u8; 16];
    fill_random(&mut bytes);
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn put_header(buf: &mut BytesMut, name: &str, value: &str) {
    buf.put_slice(name.as_bytes());
    buf.put_slice(b": ");
    buf.put_slice(value.as_bytes());
    buf.put_slice(b"\r\n");
}

/// Build the upgrade request
///
/// Caller `Host`, `Origin`, `User-Agent` and `Cookie` headers win over
/// synthesized ones. `Connection`, `Upgrade` and `Sec-WebSocket-*` from the
/// caller are dropped and written here.
pub fn build_request(
    request: &HandshakeRequest,
    url: &Url,
    endpoint: &Endpoint,
    key: &str,
    site: &dyn SiteContext,
) -> Bytes {
    let mut buf = BytesMut::with_capacity(512);

    let path = match url.query() {
        Some(query) => format!("{}?{query}", url.path()),
        None => url.path().to_string(),
    };
    buf.put_slice(b"GET ");
    buf.put_slice(path.as_bytes());
    buf.put_slice(b" HTTP/1.1\r\n");

    let host = request
        .caller_header("host")
        .map_or_else(|| endpoint.host_header(), str::to_owned);
    put_header(&mut buf, "Host", &host);
    put_header(&mut buf, "Upgrade", "websocket");
    put_header(&mut buf, "Connection", "Upgrade");
    put_header(&mut buf, "Sec-WebSocket-Key", key);
    put_header(&mut buf, "Sec-WebSocket-Version", "13");
    if !request.protocols.is_empty() {
        put_header(&mut buf, "Sec-WebSocket-Protocol", &request.protocols.join(", "));
    }

    let origin = request
        .caller_header("origin")
        .map_or_else(|| endpoint.origin(), str::to_owned);
    put_header(&mut buf, "Origin", &origin);

    let site_name = site.site_name(url);
    let user_agent = request
        .caller_header("user-agent")
        .map(str::to_owned)
        .or_else(|| site.user_agent(site_name.as_deref()));
    if let Some(user_agent) = user_agent {
        put_header(&mut buf, "User-Agent", &user_agent);
    }
    let cookie = request
        .caller_header("cookie")
        .map(str::to_owned)
        .or_else(|| site.cookie_header(site_name.as_deref(), url));
    if let Some(cookie) = cookie {
        put_header(&mut buf, "Cookie", &cookie);
    }

    for (name, value) in &request.headers {
        let written = ["host", "origin", "user-agent", "cookie"]
            .iter()
            .any(|h| name.eq_ignore_ascii_case(h));
        if !written && !is_reserved_header(name) {
            put_header(&mut buf, name, value);
        }
    }

    buf.put_slice(b"\r\n");
    buf.freeze()
}

/// Parsed HTTP response head
#[derive(Debug, Clone)]
pub struct ResponseHead {
    /// Status code
    pub status: u16,
    /// Reason phrase
    pub reason: String,
    /// Headers in arrival order
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    /// First header named `name`, case-insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Parse a complete response head
pub fn parse_response(buf: &[u8]) -> Result<ResponseHead> {
    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut res = httparse::Response::new(&mut headers);

    match res.parse(buf) {
        Ok(httparse::Status::Complete(_)) => {
            let status = res.code.ok_or(Error::InvalidHttp("missing status code"))?;
            let reason = res.reason.unwrap_or_default().to_string();
            let headers = res
                .headers
                .iter()
                .map(|h| {
                    let value = std::str::from_utf8(h.value)
                        .map_err(|_| Error::InvalidHttp("invalid header value"))?;
                    Ok((h.name.to_string(), value.trim().to_string()))
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(ResponseHead {
                status,
                reason,
                headers,
            })
        }
        Ok(httparse::Status::Partial) => Err(Error::InvalidHttp("incomplete response head")),
        Err(_) => Err(Error::InvalidHttp("failed to parse HTTP response")),
    }
}

/// Read the response head one byte at a time, up to the blank line
pub async fn read_response_head<S>(socket: &mut S) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut head = Vec::with_capacity(512);
    let mut byte = [0u8; 1];

    loop {
        if socket.read(&mut byte).await? == 0 {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed during handshake",
            )));
        }
        head.push(byte[0]);

        if head.ends_with(b"\r\n\r\n") || head.ends_with(b"\n\n") {
            return Ok(head);
        }
        if head.len() > MAX_HEADER_SIZE {
            return Err(Error::InvalidHttp("response too large"));
        }
    }
}

enum Step {
    Upgraded(Handshake),
    Redirect(Url),
}

/// Perform the client handshake, following redirects
pub async fn negotiate(
    request: &HandshakeRequest,
    config: &Config,
    connector: &dyn Connector,
    site: &dyn SiteContext,
) -> Result<Handshake> {
    let mut url = request.url.clone();
    let mut remaining = config.max_redirects;

    loop {
        match attempt(request, &url, config, connector, site).await? {
            Step::Upgraded(handshake) => return Ok(handshake),
            Step::Redirect(next) => {
                if remaining == 0 {
                    return Err(Error::TooManyRedirects(config.max_redirects));
                }
                remaining -= 1;

                let from = Endpoint::resolve(&url)?;
                let to = Endpoint::resolve(&next)?;
                if from.secure && !to.secure && config.verify_certificate {
                    return Err(Error::UnsafeRedirect {
                        from: url.to_string(),
                        to: next.to_string(),
                    });
                }

                tracing::debug!(from = %url, to = %next, "following handshake redirect");
                url = next;
            }
        }
    }
}

/// One connect + upgrade exchange against `url`
async fn attempt(
    request: &HandshakeRequest,
    url: &Url,
    config: &Config,
    connector: &dyn Connector,
    site: &dyn SiteContext,
) -> Result<Step> {
    let endpoint = Endpoint::resolve(url)?;
    let target = ConnectTarget {
        host: endpoint.host.clone(),
        port: endpoint.port,
        secure: endpoint.secure,
        verify_certificate: config.verify_certificate,
        connect_timeout: config.connect_timeout,
        read_timeout: config.read_timeout,
    };

    let mut socket = connector.connect(&target).await?;

    let key = generate_key();
    let head = build_request(request, url, &endpoint, &key, site);
    socket.write_all(&head).await?;
    socket.flush().await?;

    let raw = with_timeout(
        config.read_timeout,
        "handshake response",
        read_response_head(&mut socket),
    )
    .await?;
    let response = parse_response(&raw)?;
    tracing::trace!(status = response.status, url = %url, "handshake response");

    if is_redirect(response.status) {
        let location = response
            .header("location")
            .ok_or(Error::HandshakeFailed("redirect without Location"))?;
        let next = url
            .join(location)
            .map_err(|e| Error::InvalidUrl(format!("{location}: {e}")))?;
        // Dropping the socket closes it before the next hop
        return Ok(Step::Redirect(next));
    }

    if response.status != 101 {
        return Err(Error::HandshakeStatus {
            code: response.status,
            reason: response.reason,
        });
    }

    let accept = response
        .header("sec-websocket-accept")
        .ok_or(Error::HandshakeFailed("missing Sec-WebSocket-Accept"))?;
    if !validate_accept_key(&key, accept) {
        return Err(Error::AcceptMismatch);
    }

    let protocol = response
        .header("sec-websocket-protocol")
        .filter(|p| !p.is_empty())
        .map(str::to_owned);

    tracing::debug!(url = %url, protocol = ?protocol, "websocket upgraded");
    Ok(Step::Upgraded(Handshake {
        socket,
        url: url.clone(),
        protocol,
    }))
}
