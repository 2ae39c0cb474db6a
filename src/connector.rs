//! Socket opening
//!
//! The handshake gets its byte stream from a [`Connector`]. The default
//! [`TcpConnector`] dials TCP with a timeout and layers rustls on top for
//! secure targets; applications with their own networking stack (proxies,
//! pinned resolvers) plug in their own implementation.

use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::crypto::{self, CryptoProvider};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{self, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

use crate::error::{Error, Result};

/// Byte stream a WebSocket runs over
pub trait Socket: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Socket for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Boxed socket returned by connectors
pub type BoxedSocket = Box<dyn Socket>;

/// Where and how to open a socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    /// Host name or IP literal (no brackets)
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Wrap the connection in TLS
    pub secure: bool,
    /// Verify the server certificate and host name
    pub verify_certificate: bool,
    /// Limit for TCP connect plus TLS handshake
    pub connect_timeout: Option<Duration>,
    /// Limit for each read during the HTTP handshake
    pub read_timeout: Option<Duration>,
}

/// Opens sockets for the handshake
pub trait Connector: Send + Sync {
    /// Open a connected (and, when `target.secure`, TLS-wrapped) socket
    fn connect<'a>(&'a self, target: &'a ConnectTarget) -> BoxFuture<'a, Result<BoxedSocket>>;
}

/// Run `fut` under an optional timeout
pub(crate) async fn with_timeout<T, F>(
    limit: Option<Duration>,
    what: &'static str,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::Timeout(what))?,
        None => fut.await,
    }
}

/// TCP connector with rustls for secure targets
#[derive(Default)]
pub struct TcpConnector {
    verified: OnceLock<Arc<ClientConfig>>,
    unverified: OnceLock<Arc<ClientConfig>>,
}

impl TcpConnector {
    /// Create a connector; TLS configs are built on first use
    pub fn new() -> Self {
        Self::default()
    }

    fn tls_config(&self, verify: bool) -> Result<Arc<ClientConfig>> {
        let cell = if verify {
            &self.verified
        } else {
            &self.unverified
        };
        if let Some(config) = cell.get() {
            return Ok(config.clone());
        }
        let config = Arc::new(build_tls_config(verify)?);
        Ok(cell.get_or_init(|| config).clone())
    }

    async fn open(&self, target: &ConnectTarget) -> Result<BoxedSocket> {
        let addr = (target.host.as_str(), target.port);
        let tcp = with_timeout(target.connect_timeout, "connect", async {
            TcpStream::connect(addr).await.map_err(Error::from)
        })
        .await?;
        tcp.set_nodelay(true)?;

        if !target.secure {
            tracing::trace!(host = %target.host, port = target.port, "tcp connected");
            return Ok(Box::new(tcp));
        }

        let config = self.tls_config(target.verify_certificate)?;
        let server_name = ServerName::try_from(target.host.clone())
            .map_err(|_| Error::Tls(format!("invalid server name: {}", target.host)))?;

        let tls = with_timeout(target.connect_timeout, "tls handshake", async {
            TlsConnector::from(config)
                .connect(server_name, tcp)
                .await
                .map_err(|e| Error::Tls(e.to_string()))
        })
        .await?;

        tracing::trace!(host = %target.host, port = target.port, "tls connected");
        Ok(Box::new(tls))
    }
}

impl Connector for TcpConnector {
    fn connect<'a>(&'a self, target: &'a ConnectTarget) -> BoxFuture<'a, Result<BoxedSocket>> {
        Box::pin(self.open(target))
    }
}

fn crypto_provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(crypto::ring::default_provider()))
}

/// Build a client TLS config, with or without certificate verification
fn build_tls_config(verify: bool) -> Result<ClientConfig> {
    let provider = crypto_provider();
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Tls(e.to_string()))?;

    let mut config = if verify {
        let roots = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        builder.with_root_certificates(roots).with_no_client_auth()
    } else {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
            .with_no_client_auth()
    };
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(config)
}

/// Verifier used when certificate checks are disabled
///
/// Signatures are still checked so the handshake itself stays sound.
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
