//! # Transport
//!
//! The byte-stream contract the protocol engine runs on, plus the built-in
//! TCP/TLS transport.
//!
//! The engine never touches sockets directly: it consumes a transport through
//! a minimal capability surface — write bytes, read exactly N bytes, read a
//! CRLF-terminated line, shut down. Any reliable ordered stream can back a
//! connection by implementing [`Transport`] (and [`Connect`] to produce one),
//! which is how the test suite drives the engine over scripted in-memory
//! streams.
//!
//! Reading and writing are split into separate halves so that a receive loop
//! blocked on inbound frames never prevents concurrent sends; the WebSocket
//! stream is full-duplex.

use std::{io, sync::Arc};

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
};
use tokio_rustls::{
    client::TlsStream,
    rustls::{self, pki_types::ServerName},
    TlsConnector,
};

/// Inbound half of a transport.
#[async_trait]
pub trait TransportReader: Send {
    /// Fills `buf` completely or fails. A short read is an error
    /// (`io::ErrorKind::UnexpectedEof`).
    async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()>;

    /// Reads one line up to CRLF, returning it without the terminator.
    /// An empty string is the blank line ending an HTTP header block.
    async fn read_line(&mut self) -> io::Result<String>;
}

/// Outbound half of a transport.
#[async_trait]
pub trait TransportWriter: Send {
    /// Writes the whole buffer or fails.
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Shuts down the outbound side, signalling end-of-stream to the peer.
    async fn shutdown(&mut self) -> io::Result<()>;
}

/// A full-duplex byte stream a WebSocket connection can run on.
pub trait Transport: Send {
    /// Whether the stream is TLS-protected.
    fn is_secure(&self) -> bool;

    /// Consumes the transport, yielding independently owned halves.
    fn split(self: Box<Self>) -> (Box<dyn TransportReader>, Box<dyn TransportWriter>);
}

/// Capability to establish transports; the connection state machine calls
/// this exactly once per `connect`.
#[async_trait]
pub trait Connect: Send + Sync {
    /// Opens a transport to `host:port`, TLS-wrapped when `secure` is set.
    async fn connect(&self, host: &str, port: u16, secure: bool) -> io::Result<Box<dyn Transport>>;
}

// ================== TCP / TLS ====================

/// A plain or TLS-wrapped TCP stream.
pub(crate) enum MaybeTlsStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => std::pin::Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => std::pin::Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => std::pin::Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => std::pin::Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => std::pin::Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => std::pin::Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => std::pin::Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => std::pin::Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

/// The built-in transport over tokio TCP, optionally TLS-wrapped.
pub struct TcpTransport {
    stream: MaybeTlsStream,
}

impl Transport for TcpTransport {
    fn is_secure(&self) -> bool {
        matches!(self.stream, MaybeTlsStream::Tls(_))
    }

    fn split(self: Box<Self>) -> (Box<dyn TransportReader>, Box<dyn TransportWriter>) {
        let (read, write) = tokio::io::split(self.stream);
        (
            Box::new(StreamReader {
                inner: BufReader::new(read),
            }),
            Box::new(StreamWriter { inner: write }),
        )
    }
}

/// [`TransportReader`] over any buffered tokio reader.
struct StreamReader<R> {
    inner: BufReader<R>,
}

#[async_trait]
impl<R> TransportReader for StreamReader<R>
where
    R: AsyncRead + Send + Unpin,
{
    async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.inner.read_exact(buf).await.map(|_| ())
    }

    async fn read_line(&mut self) -> io::Result<String> {
        let mut line = String::new();
        let read = self.inner.read_line(&mut line).await?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream closed while reading a header line",
            ));
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(line)
    }
}

/// [`TransportWriter`] over any tokio writer.
struct StreamWriter<W> {
    inner: W,
}

#[async_trait]
impl<W> TransportWriter for StreamWriter<W>
where
    W: AsyncWrite + Send + Unpin,
{
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.inner.write_all(buf).await?;
        self.inner.flush().await
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }
}

/// The default connector: tokio `TcpStream` with rustls for `wss`.
pub struct TcpConnector {
    tls: Option<TlsConnector>,
    no_delay: bool,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self {
            tls: None,
            no_delay: true,
        }
    }
}

impl TcpConnector {
    /// Creates a connector with the default TLS configuration
    /// (webpki roots, built lazily on first secure connect).
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a caller-provided TLS connector instead of the built-in
    /// webpki-roots configuration.
    pub fn with_tls_connector(connector: TlsConnector) -> Self {
        Self {
            tls: Some(connector),
            no_delay: true,
        }
    }
}

#[async_trait]
impl Connect for TcpConnector {
    async fn connect(&self, host: &str, port: u16, secure: bool) -> io::Result<Box<dyn Transport>> {
        let tcp_stream = TcpStream::connect((host, port)).await?;
        let _ = tcp_stream.set_nodelay(self.no_delay);

        let stream = if secure {
            let connector = self.tls.clone().unwrap_or_else(tls_connector);
            let domain = ServerName::try_from(host.to_string())
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid dnsname"))?;

            MaybeTlsStream::Tls(Box::new(connector.connect(domain, tcp_stream).await?))
        } else {
            MaybeTlsStream::Plain(tcp_stream)
        };

        Ok(Box::new(TcpTransport { stream }))
    }
}

/// Creates a TLS connector with the webpki root certificates.
fn tls_connector() -> TlsConnector {
    let mut root_cert_store = rustls::RootCertStore::empty();
    root_cert_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let provider = rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::ring::default_provider()));

    let mut config = rustls::ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(rustls::ALL_VERSIONS)
        .expect("versions")
        .with_root_certificates(root_cert_store)
        .with_no_client_auth();
    config.alpn_protocols = vec!["http/1.1".into()];

    TlsConnector::from(Arc::new(config))
}
