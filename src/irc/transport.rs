//! Connection establishment: plain TCP or TLS to the IRC server.
//!
//! The client framer works over a type-erased stream so tests can hand it an
//! in-memory duplex pipe instead of a socket.

use std::io;
use std::sync::Arc;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::info;

use crate::config::ServerConfig;

/// Combined async read+write trait for type-erased transport streams.
pub trait IrcTransport: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> IrcTransport for T {}

/// A connected stream suitable for framing with `IrcCodec`.
///
/// Both plain `TcpStream` and `TlsStream<TcpStream>` satisfy this type.
pub type IrcStream = Box<dyn IrcTransport>;

/// Connect to the configured server, wrapping the socket in TLS when asked.
pub async fn connect(server: &ServerConfig) -> io::Result<IrcStream> {
    let addr = format!("{}:{}", server.host, server.port);
    info!(host = %server.host, port = server.port, tls = server.tls, "transport: connecting to {addr}");
    let tcp = TcpStream::connect(&addr).await?;
    tcp.set_nodelay(true)?;

    if !server.tls {
        info!(host = %server.host, "transport: TCP connected");
        return Ok(Box::new(tcp));
    }

    let server_name = ServerName::try_from(server.host.clone())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let stream = tls_connector()?.connect(server_name, tcp).await?;
    info!(host = %server.host, "transport: TLS established");
    Ok(Box::new(stream))
}

/// TLS connector trusting the webpki root set.
fn tls_connector() -> io::Result<TlsConnector> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
    .with_root_certificates(roots)
    .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}
