//! Connection to a training server: address parsing, TCP and TLS.

use std::{io, sync::Arc};

use comms::{OnoReceiver, OnoSender};
use log::{debug, info};
use rustls::{RootCertStore, pki_types::ServerName};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tokio_rustls::TlsConnector;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A training server address split into its host and port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
}

impl Target {
    /// Parses `scheme:///host:port`, `scheme://host:port` or a bare `host:port`.
    ///
    /// IPv6 hosts must be bracketed, `[::1]:8080`.
    pub fn parse(address: &str) -> io::Result<Self> {
        let authority = match address.split_once("://") {
            Some((_, rest)) => rest.trim_start_matches('/'),
            None => address,
        };
        let authority = authority.trim_end_matches('/');

        let invalid = || {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid server address {address:?}, expected scheme:///host:port"),
            )
        };

        let (host, port) = match authority.strip_prefix('[') {
            Some(rest) => {
                let (host, port) = rest.split_once("]:").ok_or_else(invalid)?;
                (host, port)
            }
            None => authority.rsplit_once(':').ok_or_else(invalid)?,
        };

        if host.is_empty() || host.contains(['/', '[', ']']) {
            return Err(invalid());
        }

        let port = port.parse().map_err(|_| invalid())?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

/// An open duplex connection to a training server.
pub struct Connection {
    pub(crate) rx: OnoReceiver<BoxedReader>,
    pub(crate) tx: OnoSender<BoxedWriter>,
    peer: String,
}

impl Connection {
    /// Opens a connection to `address`.
    ///
    /// # Arguments
    /// * `address` - The training server's address, e.g. `dns:///10.0.0.2:8080`.
    /// * `use_tls` - Whether to secure the connection with TLS.
    /// * `max_msg_size` - The largest frame accepted from the server.
    pub async fn connect(address: &str, use_tls: bool, max_msg_size: usize) -> io::Result<Self> {
        let target = Target::parse(address)?;
        let peer = format!("{}:{}", target.host, target.port);

        let stream = TcpStream::connect((target.host.as_str(), target.port)).await?;
        stream.set_nodelay(true)?;

        let (rx, tx): (BoxedReader, BoxedWriter) = if use_tls {
            let stream = tls_connector()
                .connect(server_name(&target.host)?, stream)
                .await?;
            let (rx, tx) = tokio::io::split(stream);
            (Box::new(rx), Box::new(tx))
        } else {
            let (rx, tx) = stream.into_split();
            (Box::new(rx), Box::new(tx))
        };

        info!("connected to training server {peer}, tls: {use_tls}");
        Ok(Self::from_parts(rx, tx, peer, max_msg_size))
    }

    /// Wraps an already open stream, used for in-memory channels.
    pub fn from_stream<S>(stream: S, peer: impl Into<String>, max_msg_size: usize) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (rx, tx) = tokio::io::split(stream);
        Self::from_parts(Box::new(rx), Box::new(tx), peer.into(), max_msg_size)
    }

    fn from_parts(rx: BoxedReader, tx: BoxedWriter, peer: String, max_msg_size: usize) -> Self {
        let (rx, tx) = comms::channel(rx, tx);
        Self {
            rx: rx.with_max_msg_size(max_msg_size),
            tx,
            peer,
        }
    }

    /// The peer this connection was opened to.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Shuts down the sending half, the server sees the stream as complete.
    pub async fn close(mut self) {
        if let Err(e) = self.tx.shutdown().await {
            debug!("shutting down connection to {}: {e}", self.peer);
        }
    }
}

fn tls_connector() -> TlsConnector {
    let roots = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    // SAFETY: The ring provider supports the default protocol versions.
    .unwrap()
    .with_root_certificates(roots)
    .with_no_client_auth();

    TlsConnector::from(Arc::new(config))
}

fn server_name(host: &str) -> io::Result<ServerName<'static>> {
    ServerName::try_from(host.to_string())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}
