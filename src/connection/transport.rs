//! Byte transport under a session: TCP, TLS over TCP, or a Unix socket

use crate::connection::{parse_server_name, TlsConfig};
use crate::{Error, Result};
use bytes::BytesMut;
use std::io;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};
use tokio_rustls::client::TlsStream;

/// Open byte stream to the server
pub enum Transport {
    /// Plain TCP
    Tcp(TcpStream),
    /// TCP after the SSL request and TLS handshake
    Tls(Box<TlsStream<TcpStream>>),
    /// Local Unix domain socket
    Unix(UnixStream),
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind())
    }
}

/// Runs `$body` with `$s` bound to whichever stream the transport holds
macro_rules! on_stream {
    ($transport:expr, $s:ident => $body:expr) => {
        match $transport {
            Transport::Tcp($s) => $body,
            Transport::Tls($s) => $body,
            Transport::Unix($s) => $body,
        }
    };
}

impl Transport {
    /// Connect over TCP, trying every resolved address in order
    ///
    /// The error of the last address is returned when none accepts.
    pub async fn connect_tcp(host: &str, port: u16) -> Result<Self> {
        let mut last_err = None;
        for addr in tokio::net::lookup_host((host, port)).await? {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    tracing::trace!(%addr, "tcp connected");
                    return Ok(Transport::Tcp(stream));
                }
                Err(e) => {
                    tracing::trace!(%addr, error = %e, "tcp connect failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{} resolved to no address", host),
                )
            })
            .into())
    }

    /// Connect to a local socket file
    pub async fn connect_unix(path: &Path) -> Result<Self> {
        Ok(Transport::Unix(UnixStream::connect(path).await?))
    }

    /// Switch a plain TCP transport to TLS once the SSL request is on the wire
    pub async fn upgrade_to_tls(self, tls: &TlsConfig, hostname: &str) -> Result<Self> {
        let stream = match self {
            Transport::Tcp(stream) => stream,
            Transport::Tls(_) => return Err(Error::Tls("transport is already TLS".into())),
            Transport::Unix(_) => {
                return Err(Error::Tls("TLS is not negotiated over a Unix socket".into()))
            }
        };
        let name = parse_server_name(hostname)?;
        let server_name = rustls_pki_types::ServerName::try_from(name.to_string())
            .map_err(|_| Error::Config(format!("invalid TLS server name: {}", hostname)))?;
        let connector = tokio_rustls::TlsConnector::from(tls.client_config());
        let stream = connector
            .connect(server_name, stream)
            .await
            .map_err(|e| Error::Tls(format!("TLS handshake failed: {}", e)))?;
        Ok(Transport::Tls(Box::new(stream)))
    }

    /// Write the whole buffer
    pub async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        on_stream!(self, s => s.write_all(buf).await?);
        Ok(())
    }

    /// Flush buffered writes (TLS records)
    pub async fn flush(&mut self) -> Result<()> {
        on_stream!(self, s => s.flush().await?);
        Ok(())
    }

    /// Append whatever is readable to `buf`; 0 means the peer closed
    pub async fn read_buf(&mut self, buf: &mut BytesMut) -> Result<usize> {
        Ok(on_stream!(self, s => s.read_buf(buf).await?))
    }

    /// Close the write side
    pub async fn shutdown(&mut self) -> Result<()> {
        on_stream!(self, s => s.shutdown().await?);
        Ok(())
    }

    /// Whether secrets may be sent in clear over this transport
    pub fn is_confidential(&self) -> bool {
        !matches!(self, Transport::Tcp(_))
    }

    /// Whether the stream is TLS-encrypted
    pub fn is_tls(&self) -> bool {
        matches!(self, Transport::Tls(_))
    }

    fn kind(&self) -> &'static str {
        match self {
            Transport::Tcp(_) => "Transport::Tcp",
            Transport::Tls(_) => "Transport::Tls",
            Transport::Unix(_) => "Transport::Unix",
        }
    }
}
