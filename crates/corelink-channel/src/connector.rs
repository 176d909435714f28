//! ---
//! cl_section: "04-liveness-channel"
//! cl_subsection: "module"
//! cl_type: "source"
//! cl_scope: "code"
//! cl_description: "Connection lifecycle and keepalive for the core process."
//! cl_version: "v0.0.0-prealpha"
//! cl_owner: "tbd"
//! ---
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Opens the byte stream the channel runs on.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Duplex stream produced by a successful dial.
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Dial the endpoint once.
    async fn connect(&self, endpoint: SocketAddr) -> io::Result<Self::Stream>;
}

/// Plain TCP to a loopback endpoint.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    timeout: Duration,
}

impl TcpConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self, endpoint: SocketAddr) -> io::Result<TcpStream> {
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(endpoint))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}
