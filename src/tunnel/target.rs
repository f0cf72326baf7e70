//! Connections from the tunnel server to its target socket.

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::tunnel::error::TunnelError;

/// Opens the socket that tunnel sessions shuttle bytes to.
pub trait TargetConnection: Send + Sync + 'static {
    /// Open a new connection, giving up after `timeout`.
    fn open(&self, timeout: Duration) -> impl Future<Output = io::Result<TcpStream>> + Send;
}

/// Supplies the target port at connection time.
pub trait PortProvider: Send + Sync + 'static {
    fn port(&self) -> u16;
}

/// A fixed target port.
#[derive(Debug, Clone, Copy)]
pub struct StaticPortProvider {
    port: u16,
}

impl StaticPortProvider {
    pub fn new(port: u16) -> Result<Self, TunnelError> {
        if port == 0 {
            return Err(TunnelError::InvalidPort);
        }
        Ok(Self { port })
    }
}

impl PortProvider for StaticPortProvider {
    fn port(&self) -> u16 {
        self.port
    }
}

/// TCP connection to `host:port`.
#[derive(Debug, Clone)]
pub struct SocketTargetConnection<P> {
    host: String,
    port_provider: P,
}

impl<P: PortProvider> SocketTargetConnection<P> {
    pub fn new(host: impl Into<String>, port_provider: P) -> Self {
        Self {
            host: host.into(),
            port_provider,
        }
    }
}

impl<P: PortProvider> TargetConnection for SocketTargetConnection<P> {
    async fn open(&self, timeout: Duration) -> io::Result<TcpStream> {
        let port = self.port_provider.port();
        tracing::debug!(host = %self.host, port, "Opening tunnel target connection");

        let stream = match tokio::time::timeout(timeout, TcpStream::connect((self.host.as_str(), port))).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("Timed out connecting to {}:{}", self.host, port),
                ))
            }
        };
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}
