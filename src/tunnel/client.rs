//! Local TCP side of the tunnel.
//!
//! # Responsibilities
//! - Listen on a local port for a debugger (or any TCP client)
//! - Copy socket reads into a tunnel channel and channel output back into the socket
//! - Notify listeners as local sockets open and close
//!
//! # Design Decisions
//! - One local socket at a time: the listener limit is one
//! - Reads are capped at [`BUFFER_SIZE`] so each payload stays bounded

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::net::connection::{ConnectionId, ConnectionTracker};
use crate::net::listener::{ConnectionPermit, Listener};
use crate::payload::BUFFER_SIZE;
use crate::tunnel::connection::HttpTunnelConnection;
use crate::tunnel::error::TunnelError;

/// How long `stop` waits for the active socket to wind down.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Callbacks for local socket lifecycle events.
pub trait TunnelClientListener: Send + Sync {
    fn on_open(&self, connection: ConnectionId, peer: SocketAddr);
    fn on_close(&self, connection: ConnectionId, peer: SocketAddr);
}

struct Running {
    port: u16,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Accepts local sockets and tunnels each over HTTP.
pub struct TunnelClient {
    listen_port: u16,
    connection: HttpTunnelConnection,
    listeners: Vec<Arc<dyn TunnelClientListener>>,
    tracker: ConnectionTracker,
    running: Option<Running>,
}

impl TunnelClient {
    /// `listen_port` 0 picks an ephemeral port.
    pub fn new(listen_port: u16, connection: HttpTunnelConnection) -> Self {
        Self {
            listen_port,
            connection,
            listeners: Vec::new(),
            tracker: ConnectionTracker::new(),
            running: None,
        }
    }

    pub fn add_listener(&mut self, listener: Arc<dyn TunnelClientListener>) {
        self.listeners.push(listener);
    }

    /// Bind the local port and start accepting. Returns the bound port.
    pub async fn start(&mut self) -> Result<u16, TunnelError> {
        if self.running.is_some() {
            return Err(TunnelError::AlreadyStarted);
        }
        let listener = Listener::bind(&format!("127.0.0.1:{}", self.listen_port), 1).await?;
        let port = listener.local_addr()?.port();
        tracing::info!(port, remote = %self.connection.uri(), "Listening for tunnel connections");

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(accept_loop(
            listener,
            self.connection.clone(),
            Arc::new(self.listeners.clone()),
            self.tracker.clone(),
            shutdown_rx,
        ));
        self.running = Some(Running { port, shutdown, task });
        Ok(port)
    }

    /// Port bound by `start`, if running.
    pub fn local_port(&self) -> Option<u16> {
        self.running.as_ref().map(|r| r.port)
    }

    /// Number of local sockets currently tunneled.
    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Stop accepting and close the active socket.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        tracing::info!(port = running.port, "Stopping tunnel client");
        running.shutdown.send_replace(true);
        if let Err(e) = running.task.await {
            tracing::warn!(error = %e, "Tunnel client accept loop failed");
        }
        if !self.tracker.wait_for_idle(STOP_TIMEOUT).await {
            tracing::warn!(active = self.tracker.active_count(), "Tunnel connections still open after stop");
        }
    }
}

async fn accept_loop(
    listener: Listener,
    connection: HttpTunnelConnection,
    listeners: Arc<Vec<Arc<dyn TunnelClientListener>>>,
    tracker: ConnectionTracker,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown.changed() => break,
        };
        match accepted {
            Ok((stream, peer, permit)) => {
                tokio::spawn(handle_connection(
                    stream,
                    peer,
                    permit,
                    connection.clone(),
                    Arc::clone(&listeners),
                    tracker.clone(),
                    shutdown.clone(),
                ));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Tunnel client stopped accepting");
                break;
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    _permit: ConnectionPermit,
    connection: HttpTunnelConnection,
    listeners: Arc<Vec<Arc<dyn TunnelClientListener>>>,
    tracker: ConnectionTracker,
    mut shutdown: watch::Receiver<bool>,
) {
    let guard = tracker.track();
    let id = guard.id();
    tracing::debug!(connection_id = %id, peer = %peer, "Tunneling local connection");
    for listener in listeners.iter() {
        listener.on_open(id, peer);
    }

    if let Err(e) = stream.set_nodelay(true) {
        tracing::trace!(connection_id = %id, error = %e, "Unable to disable Nagle");
    }
    let (mut reader, writer) = stream.into_split();
    let (closer, mut closed) = watch::channel(false);
    let channel = connection.open(Box::new(writer), closer);

    let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);
    loop {
        buffer.reserve(BUFFER_SIZE);
        tokio::select! {
            read = reader.read_buf(&mut buffer) => match read {
                Ok(0) => break,
                Ok(_) => {
                    if let Err(e) = channel.write(buffer.split().freeze()) {
                        tracing::debug!(connection_id = %id, error = %e, "Tunnel write failed");
                        break;
                    }
                }
                Err(e) => {
                    tracing::trace!(connection_id = %id, error = %e, "Local socket read failed");
                    break;
                }
            },
            _ = closed.changed() => break,
            _ = shutdown.changed() => break,
        }
    }

    channel.close();
    for listener in listeners.iter() {
        listener.on_close(id, peer);
    }
    tracing::debug!(connection_id = %id, peer = %peer, "Local connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_twice_fails() {
        let connection = HttpTunnelConnection::new("http://127.0.0.1:1/tunnel").unwrap();
        let mut client = TunnelClient::new(0, connection);
        let port = client.start().await.unwrap();
        assert_ne!(port, 0);
        assert_eq!(client.local_port(), Some(port));
        assert!(matches!(client.start().await, Err(TunnelError::AlreadyStarted)));
        client.stop().await;
        assert_eq!(client.local_port(), None);
    }
}
