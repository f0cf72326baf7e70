//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use devtunnel::config::schema::DEFAULT_TUNNEL_PATH;
use devtunnel::tunnel::{SocketTargetConnection, StaticPortProvider, TunnelServer};
use devtunnel::{Shutdown, TunnelConfig, TunnelHttpServer};

/// Start a target socket that echoes everything it reads.
pub async fn start_echo_target() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let mut buf = vec![0u8; 4096];
                        loop {
                            match socket.read(&mut buf).await {
                                Ok(0) | Err(_) => break,
                                Ok(n) => {
                                    if socket.write_all(&buf[..n]).await.is_err() {
                                        break;
                                    }
                                }
                            }
                        }
                    });
                }
                Err(_) => break,
            }
        }
    });
    addr
}

/// A port with nothing listening on it.
pub async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Server config pointing at `target_port` with short timeouts.
pub fn server_config(target_port: u16) -> TunnelConfig {
    let mut config = TunnelConfig::default();
    config.server.bind_address = "127.0.0.1:0".to_string();
    config.server.target_port = target_port;
    config.server.long_poll_timeout_ms = 500;
    config.server.disconnect_timeout_ms = 5_000;
    config
}

pub struct RunningServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub task: JoinHandle<std::io::Result<()>>,
}

impl RunningServer {
    pub fn tunnel_url(&self) -> String {
        format!("http://{}{}", self.addr, DEFAULT_TUNNEL_PATH)
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Start the tunnel HTTP endpoint on an ephemeral port.
pub async fn start_tunnel_server(config: &TunnelConfig) -> RunningServer {
    let target = SocketTargetConnection::new(
        config.server.target_host.clone(),
        StaticPortProvider::new(config.server.target_port).unwrap(),
    );
    let tunnel = TunnelServer::from_config(target, &config.server).unwrap();
    let server = TunnelHttpServer::new(config, tunnel).unwrap();

    let listener = TcpListener::bind(&config.server.bind_address).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let task = tokio::spawn(server.run(listener, shutdown.subscribe()));
    RunningServer { addr, shutdown, task }
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}
