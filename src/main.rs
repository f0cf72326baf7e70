//! devtunnel
//!
//! Carries a local TCP connection to a remote application's socket over
//! plain HTTP long polling.
//!
//! # Architecture Overview
//!
//! ```text
//!   developer machine                          remote host
//!  ┌──────────────────────┐               ┌──────────────────────────────┐
//!  │ debugger             │               │ devtunnel serve              │
//!  │    │                 │               │                              │
//!  │    ▼                 │   HTTP GET    │  ┌────────┐   ┌───────────┐  │
//!  │ devtunnel connect ───┼──────────────▶│  │  http  │──▶│  tunnel   │──┼──▶ target
//!  │  (tunnel client)  ◀──┼───────────────┼──│ server │◀──│  server   │◀─┼─── socket
//!  │                      │  HTTP POST    │  └────────┘   └───────────┘  │
//!  └──────────────────────┘               └──────────────────────────────┘
//! ```

use std::path::PathBuf;

use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderName, HeaderValue};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;

use devtunnel::config::{load_config, validate_config, ConfigError, TunnelConfig};
use devtunnel::lifecycle::{wait_for_signal, Shutdown};
use devtunnel::observability::{logging, metrics};
use devtunnel::tunnel::{
    HttpTunnelConnection, SocketTargetConnection, StaticPortProvider, TunnelClient, TunnelServer,
};
use devtunnel::TunnelHttpServer;

#[derive(Parser)]
#[command(name = "devtunnel")]
#[command(version, about = "HTTP long-poll tunnel for remote development", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Additional profile to activate (repeatable)
    #[arg(short, long = "profile")]
    profiles: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Expose the target socket over HTTP
    Serve {
        /// Override server.bind_address
        #[arg(long)]
        bind: Option<String>,

        /// Override server.target_port
        #[arg(long)]
        target_port: Option<u16>,
    },
    /// Listen locally and tunnel connections to a remote endpoint
    Connect {
        /// Override client.remote_url
        #[arg(long)]
        url: Option<String>,

        /// Override client.local_port
        #[arg(long)]
        local_port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path, &cli.profiles)?,
        None => TunnelConfig::default(),
    };
    apply_overrides(&mut config, &cli.command);
    validate_config(&config).map_err(ConfigError::Validation)?;

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "devtunnel starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let signal = shutdown.clone();
    tokio::spawn(async move { wait_for_signal(&signal).await });

    match cli.command {
        Commands::Serve { .. } => serve(&config, &shutdown).await?,
        Commands::Connect { .. } => connect(&config, &shutdown).await?,
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

fn apply_overrides(config: &mut TunnelConfig, command: &Commands) {
    match command {
        Commands::Serve { bind, target_port } => {
            if let Some(bind) = bind {
                config.server.bind_address = bind.clone();
            }
            if let Some(port) = target_port {
                config.server.target_port = *port;
            }
        }
        Commands::Connect { url, local_port } => {
            if let Some(url) = url {
                config.client.remote_url = url.clone();
            }
            if let Some(port) = local_port {
                config.client.local_port = *port;
            }
        }
    }
}

async fn serve(config: &TunnelConfig, shutdown: &Shutdown) -> Result<(), Box<dyn std::error::Error>> {
    let server = &config.server;
    tracing::info!(
        bind_address = %server.bind_address,
        target = %format!("{}:{}", server.target_host, server.target_port),
        long_poll_timeout_ms = server.long_poll_timeout_ms,
        disconnect_timeout_ms = server.disconnect_timeout_ms,
        "Configuration loaded"
    );

    let target = SocketTargetConnection::new(
        server.target_host.clone(),
        StaticPortProvider::new(server.target_port)?,
    );
    let tunnel = TunnelServer::from_config(target, server)?;
    let http = TunnelHttpServer::new(config, tunnel)?;

    let listener = TcpListener::bind(&server.bind_address).await?;
    http.run(listener, shutdown.subscribe()).await?;
    Ok(())
}

async fn connect(config: &TunnelConfig, shutdown: &Shutdown) -> Result<(), Box<dyn std::error::Error>> {
    let mut stopped = shutdown.subscribe();

    let mut connection = HttpTunnelConnection::new(&config.client.remote_url)?;
    if let Some(token) = &config.client.bearer_token {
        connection = connection.with_header(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {token}"))?);
    }
    if let Some(secret) = &config.security.secret {
        connection = connection.with_header(
            HeaderName::from_bytes(config.security.secret_header_name.as_bytes())?,
            HeaderValue::from_str(secret)?,
        );
    }

    let mut client = TunnelClient::new(config.client.local_port, connection);
    let port = client.start().await?;
    tracing::info!(port, remote = %config.client.remote_url, "Tunnel client ready");

    let _ = stopped.recv().await;
    client.stop().await;
    Ok(())
}
