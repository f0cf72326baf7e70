//! Tunnel error types.

use std::time::Duration;

use thiserror::Error;

use crate::payload::PayloadError;

/// Errors raised by the tunnel server and client.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error(transparent)]
    Payload(#[from] PayloadError),

    /// No HTTP request arrived within the disconnect timeout.
    #[error("Disconnect timeout: {timeout:?} {elapsed:?}")]
    DisconnectTimeout { timeout: Duration, elapsed: Duration },

    #[error("{0} must be a positive value")]
    InvalidTimeout(&'static str),

    #[error("Port must be positive")]
    InvalidPort,

    #[error("{0}")]
    InvalidUrl(String),

    #[error("Server already started")]
    AlreadyStarted,

    #[error("Tunnel channel is closed")]
    ChannelClosed,

    #[error("HTTP request failed: {0}")]
    Request(#[from] hyper_util::client::legacy::Error),

    #[error("Invalid HTTP request: {0}")]
    Http(#[from] axum::http::Error),

    #[error("Failed to read response body: {0}")]
    Body(#[from] axum::Error),

    #[error("Unexpected response status {0}")]
    UnexpectedStatus(u16),

    #[error("Listener error: {0}")]
    Listener(#[from] crate::net::listener::ListenerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TunnelError {
    /// True when the remote endpoint could not be reached at all.
    pub fn is_connect(&self) -> bool {
        match self {
            TunnelError::Request(e) => e.is_connect(),
            TunnelError::Io(e) => e.kind() == std::io::ErrorKind::ConnectionRefused,
            _ => false,
        }
    }
}
