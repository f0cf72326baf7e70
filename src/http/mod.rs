//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request id, tracing, body limit)
//!     → security access middleware
//!     → tunnel handler (buffer body → TunnelServer::handle)
//!     → status / payload response
//! ```

pub mod server;

pub use server::{TunnelHttpServer, X_REQUEST_ID};
