//! HTTP long-poll tunnel for remote development.
//!
//! A TCP connection on the developer's machine is carried over plain HTTP
//! requests to a socket reachable only from the remote application (for
//! example a debugger port).

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod payload;
pub mod security;
pub mod tunnel;

pub use config::schema::TunnelConfig;
pub use http::TunnelHttpServer;
pub use lifecycle::Shutdown;
pub use payload::{PayloadForwarder, TunnelPayload};
pub use tunnel::{HttpTunnelConnection, TunnelClient, TunnelServer};
