//! Tunnel subsystem.
//!
//! # Data Flow
//! ```text
//! Debugger ⇄ client.rs (local TCP socket)
//!          ⇄ connection.rs (long-poll GET / payload POST over HTTP)
//!          ⇄ [http endpoint] → server.rs (session per target socket)
//!          ⇄ target.rs (TCP socket to the remote debug port)
//! ```
//!
//! # Design Decisions
//! - Both directions carry sequenced payloads and reorder on arrival
//! - The server keeps a single target session; it is opened by the first
//!   request and dropped when the target closes or polling stops

pub mod client;
pub mod connection;
pub mod error;
pub mod server;
pub mod target;

pub use client::{TunnelClient, TunnelClientListener};
pub use connection::{HttpTunnelConnection, TunnelChannel};
pub use error::TunnelError;
pub use server::{TunnelResponse, TunnelServer, DISCONNECT_CONTENT_TYPE};
pub use target::{PortProvider, SocketTargetConnection, StaticPortProvider, TargetConnection};
