//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Local debugger connects
//!     → listener.rs (accept loop, connection limit)
//!     → connection.rs (id + lifecycle tracking)
//!     → Hand off to the tunnel client
//! ```
//!
//! # Design Decisions
//! - The tunnel client serves one local socket at a time, enforced by the
//!   listener's connection limit rather than by the accept loop
//! - Each connection gets an id for tracing

pub mod connection;
pub mod listener;
