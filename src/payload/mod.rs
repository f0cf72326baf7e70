//! Tunnel payload subsystem.
//!
//! # Data Flow
//! ```text
//! Socket bytes
//!     → codec.rs (read_payload_data, bounded wait)
//!     → TunnelPayload (sequence + bytes)
//!     → codec.rs (assign_to: x-seq header + body)
//!     → HTTP message
//!
//! HTTP message
//!     → codec.rs (get: NoPayload | Payload)
//!     → forwarder.rs (reorder by sequence)
//!     → Socket bytes
//! ```
//!
//! # Design Decisions
//! - Parse and read outcomes are tagged enums, never `Option` sentinels
//! - A read timeout is a normal outcome so polling loops can retry
//! - Sequences start at 1 and increase by one per direction

pub mod codec;
pub mod error;
pub mod forwarder;

pub use codec::{
    read_payload_data, InboundMessage, OutboundMessage, ReadOutcome, Received, TunnelPayload,
    BUFFER_SIZE, MAX_SEQUENCE, SEQ_HEADER,
};
pub use error::PayloadError;
pub use forwarder::{PayloadForwarder, MAXIMUM_QUEUE_SIZE};
