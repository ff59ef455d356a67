//! Live classroom transport layer
//!
//! Provides the WebSocket endpoint for classroom sessions. The transport
//! layer handles:
//! - Admission before upgrade (unknown classroom, not enrolled, capacity)
//! - Connection lifecycle (open, message, close)
//! - Per-connection bounded outbound queues, written in FIFO order
//! - Heartbeat pings and idle detection
//! - Health check and the classroom-deleted hook
//!
//! The transport is decoupled from the session server via the
//! `ClassroomGateway` trait.

pub mod client;
pub mod server;

pub use client::ClientConnection;
pub use server::{
    ADMIN_TOKEN_HEADER, ClassroomGateway, Outbound, OutboundTx, TransportConfig, TransportError,
    TransportServer, close,
};
