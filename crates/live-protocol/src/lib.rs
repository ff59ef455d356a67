//! Live classroom protocol types.
//!
//! This crate is the single source of truth for the envelope shape, the
//! action and whiteboard-kind codes, the per-action payloads and the error
//! taxonomy shared by the session core, the server and the transport.

pub mod actions;
pub mod context;
pub mod envelope;
pub mod error;
pub mod payloads;

pub use actions::{Action, ConnectionState, Role, WhiteboardKind};
pub use context::Identity;
pub use envelope::Envelope;
pub use error::{ErrorKind, ErrorPayload, LiveError};

/// Identifier of a persisted classroom record.
pub type ClassroomId = u64;

/// Identifier of a user, as issued by the authentication collaborator.
pub type UserId = String;

/// Identifier of an assignment inside one session.
pub type AssignmentId = String;

/// Server-assigned identifier of a single socket connection.
pub type ConnectionId = u64;
