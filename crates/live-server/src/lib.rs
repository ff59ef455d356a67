//! Live classroom server: one session actor per live classroom.
//!
//! The [`SessionRegistry`] admits connections against the classroom
//! directory, spawns a session actor on first attach and forgets it on
//! teardown. It implements the transport's `ClassroomGateway`, so the
//! WebSocket layer never touches session state directly.

mod actor;
pub mod directory;
pub mod registry;

pub use directory::{
    ClassroomDirectory, ClassroomRecord, DirectoryData, DirectoryError, HttpDirectory,
    MembershipRecord, StaticDirectory,
};
pub use registry::{Admission, RegistryConfig, SessionLink, SessionRegistry};
