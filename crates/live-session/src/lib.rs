//! Live classroom session core.
//!
//! One [`ClassroomSession`] holds the roster, whiteboards and assignments
//! of a classroom. It is plain synchronous state: the owner (a session
//! actor) feeds it inbound envelopes one at a time through
//! [`ClassroomSession::handle_text`] and carries out the returned
//! [`Outcome`].

pub mod assignment;
pub mod roster;
pub mod router;
pub mod session;
pub mod whiteboard;

pub use assignment::{Assignment, Assignments};
pub use roster::{Joined, Participant, Roster};
pub use router::{Caller, Delivery, Effect, Outcome};
pub use session::ClassroomSession;
pub use whiteboard::{Whiteboard, WhiteboardKey, WhiteboardStore};
