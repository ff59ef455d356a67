//! One live classroom: roster, whiteboards, assignments and the editable flag.

use chrono::{DateTime, Utc};
use live_protocol::payloads::{SyncData, WhiteboardSnapshot};
use live_protocol::{ClassroomId, LiveError, UserId};

use crate::assignment::Assignments;
use crate::roster::{Participant, Roster};
use crate::whiteboard::{Whiteboard, WhiteboardKey, WhiteboardStore};

/// State of a single classroom session.
///
/// Owned by exactly one session actor; every mutation goes through the
/// router in [`crate::router`].
#[derive(Debug, Clone)]
pub struct ClassroomSession {
    pub(crate) classroom_id: ClassroomId,
    pub(crate) teacher_id: UserId,
    /// Whether students may write the shared board.
    pub(crate) editable: bool,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) roster: Roster,
    pub(crate) whiteboards: WhiteboardStore,
    pub(crate) assignments: Assignments,
}

impl ClassroomSession {
    /// Fresh session: locked, empty roster, empty shared board.
    pub fn new(classroom_id: ClassroomId, teacher_id: impl Into<UserId>) -> Self {
        Self {
            classroom_id,
            teacher_id: teacher_id.into(),
            editable: false,
            created_at: Utc::now(),
            roster: Roster::new(),
            whiteboards: WhiteboardStore::new(),
            assignments: Assignments::new(),
        }
    }

    pub fn classroom_id(&self) -> ClassroomId {
        self.classroom_id
    }

    pub fn teacher_id(&self) -> &str {
        &self.teacher_id
    }

    pub fn editable(&self) -> bool {
        self.editable
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn whiteboards(&self) -> &WhiteboardStore {
        &self.whiteboards
    }

    pub fn assignments(&self) -> &Assignments {
        &self.assignments
    }

    /// Snapshot of one board with its assignment title filled in.
    pub fn whiteboard_snapshot(&self, board: &Whiteboard) -> WhiteboardSnapshot {
        let title = board
            .key()
            .assignment_id()
            .and_then(|id| self.assignments.get(id))
            .map(|a| a.title.as_str());
        board.snapshot(title)
    }

    /// Snapshot of the board at `key`.
    pub fn snapshot_of(&self, key: &WhiteboardKey) -> Result<WhiteboardSnapshot, LiveError> {
        self.whiteboards
            .read(key)
            .map(|board| self.whiteboard_snapshot(board))
            .ok_or_else(|| LiveError::unknown_whiteboard(format!("whiteboard {key} does not exist")))
    }

    /// Boards `participant` may see: everything for the teacher, the shared
    /// board plus their own for a student.
    pub fn visible_whiteboards(&self, participant: &Participant) -> Vec<WhiteboardSnapshot> {
        if participant.is_teacher() {
            return self
                .whiteboards
                .iter()
                .map(|b| self.whiteboard_snapshot(b))
                .collect();
        }
        std::iter::once(self.whiteboards.public())
            .chain(self.whiteboards.owned_by(&participant.user_id))
            .map(|b| self.whiteboard_snapshot(b))
            .collect()
    }

    /// Authoritative `SYNC_DATA` for a joined participant.
    pub fn sync_data(&self, user_id: &str) -> Result<SyncData, LiveError> {
        let participant = self
            .roster
            .get(user_id)
            .ok_or_else(|| LiveError::UnknownParticipant(user_id.to_string()))?;

        Ok(SyncData {
            classroom_id: self.classroom_id,
            teacher_id: self.teacher_id.clone(),
            editable: self.editable,
            created_at: self.created_at,
            you: participant.info(),
            teacher: self.roster.teacher().map(Participant::info),
            participants: self.roster.infos(),
            whiteboards: self.visible_whiteboards(participant),
            assignments: self.assignments.infos(),
        })
    }

    /// No participant is joined.
    pub fn is_empty(&self) -> bool {
        self.roster.is_empty()
    }

    /// Whether the teacher currently has `key` selected.
    pub(crate) fn teacher_observes(&self, key: &WhiteboardKey) -> bool {
        self.roster
            .teacher()
            .and_then(|t| t.observing.as_ref())
            .is_some_and(|observed| observed == key)
    }
}
