//! Per-action payloads.
//!
//! Field names are snake_case on the wire. Request payloads accept the
//! aliases older clients send (`title`, `starterCode`, ...).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AssignmentId, ClassroomId, ConnectionState, Role, UserId, WhiteboardKind};

// ─────────────────────────────────────────────────────────────────────────────
// Client → Server
// ─────────────────────────────────────────────────────────────────────────────

/// `CODE_CHANGE` request: replace the whole content of one whiteboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeChangeRequest {
    pub whiteboard_type: WhiteboardKind,
    #[serde(alias = "content")]
    pub code: String,
    /// Owner of the addressed board; defaults to the sender.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_user: Option<UserId>,
    /// Assignment title or id, for `ASSIGNMENT` boards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignment_name: Option<String>,
}

/// `GET_DATA` request: pull the current snapshot of one whiteboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetDataRequest {
    pub whiteboard_type: WhiteboardKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_user: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignment_name: Option<String>,
}

/// `ASSIGNMENT_CREATE` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentCreateRequest {
    #[serde(alias = "title")]
    pub assignment_name: String,
    #[serde(default, alias = "description")]
    pub assignment_description: String,
    #[serde(default, alias = "starter_code", alias = "starterCode")]
    pub assignment_code: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Server → Client
// ─────────────────────────────────────────────────────────────────────────────

/// Roster entry. Also the body of `JOIN` / `LEAVE` roster deltas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub user_id: UserId,
    pub role: Role,
    pub connection_state: ConnectionState,
    pub joined_at: DateTime<Utc>,
}

/// Point-in-time copy of one whiteboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhiteboardSnapshot {
    pub id: String,
    pub kind: WhiteboardKind,
    pub owner_id: Option<UserId>,
    pub assignment_id: Option<AssignmentId>,
    pub assignment_name: Option<String>,
    pub content: String,
    pub last_writer_id: Option<UserId>,
    pub last_modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentInfo {
    pub id: AssignmentId,
    pub title: String,
    pub description: String,
    pub starter_code: String,
    pub created_at: DateTime<Utc>,
}

/// Full session snapshot sent to a (re)joining participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncData {
    pub classroom_id: ClassroomId,
    pub teacher_id: UserId,
    pub editable: bool,
    pub created_at: DateTime<Utc>,
    pub you: ParticipantInfo,
    pub teacher: Option<ParticipantInfo>,
    pub participants: Vec<ParticipantInfo>,
    pub whiteboards: Vec<WhiteboardSnapshot>,
    pub assignments: Vec<AssignmentInfo>,
}

/// Who wrote a code change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub user_id: UserId,
    pub role: Role,
}

/// `CODE_CHANGE` event fanned out to the broadcast audience.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeChangeEvent {
    pub source: SourceInfo,
    pub whiteboard: WhiteboardSnapshot,
}

/// `GET_DATA` reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhiteboardReply {
    pub whiteboard: WhiteboardSnapshot,
}

/// `LOCK_CODE` / `UNLOCK_CODE` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditableEvent {
    pub editable: bool,
}

/// `ASSIGNMENT_CREATE` event as seen by a student.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentAssignmentEvent {
    pub assignment: AssignmentInfo,
    pub whiteboard: WhiteboardSnapshot,
}

/// `ASSIGNMENT_CREATE` acknowledgement to the teacher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeacherAssignmentEvent {
    pub assignment: AssignmentInfo,
    pub students: Vec<UserId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassroomDeletedEvent {
    pub classroom_id: ClassroomId,
}
