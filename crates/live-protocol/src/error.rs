//! Error taxonomy and the numeric codes clients see in `ERROR` replies.

use serde::{Deserialize, Serialize};

use crate::{Action, ClassroomId, UserId};

/// Stable, wire-visible classification of a [`LiveError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // Admission
    UnknownClassroom,
    NotEnrolled,
    DirectoryUnavailable,
    SessionClosed,

    // Routing / authorization
    UnknownParticipant,
    RoleViolation,
    DuplicateTeacher,
    MalformedEnvelope,
    UnknownWhiteboard,
    DuplicateAssignment,
    UnsupportedAction,
}

impl ErrorKind {
    pub fn code(&self) -> u16 {
        match self {
            Self::RoleViolation => 4400,
            Self::UnknownParticipant => 4401,
            Self::NotEnrolled => 4403,
            Self::UnknownClassroom => 4404,
            Self::DuplicateTeacher => 4409,
            Self::UnknownWhiteboard => 4410,
            Self::DuplicateAssignment => 4412,
            Self::MalformedEnvelope => 4422,
            Self::SessionClosed => 4499,
            Self::UnsupportedAction => 4501,
            Self::DirectoryUnavailable => 4503,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            4400 => Some(Self::RoleViolation),
            4401 => Some(Self::UnknownParticipant),
            4403 => Some(Self::NotEnrolled),
            4404 => Some(Self::UnknownClassroom),
            4409 => Some(Self::DuplicateTeacher),
            4410 => Some(Self::UnknownWhiteboard),
            4412 => Some(Self::DuplicateAssignment),
            4422 => Some(Self::MalformedEnvelope),
            4499 => Some(Self::SessionClosed),
            4501 => Some(Self::UnsupportedAction),
            4503 => Some(Self::DirectoryUnavailable),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownClassroom => "UNKNOWN_CLASSROOM",
            Self::NotEnrolled => "NOT_ENROLLED",
            Self::DirectoryUnavailable => "DIRECTORY_UNAVAILABLE",
            Self::SessionClosed => "SESSION_CLOSED",
            Self::UnknownParticipant => "UNKNOWN_PARTICIPANT",
            Self::RoleViolation => "ROLE_VIOLATION",
            Self::DuplicateTeacher => "DUPLICATE_TEACHER",
            Self::MalformedEnvelope => "MALFORMED_ENVELOPE",
            Self::UnknownWhiteboard => "UNKNOWN_WHITEBOARD",
            Self::DuplicateAssignment => "DUPLICATE_ASSIGNMENT",
            Self::UnsupportedAction => "UNSUPPORTED_ACTION",
        }
    }
}

/// Every way a connection or an envelope can be refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LiveError {
    #[error("classroom {0} does not exist")]
    UnknownClassroom(ClassroomId),

    #[error("user {user_id} is not enrolled in classroom {classroom_id}")]
    NotEnrolled {
        classroom_id: ClassroomId,
        user_id: UserId,
    },

    #[error("classroom directory unavailable: {0}")]
    DirectoryUnavailable(String),

    #[error("session for classroom {0} has closed, reconnect to resync")]
    SessionClosed(ClassroomId),

    #[error("user {0} has not joined this session")]
    UnknownParticipant(UserId),

    #[error("{0}")]
    RoleViolation(String),

    #[error("classroom already has a teacher ({0})")]
    DuplicateTeacher(UserId),

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("{0}")]
    UnknownWhiteboard(String),

    #[error("an assignment titled {0:?} already exists")]
    DuplicateAssignment(String),

    #[error("action {0} is not supported")]
    UnsupportedAction(Action),
}

impl LiveError {
    pub fn role_violation(message: impl Into<String>) -> Self {
        Self::RoleViolation(message.into())
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedEnvelope(message.into())
    }

    pub fn unknown_whiteboard(message: impl Into<String>) -> Self {
        Self::UnknownWhiteboard(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownClassroom(_) => ErrorKind::UnknownClassroom,
            Self::NotEnrolled { .. } => ErrorKind::NotEnrolled,
            Self::DirectoryUnavailable(_) => ErrorKind::DirectoryUnavailable,
            Self::SessionClosed(_) => ErrorKind::SessionClosed,
            Self::UnknownParticipant(_) => ErrorKind::UnknownParticipant,
            Self::RoleViolation(_) => ErrorKind::RoleViolation,
            Self::DuplicateTeacher(_) => ErrorKind::DuplicateTeacher,
            Self::MalformedEnvelope(_) => ErrorKind::MalformedEnvelope,
            Self::UnknownWhiteboard(_) => ErrorKind::UnknownWhiteboard,
            Self::DuplicateAssignment(_) => ErrorKind::DuplicateAssignment,
            Self::UnsupportedAction(_) => ErrorKind::UnsupportedAction,
        }
    }

    pub fn code(&self) -> u16 {
        self.kind().code()
    }

    /// Wire representation, optionally tagged with the action that failed.
    pub fn to_payload(&self, action: Option<Action>) -> ErrorPayload {
        ErrorPayload {
            code: self.code(),
            kind: self.kind().as_str().to_string(),
            message: self.to_string(),
            action,
        }
    }
}

/// `data` of an `ERROR` envelope, and the body of a refused upgrade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: u16,
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
}

impl ErrorPayload {
    pub fn error_kind(&self) -> Option<ErrorKind> {
        ErrorKind::from_code(self.code)
    }
}
