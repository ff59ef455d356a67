//! Whiteboard store: the in-memory table of code documents for one session.
//!
//! Writes replace the whole document (last write wins). The store never
//! checks who is writing; the router does that before calling in.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use live_protocol::payloads::WhiteboardSnapshot;
use live_protocol::{AssignmentId, UserId, WhiteboardKind};

/// Address of one whiteboard: `(kind, owner?, assignment?)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WhiteboardKey {
    Public,
    Private {
        owner: UserId,
    },
    Assignment {
        owner: UserId,
        assignment_id: AssignmentId,
    },
}

impl WhiteboardKey {
    pub fn private(owner: impl Into<UserId>) -> Self {
        Self::Private {
            owner: owner.into(),
        }
    }

    pub fn assignment(owner: impl Into<UserId>, assignment_id: impl Into<AssignmentId>) -> Self {
        Self::Assignment {
            owner: owner.into(),
            assignment_id: assignment_id.into(),
        }
    }

    pub fn kind(&self) -> WhiteboardKind {
        match self {
            Self::Public => WhiteboardKind::Public,
            Self::Private { .. } => WhiteboardKind::Private,
            Self::Assignment { .. } => WhiteboardKind::Assignment,
        }
    }

    /// Owning student; `None` for the shared board.
    pub fn owner(&self) -> Option<&str> {
        match self {
            Self::Public => None,
            Self::Private { owner } | Self::Assignment { owner, .. } => Some(owner),
        }
    }

    pub fn assignment_id(&self) -> Option<&str> {
        match self {
            Self::Assignment { assignment_id, .. } => Some(assignment_id),
            _ => None,
        }
    }

    /// Stable string id, e.g. `public`, `private:alice`, `assignment:alice:<id>`.
    pub fn id(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for WhiteboardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Public => f.write_str("public"),
            Self::Private { owner } => write!(f, "private:{owner}"),
            Self::Assignment {
                owner,
                assignment_id,
            } => write!(f, "assignment:{owner}:{assignment_id}"),
        }
    }
}

/// One code document.
#[derive(Debug, Clone, PartialEq)]
pub struct Whiteboard {
    key: WhiteboardKey,
    content: String,
    last_writer_id: Option<UserId>,
    last_modified_at: DateTime<Utc>,
}

impl Whiteboard {
    fn new(key: WhiteboardKey, content: String) -> Self {
        Self {
            key,
            content,
            last_writer_id: None,
            last_modified_at: Utc::now(),
        }
    }

    pub fn key(&self) -> &WhiteboardKey {
        &self.key
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn last_writer_id(&self) -> Option<&str> {
        self.last_writer_id.as_deref()
    }

    pub fn last_modified_at(&self) -> DateTime<Utc> {
        self.last_modified_at
    }

    /// Wire snapshot. The store does not know assignment titles, so the
    /// caller passes the one matching `assignment_id`, if any.
    pub fn snapshot(&self, assignment_name: Option<&str>) -> WhiteboardSnapshot {
        WhiteboardSnapshot {
            id: self.key.id(),
            kind: self.key.kind(),
            owner_id: self.key.owner().map(str::to_string),
            assignment_id: self.key.assignment_id().map(str::to_string),
            assignment_name: assignment_name.map(str::to_string),
            content: self.content.clone(),
            last_writer_id: self.last_writer_id.clone(),
            last_modified_at: self.last_modified_at,
        }
    }
}

/// Per-session whiteboard table.
///
/// The shared board lives outside the map so there is always exactly one.
#[derive(Debug, Clone)]
pub struct WhiteboardStore {
    public: Whiteboard,
    boards: BTreeMap<WhiteboardKey, Whiteboard>,
}

impl Default for WhiteboardStore {
    fn default() -> Self {
        Self::new()
    }
}

impl WhiteboardStore {
    /// A store holding only the empty shared board.
    pub fn new() -> Self {
        Self {
            public: Whiteboard::new(WhiteboardKey::Public, String::new()),
            boards: BTreeMap::new(),
        }
    }

    pub fn public(&self) -> &Whiteboard {
        &self.public
    }

    pub fn read(&self, key: &WhiteboardKey) -> Option<&Whiteboard> {
        match key {
            WhiteboardKey::Public => Some(&self.public),
            key => self.boards.get(key),
        }
    }

    pub fn contains(&self, key: &WhiteboardKey) -> bool {
        self.read(key).is_some()
    }

    /// Replace the whole content of `key`, creating the board if needed.
    pub fn write(
        &mut self,
        key: &WhiteboardKey,
        content: impl Into<String>,
        writer_id: &str,
    ) -> &Whiteboard {
        let board = match key {
            WhiteboardKey::Public => &mut self.public,
            key => self
                .boards
                .entry(key.clone())
                .or_insert_with(|| Whiteboard::new(key.clone(), String::new())),
        };
        board.content = content.into();
        board.last_writer_id = Some(writer_id.to_string());
        board.last_modified_at = Utc::now();
        board
    }

    /// Create the student's private board if missing. Returns `true` if created.
    pub fn ensure_private(&mut self, student_id: &str) -> bool {
        self.ensure(WhiteboardKey::private(student_id), "")
    }

    /// Create the (student, assignment) board seeded with `starter_code` if
    /// missing. An existing board keeps its content.
    pub fn ensure_assignment(
        &mut self,
        student_id: &str,
        assignment_id: &str,
        starter_code: &str,
    ) -> bool {
        self.ensure(
            WhiteboardKey::assignment(student_id, assignment_id),
            starter_code,
        )
    }

    fn ensure(&mut self, key: WhiteboardKey, seed: &str) -> bool {
        if self.boards.contains_key(&key) {
            return false;
        }
        self.boards
            .insert(key.clone(), Whiteboard::new(key, seed.to_string()));
        true
    }

    /// Every board, shared board first.
    pub fn iter(&self) -> impl Iterator<Item = &Whiteboard> {
        std::iter::once(&self.public).chain(self.boards.values())
    }

    /// Boards owned by one student.
    pub fn owned_by<'a>(&'a self, student_id: &'a str) -> impl Iterator<Item = &'a Whiteboard> {
        self.boards
            .values()
            .filter(move |board| board.key.owner() == Some(student_id))
    }

    /// Number of boards, shared board included.
    pub fn board_count(&self) -> usize {
        self.boards.len() + 1
    }
}
