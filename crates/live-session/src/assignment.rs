//! Assignment lifecycle.

use chrono::{DateTime, Utc};
use live_protocol::payloads::AssignmentInfo;
use live_protocol::{AssignmentId, LiveError};

use crate::whiteboard::WhiteboardStore;

/// A teacher-issued exercise. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub id: AssignmentId,
    pub title: String,
    pub description: String,
    pub starter_code: String,
    pub created_at: DateTime<Utc>,
}

impl Assignment {
    pub fn info(&self) -> AssignmentInfo {
        AssignmentInfo {
            id: self.id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            starter_code: self.starter_code.clone(),
            created_at: self.created_at,
        }
    }
}

/// Ordered list of a session's assignments, oldest first.
#[derive(Debug, Clone, Default)]
pub struct Assignments {
    items: Vec<Assignment>,
}

impl Assignments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Titles are how clients address assignments, so they must be unique.
    pub fn create(
        &mut self,
        title: &str,
        description: &str,
        starter_code: &str,
        now: DateTime<Utc>,
    ) -> Result<&Assignment, LiveError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(LiveError::malformed("assignment title must not be empty"));
        }
        if self.items.iter().any(|a| a.title == title) {
            return Err(LiveError::DuplicateAssignment(title.to_string()));
        }

        self.items.push(Assignment {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.to_string(),
            description: description.to_string(),
            starter_code: starter_code.to_string(),
            created_at: now,
        });
        Ok(&self.items[self.items.len() - 1])
    }

    pub fn get(&self, id: &str) -> Option<&Assignment> {
        self.items.iter().find(|a| a.id == id)
    }

    /// Look up by id first, then by title.
    pub fn find(&self, name_or_id: &str) -> Option<&Assignment> {
        self.get(name_or_id)
            .or_else(|| self.items.iter().find(|a| a.title == name_or_id))
    }

    /// Make sure `student_id` has a board for every assignment. Returns the
    /// number of boards created.
    pub fn seed_for(&self, student_id: &str, store: &mut WhiteboardStore) -> usize {
        self.items
            .iter()
            .filter(|a| store.ensure_assignment(student_id, &a.id, &a.starter_code))
            .count()
    }

    pub fn infos(&self) -> Vec<AssignmentInfo> {
        self.items.iter().map(Assignment::info).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::whiteboard::WhiteboardKey;

    #[test]
    fn create_keeps_starter_code_verbatim() {
        let mut assignments = Assignments::new();
        let created = assignments
            .create("Loops", "iterate", "for i in range(10): pass", Utc::now())
            .unwrap()
            .clone();

        assert_eq!(created.starter_code, "for i in range(10): pass");
        assert_eq!(assignments.find("Loops"), Some(&created));
        assert_eq!(assignments.find(&created.id), Some(&created));
    }

    #[test]
    fn ids_are_unique() {
        let mut assignments = Assignments::new();
        let a = assignments.create("A", "", "", Utc::now()).unwrap().id.clone();
        let b = assignments.create("B", "", "", Utc::now()).unwrap().id.clone();
        assert_ne!(a, b);
        assert_eq!(assignments.len(), 2);
    }

    #[test]
    fn empty_title_is_rejected() {
        let mut assignments = Assignments::new();
        let err = assignments.create("   ", "", "", Utc::now()).unwrap_err();
        assert!(matches!(err, LiveError::MalformedEnvelope(_)));
        assert!(assignments.is_empty());
    }

    #[test]
    fn duplicate_title_is_rejected() {
        let mut assignments = Assignments::new();
        assignments.create("Loops", "", "", Utc::now()).unwrap();
        let err = assignments.create("Loops", "again", "", Utc::now()).unwrap_err();
        assert_eq!(err, LiveError::DuplicateAssignment("Loops".into()));
    }

    #[test]
    fn seed_for_is_idempotent() {
        let mut assignments = Assignments::new();
        let id = assignments.create("Loops", "", "seed", Utc::now()).unwrap().id.clone();
        let mut store = WhiteboardStore::new();

        assert_eq!(assignments.seed_for("alice", &mut store), 1);
        store.write(&WhiteboardKey::assignment("alice", id.as_str()), "edited", "alice");
        assert_eq!(assignments.seed_for("alice", &mut store), 0);

        let board = store.read(&WhiteboardKey::assignment("alice", id.as_str())).unwrap();
        assert_eq!(board.content(), "edited");
    }
}
