//! Roster & role state machine.
//!
//! A participant is `ABSENT` until it joins, `CONNECTED` while it is in the
//! roster, and purged (`DISCONNECTED`) on leave or connection loss. At most
//! one teacher is in the roster at any instant.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use live_protocol::payloads::ParticipantInfo;
use live_protocol::{ConnectionId, ConnectionState, LiveError, Role, UserId};

use crate::whiteboard::WhiteboardKey;

#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    pub user_id: UserId,
    pub role: Role,
    pub connection_state: ConnectionState,
    /// Socket currently bound to this participant.
    pub connection_id: ConnectionId,
    pub joined_at: DateTime<Utc>,
    /// Student board the teacher is looking at, if any.
    pub observing: Option<WhiteboardKey>,
}

impl Participant {
    pub fn info(&self) -> ParticipantInfo {
        ParticipantInfo {
            user_id: self.user_id.clone(),
            role: self.role,
            connection_state: self.connection_state,
            joined_at: self.joined_at,
        }
    }

    pub fn is_teacher(&self) -> bool {
        self.role == Role::Teacher
    }
}

/// Result of a successful join.
#[derive(Debug, Clone, PartialEq)]
pub struct Joined {
    pub info: ParticipantInfo,
    /// Stale connection this join took over from, on reconnect.
    pub replaced: Option<ConnectionId>,
}

#[derive(Debug, Clone, Default)]
pub struct Roster {
    participants: BTreeMap<UserId, Participant>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// `ABSENT → CONNECTED`, or rebinding a connected participant to a new
    /// socket when the same user reconnects.
    pub fn join(
        &mut self,
        user_id: &str,
        role: Role,
        connection_id: ConnectionId,
        now: DateTime<Utc>,
    ) -> Result<Joined, LiveError> {
        if let Some(existing) = self.participants.get_mut(user_id) {
            if existing.connection_id == connection_id {
                return Err(LiveError::role_violation(format!(
                    "{user_id} has already joined this session"
                )));
            }
            let replaced = existing.connection_id;
            existing.role = role;
            existing.connection_id = connection_id;
            existing.connection_state = ConnectionState::Connected;
            existing.joined_at = now;
            existing.observing = None;
            return Ok(Joined {
                info: existing.info(),
                replaced: Some(replaced),
            });
        }

        if role == Role::Teacher {
            if let Some(teacher) = self.teacher() {
                return Err(LiveError::DuplicateTeacher(teacher.user_id.clone()));
            }
        }

        let participant = Participant {
            user_id: user_id.to_string(),
            role,
            connection_state: ConnectionState::Connected,
            connection_id,
            joined_at: now,
            observing: None,
        };
        let info = participant.info();
        self.participants.insert(user_id.to_string(), participant);
        Ok(Joined {
            info,
            replaced: None,
        })
    }

    /// `CONNECTED → DISCONNECTED`. The returned participant is already
    /// purged from the roster.
    pub fn leave(&mut self, user_id: &str) -> Option<Participant> {
        let mut participant = self.participants.remove(user_id)?;
        participant.connection_state = ConnectionState::Disconnected;
        participant.observing = None;
        Some(participant)
    }

    pub fn get(&self, user_id: &str) -> Option<&Participant> {
        self.participants.get(user_id)
    }

    pub fn get_mut(&mut self, user_id: &str) -> Option<&mut Participant> {
        self.participants.get_mut(user_id)
    }

    pub fn by_connection(&self, connection_id: ConnectionId) -> Option<&Participant> {
        self.participants
            .values()
            .find(|p| p.connection_id == connection_id)
    }

    pub fn teacher(&self) -> Option<&Participant> {
        self.participants.values().find(|p| p.is_teacher())
    }

    pub fn students(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values().filter(|p| !p.is_teacher())
    }

    pub fn is_student(&self, user_id: &str) -> bool {
        self.get(user_id).is_some_and(|p| !p.is_teacher())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    /// Connections of every participant, optionally leaving one out.
    pub fn connections_except(&self, skip: Option<ConnectionId>) -> Vec<ConnectionId> {
        self.participants
            .values()
            .map(|p| p.connection_id)
            .filter(|id| Some(*id) != skip)
            .collect()
    }

    pub fn connections(&self) -> Vec<ConnectionId> {
        self.connections_except(None)
    }

    pub fn infos(&self) -> Vec<ParticipantInfo> {
        self.participants.values().map(Participant::info).collect()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn teacher_count(roster: &Roster) -> usize {
        roster
            .iter()
            .filter(|p| p.is_teacher() && p.connection_state == ConnectionState::Connected)
            .count()
    }

    #[test]
    fn join_then_leave_restores_roster() {
        let mut roster = Roster::new();
        roster.join("teacher", Role::Teacher, 1, Utc::now()).unwrap();
        let before = roster.infos();

        roster.join("alice", Role::Student, 2, Utc::now()).unwrap();
        assert_eq!(roster.len(), 2);

        let left = roster.leave("alice").unwrap();
        assert_eq!(left.connection_state, ConnectionState::Disconnected);
        assert_eq!(roster.infos(), before);
    }

    #[test]
    fn second_teacher_is_rejected() {
        let mut roster = Roster::new();
        roster.join("teacher", Role::Teacher, 1, Utc::now()).unwrap();
        let err = roster.join("impostor", Role::Teacher, 2, Utc::now()).unwrap_err();
        assert_eq!(err, LiveError::DuplicateTeacher("teacher".into()));
        assert_eq!(teacher_count(&roster), 1);
    }

    #[test]
    fn teacher_slot_frees_after_leave() {
        let mut roster = Roster::new();
        roster.join("teacher", Role::Teacher, 1, Utc::now()).unwrap();
        roster.leave("teacher");
        assert_eq!(teacher_count(&roster), 0);
        roster.join("teacher", Role::Teacher, 3, Utc::now()).unwrap();
        assert_eq!(teacher_count(&roster), 1);
    }

    #[test]
    fn same_connection_joining_twice_is_rejected() {
        let mut roster = Roster::new();
        roster.join("alice", Role::Student, 2, Utc::now()).unwrap();
        let err = roster.join("alice", Role::Student, 2, Utc::now()).unwrap_err();
        assert!(matches!(err, LiveError::RoleViolation(_)));
    }

    #[test]
    fn reconnect_takes_over_the_stale_connection() {
        let mut roster = Roster::new();
        roster.join("alice", Role::Student, 2, Utc::now()).unwrap();
        let joined = roster.join("alice", Role::Student, 7, Utc::now()).unwrap();

        assert_eq!(joined.replaced, Some(2));
        assert_eq!(roster.len(), 1);
        assert!(roster.by_connection(2).is_none());
        assert_eq!(roster.by_connection(7).unwrap().user_id, "alice");
    }

    #[test]
    fn teacher_reconnect_is_not_a_duplicate() {
        let mut roster = Roster::new();
        roster.join("teacher", Role::Teacher, 1, Utc::now()).unwrap();
        let joined = roster.join("teacher", Role::Teacher, 5, Utc::now()).unwrap();
        assert_eq!(joined.replaced, Some(1));
        assert_eq!(teacher_count(&roster), 1);
    }

    #[test]
    fn connections_except_skips_one() {
        let mut roster = Roster::new();
        roster.join("teacher", Role::Teacher, 1, Utc::now()).unwrap();
        roster.join("alice", Role::Student, 2, Utc::now()).unwrap();
        roster.join("bob", Role::Student, 3, Utc::now()).unwrap();

        let mut others = roster.connections_except(Some(2));
        others.sort();
        assert_eq!(others, vec![1, 3]);
        assert_eq!(roster.students().count(), 2);
    }
}
