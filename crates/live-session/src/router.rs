//! Message router: the single entry point for inbound envelopes.
//!
//! Every envelope is decoded, checked against the authorization matrix,
//! applied to the session and turned into an [`Outcome`]: the envelopes to
//! deliver (and to which connections) plus the side effects the owning
//! actor has to carry out. A rejected envelope produces an `ERROR` reply to
//! its sender and nothing else.

use chrono::Utc;
use live_protocol::payloads::{
    AssignmentCreateRequest, ClassroomDeletedEvent, CodeChangeEvent, CodeChangeRequest,
    EditableEvent, GetDataRequest, SourceInfo, StudentAssignmentEvent, TeacherAssignmentEvent,
    WhiteboardReply,
};
use live_protocol::{Action, ConnectionId, Envelope, LiveError, Role, UserId, WhiteboardKind};
use tracing::{debug, info, warn};

use crate::roster::{Participant, Roster};
use crate::session::ClassroomSession;
use crate::whiteboard::WhiteboardKey;

/// The connection an envelope arrived on, with the identity and role it was
/// admitted with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub role: Role,
}

impl Caller {
    pub fn new(connection_id: ConnectionId, user_id: impl Into<UserId>, role: Role) -> Self {
        Self {
            connection_id,
            user_id: user_id.into(),
            role,
        }
    }
}

/// One outbound envelope and the connections that receive it.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub targets: Vec<ConnectionId>,
    pub envelope: Envelope,
}

/// Work the router cannot do itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Close a connection a reconnect has superseded.
    Evict {
        connection_id: ConnectionId,
        reason: &'static str,
    },
    /// Drop the user's persisted classroom-session record.
    RemoveMembership { user_id: UserId },
    /// Delete the classroom at the directory; on success the owner calls
    /// [`ClassroomSession::close_deleted`].
    DeleteClassroom { requested_by: ConnectionId },
}

/// Everything one routed envelope produced, in emission order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    pub deliveries: Vec<Delivery>,
    pub effects: Vec<Effect>,
}

impl Outcome {
    pub fn reply(connection_id: ConnectionId, envelope: Envelope) -> Self {
        let mut outcome = Self::default();
        outcome.send(vec![connection_id], envelope);
        outcome
    }

    pub fn send(&mut self, targets: Vec<ConnectionId>, envelope: Envelope) {
        if !targets.is_empty() {
            self.deliveries.push(Delivery { targets, envelope });
        }
    }

    pub fn effect(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    /// Envelopes addressed to `connection_id`, in order.
    pub fn envelopes_for(&self, connection_id: ConnectionId) -> Vec<&Envelope> {
        self.deliveries
            .iter()
            .filter(|d| d.targets.contains(&connection_id))
            .map(|d| &d.envelope)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty() && self.effects.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Entry points
// ─────────────────────────────────────────────────────────────────────────────

impl ClassroomSession {
    /// Route one text frame from `caller`.
    pub fn handle_text(&mut self, caller: &Caller, text: &str) -> Outcome {
        match Envelope::parse(text) {
            Ok(envelope) => self.handle(caller, envelope),
            Err(err) => {
                warn!(
                    "Classroom {}: dropping malformed envelope from {}: {err}",
                    self.classroom_id, caller.user_id
                );
                Outcome::reply(caller.connection_id, Envelope::error(&err, None))
            }
        }
    }

    /// Route one decoded envelope from `caller`.
    pub fn handle(&mut self, caller: &Caller, envelope: Envelope) -> Outcome {
        let action = envelope.action;
        debug!(
            "Classroom {}: {action} from {} (connection {})",
            self.classroom_id, caller.user_id, caller.connection_id
        );

        match self.route(caller, envelope) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(
                    "Classroom {}: rejected {action} from {}: {err}",
                    self.classroom_id, caller.user_id
                );
                Outcome::reply(caller.connection_id, Envelope::error(&err, Some(action)))
            }
        }
    }

    /// The connection went away without a `LEAVE`.
    pub fn disconnect(&mut self, connection_id: ConnectionId) -> Outcome {
        let Some(user_id) = self
            .roster
            .by_connection(connection_id)
            .map(|p| p.user_id.clone())
        else {
            return Outcome::default();
        };
        match self.roster.leave(&user_id) {
            Some(participant) => self.depart(participant, false),
            None => Outcome::default(),
        }
    }

    /// The classroom record is gone: tell everyone and empty the roster.
    pub fn close_deleted(&mut self) -> Outcome {
        let mut outcome = Outcome::default();
        outcome.send(
            self.roster.connections(),
            Envelope::event(
                Action::ClassroomDeleted,
                &ClassroomDeletedEvent {
                    classroom_id: self.classroom_id,
                },
            ),
        );
        info!(
            "Classroom {}: deleted, closing session for {} participants",
            self.classroom_id,
            self.roster.len()
        );
        self.roster = Roster::new();
        outcome
    }

    fn route(&mut self, caller: &Caller, envelope: Envelope) -> Result<Outcome, LiveError> {
        if let Some(claimed) = envelope.user_id.as_deref() {
            if claimed != caller.user_id {
                return Err(LiveError::role_violation(format!(
                    "envelope user_id {claimed} does not match the connection identity"
                )));
            }
        }

        match envelope.action {
            Action::None => Ok(Outcome::default()),
            Action::Join => self.join(caller, Role::Student),
            Action::TeacherJoin => self.join(caller, Role::Teacher),
            Action::SubmitAssignment | Action::GradeAssignment | Action::Error => {
                Err(LiveError::UnsupportedAction(envelope.action))
            }
            action => {
                let sender = self.sender(caller)?;
                match action {
                    Action::CodeChange => self.code_change(&sender, envelope.payload()?),
                    Action::GetData => self.get_data(&sender, envelope.payload()?),
                    Action::SyncData => self.resync(&sender),
                    Action::Leave => Ok(self.leave(&sender)),
                    Action::LockCode => self.set_editable(&sender, false),
                    Action::UnlockCode => self.set_editable(&sender, true),
                    Action::AssignmentCreate => {
                        self.create_assignment(&sender, envelope.payload()?)
                    }
                    Action::ClassroomDeleted => self.request_delete(&sender),
                    other => Err(LiveError::UnsupportedAction(other)),
                }
            }
        }
    }

    /// Resolve the roster entry bound to this connection.
    fn sender(&self, caller: &Caller) -> Result<Caller, LiveError> {
        self.roster
            .by_connection(caller.connection_id)
            .filter(|p| p.user_id == caller.user_id)
            .map(|p| Caller::new(p.connection_id, p.user_id.clone(), p.role))
            .ok_or_else(|| LiveError::UnknownParticipant(caller.user_id.clone()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Roster actions
// ─────────────────────────────────────────────────────────────────────────────

impl ClassroomSession {
    fn join(&mut self, caller: &Caller, as_role: Role) -> Result<Outcome, LiveError> {
        match (as_role, caller.role) {
            (Role::Student, Role::Teacher) => {
                return Err(LiveError::role_violation(
                    "the teacher joins with TEACHER_JOIN",
                ));
            }
            (Role::Teacher, Role::Student) => {
                return Err(LiveError::role_violation(
                    "only the classroom teacher may send TEACHER_JOIN",
                ));
            }
            _ => {}
        }

        let joined = self.roster.join(
            &caller.user_id,
            caller.role,
            caller.connection_id,
            Utc::now(),
        )?;
        if caller.role == Role::Student {
            self.whiteboards.ensure_private(&caller.user_id);
            self.assignments
                .seed_for(&caller.user_id, &mut self.whiteboards);
        }

        let mut outcome = Outcome::default();
        match joined.replaced {
            Some(previous) => {
                info!(
                    "Classroom {}: {} reconnected, superseding connection {previous}",
                    self.classroom_id, caller.user_id
                );
                outcome.effect(Effect::Evict {
                    connection_id: previous,
                    reason: "superseded by a newer connection",
                });
            }
            None => info!(
                "Classroom {}: {} joined as {} ({} in roster)",
                self.classroom_id,
                caller.user_id,
                caller.role,
                self.roster.len()
            ),
        }

        let sync = self.sync_data(&caller.user_id)?;
        outcome.send(
            vec![caller.connection_id],
            Envelope::event(Action::SyncData, &sync).with_user(caller.user_id.clone()),
        );
        outcome.send(
            self.roster.connections_except(Some(caller.connection_id)),
            Envelope::event(Action::Join, &joined.info).with_user(caller.user_id.clone()),
        );
        Ok(outcome)
    }

    fn leave(&mut self, sender: &Caller) -> Outcome {
        match self.roster.leave(&sender.user_id) {
            Some(participant) => self.depart(participant, true),
            None => Outcome::default(),
        }
    }

    /// Broadcast the `LEAVE` delta for a participant already purged from the
    /// roster. An explicit leave also echoes to the leaver.
    fn depart(&mut self, participant: Participant, explicit: bool) -> Outcome {
        let mut outcome = Outcome::default();
        let mut targets = self.roster.connections();
        if explicit {
            targets.push(participant.connection_id);
        }
        outcome.send(
            targets,
            Envelope::event(Action::Leave, &participant.info())
                .with_user(participant.user_id.clone()),
        );

        if participant.is_teacher() {
            // Nobody is left to moderate the shared board.
            if self.editable {
                self.editable = false;
                outcome.send(
                    self.roster.connections(),
                    Envelope::event(Action::LockCode, &EditableEvent { editable: false })
                        .with_user(participant.user_id.clone()),
                );
            }
        } else if explicit {
            outcome.effect(Effect::RemoveMembership {
                user_id: participant.user_id.clone(),
            });
        }

        info!(
            "Classroom {}: {} left ({}; {} in roster)",
            self.classroom_id,
            participant.user_id,
            if explicit { "leave" } else { "disconnect" },
            self.roster.len()
        );
        outcome
    }

    fn resync(&self, sender: &Caller) -> Result<Outcome, LiveError> {
        let sync = self.sync_data(&sender.user_id)?;
        Ok(Outcome::reply(
            sender.connection_id,
            Envelope::event(Action::SyncData, &sync).with_user(sender.user_id.clone()),
        ))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Whiteboard actions
// ─────────────────────────────────────────────────────────────────────────────

impl ClassroomSession {
    fn code_change(
        &mut self,
        sender: &Caller,
        request: CodeChangeRequest,
    ) -> Result<Outcome, LiveError> {
        let key = self.resolve_key(
            sender,
            request.whiteboard_type,
            request.target_user.as_deref(),
            request.assignment_name.as_deref(),
        )?;
        self.authorize_write(sender, &key)?;
        self.materialize(&key)?;

        self.whiteboards.write(&key, request.code, &sender.user_id);
        let event = CodeChangeEvent {
            source: SourceInfo {
                user_id: sender.user_id.clone(),
                role: sender.role,
            },
            whiteboard: self.snapshot_of(&key)?,
        };

        let mut outcome = Outcome::default();
        outcome.send(
            self.audience(&key),
            Envelope::event(Action::CodeChange, &event).with_user(sender.user_id.clone()),
        );
        Ok(outcome)
    }

    fn get_data(&mut self, sender: &Caller, request: GetDataRequest) -> Result<Outcome, LiveError> {
        let key = self.resolve_key(
            sender,
            request.whiteboard_type,
            request.target_user.as_deref(),
            request.assignment_name.as_deref(),
        )?;
        if sender.role == Role::Student && key.owner().is_some_and(|o| o != sender.user_id) {
            return Err(LiveError::role_violation(
                "students may only read their own whiteboards",
            ));
        }
        self.materialize(&key)?;
        let whiteboard = self.snapshot_of(&key)?;

        if sender.role == Role::Teacher {
            let observing = (key != WhiteboardKey::Public).then(|| key.clone());
            if let Some(teacher) = self.roster.get_mut(&sender.user_id) {
                teacher.observing = observing;
            }
        }

        Ok(Outcome::reply(
            sender.connection_id,
            Envelope::event(Action::GetData, &WhiteboardReply { whiteboard }),
        ))
    }

    fn resolve_key(
        &self,
        sender: &Caller,
        kind: WhiteboardKind,
        target_user: Option<&str>,
        assignment_name: Option<&str>,
    ) -> Result<WhiteboardKey, LiveError> {
        let owner = target_user.unwrap_or(&sender.user_id);
        match kind {
            WhiteboardKind::Public => Ok(WhiteboardKey::Public),
            WhiteboardKind::Private => Ok(WhiteboardKey::private(owner)),
            WhiteboardKind::Assignment => {
                let name = assignment_name.ok_or_else(|| {
                    LiveError::malformed("ASSIGNMENT whiteboards need an assignment_name")
                })?;
                let assignment = self.assignments.find(name).ok_or_else(|| {
                    LiveError::unknown_whiteboard(format!("no assignment named {name:?}"))
                })?;
                Ok(WhiteboardKey::assignment(owner, assignment.id.as_str()))
            }
        }
    }

    fn authorize_write(&self, sender: &Caller, key: &WhiteboardKey) -> Result<(), LiveError> {
        match key.owner() {
            None if sender.role == Role::Student && !self.editable => Err(
                LiveError::role_violation("the shared whiteboard is locked"),
            ),
            None => Ok(()),
            Some(_) if sender.role == Role::Teacher => Err(LiveError::role_violation(
                "the teacher observes student whiteboards read-only",
            )),
            Some(owner) if owner != sender.user_id => Err(LiveError::role_violation(
                "students may only edit their own whiteboards",
            )),
            Some(_) => Ok(()),
        }
    }

    /// Create a student board on first access. Boards of users who are not
    /// joined students are only readable if they already exist.
    fn materialize(&mut self, key: &WhiteboardKey) -> Result<(), LiveError> {
        if self.whiteboards.contains(key) {
            return Ok(());
        }
        match key {
            WhiteboardKey::Private { owner } if self.roster.is_student(owner) => {
                self.whiteboards.ensure_private(owner);
                Ok(())
            }
            WhiteboardKey::Assignment {
                owner,
                assignment_id,
            } if self.roster.is_student(owner) => {
                let starter_code = self
                    .assignments
                    .get(assignment_id)
                    .map(|a| a.starter_code.clone())
                    .unwrap_or_default();
                self.whiteboards
                    .ensure_assignment(owner, assignment_id, &starter_code);
                Ok(())
            }
            key => Err(LiveError::unknown_whiteboard(format!(
                "whiteboard {key} does not exist"
            ))),
        }
    }

    /// Who receives a change to `key`: everyone for the shared board, the
    /// owner plus an observing teacher otherwise.
    fn audience(&self, key: &WhiteboardKey) -> Vec<ConnectionId> {
        let Some(owner) = key.owner() else {
            return self.roster.connections();
        };
        let mut targets: Vec<ConnectionId> = self
            .roster
            .get(owner)
            .map(|p| p.connection_id)
            .into_iter()
            .collect();
        if self.teacher_observes(key) {
            targets.extend(self.roster.teacher().map(|t| t.connection_id));
        }
        targets
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Teacher actions
// ─────────────────────────────────────────────────────────────────────────────

impl ClassroomSession {
    fn require_teacher(sender: &Caller, what: &str) -> Result<(), LiveError> {
        if sender.role == Role::Teacher {
            Ok(())
        } else {
            Err(LiveError::role_violation(format!(
                "only the teacher may {what}"
            )))
        }
    }

    fn set_editable(&mut self, sender: &Caller, editable: bool) -> Result<Outcome, LiveError> {
        Self::require_teacher(sender, "lock or unlock the shared whiteboard")?;
        self.editable = editable;
        info!(
            "Classroom {}: shared whiteboard {}",
            self.classroom_id,
            if editable { "unlocked" } else { "locked" }
        );

        let action = if editable {
            Action::UnlockCode
        } else {
            Action::LockCode
        };
        let mut outcome = Outcome::default();
        outcome.send(
            self.roster.connections(),
            Envelope::event(action, &EditableEvent { editable }).with_user(sender.user_id.clone()),
        );
        Ok(outcome)
    }

    fn create_assignment(
        &mut self,
        sender: &Caller,
        request: AssignmentCreateRequest,
    ) -> Result<Outcome, LiveError> {
        Self::require_teacher(sender, "create assignments")?;
        let assignment = self
            .assignments
            .create(
                &request.assignment_name,
                &request.assignment_description,
                &request.assignment_code,
                Utc::now(),
            )?
            .clone();
        let info = assignment.info();

        let students: Vec<(UserId, ConnectionId)> = self
            .roster
            .students()
            .map(|p| (p.user_id.clone(), p.connection_id))
            .collect();

        let mut outcome = Outcome::default();
        for (student, connection_id) in &students {
            self.whiteboards
                .ensure_assignment(student, &assignment.id, &assignment.starter_code);
            let whiteboard =
                self.snapshot_of(&WhiteboardKey::assignment(student.as_str(), assignment.id.as_str()))?;
            outcome.send(
                vec![*connection_id],
                Envelope::event(
                    Action::AssignmentCreate,
                    &StudentAssignmentEvent {
                        assignment: info.clone(),
                        whiteboard,
                    },
                )
                .with_user(sender.user_id.clone()),
            );
        }

        info!(
            "Classroom {}: assignment {:?} created for {} students",
            self.classroom_id,
            assignment.title,
            students.len()
        );
        outcome.send(
            vec![sender.connection_id],
            Envelope::event(
                Action::AssignmentCreate,
                &TeacherAssignmentEvent {
                    assignment: info,
                    students: students.into_iter().map(|(id, _)| id).collect(),
                },
            )
            .with_user(sender.user_id.clone()),
        );
        Ok(outcome)
    }

    fn request_delete(&self, sender: &Caller) -> Result<Outcome, LiveError> {
        Self::require_teacher(sender, "delete the classroom")?;
        let mut outcome = Outcome::default();
        outcome.effect(Effect::DeleteClassroom {
            requested_by: sender.connection_id,
        });
        Ok(outcome)
    }
}
