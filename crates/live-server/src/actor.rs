//! Session actor: the single owner of one classroom's state.
//!
//! Every mutation of a [`ClassroomSession`] happens inside this task, in
//! the order commands arrive on its queue. Outbound envelopes are pushed to
//! each connection's bounded queue without waiting; a connection whose
//! queue is full is dropped rather than stalling the classroom.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use live_protocol::{Action, ConnectionId, Envelope, Identity, Role, UserId};
use live_session::{Caller, ClassroomSession, Effect, Outcome};
use live_transport::{Outbound, OutboundTx, close};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};

use crate::directory::ClassroomDirectory;
use crate::registry::SessionRegistry;

/// Commands accepted by a session actor.
#[derive(Debug)]
pub enum SessionCommand {
    Attach {
        connection_id: ConnectionId,
        identity: Identity,
        role: Role,
        outbound: OutboundTx,
    },
    Inbound {
        connection_id: ConnectionId,
        text: String,
    },
    Detach {
        connection_id: ConnectionId,
    },
    ClassroomDeleted,
    Shutdown,
}

/// Why the actor stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Closing {
    Deleted,
    Shutdown,
}

struct AttachedConnection {
    identity: Identity,
    role: Role,
    outbound: OutboundTx,
}

impl AttachedConnection {
    fn caller(&self, connection_id: ConnectionId) -> Caller {
        Caller::new(connection_id, self.identity.user_id.clone(), self.role)
    }
}

pub(crate) struct SessionActor<D: ClassroomDirectory> {
    session: ClassroomSession,
    generation: u64,
    registry: SessionRegistry<D>,
    commands: mpsc::Receiver<SessionCommand>,
    connections: HashMap<ConnectionId, AttachedConnection>,
    pending_attaches: Arc<AtomicUsize>,
    closing: Option<Closing>,
}

impl<D: ClassroomDirectory> SessionActor<D> {
    pub(crate) fn new(
        session: ClassroomSession,
        generation: u64,
        registry: SessionRegistry<D>,
        commands: mpsc::Receiver<SessionCommand>,
        pending_attaches: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            session,
            generation,
            registry,
            commands,
            connections: HashMap::new(),
            pending_attaches,
            closing: None,
        }
    }

    pub(crate) async fn run(mut self) {
        let classroom_id = self.session.classroom_id();
        debug!("Session actor started for classroom {classroom_id}");

        while let Some(command) = self.commands.recv().await {
            self.process(command).await;

            if self.closing.is_some() {
                break;
            }
            if self.session.is_empty()
                && self.connections.is_empty()
                && self
                    .registry
                    .release_idle(classroom_id, self.generation, &self.pending_attaches)
            {
                break;
            }
        }

        self.teardown();
    }

    async fn process(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Attach {
                connection_id,
                identity,
                role,
                outbound,
            } => {
                self.pending_attaches.fetch_sub(1, Ordering::AcqRel);
                debug!(
                    "Classroom {}: attached connection {connection_id} ({} as {role})",
                    self.session.classroom_id(),
                    identity.user_id
                );
                self.connections.insert(
                    connection_id,
                    AttachedConnection {
                        identity,
                        role,
                        outbound,
                    },
                );
            }
            SessionCommand::Inbound {
                connection_id,
                text,
            } => {
                let Some(caller) = self
                    .connections
                    .get(&connection_id)
                    .map(|c| c.caller(connection_id))
                else {
                    // Evicted while the frame was queued.
                    debug!("Dropping frame from detached connection {connection_id}");
                    return;
                };
                let outcome = self.session.handle_text(&caller, &text);
                self.apply(outcome).await;
            }
            SessionCommand::Detach { connection_id } => {
                self.connections.remove(&connection_id);
                let outcome = self.session.disconnect(connection_id);
                self.apply(outcome).await;
            }
            SessionCommand::ClassroomDeleted => {
                let outcome = self.session.close_deleted();
                self.apply(outcome).await;
                self.closing = Some(Closing::Deleted);
            }
            SessionCommand::Shutdown => {
                self.closing = Some(Closing::Shutdown);
            }
        }
    }

    /// Deliver an outcome and carry out its effects. Dropping a slow
    /// connection produces a further outcome, handled in turn.
    async fn apply(&mut self, outcome: Outcome) {
        let mut pending = VecDeque::from([outcome]);
        while let Some(outcome) = pending.pop_front() {
            for delivery in outcome.deliveries {
                let text = match delivery.envelope.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        error!("Failed to encode {} envelope: {e}", delivery.envelope.action);
                        continue;
                    }
                };
                for target in delivery.targets {
                    if !self.deliver(target, Outbound::Text(text.clone())) {
                        pending.push_back(self.session.disconnect(target));
                    }
                }
            }

            for effect in outcome.effects {
                if let Some(next) = self.perform(effect).await {
                    pending.push_back(next);
                }
            }
        }
    }

    /// Queue one frame. Returns false if the connection had to be dropped.
    fn deliver(&mut self, connection_id: ConnectionId, frame: Outbound) -> bool {
        let Some(connection) = self.connections.get(&connection_id) else {
            // Already gone; its disconnect has been or will be handled.
            return true;
        };
        match connection.outbound.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    "Classroom {}: outbound queue full for connection {connection_id} ({}), dropping it",
                    self.session.classroom_id(),
                    connection.identity.user_id
                );
                // Dropping the sender ends the socket task.
                self.connections.remove(&connection_id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.connections.remove(&connection_id);
                false
            }
        }
    }

    async fn perform(&mut self, effect: Effect) -> Option<Outcome> {
        match effect {
            Effect::Evict {
                connection_id,
                reason,
            } => {
                if let Some(connection) = self.connections.remove(&connection_id) {
                    let _ = connection.outbound.try_send(Outbound::Close {
                        code: close::SUPERSEDED,
                        reason: reason.to_string(),
                    });
                }
                None
            }
            Effect::RemoveMembership { user_id } => {
                self.remove_membership(user_id);
                None
            }
            Effect::DeleteClassroom { requested_by } => self.delete_classroom(requested_by).await,
        }
    }

    /// Drop the user's membership in the background; the student has
    /// already left the roster either way.
    fn remove_membership(&self, user_id: UserId) {
        let identity = self
            .connections
            .values()
            .find(|c| c.identity.user_id == user_id)
            .map(|c| c.identity.clone())
            .unwrap_or_else(|| Identity::new(user_id.clone()));
        let classroom_id = self.session.classroom_id();
        let registry = self.registry.clone();

        tokio::spawn(async move {
            let call = registry
                .directory()
                .delete_membership(classroom_id, &identity);
            match registry.call(call).await {
                Ok(()) => info!("Classroom {classroom_id}: removed membership of {user_id}"),
                Err(e) => warn!("Classroom {classroom_id}: could not remove membership of {user_id}: {e}"),
            }
        });
    }

    /// The teacher asked for deletion. The session closes only once the
    /// directory has confirmed it.
    async fn delete_classroom(&mut self, requested_by: ConnectionId) -> Option<Outcome> {
        let classroom_id = self.session.classroom_id();
        let identity = self.connections.get(&requested_by)?.identity.clone();

        let call = self
            .registry
            .directory()
            .delete_classroom(classroom_id, &identity);
        match self.registry.call(call).await {
            Ok(()) => {
                info!(
                    "Classroom {classroom_id}: deleted by {}",
                    identity.user_id
                );
                self.registry.mark_deleted(classroom_id);
                self.closing = Some(Closing::Deleted);
                Some(self.session.close_deleted())
            }
            Err(err) => {
                warn!("Classroom {classroom_id}: delete failed: {err}");
                Some(Outcome::reply(
                    requested_by,
                    Envelope::error(&err, Some(Action::ClassroomDeleted)),
                ))
            }
        }
    }

    fn teardown(mut self) {
        let classroom_id = self.session.classroom_id();
        let (code, reason) = match self.closing {
            Some(Closing::Deleted) => (close::CLASSROOM_DELETED, "classroom deleted"),
            _ => (close::SESSION_CLOSED, "session closed"),
        };

        // Refuse new commands before leaving the registry so a racing
        // attach spawns a fresh session instead of landing here. An idle
        // session has already been released.
        self.commands.close();
        self.registry.retire(classroom_id, self.generation);

        // Attaches queued behind a deletion or shutdown close with it.

        while let Ok(command) = self.commands.try_recv() {
            if let SessionCommand::Attach { outbound, .. } = command {
                let _ = outbound.try_send(Outbound::Close {
                    code,
                    reason: reason.to_string(),
                });
            }
        }
        for (_, connection) in self.connections.drain() {
            let _ = connection.outbound.try_send(Outbound::Close {
                code,
                reason: reason.to_string(),
            });
        }

        info!("Session actor stopped for classroom {classroom_id} ({reason})");
    }
}
