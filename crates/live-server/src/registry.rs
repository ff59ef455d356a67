//! SessionRegistry maps classroom ids to live session actors.
//!
//! The registry is the only component that talks to the classroom
//! directory at admission time. A session actor is spawned on the first
//! attach for a classroom and retires itself when its roster empties or the
//! classroom is deleted; the registry then forgets it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use live_protocol::{ClassroomId, ConnectionId, Identity, LiveError, Role};
use live_session::ClassroomSession;
use live_transport::{ClassroomGateway, OutboundTx};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::actor::{SessionActor, SessionCommand};
use crate::directory::{ClassroomDirectory, ClassroomRecord, DirectoryError, with_timeout};

/// How often `attach` retries when it races a retiring session.
const ATTACH_ATTEMPTS: usize = 3;

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Per-call timeout for collaborator requests
    pub directory_timeout: Duration,
    /// Depth of each session actor's command queue
    pub command_buffer: usize,
    /// How long a deleted classroom is remembered locally. Afterwards the
    /// directory itself reports it gone.
    pub tombstone_ttl: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            directory_timeout: Duration::from_millis(5_000),
            command_buffer: 1024,
            tombstone_ttl: Duration::from_secs(600),
        }
    }
}

/// A connection that passed admission and may attach.
#[derive(Debug, Clone)]
pub struct Admission {
    pub classroom: ClassroomRecord,
    pub identity: Identity,
    pub role: Role,
}

/// An attached connection's route to its session actor.
#[derive(Debug, Clone)]
pub struct SessionLink {
    pub classroom_id: ClassroomId,
    pub connection_id: ConnectionId,
    commands: mpsc::Sender<SessionCommand>,
}

/// One live session actor.
struct SessionHandle {
    generation: u64,
    commands: mpsc::Sender<SessionCommand>,
    record: ClassroomRecord,
    /// Attaches routed to this actor that it has not processed yet.
    pending_attaches: Arc<AtomicUsize>,
}

struct Shared<D> {
    directory: Arc<D>,
    config: RegistryConfig,
    sessions: RwLock<HashMap<ClassroomId, SessionHandle>>,
    /// Recently deleted classrooms and when they were deleted.
    deleted: RwLock<HashMap<ClassroomId, Instant>>,
    next_generation: AtomicU64,
}

/// Owns one session actor per live classroom.
///
/// Uses parking_lot::RwLock for the maps; nothing awaits while holding
/// them. Cloning is cheap and shares the same registry.
pub struct SessionRegistry<D: ClassroomDirectory> {
    shared: Arc<Shared<D>>,
}

impl<D: ClassroomDirectory> Clone for SessionRegistry<D> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<D: ClassroomDirectory> SessionRegistry<D> {
    pub fn new(directory: Arc<D>, config: RegistryConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                directory,
                config,
                sessions: RwLock::new(HashMap::new()),
                deleted: RwLock::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    pub fn directory(&self) -> &Arc<D> {
        &self.shared.directory
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.shared.config
    }

    pub fn is_live(&self, classroom_id: ClassroomId) -> bool {
        self.shared.sessions.read().contains_key(&classroom_id)
    }

    pub fn is_deleted(&self, classroom_id: ClassroomId) -> bool {
        self.shared
            .deleted
            .read()
            .get(&classroom_id)
            .is_some_and(|at| at.elapsed() < self.shared.config.tombstone_ttl)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.shared.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.sessions.read().is_empty()
    }

    /// Check that the classroom exists and the identity is enrolled.
    ///
    /// The classroom record is fetched only when no session is live; the
    /// membership is always fetched so a removed student cannot rejoin.
    pub async fn admit(
        &self,
        classroom_id: ClassroomId,
        identity: Identity,
    ) -> Result<Admission, LiveError> {
        if self.is_deleted(classroom_id) {
            return Err(LiveError::UnknownClassroom(classroom_id));
        }

        let live_record = self
            .shared
            .sessions
            .read()
            .get(&classroom_id)
            .map(|h| h.record.clone());
        let classroom = match live_record {
            Some(record) => record,
            None => {
                let record = self
                    .call(self.shared.directory.classroom(classroom_id, &identity))
                    .await?;
                match record {
                    Some(record) if !record.deleted => record,
                    _ => return Err(LiveError::UnknownClassroom(classroom_id)),
                }
            }
        };

        let membership = self
            .call(self.shared.directory.membership(classroom_id, &identity))
            .await?
            .ok_or_else(|| LiveError::NotEnrolled {
                classroom_id,
                user_id: identity.user_id.clone(),
            })?;

        let role = if membership.is_teacher || classroom.teacher_id == identity.user_id {
            Role::Teacher
        } else {
            Role::Student
        };
        Ok(Admission {
            classroom,
            identity,
            role,
        })
    }

    /// Attach a connection to its classroom's session, spawning the actor
    /// if none is live.
    pub async fn attach(
        &self,
        admission: Admission,
        connection_id: ConnectionId,
        outbound: OutboundTx,
    ) -> Result<SessionLink, LiveError> {
        let classroom_id = admission.classroom.id;
        let mut command = SessionCommand::Attach {
            connection_id,
            identity: admission.identity,
            role: admission.role,
            outbound,
        };
        for _ in 0..ATTACH_ATTEMPTS {
            if self.is_deleted(classroom_id) {
                return Err(LiveError::UnknownClassroom(classroom_id));
            }
            let (generation, commands) = self.reserve_attach(&admission.classroom);
            match commands.send(command).await {
                Ok(()) => {
                    return Ok(SessionLink {
                        classroom_id,
                        connection_id,
                        commands,
                    });
                }
                Err(mpsc::error::SendError(returned)) => {
                    // The actor closed between lookup and send.
                    self.retire(classroom_id, generation);
                    command = returned;
                }
            }
        }
        Err(LiveError::SessionClosed(classroom_id))
    }

    pub async fn receive(&self, link: &SessionLink, text: String) -> Result<(), LiveError> {
        if self.is_deleted(link.classroom_id) {
            return Err(LiveError::UnknownClassroom(link.classroom_id));
        }
        link.commands
            .send(SessionCommand::Inbound {
                connection_id: link.connection_id,
                text,
            })
            .await
            .map_err(|_| LiveError::SessionClosed(link.classroom_id))
    }

    pub async fn detach(&self, link: SessionLink) {
        // A closed queue means the session already tore down.
        let _ = link
            .commands
            .send(SessionCommand::Detach {
                connection_id: link.connection_id,
            })
            .await;
    }

    /// The classroom was deleted upstream. Future admissions and messages
    /// fail with `UnknownClassroom`; a live session closes.
    pub async fn classroom_deleted(&self, classroom_id: ClassroomId) -> bool {
        self.mark_deleted(classroom_id);
        let commands = self
            .shared
            .sessions
            .read()
            .get(&classroom_id)
            .map(|h| h.commands.clone());
        match commands {
            Some(commands) => commands.send(SessionCommand::ClassroomDeleted).await.is_ok(),
            None => false,
        }
    }

    /// Close every live session (server shutdown).
    pub async fn shutdown_all(&self) {
        let all: Vec<_> = self
            .shared
            .sessions
            .read()
            .values()
            .map(|h| h.commands.clone())
            .collect();
        let count = all.len();
        for commands in all {
            let _ = commands.send(SessionCommand::Shutdown).await;
        }
        info!("Shut down {count} live sessions");
    }

    pub(crate) fn mark_deleted(&self, classroom_id: ClassroomId) {
        let ttl = self.shared.config.tombstone_ttl;
        let mut deleted = self.shared.deleted.write();
        deleted.retain(|_, at| at.elapsed() < ttl);
        if deleted.insert(classroom_id, Instant::now()).is_none() {
            info!("Classroom {classroom_id} marked deleted");
        }
    }

    /// Forget a session, unless a newer one already replaced it.
    pub(crate) fn retire(&self, classroom_id: ClassroomId, generation: u64) {
        let mut sessions = self.shared.sessions.write();
        if sessions
            .get(&classroom_id)
            .is_some_and(|h| h.generation == generation)
        {
            sessions.remove(&classroom_id);
            info!(
                "Session retired: classroom {classroom_id} (live sessions: {})",
                sessions.len()
            );
        }
    }

    /// Retire an idle session, unless an attach has been routed to it and
    /// is still on its way. Returns whether the actor may stop.
    ///
    /// Runs under the write lock, so it cannot interleave with
    /// `reserve_attach` counting a new attach.
    pub(crate) fn release_idle(
        &self,
        classroom_id: ClassroomId,
        generation: u64,
        pending_attaches: &AtomicUsize,
    ) -> bool {
        let mut sessions = self.shared.sessions.write();
        if pending_attaches.load(Ordering::Acquire) > 0 {
            return false;
        }
        if sessions
            .get(&classroom_id)
            .is_some_and(|h| h.generation == generation)
        {
            sessions.remove(&classroom_id);
            info!(
                "Session retired: classroom {classroom_id} (live sessions: {})",
                sessions.len()
            );
        }
        true
    }

    /// Route one attach to the live actor for `record`, spawning one if
    /// needed. The actor will not retire as idle until it has processed
    /// the attach.
    fn reserve_attach(&self, record: &ClassroomRecord) -> (u64, mpsc::Sender<SessionCommand>) {
        if let Some(handle) = self.shared.sessions.read().get(&record.id) {
            handle.pending_attaches.fetch_add(1, Ordering::AcqRel);
            return (handle.generation, handle.commands.clone());
        }

        let mut sessions = self.shared.sessions.write();
        // Another connection may have won the race for the write lock
        if let Some(handle) = sessions.get(&record.id) {
            handle.pending_attaches.fetch_add(1, Ordering::AcqRel);
            return (handle.generation, handle.commands.clone());
        }

        let generation = self.shared.next_generation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.shared.config.command_buffer.max(1));
        let pending_attaches = Arc::new(AtomicUsize::new(1));
        let session = ClassroomSession::new(record.id, record.teacher_id.clone());
        tokio::spawn(
            SessionActor::new(session, generation, self.clone(), rx, pending_attaches.clone())
                .run(),
        );

        sessions.insert(
            record.id,
            SessionHandle {
                generation,
                commands: tx.clone(),
                record: record.clone(),
                pending_attaches,
            },
        );
        info!(
            "Session created: classroom {} (teacher: {}, live sessions: {})",
            record.id,
            record.teacher_id,
            sessions.len()
        );
        (generation, tx)
    }

    /// Bounded collaborator call, logged on failure.
    pub(crate) async fn call<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, DirectoryError>> + Send,
    ) -> Result<T, LiveError> {
        with_timeout(self.shared.config.directory_timeout, call)
            .await
            .map_err(|e| {
                warn!("Classroom directory call failed: {e}");
                LiveError::from(e)
            })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport seam
// ─────────────────────────────────────────────────────────────────────────────

impl<D: ClassroomDirectory> ClassroomGateway for SessionRegistry<D> {
    type Admission = Admission;
    type Link = SessionLink;

    async fn admit(
        &self,
        classroom_id: ClassroomId,
        identity: Identity,
    ) -> Result<Admission, LiveError> {
        SessionRegistry::admit(self, classroom_id, identity).await
    }

    async fn attach(
        &self,
        admission: Admission,
        connection_id: ConnectionId,
        outbound: OutboundTx,
    ) -> Result<SessionLink, LiveError> {
        SessionRegistry::attach(self, admission, connection_id, outbound).await
    }

    async fn receive(&self, link: &SessionLink, text: String) -> Result<(), LiveError> {
        SessionRegistry::receive(self, link, text).await
    }

    async fn detach(&self, link: SessionLink) {
        SessionRegistry::detach(self, link).await
    }

    async fn classroom_deleted(&self, classroom_id: ClassroomId) -> Result<bool, LiveError> {
        Ok(SessionRegistry::classroom_deleted(self, classroom_id).await)
    }

    fn live_sessions(&self) -> usize {
        self.len()
    }
}
