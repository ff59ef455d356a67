//! WebSocket transport server using Axum.
//!
//! Admits a connection before upgrading it, then pumps frames between the
//! socket and the classroom gateway: inbound text goes to the gateway,
//! outbound envelopes arrive on a bounded per-connection queue and are
//! written in order. Pings keep the socket alive; silence closes it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use axum::{
    Router,
    extract::{
        Path, Query, State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket},
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use live_protocol::{ClassroomId, ConnectionId, Envelope, ErrorKind, Identity, LiveError};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval};
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

use crate::client::ClientConnection;

/// Header carrying the admin token for server-originated hooks.
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// WebSocket close codes sent by the server.
pub mod close {
    /// A newer connection for the same user took over.
    pub const SUPERSEDED: u16 = 4001;
    /// No frame arrived within the idle timeout.
    pub const IDLE_TIMEOUT: u16 = 4002;
    pub const CLASSROOM_DELETED: u16 = 4404;
    /// The session shut down under the connection; reconnect to resync.
    pub const SESSION_CLOSED: u16 = 4499;
}

/// Frame queued for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

/// Sending half of a connection's bounded outbound queue.
pub type OutboundTx = mpsc::Sender<Outbound>;

/// Trait implemented by the classroom server. The transport calls it to
/// admit, attach, feed and detach connections.
pub trait ClassroomGateway: Send + Sync + 'static {
    /// Proof that an identity may connect to a classroom.
    type Admission: Send + 'static;
    /// Handle of an attached connection.
    type Link: Send + Sync + 'static;

    /// Check the classroom exists and the user is enrolled. Runs before the
    /// WebSocket upgrade.
    fn admit(
        &self,
        classroom_id: ClassroomId,
        identity: Identity,
    ) -> impl std::future::Future<Output = Result<Self::Admission, LiveError>> + Send;

    /// Bind an upgraded socket to its classroom session.
    fn attach(
        &self,
        admission: Self::Admission,
        connection_id: ConnectionId,
        outbound: OutboundTx,
    ) -> impl std::future::Future<Output = Result<Self::Link, LiveError>> + Send;

    /// Hand one inbound text frame to the session.
    fn receive(
        &self,
        link: &Self::Link,
        text: String,
    ) -> impl std::future::Future<Output = Result<(), LiveError>> + Send;

    /// The socket is gone.
    fn detach(&self, link: Self::Link) -> impl std::future::Future<Output = ()> + Send;

    /// The collaborator deleted a classroom. Returns whether a live
    /// session was closed.
    fn classroom_deleted(
        &self,
        classroom_id: ClassroomId,
    ) -> impl std::future::Future<Output = Result<bool, LiveError>> + Send;

    /// Number of live classroom sessions (for health check).
    fn live_sessions(&self) -> usize;
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid bind address: {0}")]
    Address(#[from] std::net::AddrParseError),
    #[error("failed to bind listener: {0}")]
    Io(#[from] std::io::Error),
}

/// Transport server configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Port to listen on (0 for OS-assigned)
    pub port: u16,
    /// Hostname to bind to
    pub hostname: String,
    /// Maximum concurrent connections
    pub max_connections: Option<usize>,
    /// Bounded per-connection outbound queue length
    pub outbound_buffer: usize,
    /// Server ping period in milliseconds (0 disables pings)
    pub heartbeat_interval_ms: u64,
    /// Close a connection with no inbound frame for this long (0 disables)
    pub idle_timeout_ms: u64,
    /// Token required on the classroom-deleted hook, if set
    pub admin_token: Option<String>,
    /// Enable CORS
    pub enable_cors: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: 7171,
            hostname: "127.0.0.1".into(),
            max_connections: Some(256),
            outbound_buffer: 256,
            heartbeat_interval_ms: 30_000,
            idle_timeout_ms: 75_000,
            admin_token: None,
            enable_cors: false,
        }
    }
}

/// Shared state for the transport server.
struct AppState<G: ClassroomGateway> {
    gateway: Arc<G>,
    config: TransportConfig,
    /// Connected client count (for health check)
    client_count: AtomicUsize,
    next_connection_id: AtomicU64,
}

/// A place under the connection cap, taken before the upgrade and given
/// back on drop.
struct ConnectionSlot<G: ClassroomGateway> {
    state: Arc<AppState<G>>,
}

impl<G: ClassroomGateway> ConnectionSlot<G> {
    /// `None` if the server is full.
    fn reserve(state: &Arc<AppState<G>>) -> Option<Self> {
        let taken = state.client_count.fetch_add(1, Ordering::AcqRel);
        if state.config.max_connections.is_some_and(|max| taken >= max) {
            state.client_count.fetch_sub(1, Ordering::AcqRel);
            return None;
        }
        Some(Self {
            state: state.clone(),
        })
    }
}

impl<G: ClassroomGateway> Drop for ConnectionSlot<G> {
    fn drop(&mut self) {
        self.state.client_count.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The transport server. Accepts WebSocket connections for classrooms.
pub struct TransportServer {
    /// Shutdown signal
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Server task handle
    handle: Option<tokio::task::JoinHandle<()>>,
    /// Actual bound port
    port: u16,
}

impl TransportServer {
    /// Start the transport server in front of `gateway`.
    pub async fn start<G: ClassroomGateway>(
        config: TransportConfig,
        gateway: Arc<G>,
    ) -> Result<Self, TransportError> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);

        let state = Arc::new(AppState {
            gateway,
            config: config.clone(),
            client_count: AtomicUsize::new(0),
            next_connection_id: AtomicU64::new(1),
        });

        let mut app = Router::new()
            .route("/ws/{classroom_id}", get(ws_upgrade_handler::<G>))
            .route("/health", get(health_handler::<G>))
            .route(
                "/classrooms/{classroom_id}/deleted",
                post(classroom_deleted_handler::<G>),
            )
            .with_state(state);
        if config.enable_cors {
            app = app.layer(CorsLayer::permissive());
        }

        let addr: SocketAddr = format!("{}:{}", config.hostname, config.port).parse()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let actual_port = listener.local_addr()?.port();

        info!(
            "Classroom transport listening on ws://{}:{}/ws/{{classroom_id}}",
            config.hostname, actual_port
        );

        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await
                .ok();
        });

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
            port: actual_port,
        })
    }

    /// Get the actual bound port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Gracefully stop the server.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        info!("Classroom transport stopped");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Query string of the WebSocket URL.
#[derive(Debug, Deserialize)]
struct ConnectParams {
    user_id: String,
    #[serde(default)]
    token: Option<String>,
}

async fn ws_upgrade_handler<G: ClassroomGateway>(
    ws: WebSocketUpgrade,
    Path(classroom_id): Path<ClassroomId>,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState<G>>>,
) -> Response {
    // Check connection limit
    let Some(slot) = ConnectionSlot::reserve(&state) else {
        warn!(
            "Connection rejected: max connections reached ({})",
            state.config.max_connections.unwrap_or_default()
        );
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    let mut identity = Identity::new(params.user_id);
    if let Some(token) = params.token {
        identity = identity.with_token(token);
    }
    let user_id = identity.user_id.clone();

    match state.gateway.admit(classroom_id, identity).await {
        Ok(admission) => ws
            .on_upgrade(move |socket| {
                handle_ws_connection(socket, slot, admission, classroom_id, user_id)
            })
            .into_response(),
        Err(err) => {
            warn!("Connection refused for {user_id} in classroom {classroom_id}: {err}");
            rejection(&err)
        }
    }
}

async fn health_handler<G: ClassroomGateway>(
    State(state): State<Arc<AppState<G>>>,
) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "clients": state.client_count.load(Ordering::Relaxed),
        "sessions": state.gateway.live_sessions(),
    }))
}

async fn classroom_deleted_handler<G: ClassroomGateway>(
    Path(classroom_id): Path<ClassroomId>,
    headers: HeaderMap,
    State(state): State<Arc<AppState<G>>>,
) -> Response {
    if let Some(expected) = &state.config.admin_token {
        let provided = headers
            .get(ADMIN_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok());
        if provided != Some(expected.as_str()) {
            warn!("Rejected classroom-deleted hook for {classroom_id}: bad admin token");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    match state.gateway.classroom_deleted(classroom_id).await {
        Ok(closed) => {
            info!("Classroom {classroom_id} deleted by collaborator (live session: {closed})");
            Json(json!({ "classroom_id": classroom_id, "closed": closed })).into_response()
        }
        Err(err) => rejection(&err),
    }
}

/// HTTP response for a refused admission.
fn rejection(err: &LiveError) -> Response {
    let status = match err.kind() {
        ErrorKind::UnknownClassroom => StatusCode::NOT_FOUND,
        ErrorKind::NotEnrolled => StatusCode::FORBIDDEN,
        ErrorKind::DirectoryUnavailable | ErrorKind::SessionClosed => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::BAD_REQUEST,
    };
    (status, Json(json!({ "error": err.to_payload(None) }))).into_response()
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket Connection Handler
// ─────────────────────────────────────────────────────────────────────────────

async fn handle_ws_connection<G: ClassroomGateway>(
    socket: WebSocket,
    slot: ConnectionSlot<G>,
    admission: G::Admission,
    classroom_id: ClassroomId,
    user_id: String,
) {
    let state = slot.state.clone();
    let connection_id = state.next_connection_id.fetch_add(1, Ordering::Relaxed);
    let mut client = ClientConnection::new(connection_id, classroom_id, user_id);
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel(state.config.outbound_buffer.max(1));

    let link = match state.gateway.attach(admission, connection_id, outbound_tx).await {
        Ok(link) => link,
        Err(err) => {
            warn!("Attach failed for {} in classroom {classroom_id}: {err}", client.user_id);
            send_error(&mut ws_tx, &err).await;
            send_close(&mut ws_tx, close::SESSION_CLOSED, &err.to_string()).await;
            return;
        }
    };
    info!(
        "Client connected: {connection_id} ({} in classroom {classroom_id})",
        client.user_id
    );

    let mut heartbeat = (state.config.heartbeat_interval_ms > 0).then(|| {
        let period = Duration::from_millis(state.config.heartbeat_interval_ms);
        tokio::time::interval_at(Instant::now() + period, period)
    });
    let idle_timeout =
        (state.config.idle_timeout_ms > 0).then(|| Duration::from_millis(state.config.idle_timeout_ms));

    loop {
        // Rebuilt every iteration so the deadline follows the last frame seen
        let idle_sleep = async {
            match idle_timeout {
                Some(timeout) => {
                    let deadline = Instant::from_std(client.idle_deadline(timeout));
                    tokio::time::sleep_until(deadline).await
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            // Incoming WebSocket message
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        client.touch();
                        if let Err(err) = state.gateway.receive(&link, text.as_str().to_owned()).await {
                            warn!("Session unavailable for connection {connection_id}: {err}");
                            send_error(&mut ws_tx, &err).await;
                            send_close(&mut ws_tx, close_code_for(&err), &err.to_string()).await;
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        client.touch();
                        let err = LiveError::malformed("binary frames are not supported");
                        send_error(&mut ws_tx, &err).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        client.touch();
                        let _ = ws_tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Pong(_))) => client.touch(),
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Client disconnected: {connection_id}");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error for {connection_id}: {e}");
                        break;
                    }
                }
            }

            // Session → this client, in emission order
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(Outbound::Text(text)) => {
                        if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                            error!("Failed to send to {connection_id}: {e}");
                            break;
                        }
                    }
                    Some(Outbound::Close { code, reason }) => {
                        debug!("Closing {connection_id}: {reason}");
                        send_close(&mut ws_tx, code, &reason).await;
                        break;
                    }
                    None => {
                        debug!("Session released connection {connection_id}");
                        send_close(&mut ws_tx, close::SESSION_CLOSED, "session closed").await;
                        break;
                    }
                }
            }

            _ = tick(&mut heartbeat) => {
                if let Err(e) = ws_tx.send(Message::Ping(Bytes::new())).await {
                    warn!("Heartbeat failed for {connection_id}: {e}");
                    break;
                }
            }

            _ = idle_sleep => {
                warn!("Idle timeout for connection {connection_id}");
                send_close(&mut ws_tx, close::IDLE_TIMEOUT, "idle timeout").await;
                break;
            }
        }
    }

    state.gateway.detach(link).await;
    drop(slot);
    info!(
        "Client disconnected: {connection_id} after {:?} (total: {})",
        client.uptime(),
        state.client_count.load(Ordering::Relaxed)
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn close_code_for(err: &LiveError) -> u16 {
    match err.kind() {
        ErrorKind::UnknownClassroom => close::CLASSROOM_DELETED,
        _ => close::SESSION_CLOSED,
    }
}

async fn send_error(ws_tx: &mut SplitSink<WebSocket, Message>, err: &LiveError) {
    match Envelope::error(err, None).to_json() {
        Ok(text) => {
            let _ = ws_tx.send(Message::Text(text.into())).await;
        }
        Err(e) => error!("Failed to encode error envelope: {e}"),
    }
}

async fn send_close(ws_tx: &mut SplitSink<WebSocket, Message>, code: u16, reason: &str) {
    let frame = CloseFrame {
        code,
        reason: reason.to_owned().into(),
    };
    let _ = ws_tx.send(Message::Close(Some(frame))).await;
}
