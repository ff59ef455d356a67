//! Per-socket connection bookkeeping.

use std::time::{Duration, Instant};

use live_protocol::{ClassroomId, ConnectionId, UserId};

/// A connected socket and the classroom it was admitted to.
#[derive(Debug)]
pub struct ClientConnection {
    pub id: ConnectionId,
    pub classroom_id: ClassroomId,
    pub user_id: UserId,
    /// When the socket was upgraded
    pub connected_at: Instant,
    /// Last time any frame (pong included) arrived from the client
    pub last_activity: Instant,
}

impl ClientConnection {
    pub fn new(id: ConnectionId, classroom_id: ClassroomId, user_id: UserId) -> Self {
        let now = Instant::now();
        Self {
            id,
            classroom_id,
            user_id,
            connected_at: now,
            last_activity: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// When the connection counts as idle, given the configured timeout.
    pub fn idle_deadline(&self, idle_timeout: Duration) -> Instant {
        self.last_activity + idle_timeout
    }

    pub fn uptime(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touch_pushes_idle_deadline_forward() {
        let mut conn = ClientConnection::new(1, 42, "alice".into());
        let first = conn.idle_deadline(Duration::from_secs(10));
        std::thread::sleep(Duration::from_millis(5));
        conn.touch();
        assert!(conn.idle_deadline(Duration::from_secs(10)) > first);
    }
}
