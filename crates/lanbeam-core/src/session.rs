//! Transfer sessions and their state machine.
//!
//! A session is one end-to-end transfer between two peers, either
//! direction. State is monotone: once a terminal status is reached it never
//! changes, and the transition method reports whether the caller won the
//! race to set it, so exactly one terminal event is emitted per session.
//!
//! ```text
//!             request/open
//!   pending ───────────────► in-progress ──completed──► completed
//!      │                        │
//!      │ decline/timeout        │ error/cancel
//!      ▼                        ▼
//!   failed ◄──────────────── failed/cancelled
//! ```

use crate::item::{ItemStatus, TransferItem};
use lanbeam_discovery::Peer;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use uuid::Uuid;

/// Which way the bytes flow, seen from this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// We are the sender.
    Outgoing,
    /// We are the receiver.
    Incoming,
}

/// Session lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Waiting for the peer's accept/decline.
    Pending,
    /// Data is flowing.
    InProgress,
    /// All items delivered (some may have failed individually).
    Completed,
    /// The session died; see `last_error`.
    Failed,
    /// Either side cancelled.
    Cancelled,
}

impl SessionStatus {
    /// Whether this status is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// One end-to-end transfer.
#[derive(Debug, Clone)]
pub struct TransferSession {
    /// Stable session id, shared by both sides as the `transfer_id`.
    pub id: Uuid,
    /// Snapshot of the peer at session creation.
    pub peer: Peer,
    /// Direction seen from this host.
    pub direction: Direction,
    status: SessionStatus,
    /// Ordered items; owned exclusively by this session.
    pub items: Vec<TransferItem>,
    /// Aggregate bytes, fixed at creation (outgoing) or taken from the
    /// request (incoming).
    pub total_bytes: u64,
    /// Total file count, fixed like `total_bytes`.
    pub total_files: u64,
    bytes_transferred: u64,
    files_completed: u64,
    /// Name of the file currently on the wire.
    pub current_file: Option<String>,
    /// When streaming started.
    pub started_at: Option<Instant>,
    /// When a terminal status was reached.
    pub ended_at: Option<Instant>,
    /// Failure detail for `Failed`/`Cancelled`.
    pub last_error: Option<String>,
    /// Smoothed throughput estimate, refreshed with each progress event.
    pub current_bps: Option<f64>,
}

impl TransferSession {
    /// Create an outgoing session with totals fixed from the item list and
    /// a pre-computed folder byte count.
    #[must_use]
    pub fn outgoing(peer: Peer, items: Vec<TransferItem>, total_bytes: u64, total_files: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            direction: Direction::Outgoing,
            status: SessionStatus::Pending,
            items,
            total_bytes,
            total_files,
            bytes_transferred: 0,
            files_completed: 0,
            current_file: None,
            started_at: None,
            ended_at: None,
            last_error: None,
            current_bps: None,
        }
    }

    /// Create an incoming session from a transfer request.
    #[must_use]
    pub fn incoming(
        transfer_id: Uuid,
        peer: Peer,
        items: Vec<TransferItem>,
        total_bytes: u64,
        total_files: u64,
    ) -> Self {
        Self {
            id: transfer_id,
            peer,
            direction: Direction::Incoming,
            status: SessionStatus::Pending,
            items,
            total_bytes,
            total_files,
            bytes_transferred: 0,
            files_completed: 0,
            current_file: None,
            started_at: None,
            ended_at: None,
            last_error: None,
            current_bps: None,
        }
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Attempt a status transition.
    ///
    /// Returns `false` when the session is already terminal (the transition
    /// is dropped) or when the target equals the current status. Exactly one
    /// caller wins each terminal transition.
    pub fn transition(&mut self, to: SessionStatus) -> bool {
        if self.status.is_terminal() || self.status == to {
            return false;
        }
        self.status = to;
        match to {
            SessionStatus::InProgress => self.started_at = Some(Instant::now()),
            s if s.is_terminal() => self.ended_at = Some(Instant::now()),
            _ => {}
        }
        true
    }

    /// Attempt a terminal transition with a reason attached.
    pub fn fail(&mut self, to: SessionStatus, error: impl Into<String>) -> bool {
        debug_assert!(to.is_terminal());
        if self.transition(to) {
            self.last_error = Some(error.into());
            true
        } else {
            false
        }
    }

    /// Add to the monotone bytes counter.
    pub fn add_bytes(&mut self, bytes: u64) {
        self.bytes_transferred += bytes;
    }

    /// Bytes moved so far.
    #[must_use]
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    /// Record a file completion.
    pub fn file_completed(&mut self) {
        self.files_completed += 1;
    }

    /// Files fully delivered so far.
    #[must_use]
    pub fn files_completed(&self) -> u64 {
        self.files_completed
    }

    /// Find an item by id.
    #[must_use]
    pub fn item_mut(&mut self, id: Uuid) -> Option<&mut TransferItem> {
        self.items.iter_mut().find(|item| item.id == id)
    }

    /// Number of items that individually failed.
    #[must_use]
    pub fn failed_items(&self) -> usize {
        self.items
            .iter()
            .filter(|item| item.status == ItemStatus::Failed)
            .count()
    }
}

/// Shared handle to a session, mutated under a short-lived lock.
///
/// Events are built from clones taken inside the lock and emitted after it
/// is released.
pub type SessionHandle = Arc<Mutex<TransferSession>>;

/// Wrap a session for sharing between the manager and its data-plane task.
#[must_use]
pub fn share(session: TransferSession) -> SessionHandle {
    Arc::new(Mutex::new(session))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanbeam_discovery::{Peer, PeerKey};
    use lanbeam_net::ConnectionType;
    use std::path::PathBuf;

    pub(crate) fn test_peer() -> Peer {
        Peer {
            key: PeerKey {
                ip: "192.168.1.20".parse().unwrap(),
                port: 6442,
                interface: "eth0".to_string(),
            },
            name: "remote".to_string(),
            platform: "linux".to_string(),
            system: "test".to_string(),
            avatar: String::new(),
            signature: "sig-remote".to_string(),
            connection_type: ConnectionType::Ethernet,
            last_seen: Instant::now(),
        }
    }

    fn session() -> TransferSession {
        let items = vec![TransferItem::file("a.bin", PathBuf::from("/tmp/a.bin"), 100)];
        TransferSession::outgoing(test_peer(), items, 100, 1)
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut s = session();
        assert_eq!(s.status(), SessionStatus::Pending);
        assert!(s.transition(SessionStatus::InProgress));
        assert!(s.started_at.is_some());
        assert!(s.transition(SessionStatus::Completed));
        assert!(s.ended_at.is_some());
    }

    #[test]
    fn test_terminal_state_is_sticky() {
        let mut s = session();
        assert!(s.fail(SessionStatus::Failed, "declined: no thanks"));
        // Every later transition loses.
        assert!(!s.transition(SessionStatus::InProgress));
        assert!(!s.transition(SessionStatus::Completed));
        assert!(!s.fail(SessionStatus::Cancelled, "too late"));
        assert_eq!(s.status(), SessionStatus::Failed);
        assert_eq!(s.last_error.as_deref(), Some("declined: no thanks"));
    }

    #[test]
    fn test_exactly_one_terminal_winner() {
        let mut s = session();
        s.transition(SessionStatus::InProgress);
        let first = s.transition(SessionStatus::Cancelled);
        let second = s.transition(SessionStatus::Failed);
        assert!(first);
        assert!(!second);
    }

    #[test]
    fn test_bytes_counter_is_monotone() {
        let mut s = session();
        s.add_bytes(10);
        s.add_bytes(20);
        assert_eq!(s.bytes_transferred(), 30);
    }

    #[test]
    fn test_pending_can_fail_directly() {
        // Decline and timeout skip in-progress entirely.
        let mut s = session();
        assert!(s.fail(SessionStatus::Failed, "accept timeout"));
        assert_eq!(s.status(), SessionStatus::Failed);
    }

    #[test]
    fn test_incoming_keeps_request_id() {
        let id = Uuid::new_v4();
        let s = TransferSession::incoming(id, test_peer(), Vec::new(), 42, 1);
        assert_eq!(s.id, id);
        assert_eq!(s.direction, Direction::Incoming);
    }
}
