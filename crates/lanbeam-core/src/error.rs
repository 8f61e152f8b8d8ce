//! Error taxonomy for the transfer engine.
//!
//! Per-item I/O failures stay on the item and never abort a session; every
//! other error surfaces to observers through the `session_failed` event.
//! Discovery's transient send errors are swallowed below this layer; only
//! bind failure is fatal.

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the engine and its sessions.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The shared discovery/data port could not be bound at startup.
    #[error("port {port} unavailable{}", .process.as_deref().map(|p| format!(" (held by {p})")).unwrap_or_default())]
    PortUnavailable {
        /// The configured port.
        port: u16,
        /// Conflicting process name, when the platform could identify it.
        process: Option<String>,
    },

    /// No usable non-loopback interface exists.
    #[error("no usable network interface")]
    InterfaceUnavailable,

    /// Wire decode failure on the data stream; fatal to the affected
    /// session, not to the engine.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// The underlying transport closed mid-stream.
    #[error("peer disconnected: {0}")]
    PeerDisconnected(String),

    /// Filesystem failure on a specific item; non-fatal to the session.
    #[error("I/O error on item {item}: {cause}")]
    LocalIoError {
        /// Logical name of the affected item.
        item: String,
        /// Underlying failure text.
        cause: String,
    },

    /// The receiving volume cannot hold the advertised payload.
    #[error("insufficient space at {}: need {need} bytes, have {have}", .path.display())]
    InsufficientSpace {
        /// Bytes the transfer needs.
        need: u64,
        /// Bytes available on the volume.
        have: u64,
        /// The probed save location.
        path: PathBuf,
    },

    /// The peer did not answer a transfer request within the accept window.
    #[error("accept timeout")]
    AcceptTimeout,

    /// Explicit cancellation on either side.
    #[error("cancelled")]
    UserCancelled,

    /// A data connection arrived with a transfer id nobody registered.
    #[error("unauthorized transfer {0}")]
    UnauthorizedTransfer(uuid::Uuid),

    /// The session id is not known to the manager.
    #[error("unknown session {0}")]
    UnknownSession(uuid::Uuid),

    /// Discovery startup failure.
    #[error(transparent)]
    Discovery(#[from] lanbeam_discovery::DiscoveryError),

    /// Generic I/O failure outside any item scope.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Whether this error stays on the item that produced it.
    #[must_use]
    pub fn is_item_scoped(&self) -> bool {
        matches!(self, Self::LocalIoError { .. })
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
