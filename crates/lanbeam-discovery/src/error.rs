//! Error types for discovery and the control channel.

use thiserror::Error;

/// Errors surfaced by the discovery engine.
///
/// Transient send failures are logged and swallowed inside the engine; only
/// startup problems and codec misuse reach callers.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The discovery port could not be bound. Not retried.
    #[error("discovery port {port} unavailable{}", .process.as_deref().map(|p| format!(" (held by {p})")).unwrap_or_default())]
    PortUnavailable {
        /// The configured discovery port.
        port: u16,
        /// Conflicting process name, when the platform could identify it.
        process: Option<String>,
    },

    /// No non-loopback, non-virtual interface is available to send from.
    #[error("no usable network interface for discovery")]
    InterfaceUnavailable,

    /// A datagram could not be encoded (practically unreachable; encoding
    /// is total for well-formed bodies).
    #[error("datagram encode failed: {0}")]
    Encode(#[from] serde_json::Error),

    /// Underlying socket error outside the degraded-send path.
    #[error("discovery socket error: {0}")]
    Socket(#[from] std::io::Error),

    /// Network plumbing error during startup or rebind.
    #[error(transparent)]
    Net(#[from] lanbeam_net::NetError),

    /// The engine is not running.
    #[error("discovery engine stopped")]
    Stopped,
}
