//! Error types for network plumbing.

use thiserror::Error;

/// Errors produced while enumerating interfaces or constructing sockets.
#[derive(Debug, Error)]
pub enum NetError {
    /// Binding the discovery or data socket failed.
    #[error("failed to bind port {port}: {source}")]
    Bind {
        /// Port the bind was attempted on.
        port: u16,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The OS interface enumeration call failed.
    #[error("interface enumeration failed: {0}")]
    Enumerate(String),

    /// No non-loopback, non-virtual interface with an IPv4 address exists.
    #[error("no usable network interface")]
    NoUsableInterface,

    /// Generic socket I/O error.
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
}
