//! # LANBEAM Net
//!
//! Network plumbing for the LANBEAM transfer engine.
//!
//! This crate provides:
//! - **Interface enumeration**: listing NICs with their addresses, including
//!   link-local ones (needed to spot Ethernet adapters stuck on APIPA)
//! - **Interface classification**: ethernet/wifi/vpn/bluetooth and
//!   physical-vs-virtual heuristics, driven by a configurable token table
//! - **Primary interface selection**: the three-pass preference order used
//!   by discovery to decide which NIC represents this host
//! - **UDP socket construction**: broadcast-capable, address-reusing sockets
//!   built through `socket2` so options are set before binding
//! - **Interface change watching**: a polling watcher that reports
//!   meaningful interface deltas so discovery can rebind
//!
//! Everything here is transport-agnostic policy: no discovery datagrams, no
//! transfer framing. Those live in `lanbeam-discovery` and `lanbeam-core`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod iface;
pub mod udp;
pub mod watcher;

pub use error::NetError;
pub use iface::{
    ClassifiedInterface, ConnectionType, InterfaceClassifier, NetIfEnumerator, NetInterface,
    SystemEnumerator, select_primary,
};
pub use udp::{BroadcastGroup, InterfaceSender, bind_broadcast_udp};
pub use watcher::{InterfaceChange, InterfaceWatcher};

/// Result type for network plumbing operations.
pub type Result<T> = std::result::Result<T, NetError>;
