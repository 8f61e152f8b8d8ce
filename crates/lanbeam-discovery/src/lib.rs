//! # LANBEAM Discovery
//!
//! Peer discovery and the transfer control channel for the LANBEAM engine.
//!
//! This crate provides:
//! - **Datagram codec**: the JSON discovery wire format (`hello`, `goodbye`,
//!   and the four `transfer_*` control messages), tolerant of unknown types
//!   and unknown optional fields for forward compatibility
//! - **Peer table**: upsert-on-hello, liveness TTL, `(ip, port, interface)`
//!   identity
//! - **Discovery engine**: one receiving UDP socket plus per-interface
//!   broadcast senders, periodic hello, unicast presence sweep, peer reaper,
//!   and the `peer_found` / `peer_lost` / control event streams
//! - **Control channel**: retransmitting sender for the unreliable UDP
//!   control exchange (request / accept / decline / cancel)
//!
//! ## Socket layout
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                 DiscoveryEngine                        │
//! │  recv: 0.0.0.0:6442 (SO_BROADCAST, SO_REUSEADDR)       │
//! │  send: one socket per active physical interface        │
//! ├──────────────┬──────────────┬──────────────────────────┤
//! │ hello timer  │ sweep timer  │ reaper timer             │
//! │ (~5 s bcast) │ (~30 s ucast)│ (evict after ~15 s)      │
//! └──────────────┴──────────────┴──────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod control;
pub mod engine;
pub mod error;
pub mod peer;
pub mod wire;

pub use control::{ControlSender, RetransmitHandle, RETRANSMIT_ATTEMPTS, RETRANSMIT_INTERVAL};
pub use engine::{
    ControlEnvelope, DiscoveryConfig, DiscoveryEngine, DiscoveryEvent, DiscoveryStreams,
    LocalIdentity,
};
pub use error::DiscoveryError;
pub use peer::{Peer, PeerKey, PeerTable};
pub use wire::{
    Datagram, ItemPreview, Origin, TransferAcceptBody, TransferCancelBody, TransferDeclineBody,
    TransferRequestBody, MAX_DATAGRAM_SIZE, bound_request,
};

/// Result type for discovery operations.
pub type Result<T> = std::result::Result<T, DiscoveryError>;
