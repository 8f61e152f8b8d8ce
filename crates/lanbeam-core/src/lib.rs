//! # LANBEAM Core
//!
//! The peer-to-peer LAN transfer engine: session management, the transfer
//! data plane, and everything that coordinates discovery with the wire.
//!
//! This crate provides:
//! - **Engine orchestration**: [`Engine`] wires discovery, the transfer
//!   listener, the session manager, and the interface watcher together
//! - **Transfer framing**: length-prefixed JSON manifests plus raw payload
//!   on a reliable byte stream
//! - **Session state machine**: pending → in-progress → terminal, monotone,
//!   with exactly one terminal event per session
//! - **Data plane**: per-session sender and receiver tasks with atomic
//!   destination writes, collision-free naming, and partial-failure
//!   handling
//! - **Speed estimation**: rolling-window smoothed throughput and ETA
//! - **Event bus**: bounded multi-consumer queues that coalesce progress
//!   bursts
//! - **Supervision**: port and disk-space preflight
//!
//! ## Quick start
//!
//! ```no_run
//! use lanbeam_core::{Engine, EngineConfig, Providers};
//! use lanbeam_core::providers::{
//!     MemorySaveLocations, MemorySettingsStore, StaticHostInfo,
//! };
//! use lanbeam_net::SystemEnumerator;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Engine::start(
//!         EngineConfig::default(),
//!         Providers {
//!             settings: Arc::new(MemorySettingsStore::default()),
//!             save_memory: Arc::new(MemorySaveLocations::new("/tmp".into())),
//!             host: Arc::new(StaticHostInfo {
//!                 hostname: "host".into(),
//!                 username: "user".into(),
//!                 platform: "linux".into(),
//!                 system: "linux".into(),
//!             }),
//!             interfaces: Arc::new(SystemEnumerator),
//!         },
//!     )
//!     .await?;
//!
//!     let mut events = engine.subscribe();
//!     loop {
//!         let event = events.recv().await;
//!         println!("{event:?}");
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod frame;
pub mod item;
pub mod manager;
pub mod providers;
pub mod receiver;
pub mod sender;
pub mod session;
pub mod speed;
pub mod supervision;

pub use config::EngineConfig;
pub use engine::{Engine, Providers};
pub use error::{EngineError, Result};
pub use events::{EngineEvent, EventBus, EventStream, IncomingRequest};
pub use frame::{FrameManifest, ItemManifest, SessionHeader};
pub use item::{ItemKind, ItemStatus, TransferItem};
pub use manager::SessionManager;
pub use session::{Direction, SessionStatus, TransferSession};
pub use speed::SpeedEstimator;

/// Default discovery/data port.
pub const DEFAULT_PORT: u16 = 6442;
