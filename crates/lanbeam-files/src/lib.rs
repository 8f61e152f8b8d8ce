//! # LANBEAM Files
//!
//! The filesystem plane of the LANBEAM transfer engine:
//!
//! - **Directory walking**: flattening a folder selection into orderly,
//!   posix-relative file entries without following symlinks, reporting
//!   unreadable descendants instead of aborting
//! - **Atomic destination writes**: write-to-temp-then-rename within the
//!   target directory, with cleanup on abort
//! - **Collision-free naming**: the ` (N)` suffix policy applied until the
//!   destination name is unique
//! - **Free-space queries**: the receiver-side disk preflight primitive
//!
//! All I/O is async via `tokio::fs`; decisions about what to do on failure
//! (per-item vs fatal) belong to the caller in `lanbeam-core`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod space;
pub mod walk;
pub mod writer;

pub use error::FileError;
pub use space::available_space;
pub use walk::{WalkOutcome, WalkedFile, walk_tree};
pub use writer::{AtomicFileWriter, collision_free_name, numbered_name};

/// Result type for filesystem plane operations.
pub type Result<T> = std::result::Result<T, FileError>;
