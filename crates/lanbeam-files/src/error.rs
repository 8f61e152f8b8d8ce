//! Error types for the filesystem plane.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by walking, writing, or querying the filesystem.
#[derive(Debug, Error)]
pub enum FileError {
    /// The walk root does not exist or is not a directory.
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    /// A path component was not valid UTF-8 and cannot travel on the wire.
    #[error("path is not valid UTF-8: {0}")]
    NonUtf8Path(PathBuf),

    /// Creating or writing the destination failed.
    #[error("write failed at {path}: {source}")]
    Write {
        /// Destination (or temp) path involved.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// Querying volume free space failed.
    #[error("free-space query failed for {path}: {source}")]
    Space {
        /// Volume path queried.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// Generic filesystem I/O error.
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
}
