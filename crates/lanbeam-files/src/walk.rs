//! Directory walking for folder transfers.
//!
//! A folder item is streamed as one frame per descendant file, each carrying
//! a posix-separated path relative to the top-level selection name. The walk
//! is breadth-first over an explicit queue (no async recursion), does not
//! follow symlinks, and collects unreadable entries instead of failing the
//! whole selection.

use crate::error::FileError;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

/// One regular file produced by a walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkedFile {
    /// Absolute path on the sending host.
    pub source: PathBuf,
    /// Posix-separated path relative to (and including) the selection name,
    /// e.g. `dir/sub/y.bin`.
    pub relative_path: String,
    /// File size in bytes at walk time.
    pub size: u64,
}

/// Everything a walk found.
#[derive(Debug, Default)]
pub struct WalkOutcome {
    /// Readable regular files, in deterministic (sorted per directory) order.
    pub files: Vec<WalkedFile>,
    /// Entries that could not be read, with the OS error text.
    pub unreadable: Vec<(PathBuf, String)>,
    /// Sum of sizes of the readable files.
    pub total_bytes: u64,
}

/// Walk `root`, producing entries rooted at `root_name`.
///
/// `root_name` is the logical name of the selection (usually the directory's
/// file name); descendants appear as `root_name/...`. Symlinks are recorded
/// neither as files nor as errors; they are skipped.
///
/// # Errors
///
/// Returns [`FileError::NotADirectory`] when `root` is not a directory.
/// Unreadable descendants are reported in the outcome, not as errors.
pub async fn walk_tree(root: &Path, root_name: &str) -> Result<WalkOutcome, FileError> {
    let meta = tokio::fs::symlink_metadata(root)
        .await
        .map_err(|_| FileError::NotADirectory(root.to_path_buf()))?;
    if !meta.is_dir() {
        return Err(FileError::NotADirectory(root.to_path_buf()));
    }

    let mut outcome = WalkOutcome::default();
    let mut queue: VecDeque<(PathBuf, String)> = VecDeque::new();
    queue.push_back((root.to_path_buf(), root_name.to_string()));

    while let Some((dir, prefix)) = queue.pop_front() {
        let mut reader = match tokio::fs::read_dir(&dir).await {
            Ok(reader) => reader,
            Err(e) => {
                tracing::debug!(path = %dir.display(), error = %e, "unreadable directory");
                outcome.unreadable.push((dir, e.to_string()));
                continue;
            }
        };

        // Collect then sort so frame order is stable across platforms.
        let mut entries = Vec::new();
        loop {
            match reader.next_entry().await {
                Ok(Some(entry)) => entries.push(entry.path()),
                Ok(None) => break,
                Err(e) => {
                    outcome.unreadable.push((dir.clone(), e.to_string()));
                    break;
                }
            }
        }
        entries.sort();

        for path in entries {
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => {
                    outcome
                        .unreadable
                        .push((path.clone(), "non-UTF-8 file name".to_string()));
                    continue;
                }
            };
            let relative = format!("{prefix}/{name}");

            let meta = match tokio::fs::symlink_metadata(&path).await {
                Ok(meta) => meta,
                Err(e) => {
                    outcome.unreadable.push((path, e.to_string()));
                    continue;
                }
            };

            if meta.file_type().is_symlink() {
                tracing::debug!(path = %path.display(), "skipping symlink");
                continue;
            }

            if meta.is_dir() {
                queue.push_back((path, relative));
            } else if meta.is_file() {
                // Readability check up front so the receiver never sees a
                // frame we cannot back with bytes.
                match tokio::fs::File::open(&path).await {
                    Ok(_) => {
                        outcome.total_bytes += meta.len();
                        outcome.files.push(WalkedFile {
                            source: path,
                            relative_path: relative,
                            size: meta.len(),
                        });
                    }
                    Err(e) => {
                        outcome.unreadable.push((path, e.to_string()));
                    }
                }
            }
        }
    }

    Ok(outcome)
}
