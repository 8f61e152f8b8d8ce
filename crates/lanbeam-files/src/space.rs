//! Volume free-space queries.
//!
//! The receiver runs a disk preflight before accepting a transfer: the
//! advertised total size must fit on the volume holding the chosen save
//! location. The query walks up to the nearest existing ancestor so a
//! not-yet-created destination directory still resolves to its volume.

use crate::error::FileError;
use std::path::Path;

/// Bytes available to unprivileged writes on the volume containing `path`.
///
/// `path` itself does not need to exist; the nearest existing ancestor is
/// queried instead.
///
/// # Errors
///
/// Returns [`FileError::Space`] when no ancestor exists or the OS query
/// fails.
pub fn available_space(path: &Path) -> Result<u64, FileError> {
    let mut probe = path;
    loop {
        if probe.exists() {
            return fs4::available_space(probe).map_err(|source| FileError::Space {
                path: path.to_path_buf(),
                source,
            });
        }
        match probe.parent() {
            Some(parent) => probe = parent,
            None => {
                return Err(FileError::Space {
                    path: path.to_path_buf(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "no existing ancestor",
                    ),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_existing_path_reports_space() {
        let dir = tempdir().unwrap();
        let free = available_space(dir.path()).unwrap();
        assert!(free > 0);
    }

    #[test]
    fn test_missing_path_resolves_through_ancestor() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("not").join("created").join("yet");
        let free = available_space(&missing).unwrap();
        assert!(free > 0);
    }
}
