//! Startup preflight checks.
//!
//! Port preflight binds the configured port once before the engine claims
//! it, and on failure tries to name the conflicting process so the user
//! message is actionable. Disk preflight verifies the receiving volume can
//! hold an advertised payload before the accept goes out.

use crate::error::EngineError;
use std::net::{Ipv4Addr, SocketAddrV4, TcpListener, UdpSocket};
use std::path::Path;

/// Verify both the UDP and TCP side of `port` can be bound.
///
/// # Errors
///
/// [`EngineError::PortUnavailable`], with the conflicting process name when
/// the platform lets us find it.
pub fn preflight_port(port: u16) -> Result<(), EngineError> {
    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);

    if UdpSocket::bind(addr).is_err() || TcpListener::bind(addr).is_err() {
        return Err(EngineError::PortUnavailable {
            port,
            process: conflicting_process(port),
        });
    }
    Ok(())
}

/// Verify the volume holding `path` has room for `need` bytes.
///
/// # Errors
///
/// [`EngineError::InsufficientSpace`] when it does not, or the underlying
/// probe error when free space cannot be determined.
pub fn preflight_disk_space(path: &Path, need: u64) -> Result<(), EngineError> {
    let have = lanbeam_files::available_space(path)
        .map_err(|e| EngineError::Io(std::io::Error::other(e.to_string())))?;
    if have < need {
        return Err(EngineError::InsufficientSpace {
            need,
            have,
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

/// Best-effort name of the process listening on `port`.
///
/// Linux only: walks `/proc/net/{udp,tcp}` for the inode bound to the port,
/// then scans `/proc/*/fd` for the socket and reads the owner's `comm`.
/// Everywhere else the answer is `None` and the error message names only
/// the port.
#[must_use]
pub fn conflicting_process(port: u16) -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        linux::process_on_port(port)
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = port;
        None
    }
}

#[cfg(target_os = "linux")]
mod linux {
    use std::fs;

    /// Socket inodes bound to `port` in one /proc/net table.
    fn inodes_on_port(table: &str, port: u16) -> Vec<u64> {
        let Ok(content) = fs::read_to_string(table) else {
            return Vec::new();
        };

        content
            .lines()
            .skip(1)
            .filter_map(|line| {
                let fields: Vec<&str> = line.split_whitespace().collect();
                let local = fields.get(1)?;
                let (_, port_hex) = local.rsplit_once(':')?;
                let bound = u16::from_str_radix(port_hex, 16).ok()?;
                if bound != port {
                    return None;
                }
                fields.get(9)?.parse().ok()
            })
            .collect()
    }

    pub(super) fn process_on_port(port: u16) -> Option<String> {
        let mut inodes = inodes_on_port("/proc/net/udp", port);
        inodes.extend(inodes_on_port("/proc/net/tcp", port));
        if inodes.is_empty() {
            return None;
        }

        let targets: Vec<String> = inodes.iter().map(|i| format!("socket:[{i}]")).collect();

        for proc_entry in fs::read_dir("/proc").ok()?.flatten() {
            let name = proc_entry.file_name();
            let Some(pid) = name.to_str().filter(|s| s.chars().all(|c| c.is_ascii_digit()))
            else {
                continue;
            };

            let fd_dir = format!("/proc/{pid}/fd");
            let Ok(fds) = fs::read_dir(&fd_dir) else {
                continue;
            };

            for fd in fds.flatten() {
                let Ok(link) = fs::read_link(fd.path()) else {
                    continue;
                };
                let link = link.to_string_lossy();
                if targets.iter().any(|t| *t == link) {
                    let comm = fs::read_to_string(format!("/proc/{pid}/comm")).ok()?;
                    return Some(comm.trim().to_string());
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_preflight_free_port_passes() {
        // Find a free port, release it, preflight it.
        let probe = TcpListener::bind("0.0.0.0:0").unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);
        assert!(preflight_port(port).is_ok());
    }

    #[test]
    fn test_preflight_taken_port_fails() {
        let holder = TcpListener::bind("0.0.0.0:0").unwrap();
        let port = holder.local_addr().unwrap().port();

        match preflight_port(port) {
            Err(EngineError::PortUnavailable { port: p, .. }) => assert_eq!(p, port),
            other => panic!("expected PortUnavailable, got {other:?}"),
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_conflicting_process_names_ourselves() {
        let holder = UdpSocket::bind("0.0.0.0:0").unwrap();
        let port = holder.local_addr().unwrap().port();

        // We hold the socket, so the answer should be this test binary
        // (or None where /proc is restricted).
        if let Some(name) = conflicting_process(port) {
            assert!(!name.is_empty());
        }
    }

    #[test]
    fn test_disk_preflight_passes_for_small_need() {
        let dir = tempdir().unwrap();
        assert!(preflight_disk_space(dir.path(), 1).is_ok());
    }

    #[test]
    fn test_disk_preflight_fails_for_absurd_need() {
        let dir = tempdir().unwrap();
        match preflight_disk_space(dir.path(), u64::MAX) {
            Err(EngineError::InsufficientSpace { need, have, .. }) => {
                assert_eq!(need, u64::MAX);
                assert!(have < u64::MAX);
            }
            other => panic!("expected InsufficientSpace, got {other:?}"),
        }
    }
}
