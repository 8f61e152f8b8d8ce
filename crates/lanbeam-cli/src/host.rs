//! OS-backed host identity for the CLI.

use lanbeam_core::providers::HostInfo;

/// Host identity detected from the operating system.
#[derive(Debug, Clone)]
pub struct SystemHostInfo {
    hostname: String,
    username: String,
    platform: String,
    system: String,
}

impl SystemHostInfo {
    /// Query the OS once and cache the answers.
    pub fn detect() -> Self {
        Self {
            hostname: gethostname::gethostname()
                .into_string()
                .unwrap_or_else(|_| "unknown-host".to_string()),
            username: whoami::username(),
            platform: std::env::consts::OS.to_string(),
            system: whoami::distro(),
        }
    }
}

impl HostInfo for SystemHostInfo {
    fn hostname(&self) -> String {
        self.hostname.clone()
    }

    fn username(&self) -> String {
        self.username.clone()
    }

    fn platform(&self) -> String {
        self.platform.clone()
    }

    fn system(&self) -> String {
        self.system.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_is_nonempty() {
        let host = SystemHostInfo::detect();
        assert!(!host.hostname().is_empty());
        assert!(!host.platform().is_empty());
    }
}
