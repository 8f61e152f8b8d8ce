//! Engine configuration.

use lanbeam_discovery::DiscoveryConfig;
use std::time::Duration;

/// Tunables for the whole engine.
///
/// Defaults match the protocol's published behavior; tests shrink the
/// timers to keep wall-clock time down.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Shared UDP (discovery/control) and TCP (data) port.
    pub port: u16,
    /// Discovery engine tunables.
    pub discovery: DiscoveryConfig,
    /// How long a requester waits for accept/decline before giving up.
    pub accept_timeout: Duration,
    /// Minimum spacing between progress events.
    pub progress_interval: Duration,
    /// Minimum spacing between progress events in high-throughput mode.
    pub progress_interval_fast: Duration,
    /// Read/write chunk size on the data stream.
    pub io_chunk_size: usize,
    /// Per-subscriber event queue capacity.
    pub event_queue_capacity: usize,
    /// Maximum items named in a transfer-request preview before the
    /// datagram encoder starts cutting.
    pub preview_items: usize,
    /// Control-channel retransmission attempts.
    pub control_attempts: u32,
    /// Control-channel retransmission interval.
    pub control_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::with_port(6442)
    }
}

impl EngineConfig {
    /// A default configuration on a specific port.
    #[must_use]
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            discovery: DiscoveryConfig {
                port,
                ..DiscoveryConfig::default()
            },
            accept_timeout: Duration::from_secs(60),
            progress_interval: Duration::from_millis(100),
            progress_interval_fast: Duration::from_millis(50),
            io_chunk_size: 64 * 1024,
            event_queue_capacity: crate::events::DEFAULT_QUEUE_CAPACITY,
            preview_items: 10,
            control_attempts: lanbeam_discovery::RETRANSMIT_ATTEMPTS,
            control_interval: lanbeam_discovery::RETRANSMIT_INTERVAL,
        }
    }
}
