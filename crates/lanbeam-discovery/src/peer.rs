//! The peer table.
//!
//! Peer identity is the `(ip, listen_port, interface)` triple; display
//! attributes are presentation-only and refreshed on every re-announce.
//! The table is upsert-only from the receive loop and swept by the reaper;
//! events are emitted by the engine after the table lock is released.

use crate::wire::HelloBody;
use dashmap::DashMap;
use lanbeam_net::ConnectionType;
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// Peer identity: where it listens and which interface it announced from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerKey {
    /// Peer IP address, taken from the datagram source.
    pub ip: IpAddr,
    /// Peer listen port, taken from the announced `from` endpoint.
    pub port: u16,
    /// Peer's announced primary interface name.
    pub interface: String,
}

/// A discovered peer.
#[derive(Debug, Clone)]
pub struct Peer {
    /// Identity triple.
    pub key: PeerKey,
    /// Display name.
    pub name: String,
    /// Platform string.
    pub platform: String,
    /// Free-form system string.
    pub system: String,
    /// Avatar URL, opaque and presentation-only.
    pub avatar: String,
    /// Stable per-host identifier used to key remembered save locations.
    pub signature: String,
    /// Peer's own interface classification.
    pub connection_type: ConnectionType,
    /// When the last announcement arrived.
    pub last_seen: Instant,
}

impl Peer {
    /// Build a peer from a received `hello`.
    #[must_use]
    pub fn from_hello(src_ip: IpAddr, listen_port: u16, hello: &HelloBody) -> Self {
        Self {
            key: PeerKey {
                ip: src_ip,
                port: listen_port,
                interface: hello.interface.clone(),
            },
            name: hello.origin.name.clone(),
            platform: hello.origin.platform.clone(),
            system: hello.origin.system.clone(),
            avatar: hello.avatar.clone(),
            signature: hello.origin.signature.clone(),
            connection_type: hello.connection_type,
            last_seen: Instant::now(),
        }
    }

    /// The peer's control/data endpoint.
    #[must_use]
    pub fn endpoint(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::new(self.key.ip, self.key.port)
    }
}

impl PartialEq for Peer {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Peer {}

/// Concurrent peer table keyed by identity.
#[derive(Debug, Default)]
pub struct PeerTable {
    entries: DashMap<PeerKey, Peer>,
}

impl PeerTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a peer.
    ///
    /// Returns `true` when the identity was not present before (first sight
    /// or re-added after expiry); the engine emits `peer_found` for those.
    pub fn upsert(&self, peer: Peer) -> bool {
        self.entries.insert(peer.key.clone(), peer).is_none()
    }

    /// Remove a peer by identity, returning it when present.
    pub fn remove(&self, key: &PeerKey) -> Option<Peer> {
        self.entries.remove(key).map(|(_, peer)| peer)
    }

    /// Remove every peer whose `last_seen` is older than `ttl`, returning
    /// the evicted peers.
    pub fn reap(&self, ttl: Duration) -> Vec<Peer> {
        let now = Instant::now();
        let expired: Vec<PeerKey> = self
            .entries
            .iter()
            .filter(|entry| now.duration_since(entry.last_seen) > ttl)
            .map(|entry| entry.key().clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|key| self.remove(&key))
            .collect()
    }

    /// Remove every peer announced from a given IP (used on `goodbye`,
    /// which carries no interface name).
    pub fn remove_by_endpoint(&self, ip: IpAddr, port: u16) -> Vec<Peer> {
        let matching: Vec<PeerKey> = self
            .entries
            .iter()
            .filter(|entry| entry.key().ip == ip && entry.key().port == port)
            .map(|entry| entry.key().clone())
            .collect();

        matching
            .into_iter()
            .filter_map(|key| self.remove(&key))
            .collect()
    }

    /// Immutable snapshot of all peers.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Peer> {
        self.entries.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Number of known peers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a peer by identity.
    #[must_use]
    pub fn get(&self, key: &PeerKey) -> Option<Peer> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Origin;

    fn hello(name: &str, iface: &str) -> HelloBody {
        HelloBody {
            origin: Origin {
                from: "192.168.1.20:6442".to_string(),
                name: name.to_string(),
                platform: "linux".to_string(),
                system: "test".to_string(),
                signature: format!("sig-{name}"),
            },
            avatar: String::new(),
            connection_type: ConnectionType::Ethernet,
            interface: iface.to_string(),
            nonce: 1,
        }
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_upsert_reports_first_sight_only() {
        let table = PeerTable::new();
        let peer = Peer::from_hello(ip("192.168.1.20"), 6442, &hello("alpha", "eth0"));

        assert!(table.upsert(peer.clone()));
        assert!(!table.upsert(peer));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_identity_is_the_triple_not_the_name() {
        let table = PeerTable::new();
        let first = Peer::from_hello(ip("192.168.1.20"), 6442, &hello("alpha", "eth0"));
        let renamed = Peer::from_hello(ip("192.168.1.20"), 6442, &hello("bravo", "eth0"));

        table.upsert(first);
        assert!(!table.upsert(renamed.clone()));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&renamed.key).unwrap().name, "bravo");
    }

    #[test]
    fn test_same_host_different_interface_is_a_distinct_peer() {
        let table = PeerTable::new();
        table.upsert(Peer::from_hello(ip("192.168.1.20"), 6442, &hello("alpha", "eth0")));
        table.upsert(Peer::from_hello(ip("192.168.1.20"), 6442, &hello("alpha", "wlan0")));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_reap_evicts_only_stale_entries() {
        let table = PeerTable::new();
        let mut stale = Peer::from_hello(ip("192.168.1.20"), 6442, &hello("old", "eth0"));
        stale.last_seen = Instant::now() - Duration::from_secs(60);
        let fresh = Peer::from_hello(ip("192.168.1.21"), 6442, &hello("new", "eth0"));

        table.upsert(stale);
        table.upsert(fresh);

        let evicted = table.reap(Duration::from_secs(15));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].name, "old");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_reaped_peer_reappears_on_new_hello() {
        let table = PeerTable::new();
        let mut peer = Peer::from_hello(ip("192.168.1.20"), 6442, &hello("alpha", "eth0"));
        peer.last_seen = Instant::now() - Duration::from_secs(60);
        table.upsert(peer);
        table.reap(Duration::from_secs(15));
        assert!(table.is_empty());

        // A later hello counts as first sight again.
        let back = Peer::from_hello(ip("192.168.1.20"), 6442, &hello("alpha", "eth0"));
        assert!(table.upsert(back));
    }

    #[test]
    fn test_goodbye_removes_all_interfaces_of_endpoint() {
        let table = PeerTable::new();
        table.upsert(Peer::from_hello(ip("192.168.1.20"), 6442, &hello("alpha", "eth0")));
        table.upsert(Peer::from_hello(ip("192.168.1.20"), 6442, &hello("alpha", "wlan0")));
        table.upsert(Peer::from_hello(ip("192.168.1.21"), 6442, &hello("bravo", "eth0")));

        let removed = table.remove_by_endpoint(ip("192.168.1.20"), 6442);
        assert_eq!(removed.len(), 2);
        assert_eq!(table.len(), 1);
    }
}
