//! Interface enumeration, classification, and primary selection.
//!
//! Discovery needs to know which NICs to broadcast from and which address to
//! advertise as this host's identity. The classification heuristics are
//! substring tables rather than hard-coded match arms so that per-platform
//! tuning is a configuration change, not a code change.

use crate::error::NetError;
use network_interface::{NetworkInterface, NetworkInterfaceConfig};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};

/// Coarse link classification for an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    /// Wired ethernet adapter.
    Ethernet,
    /// Wireless 802.11 adapter.
    Wifi,
    /// Tunnel/VPN adapter.
    Vpn,
    /// Bluetooth PAN adapter.
    Bluetooth,
    /// Anything that matched no token table.
    Other,
}

impl std::fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ethernet => write!(f, "ethernet"),
            Self::Wifi => write!(f, "wifi"),
            Self::Vpn => write!(f, "vpn"),
            Self::Bluetooth => write!(f, "bluetooth"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// A network interface as seen by the enumerator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetInterface {
    /// OS interface name (e.g. `eth0`, `Ethernet 2`, `wlp3s0`).
    pub name: String,
    /// IPv4 addresses assigned to the interface, link-local included.
    pub ipv4s: Vec<Ipv4Addr>,
    /// IPv6 addresses assigned to the interface.
    pub ipv6s: Vec<std::net::Ipv6Addr>,
    /// Directed broadcast address, when the OS reports one.
    pub broadcast: Option<Ipv4Addr>,
    /// Whether this is the loopback interface.
    pub is_loopback: bool,
}

impl NetInterface {
    /// First IPv4 address outside the link-local range, if any.
    #[must_use]
    pub fn routable_ipv4(&self) -> Option<Ipv4Addr> {
        self.ipv4s.iter().copied().find(|ip| !ip.is_link_local())
    }

    /// First link-local (`169.254.0.0/16`) IPv4 address, if any.
    #[must_use]
    pub fn link_local_ipv4(&self) -> Option<Ipv4Addr> {
        self.ipv4s.iter().copied().find(Ipv4Addr::is_link_local)
    }

    /// Any IPv4 address, routable preferred.
    #[must_use]
    pub fn any_ipv4(&self) -> Option<Ipv4Addr> {
        self.routable_ipv4().or_else(|| self.link_local_ipv4())
    }
}

/// Source of interface listings.
///
/// Production uses [`SystemEnumerator`]; tests inject synthetic listings to
/// exercise selection and watcher logic without touching the OS.
pub trait NetIfEnumerator: Send + Sync {
    /// Enumerate all interfaces, loopback included (callers filter).
    fn interfaces(&self) -> Result<Vec<NetInterface>, NetError>;
}

/// Enumerator backed by the operating system via `network-interface`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnumerator;

impl NetIfEnumerator for SystemEnumerator {
    fn interfaces(&self) -> Result<Vec<NetInterface>, NetError> {
        let raw = NetworkInterface::show().map_err(|e| NetError::Enumerate(e.to_string()))?;

        let mut out: Vec<NetInterface> = Vec::with_capacity(raw.len());
        for iface in raw {
            let mut ipv4s = Vec::new();
            let mut ipv6s = Vec::new();
            let mut broadcast = None;
            let mut is_loopback = false;

            for addr in &iface.addr {
                match addr.ip() {
                    IpAddr::V4(ip) => {
                        if ip.is_loopback() {
                            is_loopback = true;
                        }
                        ipv4s.push(ip);
                        if let Some(IpAddr::V4(b)) = addr.broadcast() {
                            broadcast = Some(b);
                        }
                    }
                    IpAddr::V6(ip) => {
                        if ip.is_loopback() {
                            is_loopback = true;
                        }
                        ipv6s.push(ip);
                    }
                }
            }

            out.push(NetInterface {
                name: iface.name,
                ipv4s,
                ipv6s,
                broadcast,
                is_loopback,
            });
        }

        Ok(out)
    }
}

/// Token tables driving interface classification.
///
/// Matching is case-insensitive substring search over the interface name.
/// The defaults encode the common adapter naming conventions across
/// Windows, Linux, and macOS; hosts with exotic drivers can extend the
/// tables through configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceClassifier {
    /// Tokens marking wireless adapters.
    pub wifi_tokens: Vec<String>,
    /// Tokens marking wired adapters.
    pub ethernet_tokens: Vec<String>,
    /// Tokens marking tunnel/VPN adapters.
    pub vpn_tokens: Vec<String>,
    /// Tokens marking bluetooth adapters.
    pub bluetooth_tokens: Vec<String>,
    /// Tokens marking virtual adapters (hypervisors, containers).
    pub virtual_tokens: Vec<String>,
    /// Tokens marking known physical controller families.
    pub physical_tokens: Vec<String>,
}

fn tokens(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| (*s).to_string()).collect()
}

impl Default for InterfaceClassifier {
    fn default() -> Self {
        Self {
            wifi_tokens: tokens(&["wi-fi", "wifi", "wlan", "wireless", "wlp", "802.11", "airport"]),
            ethernet_tokens: tokens(&["ethernet", "eth", "enp", "eno", "ens", "lan", "en0", "en1"]),
            vpn_tokens: tokens(&["vpn", "tun", "tap", "wg", "wireguard", "ppp", "zerotier", "tailscale"]),
            bluetooth_tokens: tokens(&["bluetooth", "bnep", "pan"]),
            virtual_tokens: tokens(&[
                "virtualbox", "vmware", "hyper-v", "vethernet", "docker", "veth", "virbr",
                "br-", "vmnet", "loopback",
            ]),
            physical_tokens: tokens(&[
                "realtek", "intel", "broadcom", "qualcomm", "atheros", "killer", "marvell",
                "aquantia", "controller", "family",
            ]),
        }
    }
}

impl InterfaceClassifier {
    fn matches(table: &[String], name: &str) -> bool {
        table.iter().any(|t| name.contains(t.as_str()))
    }

    /// Classify an interface name into a [`ConnectionType`].
    #[must_use]
    pub fn classify(&self, name: &str) -> ConnectionType {
        let name = name.to_lowercase();
        if Self::matches(&self.vpn_tokens, &name) {
            ConnectionType::Vpn
        } else if Self::matches(&self.bluetooth_tokens, &name) {
            ConnectionType::Bluetooth
        } else if Self::matches(&self.wifi_tokens, &name) {
            ConnectionType::Wifi
        } else if Self::matches(&self.ethernet_tokens, &name) {
            ConnectionType::Ethernet
        } else {
            ConnectionType::Other
        }
    }

    /// Heuristic virtuality check.
    ///
    /// Virtual tokens win over physical tokens; a name matching neither
    /// table is treated as non-virtual.
    #[must_use]
    pub fn is_virtual(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        if Self::matches(&self.virtual_tokens, &name) {
            return true;
        }
        if Self::matches(&self.physical_tokens, &name) {
            return false;
        }
        false
    }

    /// Classify a whole interface listing.
    #[must_use]
    pub fn classify_all(&self, interfaces: Vec<NetInterface>) -> Vec<ClassifiedInterface> {
        interfaces
            .into_iter()
            .map(|info| ClassifiedInterface {
                kind: self.classify(&info.name),
                is_virtual: self.is_virtual(&info.name),
                info,
            })
            .collect()
    }
}

/// An interface plus its classification results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedInterface {
    /// The enumerated interface.
    pub info: NetInterface,
    /// Link classification.
    pub kind: ConnectionType,
    /// Virtuality heuristic result.
    pub is_virtual: bool,
}

impl ClassifiedInterface {
    /// Whether discovery should broadcast from this interface.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.info.is_loopback && !self.is_virtual && self.info.any_ipv4().is_some()
    }
}

/// Pick the primary interface using the three-pass preference order:
///
/// 1. physical ethernet with a routable (non-link-local) IPv4;
/// 2. physical ethernet with a link-local IPv4;
/// 3. any non-loopback, non-virtual interface with an IPv4.
#[must_use]
pub fn select_primary(interfaces: &[ClassifiedInterface]) -> Option<&ClassifiedInterface> {
    let physical_ethernet = |c: &&ClassifiedInterface| {
        !c.info.is_loopback && !c.is_virtual && c.kind == ConnectionType::Ethernet
    };

    interfaces
        .iter()
        .filter(physical_ethernet)
        .find(|c| c.info.routable_ipv4().is_some())
        .or_else(|| {
            interfaces
                .iter()
                .filter(physical_ethernet)
                .find(|c| c.info.link_local_ipv4().is_some())
        })
        .or_else(|| {
            interfaces
                .iter()
                .find(|c| !c.info.is_loopback && !c.is_virtual && c.info.any_ipv4().is_some())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iface(name: &str, ipv4s: &[&str]) -> NetInterface {
        NetInterface {
            name: name.to_string(),
            ipv4s: ipv4s.iter().map(|s| s.parse().unwrap()).collect(),
            ipv6s: Vec::new(),
            broadcast: None,
            is_loopback: name == "lo",
        }
    }

    #[test]
    fn test_classify_common_names() {
        let c = InterfaceClassifier::default();
        assert_eq!(c.classify("eth0"), ConnectionType::Ethernet);
        assert_eq!(c.classify("Ethernet 2"), ConnectionType::Ethernet);
        assert_eq!(c.classify("wlp3s0"), ConnectionType::Wifi);
        assert_eq!(c.classify("Wi-Fi"), ConnectionType::Wifi);
        assert_eq!(c.classify("tun0"), ConnectionType::Vpn);
        assert_eq!(c.classify("Tailscale Tunnel"), ConnectionType::Vpn);
        assert_eq!(c.classify("Bluetooth Network Connection"), ConnectionType::Bluetooth);
        assert_eq!(c.classify("mystery0"), ConnectionType::Other);
    }

    #[test]
    fn test_virtuality_heuristic() {
        let c = InterfaceClassifier::default();
        assert!(c.is_virtual("VirtualBox Host-Only Network"));
        assert!(c.is_virtual("vEthernet (WSL)"));
        assert!(c.is_virtual("docker0"));
        assert!(c.is_virtual("veth1a2b3c"));
        assert!(!c.is_virtual("Realtek PCIe GbE Family Controller"));
        assert!(!c.is_virtual("Intel(R) Ethernet Connection"));
        // Unknown names default to non-virtual.
        assert!(!c.is_virtual("mystery0"));
    }

    #[test]
    fn test_primary_prefers_routable_ethernet() {
        let c = InterfaceClassifier::default();
        let classified = c.classify_all(vec![
            iface("lo", &["127.0.0.1"]),
            iface("wlp3s0", &["192.168.1.20"]),
            iface("eth0", &["192.168.1.10"]),
        ]);
        let primary = select_primary(&classified).unwrap();
        assert_eq!(primary.info.name, "eth0");
    }

    #[test]
    fn test_primary_falls_back_to_link_local_ethernet() {
        let c = InterfaceClassifier::default();
        // Ethernet has only an APIPA address; it still beats wifi.
        let classified = c.classify_all(vec![
            iface("eth0", &["169.254.12.34"]),
            iface("wlp3s0", &["192.168.1.20"]),
        ]);
        let primary = select_primary(&classified).unwrap();
        assert_eq!(primary.info.name, "eth0");
        assert!(primary.info.routable_ipv4().is_none());
        assert!(primary.info.link_local_ipv4().is_some());
    }

    #[test]
    fn test_primary_third_pass_any_nonvirtual() {
        let c = InterfaceClassifier::default();
        let classified = c.classify_all(vec![
            iface("lo", &["127.0.0.1"]),
            iface("docker0", &["172.17.0.1"]),
            iface("mystery0", &["10.0.0.5"]),
        ]);
        let primary = select_primary(&classified).unwrap();
        assert_eq!(primary.info.name, "mystery0");
    }

    #[test]
    fn test_primary_none_when_only_loopback_and_virtual() {
        let c = InterfaceClassifier::default();
        let classified = c.classify_all(vec![
            iface("lo", &["127.0.0.1"]),
            iface("vmnet8", &["192.168.56.1"]),
        ]);
        assert!(select_primary(&classified).is_none());
    }

    #[test]
    fn test_is_active_excludes_loopback_and_virtual() {
        let c = InterfaceClassifier::default();
        let classified = c.classify_all(vec![
            iface("lo", &["127.0.0.1"]),
            iface("docker0", &["172.17.0.1"]),
            iface("eth0", &["192.168.1.10"]),
        ]);
        let active: Vec<_> = classified.iter().filter(|c| c.is_active()).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].info.name, "eth0");
    }

    #[test]
    fn test_link_local_detection() {
        let i = iface("eth0", &["169.254.1.1", "192.168.0.7"]);
        assert_eq!(i.link_local_ipv4(), Some("169.254.1.1".parse().unwrap()));
        assert_eq!(i.routable_ipv4(), Some("192.168.0.7".parse().unwrap()));
        assert_eq!(i.any_ipv4(), Some("192.168.0.7".parse().unwrap()));
    }
}
