//! Broadcast-capable UDP socket construction.
//!
//! Sockets are created through `socket2` so that `SO_REUSEADDR`,
//! `SO_REUSEPORT` (where it exists), and `SO_BROADCAST` are set before the
//! bind. Discovery shares one receiving socket; sending happens through one
//! socket per active physical interface, bound to that interface's address,
//! so broadcasts actually egress every NIC instead of whichever one the
//! kernel routes `255.255.255.255` to.

use crate::error::NetError;
use crate::iface::ClassifiedInterface;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::UdpSocket;

/// Bind a broadcast-capable UDP socket on `0.0.0.0:port`.
///
/// # Errors
///
/// Returns [`NetError::Bind`] when the port is taken or the socket options
/// cannot be applied. The caller treats this as fatal and does not retry.
pub fn bind_broadcast_udp(port: u16) -> Result<UdpSocket, NetError> {
    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);

    let socket = socket2::Socket::new(
        socket2::Domain::IPV4,
        socket2::Type::DGRAM,
        Some(socket2::Protocol::UDP),
    )
    .map_err(|source| NetError::Bind { port, source })?;

    socket
        .set_reuse_address(true)
        .map_err(|source| NetError::Bind { port, source })?;

    // SO_REUSEPORT exists on macOS/Linux; Windows gets by with SO_REUSEADDR.
    #[cfg(not(target_os = "windows"))]
    socket
        .set_reuse_port(true)
        .map_err(|source| NetError::Bind { port, source })?;

    socket
        .set_broadcast(true)
        .map_err(|source| NetError::Bind { port, source })?;

    socket
        .set_nonblocking(true)
        .map_err(|source| NetError::Bind { port, source })?;

    socket
        .bind(&SocketAddr::V4(addr).into())
        .map_err(|source| NetError::Bind { port, source })?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(|source| NetError::Bind { port, source })
}

/// A sending socket pinned to one interface's address.
pub struct InterfaceSender {
    /// Interface name the socket is bound on.
    pub interface: String,
    /// Local address the socket is bound to.
    pub local_ip: Ipv4Addr,
    /// Directed broadcast address for the interface's subnet, when known.
    pub directed_broadcast: Option<Ipv4Addr>,
    socket: UdpSocket,
}

impl InterfaceSender {
    /// Bind an ephemeral broadcast-capable socket on `local_ip`.
    pub fn bind(
        interface: String,
        local_ip: Ipv4Addr,
        directed_broadcast: Option<Ipv4Addr>,
    ) -> Result<Self, NetError> {
        let socket = socket2::Socket::new(
            socket2::Domain::IPV4,
            socket2::Type::DGRAM,
            Some(socket2::Protocol::UDP),
        )?;
        socket.set_broadcast(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&SocketAddr::V4(SocketAddrV4::new(local_ip, 0)).into())?;

        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket)?;

        Ok(Self {
            interface,
            local_ip,
            directed_broadcast,
            socket,
        })
    }

    /// Send a payload to an arbitrary destination from this interface.
    pub async fn send_to(&self, payload: &[u8], dest: SocketAddr) -> Result<usize, NetError> {
        Ok(self.socket.send_to(payload, dest).await?)
    }
}

/// All per-interface senders plus aggregate send statistics.
///
/// A send error on one interface is logged and does not stop the others;
/// the group degrades rather than fails.
pub struct BroadcastGroup {
    senders: Vec<InterfaceSender>,
    datagrams_sent: Arc<AtomicU64>,
    send_errors: Arc<AtomicU64>,
}

impl BroadcastGroup {
    /// Build one sender per active interface in the listing.
    ///
    /// Interfaces whose sockets fail to bind are skipped with a warning;
    /// an empty group is returned as [`NetError::NoUsableInterface`].
    pub fn from_interfaces(interfaces: &[ClassifiedInterface]) -> Result<Self, NetError> {
        let mut senders = Vec::new();

        for iface in interfaces.iter().filter(|c| c.is_active()) {
            let Some(ip) = iface.info.any_ipv4() else {
                continue;
            };
            match InterfaceSender::bind(iface.info.name.clone(), ip, iface.info.broadcast) {
                Ok(sender) => senders.push(sender),
                Err(e) => {
                    tracing::warn!(interface = %iface.info.name, error = %e, "skipping send socket");
                }
            }
        }

        if senders.is_empty() {
            return Err(NetError::NoUsableInterface);
        }

        Ok(Self {
            senders,
            datagrams_sent: Arc::new(AtomicU64::new(0)),
            send_errors: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Broadcast `payload` on every interface: once to the limited broadcast
    /// address and once to the interface's directed broadcast when known.
    ///
    /// Returns the number of datagrams that left successfully. Zero is not
    /// an error here; transient radio silence is the caller's policy call.
    pub async fn broadcast(&self, payload: &[u8], port: u16) -> usize {
        let mut sent = 0usize;

        for sender in &self.senders {
            let mut targets: Vec<SocketAddr> =
                vec![SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, port))];
            if let Some(directed) = sender.directed_broadcast {
                targets.push(SocketAddr::V4(SocketAddrV4::new(directed, port)));
            }

            for target in targets {
                match sender.send_to(payload, target).await {
                    Ok(_) => {
                        sent += 1;
                        self.datagrams_sent.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        self.send_errors.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(
                            interface = %sender.interface,
                            %target,
                            error = %e,
                            "broadcast send failed, continuing on remaining interfaces"
                        );
                    }
                }
            }
        }

        sent
    }

    /// Unicast `payload` to a known peer from the first interface that
    /// reaches it.
    pub async fn unicast(&self, payload: &[u8], dest: SocketAddr) -> Result<(), NetError> {
        let mut last_err = None;
        for sender in &self.senders {
            match sender.send_to(payload, dest).await {
                Ok(_) => {
                    self.datagrams_sent.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                Err(e) => {
                    self.send_errors.fetch_add(1, Ordering::Relaxed);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or(NetError::NoUsableInterface))
    }

    /// Names of the interfaces this group sends from.
    #[must_use]
    pub fn interfaces(&self) -> Vec<&str> {
        self.senders.iter().map(|s| s.interface.as_str()).collect()
    }

    /// Local addresses the group's sockets are bound to.
    #[must_use]
    pub fn local_ips(&self) -> Vec<Ipv4Addr> {
        self.senders.iter().map(|s| s.local_ip).collect()
    }

    /// Total datagrams sent since construction.
    #[must_use]
    pub fn datagrams_sent(&self) -> u64 {
        self.datagrams_sent.load(Ordering::Relaxed)
    }

    /// Total send errors since construction.
    #[must_use]
    pub fn send_errors(&self) -> u64 {
        self.send_errors.load(Ordering::Relaxed)
    }
}
