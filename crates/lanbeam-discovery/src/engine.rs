//! The discovery engine.
//!
//! One receiving socket on the fixed discovery port, one sending socket per
//! active physical interface, and four background tasks: the receive loop,
//! the periodic hello broadcaster, the unicast presence sweep, and the peer
//! reaper. Control-plane datagrams (`transfer_*`) arrive on the same socket
//! and are forwarded untouched on the control stream; presence datagrams
//! mutate the peer table.
//!
//! Locking discipline: the peer table is touched only inside its own
//! methods; events are emitted after those return, never while a table
//! entry is held.

use crate::error::DiscoveryError;
use crate::peer::{Peer, PeerTable};
use crate::wire::{self, Datagram, HelloBody, Origin};
use lanbeam_net::{
    BroadcastGroup, ConnectionType, InterfaceClassifier, NetError, NetIfEnumerator, select_primary,
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;

/// Tunables for the discovery engine.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// UDP port for discovery and control (also the TCP data port).
    pub port: u16,
    /// Period between hello broadcasts.
    pub hello_interval: Duration,
    /// Period between unicast presence sweeps to known peers.
    pub sweep_interval: Duration,
    /// Age after which a silent peer is evicted (3× the hello interval).
    pub liveness_ttl: Duration,
    /// How often the reaper checks for stale peers.
    pub reap_interval: Duration,
    /// How long `refresh_neighbours` waits after re-announcing.
    pub refresh_wait: Duration,
    /// Interface classification tables.
    pub classifier: InterfaceClassifier,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        let hello_interval = Duration::from_secs(5);
        Self {
            port: 6442,
            hello_interval,
            sweep_interval: Duration::from_secs(30),
            liveness_ttl: hello_interval * 3,
            reap_interval: Duration::from_secs(1),
            refresh_wait: Duration::from_millis(500),
            classifier: InterfaceClassifier::default(),
        }
    }
}

/// How this host presents itself in datagrams.
#[derive(Debug, Clone)]
pub struct LocalIdentity {
    /// Display name.
    pub name: String,
    /// Platform string.
    pub platform: String,
    /// Free-form system string.
    pub system: String,
    /// Avatar URL.
    pub avatar: String,
    /// Stable per-host identifier.
    pub signature: String,
    /// Random value marking our own packets; regenerated per process.
    pub nonce: u64,
}

impl LocalIdentity {
    /// Fill the nonce with a fresh random value.
    #[must_use]
    pub fn with_random_nonce(mut self) -> Self {
        self.nonce = rand::random();
        self
    }
}

/// Presence events emitted by the engine.
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// A peer identity was seen for the first time (or re-added after
    /// expiry).
    PeerFound(Peer),
    /// A peer expired or said goodbye.
    PeerLost(Peer),
}

/// A control-plane datagram with its network source.
#[derive(Debug, Clone)]
pub struct ControlEnvelope {
    /// Where the datagram came from.
    pub source: SocketAddr,
    /// The decoded `transfer_*` datagram.
    pub datagram: Datagram,
}

/// The receive ends of the engine's event streams.
pub struct DiscoveryStreams {
    /// `peer_found` / `peer_lost`.
    pub events: mpsc::Receiver<DiscoveryEvent>,
    /// Transfer control messages.
    pub control: mpsc::Receiver<ControlEnvelope>,
}

struct LocalEndpoint {
    ip: IpAddr,
    interface: String,
    connection_type: ConnectionType,
}

struct EngineInner {
    config: DiscoveryConfig,
    identity: LocalIdentity,
    socket: Arc<UdpSocket>,
    group: RwLock<Arc<BroadcastGroup>>,
    local: RwLock<LocalEndpoint>,
    table: PeerTable,
    enumerator: Arc<dyn NetIfEnumerator>,
    events_tx: mpsc::Sender<DiscoveryEvent>,
    control_tx: mpsc::Sender<ControlEnvelope>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to a running discovery engine. Cheap to clone.
#[derive(Clone)]
pub struct DiscoveryEngine {
    inner: Arc<EngineInner>,
}

impl DiscoveryEngine {
    /// Bind sockets, pick the primary interface, and spawn the background
    /// tasks.
    ///
    /// # Errors
    ///
    /// - [`DiscoveryError::PortUnavailable`] when the discovery port cannot
    ///   be bound (never retried here; supervision owns diagnostics).
    /// - [`DiscoveryError::InterfaceUnavailable`] when no usable interface
    ///   exists.
    pub fn start(
        config: DiscoveryConfig,
        identity: LocalIdentity,
        enumerator: Arc<dyn NetIfEnumerator>,
    ) -> Result<(Self, DiscoveryStreams), DiscoveryError> {
        let interfaces = config
            .classifier
            .classify_all(enumerator.interfaces().map_err(|_| DiscoveryError::InterfaceUnavailable)?);

        let primary = select_primary(&interfaces).ok_or(DiscoveryError::InterfaceUnavailable)?;
        let local = LocalEndpoint {
            ip: IpAddr::V4(primary.info.any_ipv4().expect("primary always has an IPv4")),
            interface: primary.info.name.clone(),
            connection_type: primary.kind,
        };

        let socket = lanbeam_net::bind_broadcast_udp(config.port).map_err(|e| match e {
            NetError::Bind { port, .. } => DiscoveryError::PortUnavailable { port, process: None },
            other => DiscoveryError::Net(other),
        })?;

        let group = Arc::new(BroadcastGroup::from_interfaces(&interfaces).map_err(|e| match e {
            NetError::NoUsableInterface => DiscoveryError::InterfaceUnavailable,
            other => DiscoveryError::Net(other),
        })?);

        let (events_tx, events_rx) = mpsc::channel(64);
        let (control_tx, control_rx) = mpsc::channel(64);

        let inner = Arc::new(EngineInner {
            config,
            identity,
            socket: Arc::new(socket),
            group: RwLock::new(group),
            local: RwLock::new(local),
            table: PeerTable::new(),
            enumerator,
            events_tx,
            control_tx,
            tasks: std::sync::Mutex::new(Vec::new()),
        });

        let engine = Self { inner };
        engine.spawn_tasks();

        tracing::info!(
            port = engine.inner.config.port,
            "discovery engine started"
        );

        Ok((
            engine,
            DiscoveryStreams {
                events: events_rx,
                control: control_rx,
            },
        ))
    }

    fn spawn_tasks(&self) {
        let mut tasks = self.inner.tasks.lock().expect("task list lock");
        tasks.push(tokio::spawn(Self::recv_loop(self.clone())));
        tasks.push(tokio::spawn(Self::hello_loop(self.clone())));
        tasks.push(tokio::spawn(Self::sweep_loop(self.clone())));
        tasks.push(tokio::spawn(Self::reap_loop(self.clone())));
    }

    /// Immutable snapshot of the peer table.
    #[must_use]
    pub fn peers(&self) -> Vec<Peer> {
        self.inner.table.snapshot()
    }

    /// The local presence identity.
    #[must_use]
    pub fn identity(&self) -> &LocalIdentity {
        &self.inner.identity
    }

    /// The configured discovery port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.inner.config.port
    }

    /// The `Origin` block stamped on outgoing datagrams.
    pub async fn local_origin(&self) -> Origin {
        let local = self.inner.local.read().await;
        Origin {
            from: format!("{}:{}", local.ip, self.inner.config.port),
            name: self.inner.identity.name.clone(),
            platform: self.inner.identity.platform.clone(),
            system: self.inner.identity.system.clone(),
            signature: self.inner.identity.signature.clone(),
        }
    }

    async fn hello_datagram(&self) -> Datagram {
        let origin = self.local_origin().await;
        let local = self.inner.local.read().await;
        Datagram::Hello(HelloBody {
            origin,
            avatar: self.inner.identity.avatar.clone(),
            connection_type: local.connection_type,
            interface: local.interface.clone(),
            nonce: self.inner.identity.nonce,
        })
    }

    /// Broadcast a hello on every interface now.
    pub async fn announce(&self) {
        let datagram = self.hello_datagram().await;
        let bytes = wire::encode(&datagram);
        let group = self.inner.group.read().await.clone();
        let sent = group.broadcast(&bytes, self.inner.config.port).await;
        tracing::trace!(datagrams = sent, "hello broadcast");
    }

    /// Manual presence refresh: re-announce and give peers a beat to
    /// answer. The table is deliberately not cleared first; a hard clear
    /// makes the UI flash an empty list for no reason.
    pub async fn refresh_neighbours(&self) {
        self.announce().await;
        tokio::time::sleep(self.inner.config.refresh_wait).await;
    }

    /// Unicast an arbitrary datagram to a destination.
    ///
    /// # Errors
    ///
    /// Fails only when every send socket refused the payload.
    pub async fn send_datagram_to(
        &self,
        dest: SocketAddr,
        datagram: &Datagram,
    ) -> Result<(), DiscoveryError> {
        let bytes = wire::encode(datagram);
        let group = self.inner.group.read().await.clone();
        group.unicast(&bytes, dest).await.map_err(DiscoveryError::Net)
    }

    /// Rebuild the send sockets and the primary selection after an
    /// interface change.
    ///
    /// # Errors
    ///
    /// [`DiscoveryError::InterfaceUnavailable`] when the new landscape has
    /// no usable interface; the old sockets stay in place in that case.
    pub async fn rebind(&self) -> Result<(), DiscoveryError> {
        let interfaces = self
            .inner
            .config
            .classifier
            .classify_all(
                self.inner
                    .enumerator
                    .interfaces()
                    .map_err(|_| DiscoveryError::InterfaceUnavailable)?,
            );

        let primary = select_primary(&interfaces).ok_or(DiscoveryError::InterfaceUnavailable)?;
        let group = Arc::new(BroadcastGroup::from_interfaces(&interfaces).map_err(|e| match e {
            NetError::NoUsableInterface => DiscoveryError::InterfaceUnavailable,
            other => DiscoveryError::Net(other),
        })?);

        {
            let mut local = self.inner.local.write().await;
            local.ip = IpAddr::V4(primary.info.any_ipv4().expect("primary always has an IPv4"));
            local.interface = primary.info.name.clone();
            local.connection_type = primary.kind;
        }
        *self.inner.group.write().await = group;

        tracing::info!("discovery send sockets rebound");
        self.announce().await;
        Ok(())
    }

    /// Broadcast a goodbye and stop all background tasks.
    pub async fn shutdown(&self) {
        let origin = self.local_origin().await;
        let bytes = wire::encode(&Datagram::Goodbye { origin });
        let group = self.inner.group.read().await.clone();
        group.broadcast(&bytes, self.inner.config.port).await;

        let tasks = {
            let mut guard = self.inner.tasks.lock().expect("task list lock");
            std::mem::take(&mut *guard)
        };
        for task in tasks {
            task.abort();
        }
        tracing::info!("discovery engine stopped");
    }

    // ------------------------------------------------------------------
    // Background tasks
    // ------------------------------------------------------------------

    async fn hello_loop(self) {
        // Burst at startup so peers appear quickly, then settle into the
        // steady interval.
        for _ in 0..3 {
            self.announce().await;
            tokio::time::sleep(Duration::from_millis(250)).await;
        }

        let mut ticker = tokio::time::interval(self.inner.config.hello_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.announce().await;
        }
    }

    async fn sweep_loop(self) {
        let mut ticker = tokio::time::interval(self.inner.config.sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;

            // Unicast to every known peer; reinforces presence across
            // bridged segments where broadcast does not propagate.
            let datagram = self.hello_datagram().await;
            let bytes = wire::encode(&datagram);
            let group = self.inner.group.read().await.clone();
            for peer in self.inner.table.snapshot() {
                if let Err(e) = group.unicast(&bytes, peer.endpoint()).await {
                    tracing::debug!(peer = %peer.endpoint(), error = %e, "sweep unicast failed");
                }
            }
        }
    }

    async fn reap_loop(self) {
        let mut ticker = tokio::time::interval(self.inner.config.reap_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            for peer in self.inner.table.reap(self.inner.config.liveness_ttl) {
                tracing::debug!(peer = %peer.endpoint(), name = %peer.name, "peer lost");
                self.emit(DiscoveryEvent::PeerLost(peer));
            }
        }
    }

    async fn recv_loop(self) {
        let mut buf = vec![0u8; 2048];
        loop {
            let (len, src) = match self.inner.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    tracing::warn!(error = %e, "discovery recv error");
                    continue;
                }
            };

            let datagram = match wire::decode(&buf[..len]) {
                Ok(Some(datagram)) => datagram,
                Ok(None) => continue,
                Err(e) => {
                    tracing::debug!(%src, error = %e, "dropping malformed datagram");
                    continue;
                }
            };

            if self.is_own_packet(&datagram, src).await {
                continue;
            }

            self.handle_datagram(datagram, src).await;
        }
    }

    /// Loopback suppression: our hello nonce, or a datagram from one of our
    /// own addresses announcing our own listen port.
    async fn is_own_packet(&self, datagram: &Datagram, src: SocketAddr) -> bool {
        if let Datagram::Hello(hello) = datagram {
            if hello.nonce == self.inner.identity.nonce {
                return true;
            }
        }

        let announced_port = datagram
            .origin()
            .from
            .parse::<SocketAddr>()
            .map(|a| a.port())
            .unwrap_or(self.inner.config.port);
        if announced_port != self.inner.config.port {
            return false;
        }

        let group = self.inner.group.read().await.clone();
        group
            .local_ips()
            .iter()
            .any(|ip| IpAddr::V4(*ip) == src.ip())
    }

    async fn handle_datagram(&self, datagram: Datagram, src: SocketAddr) {
        match datagram {
            Datagram::Hello(hello) => {
                let listen_port = hello
                    .origin
                    .from
                    .parse::<SocketAddr>()
                    .map(|a| a.port())
                    .unwrap_or(self.inner.config.port);
                let peer = Peer::from_hello(src.ip(), listen_port, &hello);
                let endpoint = peer.endpoint();
                let is_new = self.inner.table.upsert(peer.clone());
                if is_new {
                    tracing::info!(peer = %endpoint, name = %peer.name, "peer found");
                    self.emit(DiscoveryEvent::PeerFound(peer));
                }
            }
            Datagram::Goodbye { ref origin } => {
                let listen_port = origin
                    .from
                    .parse::<SocketAddr>()
                    .map(|a| a.port())
                    .unwrap_or(self.inner.config.port);
                for peer in self.inner.table.remove_by_endpoint(src.ip(), listen_port) {
                    tracing::info!(peer = %peer.endpoint(), name = %peer.name, "peer said goodbye");
                    self.emit(DiscoveryEvent::PeerLost(peer));
                }
            }
            control @ (Datagram::TransferRequest(_)
            | Datagram::TransferAccept(_)
            | Datagram::TransferDecline(_)
            | Datagram::TransferCancel(_)) => {
                tracing::debug!(%src, kind = control.kind(), "control message");
                if self
                    .inner
                    .control_tx
                    .try_send(ControlEnvelope {
                        source: src,
                        datagram: control,
                    })
                    .is_err()
                {
                    tracing::warn!("control stream full or closed, dropping message");
                }
            }
        }
    }

    fn emit(&self, event: DiscoveryEvent) {
        if self.inner.events_tx.try_send(event).is_err() {
            tracing::warn!("discovery event stream full or closed, dropping event");
        }
    }
}
