//! Engine orchestration.
//!
//! [`Engine::start`] wires everything together: port preflight, discovery,
//! the TCP transfer listener, the session manager, the control-message
//! pump, and the interface watcher. The host keeps the returned handle,
//! subscribes to events, and calls the transfer API; `shutdown` says
//! goodbye on the wire and stops every task.

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EventBus, EventStream, IncomingRequest};
use crate::item::TransferItem;
use crate::manager::SessionManager;
use crate::providers::{HostInfo, SaveLocationMemory, SettingsStore};
use crate::session::TransferSession;
use crate::supervision;
use lanbeam_discovery::{DiscoveryEngine, DiscoveryEvent, LocalIdentity, Peer};
use lanbeam_net::{InterfaceWatcher, NetIfEnumerator};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Collaborators the host composes at startup.
pub struct Providers {
    /// Settings persistence.
    pub settings: Arc<dyn SettingsStore>,
    /// Remembered save locations.
    pub save_memory: Arc<dyn SaveLocationMemory>,
    /// Host identity introspection.
    pub host: Arc<dyn HostInfo>,
    /// Interface enumeration.
    pub interfaces: Arc<dyn NetIfEnumerator>,
}

/// The running transfer engine.
pub struct Engine {
    config: EngineConfig,
    discovery: DiscoveryEngine,
    manager: SessionManager,
    bus: EventBus,
    tasks: Vec<JoinHandle<()>>,
    _watcher: InterfaceWatcher,
}

impl Engine {
    /// Start the engine: preflight the port, bind discovery and the
    /// transfer listener, and spawn the plumbing tasks.
    ///
    /// # Errors
    ///
    /// - [`EngineError::PortUnavailable`] with the conflicting process name
    ///   when the shared port is taken.
    /// - [`EngineError::InterfaceUnavailable`] when no usable NIC exists.
    pub async fn start(config: EngineConfig, providers: Providers) -> Result<Self> {
        let settings = providers.settings.load();

        supervision::preflight_port(config.port)?;

        let identity = LocalIdentity {
            name: if settings.display_name.is_empty() {
                providers.host.hostname()
            } else {
                settings.display_name.clone()
            },
            platform: providers.host.platform(),
            system: providers.host.system(),
            avatar: String::new(),
            signature: format!("{}@{}", providers.host.username(), providers.host.hostname()),
            nonce: 0,
        }
        .with_random_nonce();

        let (discovery, streams) = DiscoveryEngine::start(
            config.discovery.clone(),
            identity,
            Arc::clone(&providers.interfaces),
        )
        .map_err(|e| match e {
            lanbeam_discovery::DiscoveryError::PortUnavailable { port, .. } => {
                EngineError::PortUnavailable {
                    port,
                    process: supervision::conflicting_process(port),
                }
            }
            other => EngineError::Discovery(other),
        })?;

        let listener = TcpListener::bind(("0.0.0.0", config.port))
            .await
            .map_err(|_| EngineError::PortUnavailable {
                port: config.port,
                process: supervision::conflicting_process(config.port),
            })?;

        let bus = EventBus::new();
        let manager = SessionManager::new(
            config.clone(),
            discovery.clone(),
            bus.clone(),
            Arc::clone(&providers.save_memory),
        );

        let mut tasks = Vec::new();
        let lanbeam_discovery::DiscoveryStreams {
            events: mut peer_events,
            control: mut control_events,
        } = streams;

        // Presence events → observer bus.
        {
            let bus = bus.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(event) = peer_events.recv().await {
                    match event {
                        DiscoveryEvent::PeerFound(peer) => bus.emit(EngineEvent::PeerFound(peer)),
                        DiscoveryEvent::PeerLost(peer) => bus.emit(EngineEvent::PeerLost(peer)),
                    }
                }
            }));
        }

        // Control messages → session manager.
        {
            let manager = manager.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(envelope) = control_events.recv().await {
                    manager
                        .handle_control(envelope.source, envelope.datagram)
                        .await;
                }
            }));
        }

        // Data connections → receiver tasks.
        {
            let manager = manager.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    match listener.accept().await {
                        Ok((stream, from)) => {
                            tracing::debug!(%from, "data connection accepted");
                            let manager = manager.clone();
                            tokio::spawn(async move {
                                manager.handle_data_connection(stream).await;
                            });
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "transfer listener accept failed");
                        }
                    }
                }
            }));
        }

        // Interface deltas → rebind + soft refresh.
        let (watch_tx, mut watch_rx) = mpsc::channel(4);
        let watcher = InterfaceWatcher::spawn(
            Arc::clone(&providers.interfaces),
            config.discovery.classifier.clone(),
            lanbeam_net::watcher::DEFAULT_WATCH_PERIOD,
            watch_tx,
        );
        {
            let discovery = discovery.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(change) = watch_rx.recv().await {
                    tracing::info!(
                        previous = change.previous_count,
                        current = change.current_count,
                        "rebinding discovery after interface change"
                    );
                    if let Err(e) = discovery.rebind().await {
                        tracing::warn!(error = %e, "rebind failed, keeping previous sockets");
                    }
                    discovery.refresh_neighbours().await;
                }
            }));
        }

        tracing::info!(port = config.port, "engine started");

        Ok(Self {
            config,
            discovery,
            manager,
            bus,
            tasks,
            _watcher: watcher,
        })
    }

    /// Subscribe to engine events.
    #[must_use]
    pub fn subscribe(&self) -> EventStream {
        self.bus.subscribe_with_capacity(self.config.event_queue_capacity)
    }

    /// Snapshot of discovered peers.
    #[must_use]
    pub fn peers(&self) -> Vec<Peer> {
        self.discovery.peers()
    }

    /// Re-announce and give peers a moment to answer.
    pub async fn refresh_neighbours(&self) {
        self.discovery.refresh_neighbours().await;
    }

    /// Request a transfer of `items` to `peer`.
    ///
    /// # Errors
    ///
    /// See [`SessionManager::send_items`].
    pub async fn send_items(&self, peer: Peer, items: Vec<TransferItem>) -> Result<Uuid> {
        self.manager.send_items(peer, items).await
    }

    /// Accept an incoming transfer request.
    ///
    /// # Errors
    ///
    /// See [`SessionManager::accept_request`].
    pub async fn accept_request(
        &self,
        request: &IncomingRequest,
        location: Option<PathBuf>,
        remember: bool,
    ) -> Result<Uuid> {
        self.manager.accept_request(request, location, remember).await
    }

    /// Decline an incoming transfer request.
    pub async fn decline_request(&self, request: &IncomingRequest, reason: &str) {
        self.manager.decline_request(request, reason).await;
    }

    /// Cancel a session from this side (idempotent).
    ///
    /// # Errors
    ///
    /// See [`SessionManager::cancel`].
    pub async fn cancel(&self, session_id: Uuid) -> Result<()> {
        self.manager.cancel(session_id).await
    }

    /// Snapshot of one session.
    #[must_use]
    pub fn session(&self, session_id: Uuid) -> Option<TransferSession> {
        self.manager.session(session_id)
    }

    /// Snapshots of all sessions still in flight.
    #[must_use]
    pub fn active_sessions(&self) -> Vec<TransferSession> {
        self.manager.active_sessions()
    }

    /// Snapshots of all finished sessions.
    #[must_use]
    pub fn completed_sessions(&self) -> Vec<TransferSession> {
        self.manager.completed_sessions()
    }

    /// The session manager, for hosts that need direct access.
    #[must_use]
    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Broadcast a goodbye and stop every task.
    pub async fn shutdown(self) {
        self.discovery.shutdown().await;
        for task in &self.tasks {
            task.abort();
        }
        tracing::info!("engine stopped");
    }
}
