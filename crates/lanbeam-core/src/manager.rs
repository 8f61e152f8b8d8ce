//! The session manager.
//!
//! Owns every session on both sides of the wire: the `active` and
//! `completed` maps, the receiver-side pending registrations, and the
//! requester-side wait-for-accept slots. All state transitions flow
//! through here or through the data-plane tasks it spawns, and each one is
//! atomic under the session lock with events emitted after release.
//!
//! ```text
//!   send_items ──► pending ──accept──► run_sender ──► completed
//!                     │   └─decline/timeout/cancel──► failed/cancelled
//!   transfer_request ─► TransferRequest event ─► accept_request
//!                     └─► registration ─► data connection ─► receive task
//! ```

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EventBus, IncomingRequest};
use crate::item::{ItemKind, TransferItem};
use crate::receiver::PendingRegistration;
use crate::sender::run_sender;
use crate::session::{self, SessionHandle, SessionStatus, TransferSession};
use crate::supervision;
use dashmap::DashMap;
use lanbeam_discovery::{
    ControlSender, Datagram, DiscoveryEngine, ItemPreview, Peer, PeerKey, RetransmitHandle,
    TransferAcceptBody, TransferCancelBody, TransferDeclineBody, TransferRequestBody, wire,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{oneshot, watch};
use uuid::Uuid;

/// What a requester learns about its pending request.
enum ControlReply {
    Accepted,
    Declined { reason: String },
    CancelledByPeer,
}

struct ManagerInner {
    config: EngineConfig,
    discovery: DiscoveryEngine,
    control: ControlSender,
    bus: EventBus,
    save_memory: Arc<dyn crate::providers::SaveLocationMemory>,
    active: DashMap<Uuid, SessionHandle>,
    completed: DashMap<Uuid, SessionHandle>,
    registrations: DashMap<Uuid, PendingRegistration>,
    accept_handles: DashMap<Uuid, RetransmitHandle>,
    pending_outgoing: DashMap<Uuid, oneshot::Sender<ControlReply>>,
    cancel_signals: DashMap<Uuid, watch::Sender<bool>>,
}

/// Coordinates sessions, the control channel, and the data plane. Cheap to
/// clone.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

impl SessionManager {
    /// Build a manager on top of a running discovery engine.
    #[must_use]
    pub fn new(
        config: EngineConfig,
        discovery: DiscoveryEngine,
        bus: EventBus,
        save_memory: Arc<dyn crate::providers::SaveLocationMemory>,
    ) -> Self {
        let control = ControlSender::new(discovery.clone())
            .with_policy(config.control_attempts, config.control_interval);
        Self {
            inner: Arc::new(ManagerInner {
                config,
                discovery,
                control,
                bus,
                save_memory,
                active: DashMap::new(),
                completed: DashMap::new(),
                registrations: DashMap::new(),
                accept_handles: DashMap::new(),
                pending_outgoing: DashMap::new(),
                cancel_signals: DashMap::new(),
            }),
        }
    }

    // ------------------------------------------------------------------
    // Outgoing
    // ------------------------------------------------------------------

    /// Request a transfer of `items` to `peer`.
    ///
    /// Creates a pending session, sends the `transfer_request`, and waits
    /// (in a background task) for accept, decline, cancel, or the accept
    /// timeout. Returns the new session id immediately.
    ///
    /// # Errors
    ///
    /// Fails only when totals cannot be computed (e.g. a folder item whose
    /// source is not a directory).
    pub async fn send_items(&self, peer: Peer, items: Vec<TransferItem>) -> Result<Uuid> {
        let (total_bytes, total_files) = self.compute_totals(&items).await?;

        let session = TransferSession::outgoing(peer.clone(), items, total_bytes, total_files);
        let transfer_id = session.id;
        let preview: Vec<ItemPreview> = session
            .items
            .iter()
            .take(self.inner.config.preview_items)
            .map(|item| ItemPreview {
                name: item.name.clone(),
                size: item.size,
                kind: item.kind.to_string(),
            })
            .collect();
        let item_count = session.items.len() as u64;

        let handle = session::share(session);
        self.inner.active.insert(transfer_id, Arc::clone(&handle));
        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.inner.cancel_signals.insert(transfer_id, cancel_tx);

        let body = wire::bound_request(TransferRequestBody {
            origin: self.inner.discovery.local_origin().await,
            transfer_id,
            total_size: total_bytes,
            item_count,
            items_preview: preview,
            truncated: false,
        });

        let request_handle = self
            .inner
            .control
            .send(peer.endpoint(), Datagram::TransferRequest(body));

        let (reply_tx, reply_rx) = oneshot::channel();
        self.inner.pending_outgoing.insert(transfer_id, reply_tx);

        tracing::info!(
            %transfer_id,
            peer = %peer.endpoint(),
            total_bytes,
            total_files,
            "transfer requested"
        );

        let manager = self.clone();
        tokio::spawn(async move {
            manager
                .await_reply(transfer_id, handle, request_handle, reply_rx, cancel_rx)
                .await;
        });

        Ok(transfer_id)
    }

    async fn compute_totals(&self, items: &[TransferItem]) -> Result<(u64, u64)> {
        let mut total_bytes = 0u64;
        let mut total_files = 0u64;

        for item in items {
            match item.kind {
                ItemKind::File | ItemKind::Text => {
                    total_bytes += item.size.max(0) as u64;
                    total_files += 1;
                }
                ItemKind::Folder => {
                    let source = item
                        .source
                        .as_deref()
                        .ok_or_else(|| EngineError::LocalIoError {
                            item: item.name.clone(),
                            cause: "folder item without a source path".to_string(),
                        })?;
                    let outcome = lanbeam_files::walk_tree(source, &item.name)
                        .await
                        .map_err(|e| EngineError::LocalIoError {
                            item: item.name.clone(),
                            cause: e.to_string(),
                        })?;
                    total_bytes += outcome.total_bytes;
                    total_files += outcome.files.len() as u64;
                }
            }
        }

        Ok((total_bytes, total_files))
    }

    async fn await_reply(
        &self,
        transfer_id: Uuid,
        session: SessionHandle,
        request_handle: RetransmitHandle,
        reply_rx: oneshot::Receiver<ControlReply>,
        mut cancel_rx: watch::Receiver<bool>,
    ) {
        let accepted = tokio::select! {
            reply = reply_rx => {
                request_handle.acknowledge();
                match reply {
                    Ok(ControlReply::Accepted) => true,
                    Ok(ControlReply::Declined { reason }) => {
                        self.finish_with(
                            &session,
                            SessionStatus::Failed,
                            &format!("declined: {reason}"),
                        );
                        false
                    }
                    Ok(ControlReply::CancelledByPeer) => {
                        self.finish_with(&session, SessionStatus::Cancelled, "cancelled by peer");
                        false
                    }
                    Err(_) => {
                        self.finish_with(&session, SessionStatus::Failed, "control channel closed");
                        false
                    }
                }
            }
            () = tokio::time::sleep(self.inner.config.accept_timeout) => {
                request_handle.acknowledge();
                self.send_cancel_to_session_peer(&session, transfer_id).await;
                self.finish_with(&session, SessionStatus::Failed, "accept timeout");
                false
            }
            _ = cancel_rx.changed() => {
                request_handle.acknowledge();
                self.send_cancel_to_session_peer(&session, transfer_id).await;
                self.finish_with(&session, SessionStatus::Cancelled, "cancelled");
                false
            }
        };

        self.inner.pending_outgoing.remove(&transfer_id);

        if accepted {
            let snapshot = {
                let mut guard = session.lock().expect("session lock");
                guard.transition(SessionStatus::InProgress);
                guard.clone()
            };
            self.inner.bus.emit(EngineEvent::SessionStarted(snapshot));

            let result = run_sender(
                Arc::clone(&session),
                self.inner.config.clone(),
                self.inner.bus.clone(),
                cancel_rx,
            )
            .await;
            if let Err(e) = result {
                tracing::debug!(%transfer_id, error = %e, "sender task ended with error");
            }
        }

        self.finalize(transfer_id);
    }

    async fn send_cancel_to_session_peer(&self, session: &SessionHandle, transfer_id: Uuid) {
        let dest = session.lock().expect("session lock").peer.endpoint();
        let origin = self.inner.discovery.local_origin().await;
        // Fire and forget; the retransmission budget does the rest.
        let _ = self.inner.control.send(
            dest,
            Datagram::TransferCancel(TransferCancelBody {
                origin,
                transfer_id,
            }),
        );
    }

    fn finish_with(&self, session: &SessionHandle, status: SessionStatus, error: &str) {
        let snapshot = {
            let mut guard = session.lock().expect("session lock");
            if !guard.fail(status, error) {
                return;
            }
            guard.clone()
        };
        tracing::info!(transfer_id = %snapshot.id, %error, "session finished");
        self.inner.bus.emit(EngineEvent::SessionFailed {
            session: snapshot,
            error: error.to_string(),
        });
    }

    // ------------------------------------------------------------------
    // Incoming
    // ------------------------------------------------------------------

    /// Accept an incoming request, choosing or remembering a save location.
    ///
    /// `location` overrides the remembered/default destination. With
    /// `remember`, the chosen directory is stored for this peer's
    /// signature. Accepting the same `transfer_id` twice is a no-op.
    ///
    /// # Errors
    ///
    /// [`EngineError::InsufficientSpace`] when the destination volume
    /// cannot hold the advertised payload; the caller may retry with a
    /// different directory or decline.
    pub async fn accept_request(
        &self,
        request: &IncomingRequest,
        location: Option<PathBuf>,
        remember: bool,
    ) -> Result<Uuid> {
        let transfer_id = request.transfer_id;

        if self.inner.registrations.contains_key(&transfer_id)
            || self.inner.active.contains_key(&transfer_id)
            || self.inner.completed.contains_key(&transfer_id)
        {
            tracing::debug!(%transfer_id, "duplicate accept ignored");
            return Ok(transfer_id);
        }

        let save_location = location
            .or_else(|| self.inner.save_memory.get(&request.peer_signature))
            .unwrap_or_else(|| self.inner.save_memory.default_location());

        supervision::preflight_disk_space(&save_location, request.total_bytes)?;

        if remember {
            self.inner
                .save_memory
                .set(&request.peer_signature, save_location.clone());
        }

        let peer = self.peer_for_request(request);
        let items = request
            .preview
            .iter()
            .map(|(name, size, kind)| {
                let kind = match kind.as_str() {
                    "folder" => ItemKind::Folder,
                    "text" => ItemKind::Text,
                    _ => ItemKind::File,
                };
                TransferItem::from_preview(name.clone(), *size, kind)
            })
            .collect();

        let session = TransferSession::incoming(
            transfer_id,
            peer,
            items,
            request.total_bytes,
            request.item_count,
        );
        let handle = session::share(session);
        self.inner.active.insert(transfer_id, Arc::clone(&handle));

        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.inner.cancel_signals.insert(transfer_id, cancel_tx);

        self.inner.registrations.insert(
            transfer_id,
            PendingRegistration {
                session: handle,
                save_location: save_location.clone(),
                cancel: cancel_rx,
            },
        );

        let accept = Datagram::TransferAccept(TransferAcceptBody {
            origin: self.inner.discovery.local_origin().await,
            transfer_id,
            save_location: save_location.display().to_string(),
        });
        let accept_handle = self.inner.control.send(request.reply_to, accept);
        self.inner.accept_handles.insert(transfer_id, accept_handle);

        tracing::info!(
            %transfer_id,
            save_location = %save_location.display(),
            "transfer accepted, waiting for data connection"
        );

        Ok(transfer_id)
    }

    /// Decline an incoming request with a reason.
    pub async fn decline_request(&self, request: &IncomingRequest, reason: &str) {
        tracing::info!(transfer_id = %request.transfer_id, %reason, "transfer declined");
        let decline = Datagram::TransferDecline(TransferDeclineBody {
            origin: self.inner.discovery.local_origin().await,
            transfer_id: request.transfer_id,
            reason: reason.to_string(),
        });
        // Fire and forget with the usual retransmission budget.
        let _ = self.inner.control.send(request.reply_to, decline);
    }

    fn peer_for_request(&self, request: &IncomingRequest) -> Peer {
        // Prefer the table entry (fresh attributes); fall back to a
        // synthetic record when the request raced ahead of discovery.
        self.inner
            .discovery
            .peers()
            .into_iter()
            .find(|peer| peer.signature == request.peer_signature)
            .unwrap_or_else(|| Peer {
                key: PeerKey {
                    ip: request.reply_to.ip(),
                    port: request.reply_to.port(),
                    interface: String::new(),
                },
                name: request.peer_name.clone(),
                platform: String::new(),
                system: String::new(),
                avatar: String::new(),
                signature: request.peer_signature.clone(),
                connection_type: lanbeam_net::ConnectionType::Other,
                last_seen: Instant::now(),
            })
    }

    /// Consume the registration slot for an arriving data connection and
    /// stop retransmitting the matching accept.
    #[must_use]
    pub fn take_registration(&self, transfer_id: Uuid) -> Option<PendingRegistration> {
        if let Some((_, handle)) = self.inner.accept_handles.remove(&transfer_id) {
            handle.acknowledge();
        }
        self.inner
            .registrations
            .remove(&transfer_id)
            .map(|(_, registration)| registration)
    }

    /// Drive one accepted data connection and archive the session after.
    pub async fn handle_data_connection(&self, stream: tokio::net::TcpStream) {
        let manager = self.clone();
        let mut seen_id = None;

        let result = crate::receiver::receive_connection(
            stream,
            self.inner.config.clone(),
            self.inner.bus.clone(),
            |transfer_id| {
                seen_id = Some(transfer_id);
                manager.take_registration(transfer_id)
            },
        )
        .await;

        if let Err(e) = result {
            tracing::debug!(error = %e, "data connection ended with error");
        }
        if let Some(transfer_id) = seen_id {
            self.finalize(transfer_id);
        }
    }

    // ------------------------------------------------------------------
    // Control plane
    // ------------------------------------------------------------------

    /// Route one control datagram from the discovery engine.
    pub async fn handle_control(&self, source: SocketAddr, datagram: Datagram) {
        match datagram {
            Datagram::TransferRequest(body) => self.on_request(source, body),
            Datagram::TransferAccept(body) => self.on_reply(body.transfer_id, ControlReply::Accepted),
            Datagram::TransferDecline(body) => self.on_reply(
                body.transfer_id,
                ControlReply::Declined { reason: body.reason },
            ),
            Datagram::TransferCancel(body) => self.on_peer_cancel(body.transfer_id),
            other => {
                tracing::debug!(kind = other.kind(), "non-control datagram on control path");
            }
        }
    }

    fn on_request(&self, source: SocketAddr, body: TransferRequestBody) {
        let transfer_id = body.transfer_id;

        // Retransmissions of a request we already surfaced or resolved.
        if self.inner.registrations.contains_key(&transfer_id)
            || self.inner.active.contains_key(&transfer_id)
            || self.inner.completed.contains_key(&transfer_id)
        {
            tracing::debug!(%transfer_id, "duplicate transfer request ignored");
            return;
        }

        let reply_port = body
            .origin
            .from
            .parse::<SocketAddr>()
            .map(|a| a.port())
            .unwrap_or(source.port());

        let request = IncomingRequest {
            transfer_id,
            reply_to: SocketAddr::new(source.ip(), reply_port),
            peer_name: body.origin.name,
            peer_signature: body.origin.signature,
            total_bytes: body.total_size,
            item_count: body.item_count,
            preview: body
                .items_preview
                .into_iter()
                .map(|p| (p.name, p.size, p.kind))
                .collect(),
            truncated: body.truncated,
        };

        tracing::info!(
            %transfer_id,
            peer = %request.peer_name,
            total_bytes = request.total_bytes,
            "incoming transfer request"
        );
        self.inner.bus.emit(EngineEvent::TransferRequest(request));
    }

    fn on_reply(&self, transfer_id: Uuid, reply: ControlReply) {
        // A second accept/decline for the same id finds the slot gone and
        // is dropped here, which is exactly the idempotency the protocol
        // asks for.
        if let Some((_, tx)) = self.inner.pending_outgoing.remove(&transfer_id) {
            let _ = tx.send(reply);
        } else {
            tracing::debug!(%transfer_id, "control reply for no pending request ignored");
        }
    }

    fn on_peer_cancel(&self, transfer_id: Uuid) {
        tracing::info!(%transfer_id, "peer cancelled transfer");

        // A requester still waiting on accept.
        if let Some((_, tx)) = self.inner.pending_outgoing.remove(&transfer_id) {
            let _ = tx.send(ControlReply::CancelledByPeer);
            return;
        }

        // A receiver that accepted but has not seen the data connection.
        if let Some(registration) = self.take_registration(transfer_id) {
            let snapshot = {
                let mut guard = registration.session.lock().expect("session lock");
                guard.fail(SessionStatus::Cancelled, "cancelled by peer");
                guard.clone()
            };
            self.inner.bus.emit(EngineEvent::SessionFailed {
                session: snapshot,
                error: "cancelled by peer".to_string(),
            });
            self.finalize(transfer_id);
            return;
        }

        // A streaming session on either side: flip the cancel signal and
        // let the data-plane task unwind at its next suspension point.
        if let Some(signal) = self.inner.cancel_signals.get(&transfer_id) {
            let _ = signal.send(true);
        }
    }

    // ------------------------------------------------------------------
    // Cancellation and queries
    // ------------------------------------------------------------------

    /// Cancel a session from this side. Idempotent: cancelling a finished
    /// or already-cancelled session is a no-op.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownSession`] when the id was never seen.
    pub async fn cancel(&self, transfer_id: Uuid) -> Result<()> {
        if self.inner.completed.contains_key(&transfer_id) {
            return Ok(());
        }

        let Some(session) = self
            .inner
            .active
            .get(&transfer_id)
            .map(|entry| Arc::clone(entry.value()))
        else {
            return Err(EngineError::UnknownSession(transfer_id));
        };

        tracing::info!(%transfer_id, "local cancel");
        self.send_cancel_to_session_peer(&session, transfer_id).await;

        if let Some(signal) = self.inner.cancel_signals.get(&transfer_id) {
            let _ = signal.send(true);
        }

        // A receiver-side registration that never saw its data connection
        // unwinds here instead of in a task.
        if let Some(registration) = self.take_registration(transfer_id) {
            let snapshot = {
                let mut guard = registration.session.lock().expect("session lock");
                guard.fail(SessionStatus::Cancelled, "cancelled");
                guard.clone()
            };
            self.inner.bus.emit(EngineEvent::SessionFailed {
                session: snapshot,
                error: "cancelled".to_string(),
            });
            self.finalize(transfer_id);
        }

        Ok(())
    }

    /// Move a finished session from `active` to `completed` and drop its
    /// plumbing.
    pub fn finalize(&self, transfer_id: Uuid) {
        if let Some((_, session)) = self.inner.active.remove(&transfer_id) {
            self.inner.completed.insert(transfer_id, session);
        }
        self.inner.cancel_signals.remove(&transfer_id);
        self.inner.accept_handles.remove(&transfer_id);
        self.inner.registrations.remove(&transfer_id);
    }

    /// Snapshot of one session.
    #[must_use]
    pub fn session(&self, transfer_id: Uuid) -> Option<TransferSession> {
        self.inner
            .active
            .get(&transfer_id)
            .or_else(|| self.inner.completed.get(&transfer_id))
            .map(|entry| entry.value().lock().expect("session lock").clone())
    }

    /// Snapshots of all active sessions.
    #[must_use]
    pub fn active_sessions(&self) -> Vec<TransferSession> {
        self.inner
            .active
            .iter()
            .map(|entry| entry.value().lock().expect("session lock").clone())
            .collect()
    }

    /// Snapshots of all finished sessions.
    #[must_use]
    pub fn completed_sessions(&self) -> Vec<TransferSession> {
        self.inner
            .completed
            .iter()
            .map(|entry| entry.value().lock().expect("session lock").clone())
            .collect()
    }

    /// Number of receiver-side slots waiting for their data connection.
    #[must_use]
    pub fn pending_registrations(&self) -> usize {
        self.inner.registrations.len()
    }
}
