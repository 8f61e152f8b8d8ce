//! Receiving side of the transfer data plane.
//!
//! The listener accepts TCP connections on the shared port. Each
//! connection must open with a session header whose `transfer_id` matches
//! a pending registration (created when the user accepted the request);
//! anything else is closed as unauthorized. Item frames then land through
//! atomic temp-file writes, with the ` (N)` collision policy applied per
//! destination. Bytes are counted as they reach disk.
//!
//! Per-item filesystem failures mark the item and drain the rest of that
//! frame so the stream stays aligned; transport and manifest failures kill
//! the session. Cancellation unlinks the in-progress temp file.

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{EngineEvent, EventBus};
use crate::frame::{self, FrameDecodeError, FrameManifest, ItemManifest};
use crate::item::{ItemKind, ItemStatus, TransferItem};
use crate::sender::{ProgressThrottle, emit_progress};
use crate::session::{SessionHandle, SessionStatus};
use crate::speed::SpeedEstimator;
use lanbeam_files::AtomicFileWriter;
use std::path::{Component, Path, PathBuf};
use std::time::Instant;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;

/// A receiver-side slot binding an accepted `transfer_id` to a save
/// location, consumed when the data connection arrives.
pub struct PendingRegistration {
    /// The session created at accept time.
    pub session: SessionHandle,
    /// Destination directory chosen (or remembered) by the receiver.
    pub save_location: PathBuf,
    /// Cancel signal for the receiving task.
    pub cancel: watch::Receiver<bool>,
}

/// Drive one accepted connection to a terminal state.
///
/// `registration_lookup` maps the header's `transfer_id` to its pending
/// registration; `None` means nobody accepted this transfer and the
/// connection is dropped as [`EngineError::UnauthorizedTransfer`].
pub async fn receive_connection<F>(
    stream: TcpStream,
    config: EngineConfig,
    bus: EventBus,
    registration_lookup: F,
) -> Result<(), EngineError>
where
    F: FnOnce(uuid::Uuid) -> Option<PendingRegistration>,
{
    let peer_addr = stream.peer_addr().ok();
    let mut reader = BufReader::new(stream);

    let header = match frame::read_manifest(&mut reader).await {
        Ok(FrameManifest::Header(header)) => header,
        Ok(other) => {
            tracing::warn!(?peer_addr, frame = ?other, "stream did not open with a header");
            return Err(EngineError::MalformedFrame(
                "expected session header".to_string(),
            ));
        }
        Err(e) => {
            tracing::warn!(?peer_addr, error = %e, "unreadable session header");
            return Err(EngineError::MalformedFrame(e.to_string()));
        }
    };

    let Some(registration) = registration_lookup(header.transfer_id) else {
        tracing::warn!(
            ?peer_addr,
            transfer_id = %header.transfer_id,
            "data connection for unknown transfer, closing"
        );
        return Err(EngineError::UnauthorizedTransfer(header.transfer_id));
    };

    let PendingRegistration {
        session,
        save_location,
        mut cancel,
    } = registration;

    let snapshot = {
        let mut guard = session.lock().expect("session lock");
        // Preview placeholders served the accept dialog; real items are
        // rebuilt from the frames.
        guard.items.clear();
        guard.total_bytes = header.total_bytes;
        guard.total_files = header.total_files;
        guard.transition(SessionStatus::InProgress);
        guard.clone()
    };
    bus.emit(EngineEvent::SessionStarted(snapshot));

    tracing::info!(
        transfer_id = %header.transfer_id,
        ?peer_addr,
        total_bytes = header.total_bytes,
        "receiving session started"
    );

    let mut estimator = SpeedEstimator::new(Instant::now());
    let mut throttle = ProgressThrottle::new();

    let result = receive_frames(
        &session,
        &config,
        &bus,
        &mut reader,
        &mut cancel,
        &save_location,
        &mut estimator,
        &mut throttle,
    )
    .await;

    match result {
        Ok(()) => {
            let snapshot = {
                let mut guard = session.lock().expect("session lock");
                guard.current_file = None;
                guard.transition(SessionStatus::Completed);
                guard.clone()
            };
            bus.emit(EngineEvent::SessionProgress(snapshot.clone()));
            bus.emit(EngineEvent::SessionCompleted(snapshot));
            tracing::info!(transfer_id = %header.transfer_id, "receive completed");
            Ok(())
        }
        Err(RecvAbort::Cancelled) => {
            finish_failed(&session, &bus, SessionStatus::Cancelled, "cancelled");
            tracing::info!(transfer_id = %header.transfer_id, "receive cancelled");
            Err(EngineError::UserCancelled)
        }
        Err(RecvAbort::Fatal(error)) => {
            finish_failed(&session, &bus, SessionStatus::Failed, &error.to_string());
            tracing::warn!(transfer_id = %header.transfer_id, error = %error, "receive failed");
            Err(error)
        }
    }
}

enum RecvAbort {
    Cancelled,
    Fatal(EngineError),
}

fn finish_failed(session: &SessionHandle, bus: &EventBus, status: SessionStatus, error: &str) {
    let snapshot = {
        let mut guard = session.lock().expect("session lock");
        if !guard.fail(status, error) {
            return;
        }
        guard.clone()
    };
    bus.emit(EngineEvent::SessionFailed {
        session: snapshot,
        error: error.to_string(),
    });
}

#[allow(clippy::too_many_arguments)]
async fn receive_frames(
    session: &SessionHandle,
    config: &EngineConfig,
    bus: &EventBus,
    reader: &mut BufReader<TcpStream>,
    cancel: &mut watch::Receiver<bool>,
    save_location: &Path,
    estimator: &mut SpeedEstimator,
    throttle: &mut ProgressThrottle,
) -> Result<(), RecvAbort> {
    loop {
        if *cancel.borrow() {
            return Err(RecvAbort::Cancelled);
        }

        let manifest = tokio::select! {
            manifest = frame::read_manifest(reader) => manifest,
            _ = cancel.changed() => return Err(RecvAbort::Cancelled),
        };

        let manifest = match manifest {
            Ok(manifest) => manifest,
            Err(FrameDecodeError::Io(e)) => {
                return Err(RecvAbort::Fatal(EngineError::PeerDisconnected(e.to_string())));
            }
            Err(e) => {
                return Err(RecvAbort::Fatal(EngineError::MalformedFrame(e.to_string())));
            }
        };

        match manifest {
            FrameManifest::Header(_) => {
                return Err(RecvAbort::Fatal(EngineError::MalformedFrame(
                    "duplicate session header".to_string(),
                )));
            }
            FrameManifest::End {} => return Ok(()),
            FrameManifest::Item(item) => {
                receive_item(
                    session,
                    config,
                    bus,
                    reader,
                    cancel,
                    save_location,
                    item,
                    estimator,
                    throttle,
                )
                .await?;
                // Item boundaries always get a progress event.
                emit_progress(session, bus, estimator);
            }
        }
    }
}

/// Split a wire-relative path into a validated destination directory and
/// file name. Rejects traversal and absolute paths outright.
fn resolve_destination(
    save_location: &Path,
    relative_path: &str,
) -> Result<(PathBuf, String), EngineError> {
    let relative = Path::new(relative_path);
    let mut safe = PathBuf::new();

    for component in relative.components() {
        match component {
            Component::Normal(part) => safe.push(part),
            _ => {
                return Err(EngineError::MalformedFrame(format!(
                    "illegal path on wire: {relative_path}"
                )));
            }
        }
    }

    let name = safe
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| EngineError::MalformedFrame(format!("empty path on wire: {relative_path}")))?
        .to_string();

    let dir = match safe.parent() {
        Some(parent) if parent != Path::new("") => save_location.join(parent),
        _ => save_location.to_path_buf(),
    };

    Ok((dir, name))
}

fn ensure_session_item(session: &SessionHandle, manifest: &ItemManifest) {
    let mut guard = session.lock().expect("session lock");
    if guard.item_mut(manifest.item_id).is_none() {
        let top_level = manifest
            .relative_path
            .split('/')
            .next()
            .unwrap_or(&manifest.relative_path)
            .to_string();
        let kind = if manifest.relative_path.contains('/') {
            ItemKind::Folder
        } else {
            manifest.kind
        };
        let mut item = TransferItem::from_preview(
            top_level,
            if kind == ItemKind::Folder {
                crate::item::FOLDER_SIZE_SENTINEL
            } else {
                manifest.size as i64
            },
            kind,
        );
        item.id = manifest.item_id;
        item.status = ItemStatus::InProgress;
        guard.items.push(item);
    }
    guard.current_file = Some(manifest.relative_path.clone());
}

#[allow(clippy::too_many_arguments)]
async fn receive_item(
    session: &SessionHandle,
    config: &EngineConfig,
    bus: &EventBus,
    reader: &mut BufReader<TcpStream>,
    cancel: &mut watch::Receiver<bool>,
    save_location: &Path,
    manifest: ItemManifest,
    estimator: &mut SpeedEstimator,
    throttle: &mut ProgressThrottle,
) -> Result<(), RecvAbort> {
    ensure_session_item(session, &manifest);

    match manifest.kind {
        ItemKind::Text => receive_text(session, reader, &manifest).await,
        ItemKind::File | ItemKind::Folder => {
            receive_file(
                session,
                config,
                bus,
                reader,
                cancel,
                save_location,
                &manifest,
                estimator,
                throttle,
            )
            .await
        }
    }
}

async fn receive_text(
    session: &SessionHandle,
    reader: &mut BufReader<TcpStream>,
    manifest: &ItemManifest,
) -> Result<(), RecvAbort> {
    let mut bytes = vec![0u8; manifest.size as usize];
    reader
        .read_exact(&mut bytes)
        .await
        .map_err(|e| RecvAbort::Fatal(EngineError::PeerDisconnected(e.to_string())))?;

    let mut guard = session.lock().expect("session lock");
    guard.add_bytes(manifest.size);
    match String::from_utf8(bytes) {
        Ok(text) => {
            if let Some(slot) = guard.item_mut(manifest.item_id) {
                slot.text = Some(text);
                slot.add_transferred(manifest.size);
                slot.status = ItemStatus::Completed;
            }
        }
        Err(_) => {
            if let Some(slot) = guard.item_mut(manifest.item_id) {
                slot.fail("text payload was not valid UTF-8");
            }
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn receive_file(
    session: &SessionHandle,
    config: &EngineConfig,
    bus: &EventBus,
    reader: &mut BufReader<TcpStream>,
    cancel: &mut watch::Receiver<bool>,
    save_location: &Path,
    manifest: &ItemManifest,
    estimator: &mut SpeedEstimator,
    throttle: &mut ProgressThrottle,
) -> Result<(), RecvAbort> {
    let (dest_dir, name) = match resolve_destination(save_location, &manifest.relative_path) {
        Ok(resolved) => resolved,
        Err(e) => return Err(RecvAbort::Fatal(e)),
    };

    let mut writer = match AtomicFileWriter::create(&dest_dir, &name).await {
        Ok(writer) => writer,
        Err(e) => {
            // Local filesystem trouble is this item's problem only; keep
            // the stream aligned by consuming the payload.
            mark_failed_and_drain(session, reader, manifest, &e.to_string()).await?;
            return Ok(());
        }
    };

    let mut remaining = manifest.size;
    let mut buf = vec![0u8; config.io_chunk_size];

    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;

        let got = tokio::select! {
            read = reader.read(&mut buf[..want]) => match read {
                Ok(0) => {
                    writer.abort().await;
                    return Err(RecvAbort::Fatal(EngineError::PeerDisconnected(
                        "stream closed mid-item".to_string(),
                    )));
                }
                Ok(got) => got,
                Err(e) => {
                    writer.abort().await;
                    return Err(RecvAbort::Fatal(EngineError::PeerDisconnected(e.to_string())));
                }
            },
            _ = cancel.changed() => {
                writer.abort().await;
                return Err(RecvAbort::Cancelled);
            }
        };

        if let Err(e) = writer.write(&buf[..got]).await {
            let cause = e.to_string();
            writer.abort().await;
            drain(reader, remaining - got as u64).await?;
            mark_item_failed(session, manifest, &cause);
            return Ok(());
        }
        remaining -= got as u64;

        // Bytes count once they are handed to the filesystem.
        let total = {
            let mut guard = session.lock().expect("session lock");
            guard.add_bytes(got as u64);
            if let Some(slot) = guard.item_mut(manifest.item_id) {
                slot.add_transferred(got as u64);
            }
            guard.bytes_transferred()
        };
        estimator.record(Instant::now(), total);

        if throttle.ready(config, estimator.is_high_throughput()) {
            emit_progress(session, bus, estimator);
        }
    }

    match writer.commit().await {
        Ok(path) => {
            tracing::debug!(path = %path.display(), "item published");
            let mut guard = session.lock().expect("session lock");
            guard.file_completed();
            if manifest.last {
                if let Some(slot) = guard.item_mut(manifest.item_id) {
                    slot.status = ItemStatus::Completed;
                }
            }
        }
        Err(e) => mark_item_failed(session, manifest, &e.to_string()),
    }
    Ok(())
}

fn mark_item_failed(session: &SessionHandle, manifest: &ItemManifest, cause: &str) {
    tracing::warn!(path = %manifest.relative_path, %cause, "item failed, session continues");
    let mut guard = session.lock().expect("session lock");
    if let Some(slot) = guard.item_mut(manifest.item_id) {
        slot.fail(cause);
    }
}

async fn mark_failed_and_drain(
    session: &SessionHandle,
    reader: &mut BufReader<TcpStream>,
    manifest: &ItemManifest,
    cause: &str,
) -> Result<(), RecvAbort> {
    mark_item_failed(session, manifest, cause);
    drain(reader, manifest.size).await
}

/// Consume and discard `count` payload bytes to keep frame alignment after
/// a local failure.
async fn drain(reader: &mut BufReader<TcpStream>, mut count: u64) -> Result<(), RecvAbort> {
    let mut buf = vec![0u8; 64 * 1024];
    while count > 0 {
        let want = count.min(buf.len() as u64) as usize;
        let got = reader
            .read(&mut buf[..want])
            .await
            .map_err(|e| RecvAbort::Fatal(EngineError::PeerDisconnected(e.to_string())))?;
        if got == 0 {
            return Err(RecvAbort::Fatal(EngineError::PeerDisconnected(
                "stream closed while draining failed item".to_string(),
            )));
        }
        count -= got as u64;
    }
    Ok(())
}
