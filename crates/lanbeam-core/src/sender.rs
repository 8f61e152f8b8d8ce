//! Sending side of the transfer data plane.
//!
//! After the peer accepts, one task owns the whole stream: connect, write
//! the session header, stream each item in order, finish with END. Bytes
//! are counted as they are written to the socket; the transport's flow
//! control provides the backpressure that makes that honest. Progress
//! events are throttled; the terminal event is never skipped.
//!
//! Per-item failures (unopenable file, unreadable folder descendant) mark
//! the item and move on. Transport failures kill the session with
//! `PeerDisconnected`. A cancel signal closes the stream mid-frame; the
//! receiver notices the short read and unlinks its temp file.

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{EngineEvent, EventBus};
use crate::frame::{self, FrameManifest, ItemManifest, SessionHeader};
use crate::item::{ItemKind, ItemStatus, TransferItem};
use crate::session::{SessionHandle, SessionStatus};
use crate::speed::SpeedEstimator;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::watch;

/// Progress event throttle shared by both data-plane directions.
pub(crate) struct ProgressThrottle {
    last_emit: Instant,
}

impl ProgressThrottle {
    pub(crate) fn new() -> Self {
        Self {
            // Allow the first emission immediately.
            last_emit: Instant::now() - std::time::Duration::from_secs(1),
        }
    }

    /// Whether enough time has passed to emit another progress event.
    pub(crate) fn ready(&mut self, config: &EngineConfig, high_throughput: bool) -> bool {
        let interval = if high_throughput {
            config.progress_interval_fast
        } else {
            config.progress_interval
        };
        let now = Instant::now();
        if now.duration_since(self.last_emit) >= interval {
            self.last_emit = now;
            true
        } else {
            false
        }
    }
}

/// Emit a progress snapshot built under the session lock, after releasing
/// it.
pub(crate) fn emit_progress(session: &SessionHandle, bus: &EventBus, estimator: &SpeedEstimator) {
    let snapshot = {
        let mut guard = session.lock().expect("session lock");
        guard.current_bps = estimator.instantaneous_bps();
        guard.clone()
    };
    bus.emit(EngineEvent::SessionProgress(snapshot));
}

/// Run the sending side of one session to completion.
///
/// All outcomes are recorded on the session and announced on the bus; the
/// returned result only mirrors them for the caller's logs.
pub async fn run_sender(
    session: SessionHandle,
    config: EngineConfig,
    bus: EventBus,
    mut cancel: watch::Receiver<bool>,
) -> Result<(), EngineError> {
    let (peer_addr, transfer_id, items, total_bytes, total_files) = {
        let guard = session.lock().expect("session lock");
        (
            guard.peer.endpoint(),
            guard.id,
            guard.items.clone(),
            guard.total_bytes,
            guard.total_files,
        )
    };

    let stream = match TcpStream::connect(peer_addr).await {
        Ok(stream) => stream,
        Err(e) => {
            let error = EngineError::PeerDisconnected(format!("connect failed: {e}"));
            finish_failed(&session, &bus, SessionStatus::Failed, &error.to_string());
            return Err(error);
        }
    };
    let mut writer = BufWriter::new(stream);

    tracing::info!(%transfer_id, peer = %peer_addr, "data stream open, sending header");

    let mut estimator = SpeedEstimator::new(Instant::now());
    let mut throttle = ProgressThrottle::new();

    let result = stream_items(
        &session,
        &config,
        &bus,
        &mut writer,
        &mut cancel,
        StreamPlan {
            transfer_id,
            items,
            total_bytes,
            total_files,
        },
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
            tracing::info!(%transfer_id, "send completed");
            Ok(())
        }
        Err(SendAbort::Cancelled) => {
            finish_failed(&session, &bus, SessionStatus::Cancelled, "cancelled");
            tracing::info!(%transfer_id, "send cancelled");
            Err(EngineError::UserCancelled)
        }
        Err(SendAbort::Fatal(error)) => {
            finish_failed(&session, &bus, SessionStatus::Failed, &error.to_string());
            tracing::warn!(%transfer_id, error = %error, "send failed");
            Err(error)
        }
    }
}

struct StreamPlan {
    transfer_id: uuid::Uuid,
    items: Vec<TransferItem>,
    total_bytes: u64,
    total_files: u64,
}

enum SendAbort {
    Cancelled,
    Fatal(EngineError),
}

impl From<std::io::Error> for SendAbort {
    fn from(e: std::io::Error) -> Self {
        SendAbort::Fatal(EngineError::PeerDisconnected(e.to_string()))
    }
}

fn finish_failed(session: &SessionHandle, bus: &EventBus, status: SessionStatus, error: &str) {
    let snapshot = {
        let mut guard = session.lock().expect("session lock");
        if !guard.fail(status, error) {
            return; // someone else already finished this session
        }
        guard.clone()
    };
    bus.emit(EngineEvent::SessionFailed {
        session: snapshot,
        error: error.to_string(),
    });
}

#[allow(clippy::too_many_arguments)]
async fn stream_items(
    session: &SessionHandle,
    config: &EngineConfig,
    bus: &EventBus,
    writer: &mut BufWriter<TcpStream>,
    cancel: &mut watch::Receiver<bool>,
    plan: StreamPlan,
    estimator: &mut SpeedEstimator,
    throttle: &mut ProgressThrottle,
) -> Result<(), SendAbort> {
    frame::write_manifest(
        writer,
        &FrameManifest::Header(SessionHeader {
            transfer_id: plan.transfer_id,
            total_bytes: plan.total_bytes,
            total_files: plan.total_files,
            capabilities: vec!["atomic-writes".to_string()],
        }),
    )
    .await?;

    for item in plan.items {
        if *cancel.borrow() {
            return Err(SendAbort::Cancelled);
        }

        {
            let mut guard = session.lock().expect("session lock");
            guard.current_file = Some(item.name.clone());
            if let Some(slot) = guard.item_mut(item.id) {
                slot.status = ItemStatus::InProgress;
            }
        }

        match item.kind {
            ItemKind::Text => send_text(session, writer, &item).await?,
            ItemKind::File => {
                send_file(session, config, bus, writer, cancel, &item, estimator, throttle).await?;
            }
            ItemKind::Folder => {
                send_folder(session, config, bus, writer, cancel, &item, estimator, throttle)
                    .await?;
            }
        }

        // Item boundaries always get a progress event, throttle or not.
        emit_progress(session, bus, estimator);
    }

    frame::write_manifest(writer, &FrameManifest::End {}).await?;
    writer.flush().await?;
    Ok(())
}

async fn send_text(
    session: &SessionHandle,
    writer: &mut BufWriter<TcpStream>,
    item: &TransferItem,
) -> Result<(), SendAbort> {
    let bytes = item.text.clone().unwrap_or_default().into_bytes();

    frame::write_manifest(
        writer,
        &FrameManifest::Item(ItemManifest {
            item_id: item.id,
            kind: ItemKind::Text,
            relative_path: item.name.clone(),
            size: bytes.len() as u64,
            last: true,
        }),
    )
    .await?;
    writer.write_all(&bytes).await?;

    let mut guard = session.lock().expect("session lock");
    guard.add_bytes(bytes.len() as u64);
    if let Some(slot) = guard.item_mut(item.id) {
        slot.add_transferred(bytes.len() as u64);
        slot.status = ItemStatus::Completed;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn send_file(
    session: &SessionHandle,
    config: &EngineConfig,
    bus: &EventBus,
    writer: &mut BufWriter<TcpStream>,
    cancel: &mut watch::Receiver<bool>,
    item: &TransferItem,
    estimator: &mut SpeedEstimator,
    throttle: &mut ProgressThrottle,
) -> Result<(), SendAbort> {
    let source = item.source.clone().expect("file item always has a source");

    // Open before the manifest goes out: an unopenable file is a per-item
    // failure, not a hole in the stream.
    let (file, size) = match open_sized(&source).await {
        Ok(opened) => opened,
        Err(e) => {
            mark_item_failed(session, bus, item.id, &item.name, &e);
            return Ok(());
        }
    };

    frame::write_manifest(
        writer,
        &FrameManifest::Item(ItemManifest {
            item_id: item.id,
            kind: ItemKind::File,
            relative_path: item.name.clone(),
            size,
            last: true,
        }),
    )
    .await?;

    copy_payload(
        session, config, bus, writer, cancel, file, size, item.id, estimator, throttle,
    )
    .await?;

    let mut guard = session.lock().expect("session lock");
    guard.file_completed();
    if let Some(slot) = guard.item_mut(item.id) {
        slot.status = ItemStatus::Completed;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn send_folder(
    session: &SessionHandle,
    config: &EngineConfig,
    bus: &EventBus,
    writer: &mut BufWriter<TcpStream>,
    cancel: &mut watch::Receiver<bool>,
    item: &TransferItem,
    estimator: &mut SpeedEstimator,
    throttle: &mut ProgressThrottle,
) -> Result<(), SendAbort> {
    let source = item.source.clone().expect("folder item always has a source");

    let outcome = match lanbeam_files::walk_tree(&source, &item.name).await {
        Ok(outcome) => outcome,
        Err(e) => {
            mark_item_failed(session, bus, item.id, &item.name, &e.to_string());
            return Ok(());
        }
    };

    // Unreadable descendants become visible failed entries; readable
    // siblings keep flowing.
    if !outcome.unreadable.is_empty() {
        let mut guard = session.lock().expect("session lock");
        for (path, cause) in &outcome.unreadable {
            let mut failed =
                TransferItem::file(path.display().to_string(), path.clone(), 0);
            failed.fail(cause.clone());
            guard.items.push(failed);
        }
        tracing::warn!(
            folder = %item.name,
            skipped = outcome.unreadable.len(),
            "unreadable descendants skipped"
        );
    }

    let count = outcome.files.len();
    for (index, file_entry) in outcome.files.iter().enumerate() {
        if *cancel.borrow() {
            return Err(SendAbort::Cancelled);
        }

        let (file, size) = match open_sized(&file_entry.source).await {
            Ok(opened) => opened,
            Err(e) => {
                // Vanished or lost permission between walk and send.
                let mut guard = session.lock().expect("session lock");
                let mut failed = TransferItem::file(
                    file_entry.relative_path.clone(),
                    file_entry.source.clone(),
                    file_entry.size,
                );
                failed.fail(e);
                guard.items.push(failed);
                continue;
            }
        };

        {
            let mut guard = session.lock().expect("session lock");
            guard.current_file = Some(file_entry.relative_path.clone());
        }

        frame::write_manifest(
            writer,
            &FrameManifest::Item(ItemManifest {
                item_id: item.id,
                kind: ItemKind::File,
                relative_path: file_entry.relative_path.clone(),
                size,
                last: index + 1 == count,
            }),
        )
        .await?;

        copy_payload(
            session, config, bus, writer, cancel, file, size, item.id, estimator, throttle,
        )
        .await?;

        let mut guard = session.lock().expect("session lock");
        guard.file_completed();
    }

    let mut guard = session.lock().expect("session lock");
    if let Some(slot) = guard.item_mut(item.id) {
        slot.status = ItemStatus::Completed;
    }
    Ok(())
}

async fn open_sized(path: &std::path::Path) -> Result<(tokio::fs::File, u64), String> {
    let file = tokio::fs::File::open(path).await.map_err(|e| e.to_string())?;
    let size = file.metadata().await.map_err(|e| e.to_string())?.len();
    Ok((file, size))
}

fn mark_item_failed(
    session: &SessionHandle,
    bus: &EventBus,
    item_id: uuid::Uuid,
    name: &str,
    cause: &str,
) {
    tracing::warn!(item = %name, %cause, "item failed, session continues");
    let snapshot = {
        let mut guard = session.lock().expect("session lock");
        if let Some(slot) = guard.item_mut(item_id) {
            slot.fail(cause);
        }
        guard.clone()
    };
    bus.emit(EngineEvent::SessionProgress(snapshot));
}

/// Stream exactly `size` bytes from `file` into the socket, counting them
/// on the session and emitting throttled progress.
#[allow(clippy::too_many_arguments)]
async fn copy_payload(
    session: &SessionHandle,
    config: &EngineConfig,
    bus: &EventBus,
    writer: &mut BufWriter<TcpStream>,
    cancel: &mut watch::Receiver<bool>,
    mut file: tokio::fs::File,
    size: u64,
    item_id: uuid::Uuid,
    estimator: &mut SpeedEstimator,
    throttle: &mut ProgressThrottle,
) -> Result<(), SendAbort> {
    let mut remaining = size;
    let mut buf = vec![0u8; config.io_chunk_size];

    while remaining > 0 {
        if *cancel.borrow() {
            return Err(SendAbort::Cancelled);
        }

        let want = remaining.min(buf.len() as u64) as usize;
        let got = file
            .read(&mut buf[..want])
            .await
            .map_err(|e| SendAbort::Fatal(EngineError::PeerDisconnected(format!("source read: {e}"))))?;
        if got == 0 {
            // File shrank underneath us; the declared frame size can no
            // longer be honored, which poisons the whole stream.
            return Err(SendAbort::Fatal(EngineError::PeerDisconnected(
                "source truncated mid-frame".to_string(),
            )));
        }

        writer.write_all(&buf[..got]).await?;
        remaining -= got as u64;

        let total = {
            let mut guard = session.lock().expect("session lock");
            guard.add_bytes(got as u64);
            if let Some(slot) = guard.item_mut(item_id) {
                slot.add_transferred(got as u64);
            }
            guard.bytes_transferred()
        };
        estimator.record(Instant::now(), total);

        if throttle.ready(config, estimator.is_high_throughput()) {
            emit_progress(session, bus, estimator);
        }
    }

    Ok(())
}
