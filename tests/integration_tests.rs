// Cross-crate invariants: event ordering, idempotency, counter
// monotonicity, and the engine lifecycle.

use lanbeam_integration_tests::test_helpers::{
    TestHost, free_port, wait_terminal, write_random_file,
};
use lanbeam_core::{EngineEvent, IncomingRequest, SessionStatus, TransferItem};
use std::time::Duration;
use uuid::Uuid;

const TERMINAL_TIMEOUT: Duration = Duration::from_secs(20);

fn synthetic_request(total_bytes: u64) -> IncomingRequest {
    IncomingRequest {
        transfer_id: Uuid::new_v4(),
        reply_to: format!("127.0.0.1:{}", free_port()).parse().unwrap(),
        peer_name: "synthetic".to_string(),
        peer_signature: "sig-synthetic".to_string(),
        total_bytes,
        item_count: 1,
        preview: vec![("a.bin".to_string(), total_bytes as i64, "file".to_string())],
        truncated: false,
    }
}

#[tokio::test]
async fn test_duplicate_accept_is_idempotent() {
    let receiver = TestHost::start("bravo").await;
    let request = synthetic_request(1024);

    let first = receiver
        .engine
        .accept_request(&request, None, false)
        .await
        .unwrap();
    let second = receiver
        .engine
        .accept_request(&request, None, false)
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(receiver.engine.manager().pending_registrations(), 1);
}

#[tokio::test]
async fn test_exactly_one_terminal_event() {
    let sender = TestHost::start("alpha").await;
    let receiver = TestHost::start("bravo").await;
    receiver.auto_accept();

    let source = sender.save_dir.join("a.bin");
    write_random_file(&source, 128 * 1024);

    let mut events = sender.engine.subscribe();
    let session_id = sender
        .engine
        .send_items(
            receiver.as_peer(),
            vec![TransferItem::file("a.bin", source, 128 * 1024)],
        )
        .await
        .unwrap();

    // Collect every event for this session until silence.
    let mut terminal_count = 0;
    let mut last_bytes = 0u64;
    let deadline = tokio::time::Instant::now() + TERMINAL_TIMEOUT;
    loop {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .unwrap_or_default();
        let Ok(event) = tokio::time::timeout(remaining.min(Duration::from_secs(2)), events.recv())
            .await
        else {
            break;
        };
        match event {
            EngineEvent::SessionProgress(session) if session.id == session_id => {
                // Bytes counter is monotone non-decreasing.
                assert!(session.bytes_transferred() >= last_bytes);
                last_bytes = session.bytes_transferred();
            }
            EngineEvent::SessionCompleted(session) if session.id == session_id => {
                terminal_count += 1;
            }
            EngineEvent::SessionFailed { session, .. } if session.id == session_id => {
                terminal_count += 1;
            }
            _ => {}
        }
        if terminal_count > 0 && remaining < Duration::from_secs(2) {
            break;
        }
    }

    assert_eq!(terminal_count, 1);
}

#[tokio::test]
async fn test_session_archived_after_completion() {
    let sender = TestHost::start("alpha").await;
    let receiver = TestHost::start("bravo").await;
    receiver.auto_accept();

    let source = sender.save_dir.join("a.bin");
    write_random_file(&source, 4096);

    let mut events = sender.engine.subscribe();
    let session_id = sender
        .engine
        .send_items(
            receiver.as_peer(),
            vec![TransferItem::file("a.bin", source, 4096)],
        )
        .await
        .unwrap();
    let (_, error) = wait_terminal(&mut events, session_id, TERMINAL_TIMEOUT).await;
    assert!(error.is_none());

    // The session leaves the active map but stays queryable.
    assert!(
        sender
            .engine
            .active_sessions()
            .iter()
            .all(|s| s.id != session_id)
    );
    let archived = sender.engine.session(session_id).expect("archived session");
    assert_eq!(archived.status(), SessionStatus::Completed);
}

#[tokio::test]
async fn test_cancel_is_idempotent() {
    let receiver = TestHost::start("bravo").await;
    let request = synthetic_request(1024);

    let id = receiver
        .engine
        .accept_request(&request, None, false)
        .await
        .unwrap();

    receiver.engine.cancel(id).await.unwrap();
    // Second cancel of a finished session is a quiet no-op.
    receiver.engine.cancel(id).await.unwrap();

    let session = receiver.engine.session(id).expect("session queryable");
    assert_eq!(session.status(), SessionStatus::Cancelled);
}

#[tokio::test]
async fn test_cancel_unknown_session_errors() {
    let receiver = TestHost::start("bravo").await;
    let result = receiver.engine.cancel(Uuid::new_v4()).await;
    assert!(matches!(
        result,
        Err(lanbeam_core::EngineError::UnknownSession(_))
    ));
}

#[tokio::test]
async fn test_unauthorized_data_connection_is_dropped() {
    use tokio::io::AsyncWriteExt;

    let receiver = TestHost::start("bravo").await;

    // Speak the framing but with a transfer id nobody registered.
    let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", receiver.port))
        .await
        .unwrap();

    let manifest = serde_json::json!({
        "frame": "header",
        "transfer_id": Uuid::new_v4(),
        "total_bytes": 10,
        "total_files": 1,
    });
    let bytes = serde_json::to_vec(&manifest).unwrap();
    stream.write_u64(bytes.len() as u64).await.unwrap();
    stream.write_all(&bytes).await.unwrap();

    // The engine closes the connection without creating a session.
    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(
        Duration::from_secs(5),
        tokio::io::AsyncReadExt::read(&mut stream, &mut buf),
    )
    .await
    .expect("connection should close promptly")
    .unwrap();
    assert_eq!(read, 0);
    assert!(receiver.engine.active_sessions().is_empty());
}

#[tokio::test]
async fn test_remembered_save_location_is_used() {
    let sender = TestHost::start("alpha").await;
    let receiver = TestHost::start("bravo").await;

    // First accept remembers a dedicated directory for this signature.
    let special = receiver.save_dir.join("from-alpha");
    std::fs::create_dir_all(&special).unwrap();

    let engine = std::sync::Arc::clone(&receiver.engine);
    let special_clone = special.clone();
    let mut receiver_events = receiver.engine.subscribe();
    tokio::spawn(async move {
        let mut first = true;
        loop {
            if let EngineEvent::TransferRequest(request) = receiver_events.recv().await {
                let location = if first { Some(special_clone.clone()) } else { None };
                let _ = engine.accept_request(&request, location, first).await;
                first = false;
            }
        }
    });

    let source = sender.save_dir.join("a.txt");
    std::fs::write(&source, b"first").unwrap();

    let mut events = sender.engine.subscribe();
    let first_id = sender
        .engine
        .send_items(
            receiver.as_peer(),
            vec![TransferItem::file("a.txt", source.clone(), 5)],
        )
        .await
        .unwrap();
    let (_, error) = wait_terminal(&mut events, first_id, TERMINAL_TIMEOUT).await;
    assert!(error.is_none());
    assert!(special.join("a.txt").exists());

    // Second transfer passes no explicit location; the remembered one wins.
    let second_id = sender
        .engine
        .send_items(
            receiver.as_peer(),
            vec![TransferItem::file("a.txt", source, 5)],
        )
        .await
        .unwrap();
    let (_, error) = wait_terminal(&mut events, second_id, TERMINAL_TIMEOUT).await;
    assert!(error.is_none());
    assert!(special.join("a (1).txt").exists());
}

#[tokio::test]
async fn test_engine_rejects_taken_port() {
    let holder = TestHost::start("alpha").await;

    // Second engine on the same port must fail with PortUnavailable.
    let result = lanbeam_core::Engine::start(
        lanbeam_integration_tests::test_helpers::test_config(holder.port),
        lanbeam_core::Providers {
            settings: std::sync::Arc::new(
                lanbeam_core::providers::MemorySettingsStore::default(),
            ),
            save_memory: std::sync::Arc::new(
                lanbeam_core::providers::MemorySaveLocations::new(".".into()),
            ),
            host: std::sync::Arc::new(lanbeam_core::providers::StaticHostInfo {
                hostname: "dup".to_string(),
                username: "tester".to_string(),
                platform: "linux".to_string(),
                system: "test".to_string(),
            }),
            interfaces: std::sync::Arc::new(
                lanbeam_integration_tests::test_helpers::LoopbackEnumerator,
            ),
        },
    )
    .await;

    match result {
        Err(lanbeam_core::EngineError::PortUnavailable { port, .. }) => {
            assert_eq!(port, holder.port);
        }
        Ok(_) => panic!("second engine must not start on a taken port"),
        Err(other) => panic!("unexpected error: {other}"),
    }
}
