//! End-to-end sessions over real sockets.

mod common;

use common::{
    FailingStore, MemoryStore, PNG, WAIT, WsClient, http_request, spawn_server, spawn_with_store,
    split_reply, wait_for_members,
};
use dropcast::relay::{Hub, SessionSettings};
use dropcast::ws::frame::{Frame, Opcode};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_join_receives_current_ready_state_once() {
    let (addr, hub) = spawn_with_store(Arc::new(MemoryStore::default())).await;

    let (mut first, greeting) = WsClient::join(addr).await;
    assert_eq!(greeting, "false");
    first.expect_silence().await;

    hub.ready.toggle();
    let (mut second, greeting) = WsClient::join(addr).await;
    assert_eq!(greeting, "true");
    second.expect_silence().await;
}

#[tokio::test]
async fn test_toggle_endpoint_broadcasts_new_value() {
    let (addr, hub) = spawn_with_store(Arc::new(MemoryStore::default())).await;
    let (mut a, _) = WsClient::join(addr).await;
    let (mut b, _) = WsClient::join(addr).await;

    let (status, body) = split_reply(&http_request(addr, "POST", "/toggle-flag").await);
    assert!(status.starts_with("HTTP/1.1 200"));
    assert_eq!(body, b"Flag toggled!".to_vec());

    assert_eq!(a.recv_text().await, "true");
    assert_eq!(b.recv_text().await, "true");

    hub.toggle_ready().await;
    assert_eq!(a.recv_text().await, "false");
    assert_eq!(b.recv_text().await, "false");
}

#[tokio::test]
async fn test_upload_is_stored_and_announced_to_everyone_once() {
    let store = Arc::new(MemoryStore::default());
    let (addr, _hub) = spawn_with_store(store.clone()).await;
    let (mut uploader, _) = WsClient::join(addr).await;
    let (mut watcher, _) = WsClient::join(addr).await;

    uploader.upload(PNG).await;

    let locator = uploader.recv_text().await;
    assert_eq!(locator, "mem://0.png");
    assert_eq!(watcher.recv_text().await, locator);
    uploader.expect_silence().await;

    assert_eq!(store.stored(), vec![(locator, PNG.to_vec())]);
}

#[tokio::test]
async fn test_fragmented_upload_matches_single_frame_upload() {
    let store = Arc::new(MemoryStore::default());
    let (addr, _hub) = spawn_with_store(store.clone()).await;
    let (mut client, _) = WsClient::join(addr).await;

    let mut data = b"%PDF-1.7\n".to_vec();
    data.extend((0..20_000u32).map(|i| (i % 253) as u8));

    client.upload(&data).await;
    client.recv_text().await;

    let cuts = [0, 3, 4, 9_000, 9_001, data.len()];
    for (i, window) in cuts.windows(2).enumerate() {
        let chunk = data[window[0]..window[1]].to_vec();
        let fin = i == cuts.len() - 2;
        let frame = if i == 0 {
            Frame::binary(chunk, fin)
        } else {
            Frame::continuation(chunk, fin)
        };
        client.send(frame).await;
    }
    assert_eq!(client.recv_text().await, "mem://1.pdf");

    let stored = store.stored();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].1, data);
    assert_eq!(stored[1].1, stored[0].1);
}

#[tokio::test]
async fn test_control_frames_between_fragments_are_handled() {
    let store = Arc::new(MemoryStore::default());
    let (addr, _hub) = spawn_with_store(store.clone()).await;
    let (mut client, _) = WsClient::join(addr).await;

    client.send(Frame::binary(PNG[..6].to_vec(), false)).await;
    client.send(Frame::ping(b"hb".to_vec())).await;
    client.send(Frame::continuation(PNG[6..].to_vec(), true)).await;

    let pong = client.recv_frame().await.unwrap();
    assert_eq!(pong.opcode, Opcode::Pong);
    assert_eq!(pong.payload, b"hb".to_vec());
    assert_eq!(client.recv_text().await, "mem://0.png");
    assert_eq!(store.stored()[0].1, PNG.to_vec());
}

#[tokio::test]
async fn test_interrupted_upload_keeps_only_the_new_message() {
    let store = Arc::new(MemoryStore::default());
    let (addr, hub) = spawn_with_store(store.clone()).await;
    let (mut client, _) = WsClient::join(addr).await;

    client.send(Frame::binary(b"stale bytes".to_vec(), false)).await;
    client.upload(PNG).await;

    assert_eq!(client.recv_text().await, "mem://0.png");
    assert_eq!(store.stored()[0].1, PNG.to_vec());
    assert_eq!(hub.registry.len().await, 1);
}

#[tokio::test]
async fn test_unrecognized_upload_only_answers_the_uploader() {
    let store = Arc::new(MemoryStore::default());
    let (addr, hub) = spawn_with_store(store.clone()).await;
    let (mut uploader, _) = WsClient::join(addr).await;
    let (mut b, _) = WsClient::join(addr).await;
    let (mut c, _) = WsClient::join(addr).await;

    uploader.upload(b"plain text, not a file").await;

    assert_eq!(uploader.recv_text().await, "Could not detect the file type.");
    b.expect_silence().await;
    c.expect_silence().await;
    assert!(store.stored().is_empty());
    assert_eq!(hub.registry.len().await, 3);

    // The uploader's connection stays usable.
    uploader.upload(PNG).await;
    let locator = uploader.recv_text().await;
    assert_eq!(b.recv_text().await, locator);
}

#[tokio::test]
async fn test_short_upload_is_unrecognized() {
    let (addr, _hub) = spawn_with_store(Arc::new(MemoryStore::default())).await;
    let (mut client, _) = WsClient::join(addr).await;

    client.upload(&[0xFF, 0xD8, 0xFF]).await;

    assert_eq!(client.recv_text().await, "Could not detect the file type.");
}

#[tokio::test]
async fn test_storage_failure_only_answers_the_uploader() {
    let (addr, hub) = spawn_with_store(Arc::new(FailingStore)).await;
    let (mut uploader, _) = WsClient::join(addr).await;
    let (mut other, _) = WsClient::join(addr).await;

    uploader.upload(PNG).await;

    let reply = uploader.recv_text().await;
    assert!(reply.starts_with("Could not store the file"), "{}", reply);
    other.expect_silence().await;
    assert_eq!(hub.registry.len().await, 2);
}

#[tokio::test]
async fn test_text_messages_change_nothing() {
    let (addr, hub) = spawn_with_store(Arc::new(MemoryStore::default())).await;
    let (mut a, _) = WsClient::join(addr).await;
    let (mut b, _) = WsClient::join(addr).await;

    a.send(Frame::text("hello from a")).await;

    a.expect_silence().await;
    b.expect_silence().await;
    assert!(!hub.ready.get());
}

#[tokio::test]
async fn test_close_handshake_unregisters() {
    let (addr, hub) = spawn_with_store(Arc::new(MemoryStore::default())).await;
    let (mut client, _) = WsClient::join(addr).await;
    wait_for_members(&hub, 1).await;

    client.send(Frame::close(Some(1000))).await;

    let reply = client.recv_frame().await.unwrap();
    assert_eq!(reply.opcode, Opcode::Close);
    assert_eq!(reply.close_code(), Some(1000));
    assert!(client.recv_frame().await.is_none());
    wait_for_members(&hub, 0).await;
}

#[tokio::test]
async fn test_transport_failure_is_confined_to_one_session() {
    let (addr, hub) = spawn_with_store(Arc::new(MemoryStore::default())).await;
    let (mut broken, _) = WsClient::join(addr).await;
    let (mut healthy, _) = WsClient::join(addr).await;
    wait_for_members(&hub, 2).await;

    // Reserved bits set: not a valid frame.
    broken.send_raw(&[0xF2, 0x80, 0, 0, 0, 0]).await;
    wait_for_members(&hub, 1).await;

    let close = broken.recv_frame().await.unwrap();
    assert_eq!(close.opcode, Opcode::Close);
    assert_eq!(close.close_code(), Some(1002));

    hub.toggle_ready().await;
    assert_eq!(healthy.recv_text().await, "true");
}

#[tokio::test]
async fn test_abrupt_disconnect_unregisters_and_broadcast_continues() {
    let store = Arc::new(MemoryStore::default());
    let (addr, hub) = spawn_with_store(store).await;
    let (mut a, _) = WsClient::join(addr).await;
    let (b, _) = WsClient::join(addr).await;
    let (mut c, _) = WsClient::join(addr).await;
    wait_for_members(&hub, 3).await;

    drop(b);
    a.upload(PNG).await;

    let locator = a.recv_text().await;
    assert_eq!(c.recv_text().await, locator);
    wait_for_members(&hub, 2).await;
}

#[tokio::test]
async fn test_non_upgrade_ws_request_is_rejected() {
    let (addr, _hub) = spawn_with_store(Arc::new(MemoryStore::default())).await;

    let (status, _) = split_reply(&http_request(addr, "GET", "/ws").await);

    assert!(status.starts_with("HTTP/1.1 400"), "{}", status);
}

#[tokio::test]
async fn test_idle_connection_receives_keepalive_ping() {
    let settings = SessionSettings {
        keepalive_interval: Duration::from_millis(50),
        ..SessionSettings::default()
    };
    let addr = spawn_server(Hub::new(Arc::new(MemoryStore::default()), settings)).await;
    let (mut client, _) = WsClient::join(addr).await;

    let frame = tokio::time::timeout(WAIT, client.recv_frame())
        .await
        .expect("no ping before timeout")
        .unwrap();

    assert_eq!(frame.opcode, Opcode::Ping);
    assert!(frame.payload.is_empty());
}
