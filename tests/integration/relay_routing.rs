// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Integration tests for message and read-receipt routing.
//!
//! Starts the relay in-process on an OS-assigned port and drives it with
//! real WebSocket clients. Covers:
//! - direct messages reach the receiver and nobody else
//! - every device joined as the receiver gets a copy
//! - read receipts reach the partner's room with exactly `{readerId, messageIds}`,
//!   echoed as the client sent them
//! - messages from one sender arrive in the order they were sent

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bazaar_proto::ids::UserId;
use bazaar_relay::relay::{self, RelayState};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);
const SILENCE_WINDOW: Duration = Duration::from_millis(200);

// =============================================================================
// Helpers
// =============================================================================

async fn start_relay() -> (SocketAddr, Arc<RelayState>) {
    let state = Arc::new(RelayState::new());
    let (addr, _handle) = relay::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start relay");
    (addr, state)
}

async fn connect(addr: SocketAddr) -> Ws {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("failed to connect");
    ws
}

async fn emit(ws: &mut Ws, event: &str, data: Value) {
    let frame = json!({"event": event, "data": data}).to_string();
    ws.send(Message::text(frame)).await.unwrap();
}

/// Polls until `cond` holds, failing the test after [`RECV_TIMEOUT`].
async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Connects, joins as `user`, and waits until the relay has registered it.
async fn join_as(addr: SocketAddr, state: &RelayState, user: &str) -> Ws {
    let id = UserId::new(user).unwrap();
    let before = state.registry().room_size(&id);
    let mut ws = connect(addr).await;
    emit(&mut ws, "joinRoom", json!(user)).await;
    wait_until(|| state.registry().room_size(&id) == before + 1).await;
    ws
}

/// Receives the next text frame as JSON.
async fn recv_event(ws: &mut Ws) -> Value {
    loop {
        let msg = tokio::time::timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Asserts that nothing arrives on `ws` for a short window.
async fn assert_silent(ws: &mut Ws) {
    let result = tokio::time::timeout(SILENCE_WINDOW, ws.next()).await;
    assert!(result.is_err(), "expected no event, got {result:?}");
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn message_reaches_receiver_only() {
    let (addr, state) = start_relay().await;
    let mut alice = join_as(addr, &state, "alice").await;
    let mut bob = join_as(addr, &state, "bob").await;

    emit(
        &mut alice,
        "sendMessage",
        json!({"receiverId": "bob", "content": "hi"}),
    )
    .await;

    let event = recv_event(&mut bob).await;
    assert_eq!(
        event,
        json!({"event": "newMessage", "data": {"receiverId": "bob", "content": "hi"}})
    );
    assert_silent(&mut alice).await;
}

#[tokio::test]
async fn payload_is_forwarded_unmodified() {
    let (addr, state) = start_relay().await;
    let mut buyer = join_as(addr, &state, "buyer-7").await;
    let mut seller = join_as(addr, &state, "seller-3").await;

    let payload = json!({
        "receiverId": "seller-3",
        "senderId": "buyer-7",
        "content": null,
        "image": "/uploads/chat/8f2.png",
        "productId": 4411,
        "createdAt": "2026-10-16T09:30:00Z"
    });
    emit(&mut buyer, "sendMessage", payload.clone()).await;

    let event = recv_event(&mut seller).await;
    assert_eq!(event["event"], "newMessage");
    assert_eq!(event["data"], payload);
    assert_silent(&mut buyer).await;
}

#[tokio::test]
async fn message_is_not_observed_by_other_users() {
    let (addr, state) = start_relay().await;
    let mut alice = join_as(addr, &state, "alice").await;
    let mut bob = join_as(addr, &state, "bob").await;
    let mut carol = join_as(addr, &state, "carol").await;

    emit(
        &mut alice,
        "sendMessage",
        json!({"receiverId": "bob", "content": "private"}),
    )
    .await;

    let event = recv_event(&mut bob).await;
    assert_eq!(event["data"]["content"], "private");
    assert_silent(&mut carol).await;
    assert_silent(&mut alice).await;
}

#[tokio::test]
async fn every_device_of_receiver_gets_a_copy() {
    let (addr, state) = start_relay().await;
    let mut sender = join_as(addr, &state, "dave").await;
    let mut phone = join_as(addr, &state, "carol").await;
    let mut laptop = join_as(addr, &state, "carol").await;

    emit(
        &mut sender,
        "sendMessage",
        json!({"receiverId": "carol", "content": "both of you"}),
    )
    .await;

    for device in [&mut phone, &mut laptop] {
        let event = recv_event(device).await;
        assert_eq!(event["event"], "newMessage");
        assert_eq!(event["data"]["content"], "both of you");
    }
    assert_silent(&mut sender).await;
}

#[tokio::test]
async fn read_receipt_reaches_partner_room() {
    let (addr, state) = start_relay().await;
    let mut alice = join_as(addr, &state, "alice").await;
    let mut bob = join_as(addr, &state, "bob").await;

    emit(
        &mut alice,
        "markRead",
        json!({"partnerId": "bob", "readerId": "bob", "messageIds": [1, 2]}),
    )
    .await;

    let event = recv_event(&mut bob).await;
    assert_eq!(
        event,
        json!({"event": "messagesRead", "data": {"readerId": "bob", "messageIds": [1, 2]}})
    );
    assert_silent(&mut alice).await;
}

#[tokio::test]
async fn read_receipt_fans_out_to_all_partner_devices_only() {
    let (addr, state) = start_relay().await;
    let mut reader = join_as(addr, &state, "alice").await;
    let mut partner_a = join_as(addr, &state, "bob").await;
    let mut partner_b = join_as(addr, &state, "bob").await;
    let mut bystander = join_as(addr, &state, "erin").await;

    emit(
        &mut reader,
        "markRead",
        json!({"partnerId": "bob", "readerId": "alice", "messageIds": ["m-1", "m-9"]}),
    )
    .await;

    for device in [&mut partner_a, &mut partner_b] {
        let event = recv_event(device).await;
        assert_eq!(event["event"], "messagesRead");
        assert_eq!(
            event["data"],
            json!({"readerId": "alice", "messageIds": ["m-1", "m-9"]})
        );
    }
    assert_silent(&mut bystander).await;
    assert_silent(&mut reader).await;
}

#[tokio::test]
async fn read_receipt_echoes_reader_and_ids_as_sent() {
    let (addr, state) = start_relay().await;
    let mut reader = join_as(addr, &state, "7").await;
    let mut partner = join_as(addr, &state, "5").await;

    emit(
        &mut reader,
        "markRead",
        json!({"partnerId": 5, "readerId": 7, "messageIds": [1, null, "m-3"]}),
    )
    .await;

    let event = recv_event(&mut partner).await;
    assert_eq!(
        event,
        json!({"event": "messagesRead", "data": {"readerId": 7, "messageIds": [1, null, "m-3"]}})
    );
}

#[tokio::test]
async fn messages_from_one_sender_arrive_in_order() {
    let (addr, state) = start_relay().await;
    let mut alice = join_as(addr, &state, "alice").await;
    let mut bob = join_as(addr, &state, "bob").await;

    for seq in 0..50 {
        emit(
            &mut alice,
            "sendMessage",
            json!({"receiverId": "bob", "content": format!("msg {seq}"), "seq": seq}),
        )
        .await;
    }

    for seq in 0..50 {
        let event = recv_event(&mut bob).await;
        assert_eq!(event["data"]["seq"], seq);
    }
}

#[tokio::test]
async fn numeric_and_string_ids_share_a_room() {
    let (addr, state) = start_relay().await;
    let mut sender = join_as(addr, &state, "1").await;

    let mut receiver = connect(addr).await;
    emit(&mut receiver, "joinRoom", json!(42)).await;
    let id = UserId::new("42").unwrap();
    wait_until(|| state.registry().room_size(&id) == 1).await;

    emit(
        &mut sender,
        "sendMessage",
        json!({"receiverId": "42", "content": "numeric"}),
    )
    .await;

    let event = recv_event(&mut receiver).await;
    assert_eq!(event["data"]["content"], "numeric");
}
