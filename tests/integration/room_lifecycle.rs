// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::doc_markdown
)]

//! Integration tests for room membership over WebSocket: leave, disconnect,
//! reconnect, reclamation, and the room snapshot endpoints.
//!
//! Verification command: `cargo test --test room_lifecycle`

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use huddle_proto::envelope::{self, Envelope, EnvelopeKind};
use huddle_proto::room::RoomInfo;
use huddle_relay::config::RelayConfig;
use huddle_relay::relay::{RelayState, start_server_with_state};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_tungstenite::tungstenite;

// =============================================================================
// Type aliases and helpers
// =============================================================================

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn start_relay() -> (std::net::SocketAddr, Arc<RelayState>) {
    let state = Arc::new(RelayState::new());
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start test relay");
    (addr, state)
}

/// Polls the coordinator until `check` holds for the room, or fails after 5s.
async fn wait_for_room(state: &RelayState, room_id: &str, check: impl Fn(&RoomInfo) -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if check(&state.coordinator.room_info(room_id).await) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("room never reached expected state");
}

async fn connect(
    addr: std::net::SocketAddr,
    state: &RelayState,
    room_id: &str,
    client_id: &str,
) -> WsStream {
    let url = format!("ws://{addr}/ws/{room_id}/{client_id}");
    let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    wait_for_room(state, room_id, |info| {
        info.participants.iter().any(|p| p == client_id)
    })
    .await;
    ws
}

async fn send(ws: &mut WsStream, envelope: &Envelope) {
    let text = envelope::encode(envelope).unwrap();
    ws.send(tungstenite::Message::text(text)).await.unwrap();
}

async fn recv(ws: &mut WsStream) -> Envelope {
    let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("recv timed out")
        .unwrap()
        .unwrap();
    envelope::decode(msg.to_text().unwrap()).unwrap()
}

/// Waits until the server closes the socket (Close frame, error, or EOF).
async fn expect_closed(ws: &mut WsStream) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                None | Some(Err(_) | Ok(tungstenite::Message::Close(_))) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await
    .expect("socket was not closed");
}

/// Minimal HTTP/1.1 GET returning the response body.
async fn http_get(addr: std::net::SocketAddr, path: &str) -> String {
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"), "got: {response}");
    response
        .split_once("\r\n\r\n")
        .map(|(_, body)| body.to_string())
        .unwrap()
}

// =============================================================================
// Leave and reclamation
// =============================================================================

/// The only member sending LEAVE removes the room entirely.
#[tokio::test]
async fn last_leave_reclaims_room() {
    let (addr, state) = start_relay().await;
    let mut carol = connect(addr, &state, "room2", "carol").await;
    assert!(state.coordinator.room_info("room2").await.exists);

    send(&mut carol, &Envelope::new(EnvelopeKind::Leave)).await;

    wait_for_room(&state, "room2", |info| !info.exists).await;
    assert_eq!(state.coordinator.room_count().await, 0);
}

/// Explicit LEAVE is announced to the rest of the room.
#[tokio::test]
async fn leave_is_announced() {
    let (addr, state) = start_relay().await;
    let mut alice = connect(addr, &state, "room1", "alice").await;
    let mut bob = connect(addr, &state, "room1", "bob").await;

    send(&mut alice, &Envelope::new(EnvelopeKind::Leave)).await;

    let notice = recv(&mut bob).await;
    assert_eq!(notice.kind, EnvelopeKind::Leave);
    assert_eq!(notice.client_id.as_deref(), Some("alice"));
    wait_for_room(&state, "room1", |info| info.participants == ["bob"]).await;
}

/// After LEAVE the client still gets its pending replies, then a Close frame.
#[tokio::test]
async fn leave_flushes_replies_then_sends_close() {
    let (addr, state) = start_relay().await;
    let mut alice = connect(addr, &state, "room1", "alice").await;

    alice
        .send(tungstenite::Message::text("not json"))
        .await
        .unwrap();
    send(&mut alice, &Envelope::new(EnvelopeKind::Leave)).await;

    assert_eq!(recv(&mut alice).await.kind, EnvelopeKind::Error);
    let frame = tokio::time::timeout(Duration::from_secs(5), alice.next())
        .await
        .expect("no close frame")
        .unwrap()
        .unwrap();
    assert!(matches!(frame, tungstenite::Message::Close(_)), "got {frame:?}");
}

/// Dropping the socket without LEAVE has the same effect.
#[tokio::test]
async fn socket_close_triggers_leave() {
    let (addr, state) = start_relay().await;
    let mut alice = connect(addr, &state, "room1", "alice").await;
    let mut bob = connect(addr, &state, "room1", "bob").await;

    alice.close(None).await.unwrap();

    let notice = recv(&mut bob).await;
    assert_eq!(notice.kind, EnvelopeKind::Leave);
    assert_eq!(notice.client_id.as_deref(), Some("alice"));

    bob.close(None).await.unwrap();
    wait_for_room(&state, "room1", |info| !info.exists).await;
}

/// Leaving twice through the coordinator is harmless.
#[tokio::test]
async fn repeated_leave_is_noop() {
    let (addr, state) = start_relay().await;
    let _alice = connect(addr, &state, "room1", "alice").await;
    let mut bob = connect(addr, &state, "room1", "bob").await;

    state.coordinator.leave("room1", "alice").await;
    state.coordinator.leave("room1", "alice").await;

    assert_eq!(recv(&mut bob).await.kind, EnvelopeKind::Leave);
    let extra = tokio::time::timeout(Duration::from_millis(200), bob.next()).await;
    assert!(extra.is_err(), "unexpected second notice: {extra:?}");
    assert_eq!(
        state.coordinator.room_info("room1").await.participants,
        ["bob"]
    );
}

/// A frame over the size limit ends the sender's session.
#[tokio::test]
async fn oversized_frame_ends_session() {
    let config = RelayConfig {
        max_message_size: 1024,
        ..RelayConfig::default()
    };
    let state = Arc::new(RelayState::with_config(&config));
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();
    let mut alice = connect(addr, &state, "room1", "alice").await;
    let mut bob = connect(addr, &state, "room1", "bob").await;

    let huge = Envelope::new(EnvelopeKind::Offer).with_field("sdp", json!("v".repeat(4096)));
    send(&mut alice, &huge).await;

    let notice = recv(&mut bob).await;
    assert_eq!(notice.kind, EnvelopeKind::Leave);
    assert_eq!(notice.client_id.as_deref(), Some("alice"));
}

/// Past the room limit a join into a new room is refused with an ERROR.
#[tokio::test]
async fn join_beyond_room_limit_is_refused() {
    let config = RelayConfig {
        max_rooms: 1,
        ..RelayConfig::default()
    };
    let state = Arc::new(RelayState::with_config(&config));
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();
    let _alice = connect(addr, &state, "room1", "alice").await;

    let url = format!("ws://{addr}/ws/room2/bob");
    let (mut bob, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    let refusal = recv(&mut bob).await;
    assert_eq!(refusal.kind, EnvelopeKind::Error);
    expect_closed(&mut bob).await;
    assert!(!state.coordinator.room_info("room2").await.exists);

    // The existing room still takes members.
    let _carol = connect(addr, &state, "room1", "carol").await;
}

// =============================================================================
// Reconnect
// =============================================================================

/// A second connection with the same client id replaces the first; the old
/// socket is closed and its teardown does not evict the new one.
#[tokio::test]
async fn reconnect_replaces_previous_connection() {
    let (addr, state) = start_relay().await;
    let mut old_alice = connect(addr, &state, "room1", "alice").await;
    let mut bob = connect(addr, &state, "room1", "bob").await;

    let url = format!("ws://{addr}/ws/room1/alice");
    let (mut new_alice, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    expect_closed(&mut old_alice).await;
    // Give the old handler time to run its (ignored) leave.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let info = state.coordinator.room_info("room1").await;
    assert_eq!(info.participants, ["alice", "bob"]);

    send(&mut bob, &Envelope::new(EnvelopeKind::Offer).with_target("alice")).await;
    let offer = recv(&mut new_alice).await;
    assert_eq!(offer.source.as_deref(), Some("bob"));
}

// =============================================================================
// Shutdown and snapshots
// =============================================================================

/// Closing every room disconnects every client.
#[tokio::test]
async fn close_all_disconnects_clients() {
    let (addr, state) = start_relay().await;
    let mut alice = connect(addr, &state, "room1", "alice").await;
    let mut bob = connect(addr, &state, "room2", "bob").await;

    state.coordinator.close_all().await;

    expect_closed(&mut alice).await;
    expect_closed(&mut bob).await;
    assert_eq!(state.coordinator.room_count().await, 0);
}

/// The snapshot endpoints report live rooms and absent ones.
#[tokio::test]
async fn room_snapshot_endpoints() {
    let (addr, state) = start_relay().await;
    let mut alice = connect(addr, &state, "room1", "alice").await;
    let _bob = connect(addr, &state, "room1", "bob").await;
    send(&mut alice, &Envelope::new(EnvelopeKind::AudioToggle).with_enabled(false)).await;
    wait_for_room(&state, "room1", |info| info.audio_states.get("alice") == Some(&false)).await;

    let info: RoomInfo = serde_json::from_str(&http_get(addr, "/rooms/room1").await).unwrap();
    assert!(info.exists);
    assert_eq!(info.participant_count, 2);
    assert_eq!(info.participants, ["alice", "bob"]);
    assert_eq!(info.audio_states.get("alice"), Some(&false));

    let missing: RoomInfo = serde_json::from_str(&http_get(addr, "/rooms/nowhere").await).unwrap();
    assert!(!missing.exists);

    let all: Vec<RoomInfo> = serde_json::from_str(&http_get(addr, "/rooms").await).unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].room_id, "room1");
}
