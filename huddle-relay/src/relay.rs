//! Relay server transport: shared state, WebSocket handler, and room
//! snapshot endpoints.
//!
//! Each participant opens `GET /ws/{room_id}/{client_id}`. Once the upgrade
//! completes the socket is joined to the room and every text frame it sends
//! is decoded as an [`Envelope`] and dispatched through the
//! [`RoomCoordinator`]. Outbound envelopes flow through a bounded channel to
//! a per-socket writer task.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use huddle_proto::envelope::{self, Envelope, EnvelopeError, EnvelopeKind};
use tokio::sync::{mpsc, oneshot};

use crate::config::RelayConfig;
use crate::connection::{Connection, ConnectionError, ConnectionState};
use crate::rooms::RoomCoordinator;

/// How long a closed connection's writer may keep flushing.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Shared relay server state.
pub struct RelayState {
    /// Room membership and envelope routing.
    pub coordinator: RoomCoordinator<WsConnection>,
    /// Maximum accepted inbound message size in bytes.
    max_message_size: usize,
    /// Outbound frames buffered per socket before sends start waiting.
    outbound_buffer: usize,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates relay state with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(&RelayConfig::default())
    }

    /// Creates relay state with the limits from a resolved [`RelayConfig`].
    #[must_use]
    pub fn with_config(config: &RelayConfig) -> Self {
        Self {
            coordinator: RoomCoordinator::new(config.send_timeout)
                .with_max_rooms(config.max_rooms),
            max_message_size: config.max_message_size,
            outbound_buffer: config.outbound_buffer.max(1),
        }
    }
}

/// A WebSocket participant as seen by the room coordinator.
///
/// Sends go through the socket's bounded writer channel, so a slow client
/// applies backpressure that the coordinator's send timeout bounds.
pub struct WsConnection {
    outbound: mpsc::Sender<Message>,
    shutdown: oneshot::Sender<()>,
}

impl Connection for WsConnection {
    async fn accept(&mut self) -> Result<(), ConnectionError> {
        if self.outbound.is_closed() {
            return Err(ConnectionError::Closed);
        }
        Ok(())
    }

    async fn send(&self, envelope: &Envelope) -> Result<(), ConnectionError> {
        let text = envelope::encode(envelope)?;
        self.outbound
            .send(Message::Text(text.into()))
            .await
            .map_err(|_| ConnectionError::Closed)
    }

    async fn close(self) {
        let Self { outbound, shutdown } = self;
        // Best effort: a full buffer means the client is not reading anyway.
        let _ = outbound.try_send(Message::Close(None));
        let _ = shutdown.send(());
    }
}

/// Handles an upgraded WebSocket connection for one participant.
///
/// The connection lifecycle:
/// 1. Join the room (replacing any previous connection for the client id).
/// 2. Spawn a writer task draining the outbound channel to the socket.
/// 3. Read envelopes and dispatch them until the client closes, sends
///    `LEAVE`, errors, or the coordinator closes the connection.
/// 4. Leave the room, exactly once.
pub async fn handle_socket(
    socket: WebSocket,
    state: Arc<RelayState>,
    room_id: String,
    client_id: String,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::channel::<Message>(state.outbound_buffer);
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
    let connection = WsConnection {
        outbound: tx.clone(),
        shutdown: shutdown_tx,
    };

    let mut lifecycle = ConnectionState::default();
    let session = match state.coordinator.join(&room_id, &client_id, connection).await {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(room_id = %room_id, client_id = %client_id, error = %e, "join rejected");
            if let Ok(text) = envelope::encode(&Envelope::error(e.to_string())) {
                let _ = ws_sender.send(Message::Text(text.into())).await;
            }
            let _ = ws_sender.send(Message::Close(None)).await;
            return;
        }
    };
    lifecycle.join();

    // Writer: forwards queued frames to the socket until a Close goes out.
    let writer_client = client_id.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let is_close = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(client_id = %writer_client, "WebSocket write failed");
                break;
            }
            if is_close {
                break;
            }
        }
    });

    // Reader: decodes and dispatches inbound envelopes.
    let reader_state = Arc::clone(&state);
    let reader_room = room_id.clone();
    let reader_client = client_id.clone();
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            let decoded = match msg {
                Message::Text(text) => envelope::decode(text.as_str()),
                Message::Binary(data) => envelope::decode_bytes(&data),
                Message::Close(_) => {
                    tracing::info!(client_id = %reader_client, "received close frame");
                    break;
                }
                _ => continue,
            };
            let flow =
                handle_inbound(&reader_state, &reader_room, &reader_client, decoded, &tx).await;
            if flow.is_break() {
                break;
            }
        }
    });

    let writer_done = tokio::select! {
        _ = &mut read_task => false,
        _ = &mut write_task => {
            read_task.abort();
            true
        }
        _ = &mut shutdown_rx => {
            tracing::debug!(room_id = %room_id, client_id = %client_id, "connection closed by relay");
            read_task.abort();
            false
        }
    };

    // Leaving closes our connection, which queues the Close frame behind any
    // pending replies.
    if lifecycle.leave() {
        state
            .coordinator
            .leave_session(&room_id, &client_id, session)
            .await;
    }
    if !writer_done {
        let _ = tokio::time::timeout(CLOSE_GRACE, &mut write_task).await;
        write_task.abort();
    }
    tracing::info!(room_id = %room_id, client_id = %client_id, "connection finished");
}

/// Processes one decoded inbound frame. Breaks when the client asked to
/// leave.
async fn handle_inbound(
    state: &RelayState,
    room_id: &str,
    client_id: &str,
    decoded: Result<Envelope, EnvelopeError>,
    replies: &mpsc::Sender<Message>,
) -> ControlFlow<()> {
    let envelope = match decoded {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!(room_id = %room_id, client_id = %client_id, error = %e, "failed to decode envelope");
            reply_error(replies, &e.to_string());
            return ControlFlow::Continue(());
        }
    };

    match envelope.kind {
        EnvelopeKind::Leave => {
            tracing::info!(room_id = %room_id, client_id = %client_id, "client requested leave");
            return ControlFlow::Break(());
        }
        EnvelopeKind::Error => {
            tracing::warn!(room_id = %room_id, client_id = %client_id, "client sent ERROR envelope");
            reply_error(replies, "ERROR envelopes are relay-originated");
            return ControlFlow::Continue(());
        }
        _ => {}
    }

    if let Err(e) = state.coordinator.dispatch(room_id, envelope, client_id).await {
        tracing::warn!(room_id = %room_id, client_id = %client_id, error = %e, "dispatch rejected");
        reply_error(replies, &e.to_string());
    }
    ControlFlow::Continue(())
}

/// Queues an `ERROR` envelope for the client without waiting for buffer space.
fn reply_error(replies: &mpsc::Sender<Message>, reason: &str) {
    match envelope::encode(&Envelope::error(reason)) {
        Ok(text) => {
            let _ = replies.try_send(Message::Text(text.into()));
        }
        Err(e) => tracing::error!(error = %e, "failed to encode error envelope"),
    }
}

/// Starts the relay server on the given address and returns the bound address
/// and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the relay server with a pre-configured [`RelayState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_shutdown(addr, state, std::future::pending()).await
}

/// Starts the relay server and stops accepting once `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_shutdown<F>(
    addr: &str,
    state: Arc<RelayState>,
    shutdown: F,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}

/// Builds the relay's HTTP router.
pub fn router(state: Arc<RelayState>) -> axum::Router {
    axum::Router::new()
        .route("/ws/{room_id}/{client_id}", axum::routing::get(ws_handler))
        .route("/rooms", axum::routing::get(list_rooms))
        .route("/rooms/{room_id}", axum::routing::get(room_info))
        .with_state(state)
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path((room_id, client_id)): Path<(String, String)>,
    State(state): State<Arc<RelayState>>,
) -> impl IntoResponse {
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state, room_id, client_id))
}

async fn list_rooms(State(state): State<Arc<RelayState>>) -> impl IntoResponse {
    axum::Json(state.coordinator.describe_all().await)
}

async fn room_info(
    Path(room_id): Path<String>,
    State(state): State<Arc<RelayState>>,
) -> impl IntoResponse {
    axum::Json(state.coordinator.room_info(&room_id).await)
}
