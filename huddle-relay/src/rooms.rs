//! Room directory and coordinator for the relay server.
//!
//! [`RoomRegistry`] maps room ids to live rooms. A room is created on the
//! first join and reclaimed as soon as its last member is gone. Each room's
//! members sit behind their own mutex, so traffic in one room never waits
//! on another; the directory lock is only held for lookups and
//! insert/remove, never across a send.
//!
//! [`RoomCoordinator`] is the facade the transport talks to.
//!
//! Room entries are ephemeral and lost on relay restart.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use huddle_proto::envelope::Envelope;
use huddle_proto::room::RoomInfo;
use tokio::sync::{Mutex, RwLock};

use crate::connection::{Connection, ConnectionError, SessionId};
use crate::delivery::{DeliveryObserver, DeliveryReport, TracingObserver};
use crate::registry::ConnectionRegistry;

/// Default upper bound on a single recipient send.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Default maximum number of live rooms.
pub const DEFAULT_MAX_ROOMS: usize = 1000;

/// Errors returned to callers of the coordinator.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// A required identifier was empty.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Joining would create a room beyond the configured limit.
    #[error("room limit reached (max {0} rooms)")]
    CapacityReached(usize),

    /// The connection failed while being accepted; nothing was registered.
    #[error("accept failed: {0}")]
    Accept(#[from] ConnectionError),
}

/// One live room.
///
/// `retired` is only set while holding the `members` lock, and once set the
/// room is never used again: anyone who finds it retired must look the
/// room up afresh.
pub struct Room<C> {
    retired: AtomicBool,
    members: Mutex<ConnectionRegistry<C>>,
}

impl<C> Room<C> {
    fn new() -> Self {
        Self {
            retired: AtomicBool::new(false),
            members: Mutex::new(ConnectionRegistry::new()),
        }
    }

    fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }
}

/// Directory of live rooms keyed by room id.
pub struct RoomRegistry<C> {
    rooms: RwLock<HashMap<String, Arc<Room<C>>>>,
    max_rooms: usize,
}

impl<C> Default for RoomRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> RoomRegistry<C> {
    /// Creates an empty directory holding at most [`DEFAULT_MAX_ROOMS`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_rooms(DEFAULT_MAX_ROOMS)
    }

    /// Creates an empty directory holding at most `max_rooms` rooms.
    #[must_use]
    pub fn with_max_rooms(max_rooms: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            max_rooms,
        }
    }

    /// Returns the live room for `room_id`, creating it if absent (or if the
    /// entry found has already been retired).
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::CapacityReached`] if a new room is needed and the
    /// directory is full.
    pub async fn get_or_create(&self, room_id: &str) -> Result<Arc<Room<C>>, RoomError> {
        if let Some(room) = self.get(room_id).await {
            return Ok(room);
        }

        let mut rooms = self.rooms.write().await;
        match rooms.get(room_id) {
            Some(room) if !room.is_retired() => return Ok(Arc::clone(room)),
            // A retired entry is replaced in place and does not add a room.
            Some(_) => {}
            None if rooms.len() >= self.max_rooms => {
                return Err(RoomError::CapacityReached(self.max_rooms));
            }
            None => {}
        }
        tracing::info!(room_id = %room_id, "creating room");
        let room = Arc::new(Room::new());
        rooms.insert(room_id.to_string(), Arc::clone(&room));
        Ok(room)
    }

    /// Returns the live room for `room_id`, if any.
    pub async fn get(&self, room_id: &str) -> Option<Arc<Room<C>>> {
        let rooms = self.rooms.read().await;
        rooms
            .get(room_id)
            .filter(|room| !room.is_retired())
            .map(Arc::clone)
    }

    /// Snapshot of every room entry with its id.
    pub async fn entries(&self) -> Vec<(String, Arc<Room<C>>)> {
        let rooms = self.rooms.read().await;
        rooms
            .iter()
            .map(|(id, room)| (id.clone(), Arc::clone(room)))
            .collect()
    }

    /// Number of room entries.
    pub async fn len(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Retires and removes `room` if it has no members.
    ///
    /// Returns `true` if the room was reclaimed by this call.
    pub async fn reclaim_if_empty(&self, room_id: &str, room: &Arc<Room<C>>) -> bool {
        {
            let members = room.members.lock().await;
            if !members.is_empty() || room.is_retired() {
                return false;
            }
            room.retired.store(true, Ordering::Release);
        }

        let mut rooms = self.rooms.write().await;
        if rooms.get(room_id).is_some_and(|current| Arc::ptr_eq(current, room)) {
            rooms.remove(room_id);
        }
        drop(rooms);

        tracing::info!(room_id = %room_id, "room empty, reclaimed");
        true
    }

    /// Removes every room, handing each back to the caller.
    pub async fn drain(&self) -> Vec<(String, Arc<Room<C>>)> {
        let mut rooms = self.rooms.write().await;
        rooms.drain().collect()
    }
}

/// Facade over the room directory used by the transport layer.
///
/// Constructed explicitly and owned by whoever runs the relay; independent
/// coordinators share no state.
pub struct RoomCoordinator<C> {
    rooms: RoomRegistry<C>,
    send_timeout: Duration,
    observer: Arc<dyn DeliveryObserver>,
}

impl<C: Connection> Default for RoomCoordinator<C> {
    fn default() -> Self {
        Self::new(DEFAULT_SEND_TIMEOUT)
    }
}

impl<C: Connection> RoomCoordinator<C> {
    /// Creates a coordinator that logs delivery failures.
    #[must_use]
    pub fn new(send_timeout: Duration) -> Self {
        Self::with_observer(send_timeout, Arc::new(TracingObserver))
    }

    /// Creates a coordinator that reports delivery failures to `observer`.
    #[must_use]
    pub fn with_observer(send_timeout: Duration, observer: Arc<dyn DeliveryObserver>) -> Self {
        Self {
            rooms: RoomRegistry::new(),
            send_timeout,
            observer,
        }
    }

    /// Limits the number of live rooms. Joins that would create a room past
    /// the limit fail with [`RoomError::CapacityReached`].
    #[must_use]
    pub fn with_max_rooms(mut self, max_rooms: usize) -> Self {
        self.rooms = RoomRegistry::with_max_rooms(max_rooms);
        self
    }

    /// Configured per-recipient send timeout.
    #[must_use]
    pub const fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    /// Adds `connection` to `room_id` as `client_id`, creating the room if
    /// needed. Other members are not notified; announcing the join is up to
    /// the client.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::InvalidArgument`] for an empty room or client id
    /// and [`RoomError::Accept`] if the connection fails to accept. In both
    /// cases nothing is registered.
    pub async fn join(
        &self,
        room_id: &str,
        client_id: &str,
        connection: C,
    ) -> Result<SessionId, RoomError> {
        if room_id.is_empty() {
            return Err(RoomError::InvalidArgument("room id must not be empty"));
        }
        if client_id.is_empty() {
            return Err(RoomError::InvalidArgument("client id must not be empty"));
        }

        loop {
            let room = match self.rooms.get_or_create(room_id).await {
                Ok(room) => room,
                Err(e) => {
                    tracing::warn!(room_id = %room_id, client_id = %client_id, error = %e, "join rejected");
                    return Err(e);
                }
            };
            let mut members = room.members.lock().await;
            if room.is_retired() {
                // Reclaimed between lookup and lock; look again.
                continue;
            }

            let result = members.connect(client_id, connection).await;
            let now_empty = members.is_empty();
            drop(members);

            return match result {
                Ok(session) => {
                    tracing::info!(
                        room_id = %room_id,
                        client_id = %client_id,
                        session = %session,
                        "client joined"
                    );
                    Ok(session)
                }
                Err(e) => {
                    // A room created just for this join must not linger.
                    if now_empty {
                        self.rooms.reclaim_if_empty(room_id, &room).await;
                    }
                    tracing::warn!(
                        room_id = %room_id,
                        client_id = %client_id,
                        error = %e,
                        "join failed during accept"
                    );
                    Err(e.into())
                }
            };
        }
    }

    /// Removes `client_id` from `room_id`, tells the remaining members, and
    /// reclaims the room if it is now empty.
    ///
    /// Unknown rooms and absent clients are a logged no-op.
    pub async fn leave(&self, room_id: &str, client_id: &str) {
        self.remove_member(room_id, client_id, None).await;
    }

    /// Transport-side leave: like [`Self::leave`], but a no-op if the entry
    /// for `client_id` now belongs to a newer session.
    pub async fn leave_session(&self, room_id: &str, client_id: &str, session: SessionId) {
        self.remove_member(room_id, client_id, Some(session)).await;
    }

    async fn remove_member(&self, room_id: &str, client_id: &str, session: Option<SessionId>) {
        let Some(room) = self.rooms.get(room_id).await else {
            tracing::warn!(room_id = %room_id, client_id = %client_id, "leave for unknown room");
            return;
        };

        let mut members = room.members.lock().await;
        if room.is_retired() {
            tracing::warn!(room_id = %room_id, client_id = %client_id, "leave for reclaimed room");
            return;
        }

        let removed = match session {
            Some(session) => members.disconnect_session(client_id, session).await,
            None => members.disconnect(client_id).await,
        };
        if !removed {
            tracing::debug!(room_id = %room_id, client_id = %client_id, "leave for absent client");
            return;
        }
        tracing::info!(room_id = %room_id, client_id = %client_id, "client left");

        let report = members
            .broadcast(Envelope::leave_notice(client_id), client_id, self.send_timeout)
            .await;
        let now_empty = members.is_empty();
        drop(members);

        self.observe(room_id, &report);
        if now_empty {
            self.rooms.reclaim_if_empty(room_id, &room).await;
        }
    }

    /// Relays `envelope` from `sender_id` within `room_id`.
    ///
    /// A room that does not exist (or vanished mid-call) drops the envelope
    /// and yields an empty report.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::InvalidArgument`] for an empty room or sender id.
    pub async fn dispatch(
        &self,
        room_id: &str,
        envelope: Envelope,
        sender_id: &str,
    ) -> Result<DeliveryReport, RoomError> {
        if room_id.is_empty() {
            return Err(RoomError::InvalidArgument("room id must not be empty"));
        }
        if sender_id.is_empty() {
            return Err(RoomError::InvalidArgument("sender id must not be empty"));
        }

        let Some(room) = self.rooms.get(room_id).await else {
            tracing::warn!(
                room_id = %room_id,
                sender_id = %sender_id,
                kind = %envelope.kind,
                "dispatch to unknown room dropped"
            );
            return Ok(DeliveryReport::default());
        };

        let mut members = room.members.lock().await;
        if room.is_retired() {
            tracing::warn!(room_id = %room_id, sender_id = %sender_id, "dispatch to reclaimed room dropped");
            return Ok(DeliveryReport::default());
        }

        tracing::debug!(
            room_id = %room_id,
            sender_id = %sender_id,
            kind = %envelope.kind,
            target = ?envelope.target,
            "relaying envelope"
        );
        let report = members
            .broadcast(envelope, sender_id, self.send_timeout)
            .await;
        let now_empty = members.is_empty();
        drop(members);

        self.observe(room_id, &report);
        if now_empty {
            self.rooms.reclaim_if_empty(room_id, &room).await;
        }
        Ok(report)
    }

    /// Snapshot of one room.
    pub async fn room_info(&self, room_id: &str) -> RoomInfo {
        let Some(room) = self.rooms.get(room_id).await else {
            return RoomInfo::absent(room_id);
        };
        Self::snapshot(room_id, &room).await
    }

    /// Snapshot of every live room, sorted by room id.
    pub async fn describe_all(&self) -> Vec<RoomInfo> {
        let mut infos = Vec::new();
        for (room_id, room) in self.rooms.entries().await {
            let info = Self::snapshot(&room_id, &room).await;
            if info.exists {
                infos.push(info);
            }
        }
        infos.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        infos
    }

    async fn snapshot(room_id: &str, room: &Room<C>) -> RoomInfo {
        let members = room.members.lock().await;
        if room.is_retired() || members.is_empty() {
            return RoomInfo::absent(room_id);
        }
        RoomInfo::live(room_id, members.audio_states())
    }

    /// Number of live rooms.
    pub async fn room_count(&self) -> usize {
        self.rooms.len().await
    }

    /// Closes every connection and forgets every room.
    pub async fn close_all(&self) {
        for (room_id, room) in self.rooms.drain().await {
            let mut members = room.members.lock().await;
            room.retired.store(true, Ordering::Release);
            let count = members.len();
            members.close_all().await;
            tracing::info!(room_id = %room_id, count, "closed room");
        }
    }

    fn observe(&self, room_id: &str, report: &DeliveryReport) {
        for failure in &report.failures {
            self.observer.on_delivery_failure(room_id, failure);
        }
    }
}
