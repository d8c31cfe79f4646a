//! Per-room member registry and the relay algorithm that runs over it.
//!
//! A [`ConnectionRegistry`] owns every member connection of one room along
//! with its audio state. It is not synchronized on its own: the room
//! coordinator wraps each registry in a mutex so that membership changes,
//! audio updates and fan-out for one room never interleave.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use futures_util::future::join_all;
use huddle_proto::envelope::{Envelope, EnvelopeKind};

use crate::connection::{Connection, ConnectionError, SessionId};
use crate::delivery::{DeliveryFailure, DeliveryReport};

/// A registered member of a room.
struct Member<C> {
    connection: C,
    audio_enabled: bool,
    session: SessionId,
}

/// Members of one room, keyed by client id.
pub struct ConnectionRegistry<C> {
    members: HashMap<String, Member<C>>,
}

impl<C> Default for ConnectionRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> ConnectionRegistry<C> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            members: HashMap::new(),
        }
    }

    /// Returns `true` if the room has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether `client_id` is a member.
    #[must_use]
    pub fn contains(&self, client_id: &str) -> bool {
        self.members.contains_key(client_id)
    }

    /// Session of the current entry for `client_id`.
    #[must_use]
    pub fn session(&self, client_id: &str) -> Option<SessionId> {
        self.members.get(client_id).map(|m| m.session)
    }

    /// Audio state of `client_id`, if it is a member.
    #[must_use]
    pub fn audio_enabled(&self, client_id: &str) -> Option<bool> {
        self.members.get(client_id).map(|m| m.audio_enabled)
    }

    /// Updates the audio state of `client_id`. Returns `false` if it is not
    /// a member.
    pub fn set_audio_enabled(&mut self, client_id: &str, enabled: bool) -> bool {
        match self.members.get_mut(client_id) {
            Some(member) => {
                member.audio_enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Audio state of every member, keyed by client id.
    #[must_use]
    pub fn audio_states(&self) -> BTreeMap<String, bool> {
        self.members
            .iter()
            .map(|(id, m)| (id.clone(), m.audio_enabled))
            .collect()
    }
}

impl<C: Connection> ConnectionRegistry<C> {
    /// Accepts `connection` and registers it as `client_id` with audio on.
    ///
    /// An existing entry for the same client id is replaced and its
    /// connection closed.
    ///
    /// # Errors
    ///
    /// Returns the accept error; the registry is left unchanged.
    pub async fn connect(
        &mut self,
        client_id: &str,
        mut connection: C,
    ) -> Result<SessionId, ConnectionError> {
        connection.accept().await?;

        let session = SessionId::next();
        let member = Member {
            connection,
            audio_enabled: true,
            session,
        };
        if let Some(old) = self.members.insert(client_id.to_string(), member) {
            tracing::info!(
                client_id = %client_id,
                old_session = %old.session,
                new_session = %session,
                "replaced existing connection"
            );
            old.connection.close().await;
        }
        Ok(session)
    }

    /// Removes `client_id` and closes its connection.
    ///
    /// Returns `false` if it was not a member.
    pub async fn disconnect(&mut self, client_id: &str) -> bool {
        let Some(member) = self.members.remove(client_id) else {
            return false;
        };
        member.connection.close().await;
        true
    }

    /// Like [`Self::disconnect`], but only if the current entry belongs to
    /// `session`.
    pub async fn disconnect_session(&mut self, client_id: &str, session: SessionId) -> bool {
        if self.session(client_id) != Some(session) {
            return false;
        }
        self.disconnect(client_id).await
    }

    /// Closes and removes every member.
    pub async fn close_all(&mut self) {
        for (_, member) in self.members.drain() {
            member.connection.close().await;
        }
    }

    /// Relays `envelope` from `sender_id` to the room.
    ///
    /// `AUDIO_TOGGLE` updates the sender's audio state before anything is
    /// sent. A `target` naming a member restricts delivery to that member;
    /// otherwise every member but the sender receives it. Recipients that
    /// fail (or exceed `send_timeout`) are disconnected once the fan-out has
    /// finished, and the rest of the room is sent a LEAVE for each of them.
    pub async fn broadcast(
        &mut self,
        mut envelope: Envelope,
        sender_id: &str,
        send_timeout: Duration,
    ) -> DeliveryReport {
        if envelope.kind == EnvelopeKind::AudioToggle
            && let Some(enabled) = envelope.enabled
        {
            self.set_audio_enabled(sender_id, enabled);
        }

        // Relay-owned fields are never taken from the client.
        envelope.source = Some(sender_id.to_string());
        envelope.client_id = None;
        envelope.audio_enabled = if envelope.kind.carries_audio_state() {
            self.audio_enabled(sender_id)
        } else {
            None
        };

        let recipients: Vec<String> = match envelope.target.as_deref() {
            Some(target) if self.contains(target) => vec![target.to_string()],
            _ => self
                .members
                .keys()
                .filter(|id| id.as_str() != sender_id)
                .cloned()
                .collect(),
        };

        let mut report = self.deliver(&envelope, &recipients, send_timeout).await;
        self.evict_failed(&mut report, send_timeout).await;
        report
    }

    /// Disconnects every failed recipient in `report` and tells the rest of
    /// the room, repeating while the notices themselves fail.
    async fn evict_failed(&mut self, report: &mut DeliveryReport, send_timeout: Duration) {
        let mut pending: BTreeSet<String> = report.failed_clients().map(str::to_string).collect();

        while !pending.is_empty() {
            for client_id in &pending {
                self.disconnect(client_id).await;
            }

            let mut next = BTreeSet::new();
            for client_id in pending {
                let mut notice = Envelope::leave_notice(&client_id);
                notice.source = Some(client_id);
                let recipients: Vec<String> = self.members.keys().cloned().collect();
                let notice_report = self.deliver(&notice, &recipients, send_timeout).await;
                next.extend(notice_report.failed_clients().map(str::to_string));
                report.merge(notice_report);
            }
            pending = next;
        }
    }

    /// Sends `envelope` to each listed member concurrently.
    async fn deliver(
        &self,
        envelope: &Envelope,
        recipients: &[String],
        send_timeout: Duration,
    ) -> DeliveryReport {
        let sends = recipients
            .iter()
            .filter_map(|id| self.members.get_key_value(id))
            .map(|(id, member)| async move {
                let outcome =
                    match tokio::time::timeout(send_timeout, member.connection.send(envelope)).await
                    {
                        Ok(result) => result,
                        Err(_) => Err(ConnectionError::Timeout),
                    };
                (id, outcome)
            });

        let mut report = DeliveryReport::default();
        for (client_id, outcome) in join_all(sends).await {
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(error) => report.failures.push(DeliveryFailure {
                    client_id: client_id.clone(),
                    error,
                }),
            }
        }
        report
    }
}
