//! Read-only room snapshot returned by the relay's room queries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Point-in-time view of a room's membership.
///
/// A room that does not exist (never created, or reclaimed after its last
/// member left) is reported with `exists == false` and no participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    /// The room identifier that was queried.
    pub room_id: String,
    /// Whether the room is currently live.
    pub exists: bool,
    /// Number of members.
    pub participant_count: usize,
    /// Member client ids, sorted.
    pub participants: Vec<String>,
    /// Audio-enabled state per member.
    pub audio_states: BTreeMap<String, bool>,
}

impl RoomInfo {
    /// Snapshot for a room that is not live.
    #[must_use]
    pub fn absent(room_id: &str) -> Self {
        Self {
            room_id: room_id.to_string(),
            exists: false,
            participant_count: 0,
            participants: Vec::new(),
            audio_states: BTreeMap::new(),
        }
    }

    /// Builds a snapshot of a live room from its members' audio states.
    #[must_use]
    pub fn live(room_id: &str, audio_states: BTreeMap<String, bool>) -> Self {
        Self {
            room_id: room_id.to_string(),
            exists: true,
            participant_count: audio_states.len(),
            participants: audio_states.keys().cloned().collect(),
            audio_states,
        }
    }
}
