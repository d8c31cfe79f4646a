//! Signaling envelope wire type and its JSON codec.
//!
//! An [`Envelope`] is a JSON object with a required `type` string. The relay
//! reads a handful of routing fields (`target`, `enabled`) and writes others
//! (`source`, `audioEnabled`, `clientId`); every other field is carried through
//! untouched in [`Envelope::body`], so SDP blobs, ICE candidates and any
//! application-defined message kinds pass the relay opaquely.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field names the relay interprets. These never appear in [`Envelope::body`].
pub const RESERVED_FIELDS: [&str; 6] =
    ["type", "target", "source", "enabled", "audioEnabled", "clientId"];

/// Error type for envelope encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The text was not a JSON object of the expected shape.
    #[error("invalid envelope json: {0}")]
    Json(String),
    /// The `type` field was present but empty.
    #[error("envelope type must not be empty")]
    EmptyType,
}

/// The `type` discriminator of an envelope.
///
/// The relay only gives meaning to a few kinds; anything else is kept as
/// [`EnvelopeKind::Other`] and relayed as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EnvelopeKind {
    /// A participant announces itself to the room.
    Join,
    /// A participant left (server-emitted, or a client's request to leave).
    Leave,
    /// SDP offer.
    Offer,
    /// SDP answer.
    Answer,
    /// A participant muted or unmuted its microphone.
    AudioToggle,
    /// Server-originated error report.
    Error,
    /// Any other kind, relayed opaquely.
    Other(String),
}

impl EnvelopeKind {
    /// Returns the wire name of this kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Join => "JOIN",
            Self::Leave => "LEAVE",
            Self::Offer => "OFFER",
            Self::Answer => "ANSWER",
            Self::AudioToggle => "AUDIO_TOGGLE",
            Self::Error => "ERROR",
            Self::Other(name) => name,
        }
    }

    /// Whether relayed envelopes of this kind are annotated with the
    /// sender's audio state.
    #[must_use]
    pub const fn carries_audio_state(&self) -> bool {
        matches!(self, Self::Join | Self::Offer | Self::Answer)
    }
}

impl From<String> for EnvelopeKind {
    fn from(name: String) -> Self {
        match name.as_str() {
            "JOIN" => Self::Join,
            "LEAVE" => Self::Leave,
            "OFFER" => Self::Offer,
            "ANSWER" => Self::Answer,
            "AUDIO_TOGGLE" => Self::AudioToggle,
            "ERROR" => Self::Error,
            _ => Self::Other(name),
        }
    }
}

impl From<&str> for EnvelopeKind {
    fn from(name: &str) -> Self {
        Self::from(name.to_string())
    }
}

impl From<EnvelopeKind> for String {
    fn from(kind: EnvelopeKind) -> Self {
        match kind {
            EnvelopeKind::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A signaling message exchanged through a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message kind (`type` on the wire).
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,

    /// When set to a member of the room, restricts delivery to that member.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Client id of the sender. Always overwritten by the relay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// New audio state carried by `AUDIO_TOGGLE`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Sender's audio state, stamped by the relay on JOIN/OFFER/ANSWER.
    #[serde(
        rename = "audioEnabled",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub audio_enabled: Option<bool>,

    /// Subject of a LEAVE notice.
    #[serde(rename = "clientId", default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Every other field, preserved verbatim.
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl Envelope {
    /// Creates an envelope of the given kind with no fields set.
    #[must_use]
    pub fn new(kind: impl Into<EnvelopeKind>) -> Self {
        Self {
            kind: kind.into(),
            target: None,
            source: None,
            enabled: None,
            audio_enabled: None,
            client_id: None,
            body: Map::new(),
        }
    }

    /// The notice broadcast to a room when `client_id` leaves it.
    #[must_use]
    pub fn leave_notice(client_id: &str) -> Self {
        let mut envelope = Self::new(EnvelopeKind::Leave);
        envelope.client_id = Some(client_id.to_string());
        envelope
    }

    /// An `ERROR` envelope sent back to a client that sent something invalid.
    #[must_use]
    pub fn error(reason: impl Into<String>) -> Self {
        Self::new(EnvelopeKind::Error).with_field("reason", Value::String(reason.into()))
    }

    /// Sets the unicast target.
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Sets the `enabled` flag of an `AUDIO_TOGGLE`.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Adds an opaque body field. Reserved routing fields are ignored; use
    /// the typed setters for those.
    #[must_use]
    pub fn with_field(mut self, key: &str, value: Value) -> Self {
        if !RESERVED_FIELDS.contains(&key) {
            self.body.insert(key.to_string(), value);
        }
        self
    }

    /// Looks up an opaque body field.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }
}

/// Encodes an [`Envelope`] as a JSON text.
///
/// # Errors
///
/// Returns [`EnvelopeError::Json`] if the envelope cannot be serialized.
pub fn encode(envelope: &Envelope) -> Result<String, EnvelopeError> {
    serde_json::to_string(envelope).map_err(|e| EnvelopeError::Json(e.to_string()))
}

/// Decodes an [`Envelope`] from a JSON text.
///
/// # Errors
///
/// Returns [`EnvelopeError::Json`] if the text is not a JSON object with a
/// string `type` (and correctly typed routing fields), or
/// [`EnvelopeError::EmptyType`] if `type` is the empty string.
pub fn decode(text: &str) -> Result<Envelope, EnvelopeError> {
    let envelope: Envelope =
        serde_json::from_str(text).map_err(|e| EnvelopeError::Json(e.to_string()))?;
    if envelope.kind.as_str().is_empty() {
        return Err(EnvelopeError::EmptyType);
    }
    Ok(envelope)
}

/// Decodes an [`Envelope`] from UTF-8 JSON bytes (binary WebSocket frames).
///
/// # Errors
///
/// Same as [`decode`].
pub fn decode_bytes(bytes: &[u8]) -> Result<Envelope, EnvelopeError> {
    let text = std::str::from_utf8(bytes).map_err(|e| EnvelopeError::Json(e.to_string()))?;
    decode(text)
}
