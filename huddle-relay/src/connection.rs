//! Connection abstraction for room members.
//!
//! A [`Connection`] is the relay's handle on one participant: it can be
//! accepted, sent envelopes, and closed. Concrete implementations include:
//! - [`crate::relay::WsConnection`] for WebSocket clients
//! - [`crate::loopback::LoopbackConnection`] for in-process tests

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use huddle_proto::envelope::{Envelope, EnvelopeError};

/// Errors that can occur while accepting or writing to a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The peer side of the connection has gone away.
    #[error("connection closed")]
    Closed,

    /// A send did not complete within the configured timeout.
    #[error("send timed out")]
    Timeout,

    /// The connection could not be completed during accept.
    #[error("connection refused: {0}")]
    Refused(String),

    /// The envelope could not be encoded for this transport.
    #[error("encode failed: {0}")]
    Encode(#[from] EnvelopeError),
}

/// Async handle to a single room member.
///
/// The relay owns each connection exclusively from the moment it is
/// accepted until it is closed. Implementations must not assume any
/// particular send order across different connections.
pub trait Connection: Send + Sync + 'static {
    /// Completes the transport-level accept.
    ///
    /// Called exactly once, before the connection is registered in a room.
    /// An error here aborts the join and nothing is registered.
    fn accept(&mut self) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    /// Delivers one envelope to the peer.
    fn send(&self, envelope: &Envelope) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    /// Closes the connection, releasing the transport.
    fn close(self) -> impl Future<Output = ()> + Send
    where
        Self: Sized;
}

/// Identifies one successful join.
///
/// Unique for the lifetime of the process, so a session id taken from a
/// replaced connection never matches its replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

impl SessionId {
    /// Allocates a fresh session id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_SESSION.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of one logical connection.
///
/// `Uninitialized -> Joined -> Left`. `Left` is terminal: a reconnect is a
/// new connection with its own state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Accepted by the transport, not yet in a room.
    #[default]
    Uninitialized,
    /// Registered in a room.
    Joined,
    /// Removed from its room.
    Left,
}

impl ConnectionState {
    /// Moves to `Joined`. Returns `false` (and does nothing) unless the
    /// connection was `Uninitialized`.
    pub fn join(&mut self) -> bool {
        if *self == Self::Uninitialized {
            *self = Self::Joined;
            true
        } else {
            false
        }
    }

    /// Moves to `Left`. Returns `true` only on the first call after a
    /// successful join, so callers can run leave side effects exactly once.
    pub fn leave(&mut self) -> bool {
        if *self == Self::Joined {
            *self = Self::Left;
            true
        } else {
            false
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Joined => write!(f, "joined"),
            Self::Left => write!(f, "left"),
        }
    }
}
