//! In-process loopback connection for testing and embedding.
//!
//! [`pair`] returns a [`LoopbackConnection`] to hand to the relay and a
//! [`LoopbackPeer`] that observes everything the relay sends to it. Dropping
//! the peer makes further sends fail with [`ConnectionError::Closed`], which
//! is how tests simulate a dead socket.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use huddle_proto::envelope::Envelope;
use tokio::sync::mpsc;

use crate::connection::{Connection, ConnectionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behavior {
    Normal,
    RefuseAccept,
    Stall,
}

/// Relay-side half of a loopback pair.
#[derive(Debug)]
pub struct LoopbackConnection {
    outbound: mpsc::UnboundedSender<Envelope>,
    closed: Arc<AtomicBool>,
    behavior: Behavior,
}

/// Observer half of a loopback pair.
#[derive(Debug)]
pub struct LoopbackPeer {
    inbound: mpsc::UnboundedReceiver<Envelope>,
    closed: Arc<AtomicBool>,
}

fn make(behavior: Behavior) -> (LoopbackConnection, LoopbackPeer) {
    let (tx, rx) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));
    (
        LoopbackConnection {
            outbound: tx,
            closed: Arc::clone(&closed),
            behavior,
        },
        LoopbackPeer {
            inbound: rx,
            closed,
        },
    )
}

/// Creates a connected loopback pair.
#[must_use]
pub fn pair() -> (LoopbackConnection, LoopbackPeer) {
    make(Behavior::Normal)
}

/// Creates a pair whose accept fails.
#[must_use]
pub fn refusing() -> (LoopbackConnection, LoopbackPeer) {
    make(Behavior::RefuseAccept)
}

/// Creates a pair whose sends never complete.
#[must_use]
pub fn stalled() -> (LoopbackConnection, LoopbackPeer) {
    make(Behavior::Stall)
}

impl Connection for LoopbackConnection {
    async fn accept(&mut self) -> Result<(), ConnectionError> {
        if self.behavior == Behavior::RefuseAccept {
            return Err(ConnectionError::Refused("loopback peer refused".into()));
        }
        if self.outbound.is_closed() {
            return Err(ConnectionError::Closed);
        }
        Ok(())
    }

    async fn send(&self, envelope: &Envelope) -> Result<(), ConnectionError> {
        if self.behavior == Behavior::Stall {
            std::future::pending::<()>().await;
        }
        self.outbound
            .send(envelope.clone())
            .map_err(|_| ConnectionError::Closed)
    }

    async fn close(self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl LoopbackPeer {
    /// Takes the next envelope if one is already queued.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.inbound.try_recv().ok()
    }

    /// Waits for the next envelope. Returns `None` once the connection has
    /// been dropped by the relay and the queue is empty.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.inbound.recv().await
    }

    /// Takes every queued envelope.
    pub fn drain(&mut self) -> Vec<Envelope> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Whether the relay closed this connection.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
