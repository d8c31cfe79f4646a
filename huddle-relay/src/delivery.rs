//! Per-recipient delivery results for a fan-out.
//!
//! A broadcast never fails as a whole. Each recipient's outcome is collected
//! into a [`DeliveryReport`] and failures are handed to a
//! [`DeliveryObserver`] once the room lock has been released.

use crate::connection::ConnectionError;

/// One recipient that could not be reached.
#[derive(Debug)]
pub struct DeliveryFailure {
    /// Client id of the recipient.
    pub client_id: String,
    /// Why the send failed.
    pub error: ConnectionError,
}

/// Outcome of relaying one envelope within a room.
#[derive(Debug, Default)]
pub struct DeliveryReport {
    /// Number of recipients the envelope was handed to.
    pub delivered: usize,
    /// Recipients that failed and were disconnected.
    pub failures: Vec<DeliveryFailure>,
}

impl DeliveryReport {
    /// Returns `true` if every recipient was reached.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Client ids of the recipients that failed.
    pub fn failed_clients(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(|f| f.client_id.as_str())
    }

    /// Folds another report (e.g. a follow-up LEAVE notice) into this one.
    pub fn merge(&mut self, other: Self) {
        self.delivered += other.delivered;
        self.failures.extend(other.failures);
    }
}

/// Hook notified of every recipient that failed during a fan-out.
pub trait DeliveryObserver: Send + Sync {
    /// Called once per failed recipient, after it has been disconnected.
    fn on_delivery_failure(&self, room_id: &str, failure: &DeliveryFailure);
}

/// Default observer: logs each failure as a warning.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl DeliveryObserver for TracingObserver {
    fn on_delivery_failure(&self, room_id: &str, failure: &DeliveryFailure) {
        tracing::warn!(
            room_id = %room_id,
            client_id = %failure.client_id,
            error = %failure.error,
            "recipient send failed, disconnected"
        );
    }
}
