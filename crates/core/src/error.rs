//! Recoverable error taxonomy returned by the core.

use crate::models::{QueueId, TripId};

/// Typed outcome for every fallible core operation.
///
/// None of these are fatal; callers refresh state and decide. Corruption of
/// internal invariants is not represented here and panics instead.
#[derive(Debug, thiserror::Error)]
pub enum TransitError {
    /// Malformed input rejected before any mutation.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The pickup/drop-off pair has no chargeable fare on the route.
    #[error("no fare from '{pickup}' to '{drop_off}' on route {origin} → {destination}")]
    #[allow(missing_docs)]
    InvalidRoute {
        pickup: String,
        drop_off: String,
        origin: String,
        destination: String,
    },

    /// No trip with this id.
    #[error("trip {0} not found")]
    TripNotFound(TripId),

    /// May be a benign race with another client removing the entry.
    #[error("queue entry {0} not found")]
    QueueEntryNotFound(QueueId),

    /// The operation does not apply in the subject's current status.
    #[error("cannot {action} while {subject} is {status}")]
    StateConflict {
        /// e.g. `trip 3`.
        subject: String,
        /// Status the subject was found in.
        status: &'static str,
        /// What was attempted.
        action: &'static str,
    },

    /// Failure reported by the persistence collaborator.
    #[error("storage failure: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl TransitError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn trip_conflict(id: TripId, status: &'static str, action: &'static str) -> Self {
        Self::StateConflict {
            subject: format!("trip {id}"),
            status,
            action,
        }
    }

    pub(crate) fn queue_conflict(id: QueueId, status: &'static str, action: &'static str) -> Self {
        Self::StateConflict {
            subject: format!("queue entry {id}"),
            status,
            action,
        }
    }

    /// Whether the error means the target vanished, possibly removed by another actor.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::TripNotFound(_) | Self::QueueEntryNotFound(_))
    }
}

/// Result alias used throughout the core.
pub type Result<T> = std::result::Result<T, TransitError>;
