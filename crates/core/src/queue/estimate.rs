use chrono::{DateTime, Duration, Utc};

use crate::error::{Result, TransitError};

/// Predicts when a queued vehicle will start boarding.
///
/// The scheduler only asks for a time given the current position; swapping
/// in measured service times never touches position assignment.
pub trait BoardingEstimator: Send + Sync {
    /// Estimated boarding start for an entry at `position` (1-based) as of `now`.
    fn estimate(&self, position: u32, now: DateTime<Utc>) -> DateTime<Utc>;
}

/// Every vehicle ahead adds one fixed boarding slot.
#[derive(Debug, Clone, Copy)]
pub struct FixedSlotEstimator {
    slot: Duration,
}

impl FixedSlotEstimator {
    /// Estimator with an arbitrary slot length.
    pub fn new(slot: Duration) -> Self {
        Self { slot }
    }

    /// Estimator with a slot of `minutes`, rejecting lengths chrono cannot represent.
    pub fn try_minutes(minutes: i64) -> Result<Self> {
        match Duration::try_minutes(minutes) {
            Some(slot) if minutes >= 0 => Ok(Self::new(slot)),
            _ => Err(TransitError::validation(format!(
                "boarding slot of {minutes} minutes is out of range"
            ))),
        }
    }

    /// Length of one boarding slot.
    pub fn slot(&self) -> Duration {
        self.slot
    }
}

impl Default for FixedSlotEstimator {
    fn default() -> Self {
        Self::new(Duration::minutes(5))
    }
}

impl BoardingEstimator for FixedSlotEstimator {
    fn estimate(&self, position: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        let ahead = i32::try_from(position.saturating_sub(1)).unwrap_or(i32::MAX);
        self.slot
            .checked_mul(ahead)
            .and_then(|wait| now.checked_add_signed(wait))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
