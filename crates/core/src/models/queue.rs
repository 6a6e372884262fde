#![allow(missing_docs)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DriverId, QueueId, TripId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Waiting,
    Boarding,
    Departed,
}

impl QueueStatus {
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Departed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Boarding => "boarding",
            Self::Departed => "departed",
        }
    }
}

/// A completed trip's vehicle waiting for its next turn at a destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub id: QueueId,
    pub trip_id: TripId,
    pub destination: String,
    pub driver_id: Option<DriverId>,
    pub arrival_time: DateTime<Utc>,
    /// Tiebreaker for identical arrival timestamps; strictly increasing per scheduler.
    pub arrival_seq: u64,
    /// 1-based rank among active entries for the destination.
    pub queue_position: u32,
    pub status: QueueStatus,
    pub estimated_boarding_time: DateTime<Utc>,
}

impl QueueEntry {
    /// Arrival ordering key: timestamp first, then creation sequence.
    pub fn arrival_key(&self) -> (DateTime<Utc>, u64) {
        (self.arrival_time, self.arrival_seq)
    }
}
