#![allow(missing_docs)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{same_location, Coordinates, DriverId, EventId, TripId, VehicleId};

/// Lifecycle state of a trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    /// Created with a pre-assigned driver/vehicle, not yet departed.
    Pending,
    /// Underway; passengers may board and alight.
    Active,
    /// Arrived at the destination. Terminal.
    Completed,
    /// Abandoned before completion. Terminal.
    Cancelled,
}

impl TripStatus {
    /// Whether the status accepts no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Whether moving from `self` to `next` respects the forward-only lifecycle.
    pub fn can_transition_to(self, next: TripStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Active)
                | (Self::Pending, Self::Cancelled)
                | (Self::Active, Self::Completed)
                | (Self::Active, Self::Cancelled)
        )
    }

    /// Lowercase label used in logs and error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Per-stop ledger line accumulated while a trip is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropOffPoint {
    pub name: String,
    pub coordinates: Option<Coordinates>,
    pub passenger_count: u32,
    /// Listed cumulative fare of the stop on the trip's route.
    pub fare_per_passenger: f64,
    pub total_revenue: f64,
}

/// A single vehicle run from origin to destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trip {
    pub id: TripId,
    pub origin: String,
    pub destination: String,
    pub status: TripStatus,
    pub initial_passengers: u32,
    pub current_passengers: u32,
    /// Passengers boarded after the trip was created.
    #[serde(default)]
    pub total_boarded: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub drop_off_points: Vec<DropOffPoint>,
    pub revenue: f64,
    pub driver_id: Option<DriverId>,
    pub vehicle_id: Option<VehicleId>,
    #[serde(default)]
    pub current_location: Option<Coordinates>,
    #[serde(default)]
    pub route: Vec<Coordinates>,
}

impl Trip {
    /// Everyone carried on this trip: those aboard at creation plus later boardings.
    pub fn passengers_served(&self) -> u32 {
        self.initial_passengers.saturating_add(self.total_boarded)
    }

    /// Look up a drop-off ledger line by stop name.
    pub fn drop_off_point(&self, name: &str) -> Option<&DropOffPoint> {
        self.drop_off_points
            .iter()
            .find(|point| same_location(&point.name, name))
    }

    /// Revenue recomputed from the ledger.
    pub fn ledger_revenue(&self) -> f64 {
        self.drop_off_points
            .iter()
            .map(|point| point.total_revenue)
            .sum()
    }

    /// Label such as `Downtown → Airport`.
    pub fn route_label(&self) -> String {
        format!("{} → {}", self.origin, self.destination)
    }
}

/// Request to create a trip.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTrip {
    pub origin: String,
    pub destination: String,
    #[serde(default)]
    pub initial_passengers: u32,
    #[serde(default)]
    pub driver_id: Option<DriverId>,
    #[serde(default)]
    pub vehicle_id: Option<VehicleId>,
    #[serde(default)]
    pub current_location: Option<Coordinates>,
}

/// Passengers picked up at a stop, bound for a chosen drop-off point.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PickupRequest {
    pub pickup_location: String,
    pub drop_off_location: String,
    pub passenger_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassengerEventKind {
    Board,
    Alight,
    PickupAtDropoff,
}

/// Append-only record of passengers getting on or off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassengerEvent {
    pub id: EventId,
    pub trip_id: TripId,
    pub event_type: PassengerEventKind,
    pub passenger_count: u32,
    pub pickup_location: Option<String>,
    pub drop_off_location: Option<String>,
    pub fare_amount: Option<f64>,
    pub location: Option<Coordinates>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_is_forward_only() {
        assert!(TripStatus::Pending.can_transition_to(TripStatus::Active));
        assert!(TripStatus::Active.can_transition_to(TripStatus::Completed));
        assert!(TripStatus::Active.can_transition_to(TripStatus::Cancelled));
        assert!(!TripStatus::Completed.can_transition_to(TripStatus::Active));
        assert!(!TripStatus::Cancelled.can_transition_to(TripStatus::Active));
        assert!(!TripStatus::Pending.can_transition_to(TripStatus::Completed));
        assert!(TripStatus::Completed.is_terminal());
        assert!(!TripStatus::Active.is_terminal());
    }

    #[test]
    fn event_kinds_use_wire_names() {
        let json = serde_json::to_string(&PassengerEventKind::PickupAtDropoff).unwrap();
        assert_eq!(json, "\"pickup_at_dropoff\"");
    }
}
