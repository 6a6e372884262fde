use std::{collections::HashMap, path::Path};

use anyhow::{anyhow, Context, Result};
use chrono::Duration;
use serde::Deserialize;
use tracing::{info, warn};
use transit_core::{
    clock::ManualClock, Coordinates, DriverId, NewTrip, PickupRequest, QueueId, QueueStatus,
    TransitCore, TripId, VehicleId,
};

/// A named, ordered list of dispatcher and driver actions.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub label: String,
    pub steps: Vec<Step>,
}

/// One scripted action. Trips are referred to by the `trip` handle given at creation.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Step {
    #[serde(rename_all = "camelCase")]
    CreateTrip {
        trip: String,
        origin: String,
        destination: String,
        #[serde(default)]
        initial_passengers: u32,
        #[serde(default)]
        driver_id: Option<u64>,
        #[serde(default)]
        vehicle_id: Option<u64>,
    },
    StartTrip {
        trip: String,
    },
    #[serde(rename_all = "camelCase")]
    Pickup {
        trip: String,
        pickup_location: String,
        drop_off_location: String,
        passenger_count: u32,
    },
    Board {
        trip: String,
        count: u32,
    },
    Alight {
        trip: String,
        count: u32,
    },
    Location {
        trip: String,
        lat: f64,
        lng: f64,
    },
    EndTrip {
        trip: String,
    },
    CancelTrip {
        trip: String,
    },
    #[serde(rename = "queueStatus")]
    SetQueueStatus {
        trip: String,
        status: QueueStatus,
    },
    Depart {
        trip: String,
    },
    Wait {
        minutes: i64,
    },
}

impl Scenario {
    /// Read a scenario from a JSON file.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse scenario {}", path.display()))
    }
}

/// Replays scenario steps against a core driven by a manual clock.
pub struct Runner<'a> {
    core: &'a TransitCore,
    clock: &'a ManualClock,
    handles: HashMap<String, TripId>,
}

impl<'a> Runner<'a> {
    pub fn new(core: &'a TransitCore, clock: &'a ManualClock) -> Self {
        Self {
            core,
            clock,
            handles: HashMap::new(),
        }
    }

    /// Run every step. Rejected steps are logged and skipped; the count of rejections is returned.
    pub fn run(&mut self, scenario: &Scenario) -> usize {
        info!(label = %scenario.label, steps = scenario.steps.len(), "Replaying scenario");
        let mut rejected = 0;
        for (index, step) in scenario.steps.iter().enumerate() {
            if let Err(err) = self.apply(step) {
                rejected += 1;
                warn!(step = index + 1, ?step, "Step rejected: {err:#}");
            }
        }
        rejected
    }

    fn apply(&mut self, step: &Step) -> Result<()> {
        match step {
            Step::CreateTrip {
                trip,
                origin,
                destination,
                initial_passengers,
                driver_id,
                vehicle_id,
            } => {
                let created = self.core.create_trip(NewTrip {
                    origin: origin.clone(),
                    destination: destination.clone(),
                    initial_passengers: *initial_passengers,
                    driver_id: driver_id.map(DriverId),
                    vehicle_id: vehicle_id.map(VehicleId),
                    current_location: None,
                })?;
                self.handles.insert(trip.clone(), created.id);
            }
            Step::StartTrip { trip } => {
                self.core.start_trip(self.trip(trip)?)?;
            }
            Step::Pickup {
                trip,
                pickup_location,
                drop_off_location,
                passenger_count,
            } => {
                self.core.pickup_passengers(
                    self.trip(trip)?,
                    &PickupRequest {
                        pickup_location: pickup_location.clone(),
                        drop_off_location: drop_off_location.clone(),
                        passenger_count: *passenger_count,
                    },
                )?;
            }
            Step::Board { trip, count } => {
                self.core.board(self.trip(trip)?, *count, None)?;
            }
            Step::Alight { trip, count } => {
                self.core.alight(self.trip(trip)?, *count, None)?;
            }
            Step::Location { trip, lat, lng } => {
                self.core
                    .update_location(self.trip(trip)?, Coordinates::new(*lat, *lng))?;
            }
            Step::EndTrip { trip } => {
                self.core.end_trip(self.trip(trip)?)?;
            }
            Step::CancelTrip { trip } => {
                self.core.cancel_trip(self.trip(trip)?)?;
            }
            Step::SetQueueStatus { trip, status } => {
                let entry = self.queue_entry(trip)?;
                self.core.set_queue_status(entry, *status)?;
            }
            Step::Depart { trip } => {
                let entry = self.queue_entry(trip)?;
                self.core.depart(entry)?;
            }
            Step::Wait { minutes } => self.clock.advance(Duration::minutes(*minutes)),
        }
        Ok(())
    }

    fn trip(&self, handle: &str) -> Result<TripId> {
        self.handles
            .get(handle)
            .copied()
            .ok_or_else(|| anyhow!("unknown trip handle '{handle}'"))
    }

    fn queue_entry(&self, handle: &str) -> Result<QueueId> {
        let trip = self.trip(handle)?;
        self.core
            .queue_position(trip)
            .map(|entry| entry.id)
            .ok_or_else(|| anyhow!("trip '{handle}' is not queued"))
    }
}
