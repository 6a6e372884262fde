use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use crate::{
    clock::Clock,
    error::{Result, TransitError},
    events::{ChangeEvent, EventBus},
    models::{
        same_location, Coordinates, DropOffPoint, NewTrip, PassengerEvent, PassengerEventKind,
        PickupRequest, QueueEntry, Trip, TripId, TripStatus,
    },
    queue::QueueScheduler,
    routes::FareCalculator,
    store::Repository,
};

/// Outcome of ending a trip.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedTrip {
    /// The trip in its completed state.
    pub trip: Trip,
    /// Its destination queue entry, unless it has already departed.
    pub queue_entry: Option<QueueEntry>,
}

/// State machine for individual trips: pending → active → completed | cancelled.
///
/// Every mutation of a trip runs under that trip's own lock.
pub struct TripLifecycle {
    repo: Arc<dyn Repository>,
    fares: FareCalculator,
    scheduler: Arc<QueueScheduler>,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    locks: Mutex<HashMap<TripId, Arc<Mutex<()>>>>,
}

impl TripLifecycle {
    /// Wire the lifecycle to its collaborators.
    pub fn new(
        repo: Arc<dyn Repository>,
        fares: FareCalculator,
        scheduler: Arc<QueueScheduler>,
        bus: EventBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repo,
            fares,
            scheduler,
            bus,
            clock,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Create a trip. It starts `pending` when a driver or vehicle is
    /// pre-assigned and `active` otherwise.
    pub fn create(&self, request: NewTrip) -> Result<Trip> {
        let origin = request.origin.trim();
        let destination = request.destination.trim();
        if origin.is_empty() {
            return Err(TransitError::validation("origin is required"));
        }
        if destination.is_empty() {
            return Err(TransitError::validation("destination is required"));
        }
        if same_location(origin, destination) {
            return Err(TransitError::validation(
                "origin and destination must differ",
            ));
        }

        let status = if request.driver_id.is_some() || request.vehicle_id.is_some() {
            TripStatus::Pending
        } else {
            TripStatus::Active
        };
        let trip = Trip {
            id: self.repo.next_trip_id()?,
            origin: origin.to_string(),
            destination: destination.to_string(),
            status,
            initial_passengers: request.initial_passengers,
            current_passengers: request.initial_passengers,
            total_boarded: 0,
            start_time: self.clock.now(),
            end_time: None,
            drop_off_points: Vec::new(),
            revenue: 0.0,
            driver_id: request.driver_id,
            vehicle_id: request.vehicle_id,
            current_location: request.current_location,
            route: request.current_location.into_iter().collect(),
        };
        self.repo.save_trip(&trip)?;

        info!(
            trip_id = %trip.id,
            origin = %trip.origin,
            destination = %trip.destination,
            status = trip.status.as_str(),
            "Trip created"
        );
        let event = match trip.status {
            TripStatus::Active => ChangeEvent::TripStarted { trip: trip.clone() },
            _ => ChangeEvent::TripUpdated { trip: trip.clone() },
        };
        self.bus.publish(event);
        Ok(trip)
    }

    /// Depart a pending trip, releasing its driver from any destination queue.
    pub fn start(&self, id: TripId) -> Result<Trip> {
        self.serialized(id, || {
            let mut trip = self.load(id)?;
            if trip.status == TripStatus::Active {
                return Ok(trip);
            }
            ensure_transition(&trip, TripStatus::Active, "start")?;

            if let Some(driver_id) = trip.driver_id {
                self.scheduler.release_driver(driver_id)?;
            }
            trip.status = TripStatus::Active;
            trip.start_time = self.clock.now();
            self.repo.save_trip(&trip)?;

            info!(trip_id = %id, "Trip started");
            self.bus.publish(ChangeEvent::TripStarted { trip: trip.clone() });
            Ok(trip)
        })
    }

    /// Board passengers at `pickup_location` bound for `drop_off_location`, charging the stage fare.
    pub fn record_boarding(&self, id: TripId, request: &PickupRequest) -> Result<Trip> {
        if request.passenger_count == 0 {
            return Err(TransitError::validation("passenger count must be positive"));
        }
        if request.pickup_location.trim().is_empty() {
            return Err(TransitError::validation("pickup location is required"));
        }
        if request.drop_off_location.trim().is_empty() {
            return Err(TransitError::validation("drop-off location is required"));
        }

        self.serialized(id, || {
            let mut trip = self.load(id)?;
            ensure_active(&trip, "record boarding")?;

            let fare = self.fares.fare(
                &request.pickup_location,
                &request.drop_off_location,
                &trip.origin,
                &trip.destination,
            );
            if fare <= 0.0 {
                return Err(TransitError::InvalidRoute {
                    pickup: request.pickup_location.trim().to_string(),
                    drop_off: request.drop_off_location.trim().to_string(),
                    origin: trip.origin.clone(),
                    destination: trip.destination.clone(),
                });
            }

            let count = request.passenger_count;
            let aboard = add_passengers(trip.current_passengers, count)?;
            let boarded = add_passengers(trip.total_boarded, count)?;
            let amount = fare * f64::from(count);
            let ledger_line = self.ledger_line(&trip, &request.drop_off_location);
            let drop_off_name = ledger_line.name.clone();
            match trip
                .drop_off_points
                .iter()
                .position(|point| same_location(&point.name, &drop_off_name))
            {
                Some(index) => {
                    let point = &mut trip.drop_off_points[index];
                    point.passenger_count = add_passengers(point.passenger_count, count)?;
                    point.total_revenue += amount;
                }
                None => trip.drop_off_points.push(DropOffPoint {
                    passenger_count: count,
                    total_revenue: amount,
                    ..ledger_line
                }),
            }
            trip.current_passengers = aboard;
            trip.total_boarded = boarded;
            trip.revenue += amount;
            debug_assert!(
                (trip.revenue - trip.ledger_revenue()).abs() < 1e-6,
                "trip {id} revenue diverged from its drop-off ledger"
            );

            let event = PassengerEvent {
                id: self.repo.next_event_id()?,
                trip_id: id,
                event_type: PassengerEventKind::PickupAtDropoff,
                passenger_count: count,
                pickup_location: Some(request.pickup_location.trim().to_string()),
                drop_off_location: Some(drop_off_name),
                fare_amount: Some(amount),
                location: trip.current_location,
                timestamp: self.clock.now(),
            };
            self.commit_passenger_event(&trip, event)?;

            info!(
                trip_id = %id,
                pickup = %request.pickup_location.trim(),
                drop_off = %request.drop_off_location.trim(),
                passengers = count,
                fare,
                revenue = trip.revenue,
                "Passengers picked up"
            );
            Ok(trip)
        })
    }

    /// Board passengers without a fare-bearing drop-off selection.
    pub fn record_board(
        &self,
        id: TripId,
        passenger_count: u32,
        location: Option<Coordinates>,
    ) -> Result<Trip> {
        if passenger_count == 0 {
            return Err(TransitError::validation("passenger count must be positive"));
        }
        self.serialized(id, || {
            let mut trip = self.load(id)?;
            ensure_active(&trip, "record boarding")?;

            let aboard = add_passengers(trip.current_passengers, passenger_count)?;
            let boarded = add_passengers(trip.total_boarded, passenger_count)?;
            trip.current_passengers = aboard;
            trip.total_boarded = boarded;
            let event =
                self.plain_event(id, PassengerEventKind::Board, passenger_count, location)?;
            self.commit_passenger_event(&trip, event)?;
            debug!(trip_id = %id, passengers = passenger_count, aboard, "Passengers boarded");
            Ok(trip)
        })
    }

    /// Let passengers off. The count aboard never drops below zero.
    pub fn record_alight(
        &self,
        id: TripId,
        passenger_count: u32,
        location: Option<Coordinates>,
    ) -> Result<Trip> {
        if passenger_count == 0 {
            return Err(TransitError::validation("passenger count must be positive"));
        }
        self.serialized(id, || {
            let mut trip = self.load(id)?;
            ensure_active(&trip, "record alighting")?;

            trip.current_passengers = trip.current_passengers.saturating_sub(passenger_count);
            let event =
                self.plain_event(id, PassengerEventKind::Alight, passenger_count, location)?;
            self.commit_passenger_event(&trip, event)?;
            debug!(trip_id = %id, passengers = passenger_count, aboard = trip.current_passengers, "Passengers alighted");
            Ok(trip)
        })
    }

    /// Complete an active trip and queue its vehicle at the destination.
    ///
    /// Ending an already-completed trip returns its current state and never
    /// queues it twice.
    pub fn end(&self, id: TripId) -> Result<CompletedTrip> {
        self.serialized(id, || {
            let mut trip = self.load(id)?;
            if trip.status == TripStatus::Completed {
                debug!(trip_id = %id, "Trip already completed");
                let queue_entry = self.scheduler.position_of(id);
                return Ok(CompletedTrip { trip, queue_entry });
            }
            ensure_transition(&trip, TripStatus::Completed, "end")?;

            // Queue first: a retry after a failed save finds the existing entry.
            let entry = self
                .scheduler
                .enqueue(id, &trip.destination, trip.driver_id)?;
            trip.status = TripStatus::Completed;
            trip.end_time = Some(self.clock.now());
            self.repo.save_trip(&trip)?;

            info!(
                trip_id = %id,
                destination = %trip.destination,
                queue_position = entry.queue_position,
                revenue = trip.revenue,
                "Trip ended"
            );
            self.bus.publish(ChangeEvent::TripEnded {
                trip: trip.clone(),
                queue_position: Some(entry.queue_position),
            });
            Ok(CompletedTrip {
                trip,
                queue_entry: Some(entry),
            })
        })
    }

    /// Abandon a pending or active trip. No queue entry is created.
    pub fn cancel(&self, id: TripId) -> Result<Trip> {
        self.serialized(id, || {
            let mut trip = self.load(id)?;
            if trip.status == TripStatus::Cancelled {
                return Ok(trip);
            }
            ensure_transition(&trip, TripStatus::Cancelled, "cancel")?;

            trip.status = TripStatus::Cancelled;
            trip.end_time = Some(self.clock.now());
            self.repo.save_trip(&trip)?;

            info!(trip_id = %id, "Trip cancelled");
            self.bus.publish(ChangeEvent::TripUpdated { trip: trip.clone() });
            Ok(trip)
        })
    }

    /// Record the vehicle's reported position.
    ///
    /// Arrival at the destination is not inferred from positions; ending a
    /// trip is always explicit.
    pub fn update_location(&self, id: TripId, location: Coordinates) -> Result<Trip> {
        self.serialized(id, || {
            let mut trip = self.load(id)?;
            if trip.status.is_terminal() {
                return Err(TransitError::trip_conflict(
                    id,
                    trip.status.as_str(),
                    "update location",
                ));
            }

            trip.current_location = Some(location);
            trip.route.push(location);
            self.repo.save_trip(&trip)?;
            self.bus.publish(ChangeEvent::TripLocationUpdate {
                trip_id: id,
                location,
            });
            Ok(trip)
        })
    }

    /// Fetch a trip or fail with [`TransitError::TripNotFound`].
    pub fn trip(&self, id: TripId) -> Result<Trip> {
        self.load(id)
    }

    /// Passenger events of a trip, oldest first.
    pub fn passenger_events(&self, id: TripId) -> Result<Vec<PassengerEvent>> {
        self.load(id)?;
        Ok(self.repo.events_for_trip(id)?)
    }

    fn load(&self, id: TripId) -> Result<Trip> {
        self.repo.trip(id)?.ok_or(TransitError::TripNotFound(id))
    }

    /// Ledger template for a drop-off: the route stop, or the destination itself.
    fn ledger_line(&self, trip: &Trip, drop_off: &str) -> DropOffPoint {
        let routes = self.fares.routes();
        match routes.stop(&trip.origin, &trip.destination, drop_off) {
            Some(stop) => DropOffPoint {
                name: stop.name.clone(),
                coordinates: Some(stop.coordinates),
                passenger_count: 0,
                fare_per_passenger: stop.fare_per_passenger,
                total_revenue: 0.0,
            },
            None => DropOffPoint {
                name: trip.destination.clone(),
                coordinates: None,
                passenger_count: 0,
                fare_per_passenger: routes
                    .route(&trip.origin, &trip.destination)
                    .map(|route| route.final_fare())
                    .unwrap_or(0.0),
                total_revenue: 0.0,
            },
        }
    }

    fn plain_event(
        &self,
        trip_id: TripId,
        kind: PassengerEventKind,
        passenger_count: u32,
        location: Option<Coordinates>,
    ) -> Result<PassengerEvent> {
        Ok(PassengerEvent {
            id: self.repo.next_event_id()?,
            trip_id,
            event_type: kind,
            passenger_count,
            pickup_location: None,
            drop_off_location: None,
            fare_amount: None,
            location,
            timestamp: self.clock.now(),
        })
    }

    fn commit_passenger_event(&self, trip: &Trip, event: PassengerEvent) -> Result<()> {
        self.repo.save_trip(trip)?;
        self.repo.append_event(&event)?;
        self.bus.publish(ChangeEvent::PassengerUpdate {
            trip_id: trip.id,
            event,
            new_passenger_count: trip.current_passengers,
        });
        Ok(())
    }

    /// Run `op` while holding the lock of trip `id`.
    ///
    /// A lock lives in the map only while some caller holds or awaits it.
    fn serialized<T>(&self, id: TripId, op: impl FnOnce() -> Result<T>) -> Result<T> {
        let lock = self.locks.lock().entry(id).or_default().clone();
        let outcome = {
            let _guard = lock.lock();
            op()
        };

        // Clones are only taken under the map lock, so a count of two means
        // the map and this call are the last holders.
        let mut locks = self.locks.lock();
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&id);
        }
        outcome
    }

    #[cfg(test)]
    fn held_locks(&self) -> usize {
        self.locks.lock().len()
    }
}

fn ensure_transition(trip: &Trip, next: TripStatus, action: &'static str) -> Result<()> {
    if trip.status.can_transition_to(next) {
        Ok(())
    } else {
        Err(TransitError::trip_conflict(
            trip.id,
            trip.status.as_str(),
            action,
        ))
    }
}

fn add_passengers(total: u32, count: u32) -> Result<u32> {
    total.checked_add(count).ok_or_else(|| {
        TransitError::validation(format!(
            "boarding {count} more passengers exceeds the countable total of {total}"
        ))
    })
}

fn ensure_active(trip: &Trip, action: &'static str) -> Result<()> {
    if trip.status == TripStatus::Active {
        Ok(())
    } else {
        Err(TransitError::trip_conflict(
            trip.id,
            trip.status.as_str(),
            action,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        events::TopicFilter,
        models::{DriverId, QueueStatus},
        queue::FixedSlotEstimator,
        routes::{RouteDefinition, RoutePoint, RouteTable},
        store::MemoryStore,
    };
    use chrono::{DateTime, Duration, TimeZone, Utc};

    struct Fixture {
        repo: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        bus: EventBus,
        scheduler: Arc<QueueScheduler>,
        trips: TripLifecycle,
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 7, 30, 0).unwrap()
    }

    fn fixture() -> Fixture {
        fixture_with_capacity(64)
    }

    fn fixture_with_capacity(event_capacity: usize) -> Fixture {
        let stop = |name: &str, fare: f64| RoutePoint {
            name: name.to_string(),
            coordinates: Coordinates::new(1.0, fare),
            fare_per_passenger: fare,
        };
        let table = RouteTable::new(vec![RouteDefinition {
            origin: "A".to_string(),
            destination: "B".to_string(),
            drop_off_points: vec![stop("X", 5.0), stop("Y", 8.0), stop("Z", 12.0)],
        }])
        .unwrap();

        let repo = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let bus = EventBus::new(event_capacity);
        let scheduler = Arc::new(
            QueueScheduler::new(
                repo.clone(),
                bus.clone(),
                clock.clone(),
                Arc::new(FixedSlotEstimator::default()),
            )
            .unwrap(),
        );
        let trips = TripLifecycle::new(
            repo.clone(),
            FareCalculator::new(Arc::new(table)),
            scheduler.clone(),
            bus.clone(),
            clock.clone(),
        );
        Fixture {
            repo,
            clock,
            bus,
            scheduler,
            trips,
        }
    }

    fn new_trip() -> NewTrip {
        NewTrip {
            origin: "A".to_string(),
            destination: "B".to_string(),
            initial_passengers: 3,
            ..NewTrip::default()
        }
    }

    fn pickup(at: &str, to: &str, count: u32) -> PickupRequest {
        PickupRequest {
            pickup_location: at.to_string(),
            drop_off_location: to.to_string(),
            passenger_count: count,
        }
    }

    #[test]
    fn trip_without_assignment_starts_active() -> Result<()> {
        let fx = fixture();
        let mut sub = fx.bus.subscribe(TopicFilter::All);
        let trip = fx.trips.create(new_trip())?;
        assert_eq!(trip.status, TripStatus::Active);
        assert_eq!(trip.current_passengers, 3);
        assert_eq!(trip.start_time, start());
        assert_eq!(sub.drain()[0].name(), "trip_started");
        Ok(())
    }

    #[test]
    fn preassigned_trip_waits_in_pending() -> Result<()> {
        let fx = fixture();
        let trip = fx.trips.create(NewTrip {
            driver_id: Some(DriverId(7)),
            ..new_trip()
        })?;
        assert_eq!(trip.status, TripStatus::Pending);

        let err = fx.trips.record_boarding(trip.id, &pickup("A", "Z", 1)).unwrap_err();
        assert!(matches!(err, TransitError::StateConflict { .. }));

        fx.clock.advance(Duration::minutes(3));
        let started = fx.trips.start(trip.id)?;
        assert_eq!(started.status, TripStatus::Active);
        assert_eq!(started.start_time, start() + Duration::minutes(3));
        assert_eq!(fx.trips.start(trip.id)?, started);
        Ok(())
    }

    #[test]
    fn invalid_creation_requests_are_rejected() {
        let fx = fixture();
        let blank = fx.trips.create(NewTrip {
            origin: "  ".to_string(),
            ..new_trip()
        });
        assert!(matches!(blank, Err(TransitError::Validation(_))));
        let circular = fx.trips.create(NewTrip {
            destination: "a".to_string(),
            ..new_trip()
        });
        assert!(matches!(circular, Err(TransitError::Validation(_))));
    }

    #[test]
    fn boarding_accumulates_stage_fares_per_drop_off() -> Result<()> {
        let fx = fixture();
        let trip = fx.trips.create(new_trip())?;

        let trip_after_first = fx.trips.record_boarding(trip.id, &pickup("A", "Z", 2))?;
        assert_eq!(trip_after_first.revenue, 24.0);

        fx.clock.advance(Duration::minutes(10));
        let trip = fx.trips.record_boarding(trip.id, &pickup("X", "Z", 1))?;
        assert_eq!(trip.revenue, 31.0);
        assert_eq!(trip.current_passengers, 6);
        assert_eq!(trip.total_boarded, 3);
        assert_eq!(trip.passengers_served(), 6);

        let z = trip.drop_off_point("Z").expect("ledger line for Z");
        assert_eq!(z.passenger_count, 3);
        assert_eq!(z.total_revenue, 31.0);
        assert_eq!(z.fare_per_passenger, 12.0);
        assert_eq!(trip.ledger_revenue(), trip.revenue);

        let events = fx.trips.passenger_events(trip.id)?;
        let amounts: Vec<_> = events.iter().map(|event| event.fare_amount).collect();
        assert_eq!(amounts, [Some(24.0), Some(7.0)]);
        assert!(events
            .iter()
            .all(|event| event.event_type == PassengerEventKind::PickupAtDropoff));
        Ok(())
    }

    #[test]
    fn riding_to_destination_records_final_fare_line() -> Result<()> {
        let fx = fixture();
        let trip = fx.trips.create(new_trip())?;
        let trip = fx.trips.record_boarding(trip.id, &pickup("Y", "b", 2))?;
        assert_eq!(trip.revenue, 8.0);
        let line = trip.drop_off_point("B").expect("destination line");
        assert_eq!(line.fare_per_passenger, 12.0);
        assert_eq!(line.coordinates, None);
        Ok(())
    }

    #[test]
    fn free_rides_are_invalid_routes() -> Result<()> {
        let fx = fixture();
        let trip = fx.trips.create(new_trip())?;
        let backwards = fx.trips.record_boarding(trip.id, &pickup("Z", "X", 1));
        assert!(matches!(backwards, Err(TransitError::InvalidRoute { .. })));
        let unknown = fx.trips.record_boarding(trip.id, &pickup("A", "Nowhere", 1));
        assert!(matches!(unknown, Err(TransitError::InvalidRoute { .. })));
        let nobody = fx.trips.record_boarding(trip.id, &pickup("A", "Z", 0));
        assert!(matches!(nobody, Err(TransitError::Validation(_))));

        let unchanged = fx.trips.trip(trip.id)?;
        assert_eq!(unchanged.revenue, 0.0);
        assert!(fx.trips.passenger_events(trip.id)?.is_empty());
        Ok(())
    }

    #[test]
    fn alighting_never_goes_negative() -> Result<()> {
        let fx = fixture();
        let trip = fx.trips.create(new_trip())?;
        let trip = fx.trips.record_board(trip.id, 2, None)?;
        assert_eq!(trip.current_passengers, 5);
        let trip = fx.trips.record_alight(trip.id, 9, None)?;
        assert_eq!(trip.current_passengers, 0);
        assert_eq!(trip.total_boarded, 2);
        let kinds: Vec<_> = fx
            .trips
            .passenger_events(trip.id)?
            .into_iter()
            .map(|event| event.event_type)
            .collect();
        assert_eq!(kinds, [PassengerEventKind::Board, PassengerEventKind::Alight]);
        Ok(())
    }

    #[test]
    fn ending_twice_queues_once() -> Result<()> {
        let fx = fixture();
        let mut sub = fx.bus.subscribe(TopicFilter::Destination("B".to_string()));
        let trip = fx.trips.create(new_trip())?;
        fx.clock.advance(Duration::minutes(40));

        let first = fx.trips.end(trip.id)?;
        assert_eq!(first.trip.status, TripStatus::Completed);
        assert_eq!(first.trip.end_time, Some(start() + Duration::minutes(40)));
        let entry = first.queue_entry.clone().expect("queued");
        assert_eq!(entry.queue_position, 1);

        let second = fx.trips.end(trip.id)?;
        assert_eq!(second, first);
        assert_eq!(fx.repo.queue_entries()?.len(), 1);
        assert_eq!(fx.scheduler.queue_for("B").len(), 1);

        let names: Vec<_> = sub.drain().iter().map(ChangeEvent::name).collect();
        assert_eq!(names, ["queue_updated", "trip_ended"]);
        Ok(())
    }

    #[test]
    fn ended_trip_reports_no_entry_after_departure() -> Result<()> {
        let fx = fixture();
        let trip = fx.trips.create(new_trip())?;
        let entry = fx.trips.end(trip.id)?.queue_entry.expect("queued");
        fx.scheduler.set_status(entry.id, QueueStatus::Departed)?;
        assert_eq!(fx.trips.end(trip.id)?.queue_entry, None);
        Ok(())
    }

    #[test]
    fn terminal_trips_reject_mutation() -> Result<()> {
        let fx = fixture();
        let cancelled = fx.trips.create(new_trip())?;
        fx.trips.cancel(cancelled.id)?;
        assert_eq!(fx.trips.cancel(cancelled.id)?.status, TripStatus::Cancelled);
        assert!(matches!(
            fx.trips.end(cancelled.id),
            Err(TransitError::StateConflict { .. })
        ));
        assert!(fx.scheduler.queue_for("B").is_empty());

        let completed = fx.trips.create(new_trip())?;
        fx.trips.end(completed.id)?;
        for result in [
            fx.trips.cancel(completed.id).map(|_| ()),
            fx.trips.start(completed.id).map(|_| ()),
            fx.trips.record_board(completed.id, 1, None).map(|_| ()),
            fx.trips
                .update_location(completed.id, Coordinates::new(0.0, 0.0))
                .map(|_| ()),
        ] {
            assert!(matches!(result, Err(TransitError::StateConflict { .. })));
        }
        Ok(())
    }

    #[test]
    fn starting_releases_driver_from_previous_queue() -> Result<()> {
        let fx = fixture();
        let driver = DriverId(11);
        let inbound = fx.trips.create(NewTrip {
            driver_id: Some(driver),
            ..new_trip()
        })?;
        fx.trips.start(inbound.id)?;
        fx.trips.end(inbound.id)?;
        assert_eq!(fx.scheduler.queue_for("B").len(), 1);

        let outbound = fx.trips.create(NewTrip {
            origin: "B".to_string(),
            destination: "A".to_string(),
            driver_id: Some(driver),
            ..NewTrip::default()
        })?;
        fx.trips.start(outbound.id)?;
        assert!(fx.scheduler.queue_for("B").is_empty());
        Ok(())
    }

    #[test]
    fn location_updates_extend_breadcrumb() -> Result<()> {
        let fx = fixture();
        let mut sub = fx.bus.subscribe(TopicFilter::All);
        let trip = fx.trips.create(NewTrip {
            current_location: Some(Coordinates::new(1.0, 1.0)),
            ..new_trip()
        })?;
        let trip = fx.trips.update_location(trip.id, Coordinates::new(1.5, 1.0))?;
        assert_eq!(trip.route.len(), 2);
        assert_eq!(trip.current_location, Some(Coordinates::new(1.5, 1.0)));
        assert_eq!(sub.drain().last().map(ChangeEvent::name), Some("trip_location_update"));
        Ok(())
    }

    #[test]
    fn unknown_trip_is_not_found() {
        let fx = fixture();
        let err = fx.trips.end(TripId(99)).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn boarding_past_the_countable_total_changes_nothing() -> Result<()> {
        let fx = fixture();
        let trip = fx.trips.create(NewTrip {
            initial_passengers: u32::MAX,
            ..new_trip()
        })?;

        let board = fx.trips.record_board(trip.id, 1, None);
        assert!(matches!(board, Err(TransitError::Validation(_))));
        let staged = fx.trips.record_boarding(trip.id, &pickup("A", "Z", 1));
        assert!(matches!(staged, Err(TransitError::Validation(_))));

        assert_eq!(fx.trips.trip(trip.id)?, trip);
        assert!(fx.trips.passenger_events(trip.id)?.is_empty());
        Ok(())
    }

    #[test]
    fn lookups_of_unknown_trips_leave_no_locks_behind() -> Result<()> {
        let fx = fixture();
        for id in 1000..1500 {
            assert!(fx.trips.end(TripId(id)).unwrap_err().is_not_found());
        }
        assert_eq!(fx.trips.held_locks(), 0);

        let trip = fx.trips.create(new_trip())?;
        fx.trips.record_board(trip.id, 1, None)?;
        fx.trips.end(trip.id)?;
        fx.trips.end(trip.id)?;
        assert_eq!(fx.trips.held_locks(), 0);
        Ok(())
    }

    #[test]
    fn concurrent_end_and_boarding_serialize_per_trip() -> Result<()> {
        let fx = fixture_with_capacity(1024);
        let trip = fx.trips.create(new_trip())?;
        let mut sub = fx.bus.subscribe(TopicFilter::Trip(trip.id));
        let trips = &fx.trips;
        let id = trip.id;

        let (ended, boardings) = std::thread::scope(|scope| {
            let enders: Vec<_> = (0..8).map(|_| scope.spawn(move || trips.end(id))).collect();
            let boarders: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(move || {
                        (0..4)
                            .map(|_| trips.record_boarding(id, &pickup("A", "Z", 1)))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            let ended: Vec<_> = enders.into_iter().map(|h| h.join().unwrap()).collect();
            let boardings: Vec<_> = boarders
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect();
            (ended, boardings)
        });

        let ended = ended.into_iter().collect::<Result<Vec<_>>>()?;
        assert!(ended.windows(2).all(|pair| pair[0] == pair[1]));
        let mut succeeded = 0u32;
        for outcome in boardings {
            match outcome {
                Ok(_) => succeeded += 1,
                Err(err) => assert!(matches!(err, TransitError::StateConflict { .. })),
            }
        }

        assert_eq!(fx.repo.queue_entries()?.len(), 1);
        let names: Vec<_> = sub.drain().iter().map(ChangeEvent::name).collect();
        assert_eq!(names.iter().filter(|name| **name == "trip_ended").count(), 1);
        assert_eq!(
            names.iter().filter(|name| **name == "passenger_update").count(),
            succeeded as usize
        );

        let stored = fx.trips.trip(id)?;
        assert_eq!(stored, ended[0].trip);
        assert_eq!(stored.status, TripStatus::Completed);
        assert_eq!(stored.total_boarded, succeeded);
        assert_eq!(stored.revenue, 12.0 * f64::from(succeeded));
        assert_eq!(stored.ledger_revenue(), stored.revenue);
        assert_eq!(fx.trips.held_locks(), 0);
        Ok(())
    }
}
