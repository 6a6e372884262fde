//! Query and command surface consumed by frontends.

use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, NaiveDate, Utc};
use tracing::info;

use crate::{
    analytics::{self, DailyReport, DriverStat, HourlyFlow, RouteStat, TripSummary},
    clock::{Clock, SystemClock},
    config::AppConfig,
    error::{Result, TransitError},
    events::{EventBus, Subscription, TopicFilter},
    models::{
        Coordinates, DriverId, NewTrip, PassengerEvent, PickupRequest, QueueEntry, QueueId,
        QueueStatus, Trip, TripId, TripStatus,
    },
    queue::{FixedSlotEstimator, QueueScheduler},
    routes::{FareCalculator, RoutePoint, RouteTable},
    store::{MemoryStore, Repository, SnapshotEntry, SnapshotManager},
    trips::{CompletedTrip, TripLifecycle},
};

/// Fully wired transit core.
pub struct TransitCore {
    config: AppConfig,
    fares: FareCalculator,
    repo: Arc<dyn Repository>,
    memory: Option<Arc<MemoryStore>>,
    bus: EventBus,
    scheduler: Arc<QueueScheduler>,
    trips: TripLifecycle,
}

impl TransitCore {
    /// Build a core from configuration: route table from `route_table` (or the
    /// built-in table) and an in-memory store, resumed from the newest snapshot
    /// when `restore_latest_snapshot` is set.
    pub fn open(config: AppConfig) -> Result<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock))
    }

    /// [`TransitCore::open`] with an explicit time source.
    pub fn open_with_clock(config: AppConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let routes = match &config.route_table {
            Some(path) => RouteTable::load(path)?,
            None => RouteTable::builtin(),
        };

        let store = if config.restore_latest_snapshot {
            let manager = SnapshotManager::new(config.snapshot_dir());
            match manager.latest()? {
                Some(entry) => {
                    info!(path = %entry.path.display(), label = %entry.label, "Restoring snapshot");
                    MemoryStore::from_snapshot(manager.load(&entry)?)
                }
                None => MemoryStore::new(),
            }
        } else {
            MemoryStore::new()
        };

        Self::from_store(config, routes, Arc::new(store), clock)
    }

    /// Build a core over an in-memory store, which also enables snapshots.
    pub fn from_store(
        config: AppConfig,
        routes: RouteTable,
        store: Arc<MemoryStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        Self::assemble(config, routes, store.clone(), Some(store), clock)
    }

    /// Build a core over any repository.
    pub fn with_repository(
        config: AppConfig,
        routes: RouteTable,
        repo: Arc<dyn Repository>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        Self::assemble(config, routes, repo, None, clock)
    }

    fn assemble(
        config: AppConfig,
        routes: RouteTable,
        repo: Arc<dyn Repository>,
        memory: Option<Arc<MemoryStore>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let fares = FareCalculator::new(Arc::new(routes));
        let bus = EventBus::new(config.event_capacity);
        let scheduler = Arc::new(QueueScheduler::new(
            repo.clone(),
            bus.clone(),
            clock.clone(),
            Arc::new(FixedSlotEstimator::try_minutes(config.boarding_slot_minutes)?),
        )?);
        let trips = TripLifecycle::new(
            repo.clone(),
            fares.clone(),
            scheduler.clone(),
            bus.clone(),
            clock,
        );
        info!(routes = fares.routes().len(), "Transit core ready");
        Ok(Self {
            config,
            fares,
            repo,
            memory,
            bus,
            scheduler,
            trips,
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Route table in use.
    pub fn routes(&self) -> &RouteTable {
        self.fares.routes()
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self, filter: TopicFilter) -> Subscription {
        self.bus.subscribe(filter)
    }

    // Queries

    /// Most recently started active trip, optionally for one driver.
    pub fn active_trip(&self, driver_id: Option<DriverId>) -> Result<Option<Trip>> {
        Ok(self
            .repo
            .trips()?
            .into_iter()
            .filter(|trip| trip.status == TripStatus::Active)
            .filter(|trip| driver_id.map_or(true, |id| trip.driver_id == Some(id)))
            .max_by_key(|trip| (trip.start_time, trip.id)))
    }

    /// Trip by id.
    pub fn trip(&self, id: TripId) -> Result<Trip> {
        self.trips.trip(id)
    }

    /// Latest trips first. `limit` defaults to `recent_trips_limit` and is
    /// capped at `max_recent_trips`.
    pub fn recent_trips(&self, limit: Option<usize>) -> Result<Vec<Trip>> {
        let limit = limit
            .unwrap_or(self.config.recent_trips_limit)
            .min(self.config.max_recent_trips);
        let mut trips = self.repo.trips()?;
        trips.sort_by(|a, b| (b.start_time, b.id).cmp(&(a.start_time, a.id)));
        trips.truncate(limit);
        Ok(trips)
    }

    /// Active queue for `destination` in position order.
    pub fn queue_for(&self, destination: &str) -> Vec<QueueEntry> {
        self.scheduler.queue_for(destination)
    }

    /// Entries that already left `destination`'s queue.
    pub fn departed_for(&self, destination: &str) -> Result<Vec<QueueEntry>> {
        self.scheduler.departed_for(destination)
    }

    /// Destinations with at least one waiting vehicle.
    pub fn queued_destinations(&self) -> Vec<String> {
        self.scheduler.destinations()
    }

    /// Active queue entry of a trip, if it has one.
    pub fn queue_position(&self, trip_id: TripId) -> Option<QueueEntry> {
        self.scheduler.position_of(trip_id)
    }

    /// Drop-offs reachable from `pickup` on the `origin` → `destination` route.
    pub fn valid_drop_offs(&self, pickup: &str, origin: &str, destination: &str) -> Vec<String> {
        self.fares.valid_drop_offs_from(pickup, origin, destination)
    }

    /// Per-passenger fare; zero means the ride is not chargeable.
    pub fn fare(&self, pickup: &str, drop_off: &str, origin: &str, destination: &str) -> f64 {
        self.fares.fare(pickup, drop_off, origin, destination)
    }

    /// Passenger events of a trip, oldest first.
    pub fn passenger_events(&self, trip_id: TripId) -> Result<Vec<PassengerEvent>> {
        self.trips.passenger_events(trip_id)
    }

    /// Every origin and destination name, sorted.
    pub fn locations(&self) -> Vec<String> {
        self.routes().all_locations()
    }

    /// Destinations served from `origin`.
    pub fn destinations_from(&self, origin: &str) -> Vec<String> {
        self.routes().destinations_from(origin)
    }

    /// Stops of the `origin` → `destination` route.
    pub fn drop_off_points_for(&self, origin: &str, destination: &str) -> Vec<RoutePoint> {
        self.routes().drop_off_points_for(origin, destination)
    }

    // Analytics

    /// Totals for trips started on `date`.
    pub fn day_summary(&self, date: NaiveDate) -> Result<TripSummary> {
        Ok(analytics::day_summary(&self.repo.trips()?, date))
    }

    /// Totals for trips started in `[start, end)`.
    pub fn summary_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<TripSummary> {
        Ok(analytics::summary_between(&self.repo.trips()?, start, end))
    }

    /// Passenger flow per start hour.
    pub fn hourly_flow(&self) -> Result<Vec<HourlyFlow>> {
        Ok(analytics::hourly_flow(&self.repo.trips()?))
    }

    /// Busiest start hour.
    pub fn peak_hour(&self) -> Result<Option<u32>> {
        Ok(analytics::peak_hour(&self.hourly_flow()?))
    }

    /// Most travelled routes; `limit` defaults to `top_routes_limit`.
    pub fn top_routes(&self, limit: Option<usize>) -> Result<Vec<RouteStat>> {
        let limit = limit.unwrap_or(self.config.top_routes_limit);
        Ok(analytics::top_routes(&self.repo.trips()?, limit))
    }

    /// Per-driver totals.
    pub fn driver_rollups(&self) -> Result<Vec<DriverStat>> {
        Ok(analytics::driver_rollups(&self.repo.trips()?))
    }

    /// End-of-day report for `date`.
    pub fn daily_report(&self, date: NaiveDate) -> Result<DailyReport> {
        Ok(analytics::daily_report(
            &self.repo.trips()?,
            date,
            self.config.top_routes_limit,
        ))
    }

    // Commands

    /// Create a trip.
    pub fn create_trip(&self, request: NewTrip) -> Result<Trip> {
        self.trips.create(request)
    }

    /// Depart a pending trip.
    pub fn start_trip(&self, id: TripId) -> Result<Trip> {
        self.trips.start(id)
    }

    /// Board fare-paying passengers for a drop-off point.
    pub fn pickup_passengers(&self, id: TripId, request: &PickupRequest) -> Result<Trip> {
        self.trips.record_boarding(id, request)
    }

    /// Record a plain boarding.
    pub fn board(&self, id: TripId, count: u32, location: Option<Coordinates>) -> Result<Trip> {
        self.trips.record_board(id, count, location)
    }

    /// Record passengers getting off.
    pub fn alight(&self, id: TripId, count: u32, location: Option<Coordinates>) -> Result<Trip> {
        self.trips.record_alight(id, count, location)
    }

    /// Complete a trip and queue it at its destination.
    pub fn end_trip(&self, id: TripId) -> Result<CompletedTrip> {
        self.trips.end(id)
    }

    /// Abandon a trip.
    pub fn cancel_trip(&self, id: TripId) -> Result<Trip> {
        self.trips.cancel(id)
    }

    /// Report a vehicle position.
    pub fn update_location(&self, id: TripId, location: Coordinates) -> Result<Trip> {
        self.trips.update_location(id, location)
    }

    /// Move a queue entry to `status`.
    pub fn set_queue_status(&self, queue_id: QueueId, status: QueueStatus) -> Result<QueueEntry> {
        self.scheduler.set_status(queue_id, status)
    }

    /// Remove a queue entry, closing the gap behind it.
    pub fn depart(&self, queue_id: QueueId) -> Result<QueueEntry> {
        self.scheduler.remove(queue_id)
    }

    /// Persist the store through `manager`. Only in-memory stores can be snapshotted.
    pub fn snapshot(&self, manager: &SnapshotManager, label: &str) -> Result<SnapshotEntry> {
        let store = self.memory.as_ref().ok_or_else(|| {
            TransitError::Storage(anyhow!("repository does not support snapshots"))
        })?;
        let entry = manager.create_snapshot(&store.snapshot(label))?;
        info!(path = %entry.path.display(), trips = entry.trip_count, "Snapshot saved");
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::ManualClock, events::ChangeEvent};
    use chrono::{Duration, TimeZone};
    use tempfile::tempdir;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    fn core_at(clock: Arc<ManualClock>, store: Arc<MemoryStore>) -> TransitCore {
        TransitCore::from_store(AppConfig::default(), RouteTable::builtin(), store, clock).unwrap()
    }

    fn harness() -> (TransitCore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start()));
        (core_at(clock.clone(), Arc::new(MemoryStore::new())), clock)
    }

    fn to_market(origin: &str) -> NewTrip {
        NewTrip {
            origin: origin.to_string(),
            destination: "Shopping Mall".to_string(),
            initial_passengers: 4,
            ..NewTrip::default()
        }
    }

    #[test]
    fn unrepresentable_boarding_slot_fails_to_open() {
        let config = AppConfig {
            boarding_slot_minutes: i64::MAX / 2,
            ..AppConfig::default()
        };
        let clock = Arc::new(ManualClock::new(start()));
        let opened =
            TransitCore::from_store(config, RouteTable::builtin(), Arc::new(MemoryStore::new()), clock);
        assert!(matches!(opened, Err(TransitError::Validation(_))));
    }

    #[test]
    fn same_second_completions_queue_in_call_order() -> Result<()> {
        let (core, _clock) = harness();
        let ids: Vec<_> = (0..3)
            .map(|_| core.create_trip(to_market("Downtown Terminal")).map(|trip| trip.id))
            .collect::<Result<_>>()?;
        for id in &ids {
            core.end_trip(*id)?;
        }

        let queue = core.queue_for("shopping mall");
        let order: Vec<_> = queue.iter().map(|e| (e.trip_id, e.queue_position)).collect();
        assert_eq!(order, [(ids[0], 1), (ids[1], 2), (ids[2], 3)]);
        assert_eq!(core.queued_destinations(), ["Shopping Mall"]);
        Ok(())
    }

    #[test]
    fn departure_from_middle_compacts_tail() -> Result<()> {
        let (core, clock) = harness();
        let mut entries = Vec::new();
        for _ in 0..3 {
            let trip = core.create_trip(to_market("Downtown Terminal"))?;
            entries.push(core.end_trip(trip.id)?.queue_entry.expect("queued"));
        }
        clock.advance(Duration::minutes(2));
        let departed = core.set_queue_status(entries[1].id, QueueStatus::Departed)?;
        assert_eq!(departed.status, QueueStatus::Departed);

        let queue = core.queue_for("Shopping Mall");
        assert_eq!(queue.len(), 2);
        assert_eq!(queue[0], entries[0]);
        assert_eq!(queue[1].trip_id, entries[2].trip_id);
        assert_eq!(queue[1].queue_position, 2);
        assert_eq!(
            queue[1].estimated_boarding_time,
            start() + Duration::minutes(2) + Duration::minutes(5)
        );
        assert_eq!(core.departed_for("Shopping Mall")?.len(), 1);

        let removed = core.depart(entries[0].id)?;
        assert_eq!(removed.trip_id, entries[0].trip_id);
        assert_eq!(core.queue_for("Shopping Mall")[0].queue_position, 1);
        assert!(core.depart(entries[0].id).unwrap_err().is_not_found());
        Ok(())
    }

    #[test]
    fn queries_follow_route_table() -> Result<()> {
        let (core, _clock) = harness();
        assert_eq!(
            core.fare("Metro Station", "Airport Terminal", "Downtown Terminal", "Airport"),
            4.5
        );
        assert_eq!(
            core.valid_drop_offs("Highway Plaza", "Downtown Terminal", "Airport"),
            ["Airport Terminal", "Airport"]
        );
        let locations = core.locations();
        assert!(locations.contains(&"Central Park".to_string()));
        assert!(!locations.contains(&"Midtown Plaza".to_string()));
        assert!(core
            .destinations_from("downtown terminal")
            .contains(&"Airport".to_string()));
        assert_eq!(
            core.drop_off_points_for("Downtown Terminal", "Shopping Mall").len(),
            1
        );
        Ok(())
    }

    #[test]
    fn recent_trips_are_newest_first_and_bounded() -> Result<()> {
        let (core, clock) = harness();
        for _ in 0..12 {
            core.create_trip(to_market("Downtown Terminal"))?;
            clock.advance(Duration::minutes(1));
        }
        let recent = core.recent_trips(None)?;
        assert_eq!(recent.len(), 10);
        assert_eq!(recent[0].id, TripId(12));
        assert_eq!(core.recent_trips(Some(3))?.len(), 3);
        assert_eq!(core.recent_trips(Some(10_000))?.len(), 12);
        Ok(())
    }

    #[test]
    fn active_trip_prefers_latest_and_filters_driver() -> Result<()> {
        let (core, clock) = harness();
        assert!(core.active_trip(None)?.is_none());
        let first = core.create_trip(to_market("Downtown Terminal"))?;
        clock.advance(Duration::minutes(1));
        let assigned = core.create_trip(NewTrip {
            driver_id: Some(DriverId(4)),
            ..to_market("University Campus")
        })?;
        assert_eq!(core.active_trip(None)?.map(|t| t.id), Some(first.id));
        assert!(core.active_trip(Some(DriverId(4)))?.is_none());

        core.start_trip(assigned.id)?;
        assert_eq!(core.active_trip(None)?.map(|t| t.id), Some(assigned.id));
        assert_eq!(
            core.active_trip(Some(DriverId(4)))?.map(|t| t.id),
            Some(assigned.id)
        );
        Ok(())
    }

    #[test]
    fn analytics_cover_completed_trips() -> Result<()> {
        let (core, _clock) = harness();
        let trip = core.create_trip(NewTrip {
            driver_id: Some(DriverId(1)),
            ..to_market("Downtown Terminal")
        })?;
        core.start_trip(trip.id)?;
        core.pickup_passengers(
            trip.id,
            &PickupRequest {
                pickup_location: "Downtown Terminal".to_string(),
                drop_off_location: "Midtown Plaza".to_string(),
                passenger_count: 2,
            },
        )?;
        core.end_trip(trip.id)?;
        core.create_trip(to_market("University Campus"))?;

        let summary = core.day_summary(start().date_naive())?;
        assert_eq!(summary.trips, 1);
        assert_eq!(summary.passengers, 6);
        assert_eq!(summary.revenue, 10.0);
        assert_eq!(core.peak_hour()?, Some(9));
        assert_eq!(core.top_routes(None)?[0].origin, "Downtown Terminal");
        assert_eq!(core.driver_rollups()?[0].revenue, 10.0);

        let report = core.daily_report(start().date_naive())?;
        assert_eq!(report.summary, summary);
        assert_eq!(report.peak_hour, Some(9));
        Ok(())
    }

    #[test]
    fn snapshot_restores_queue_positions() -> Result<()> {
        let dir = tempdir().map_err(anyhow::Error::from)?;
        let manager = SnapshotManager::new(dir.path());
        let clock = Arc::new(ManualClock::new(start()));
        let core = core_at(clock.clone(), Arc::new(MemoryStore::new()));
        for _ in 0..2 {
            let trip = core.create_trip(to_market("Downtown Terminal"))?;
            core.end_trip(trip.id)?;
        }
        core.snapshot(&manager, "close")?;

        let latest = manager.latest()?.expect("snapshot written");
        let restored = core_at(clock, Arc::new(MemoryStore::from_snapshot(manager.load(&latest)?)));
        assert_eq!(restored.queue_for("Shopping Mall"), core.queue_for("Shopping Mall"));
        let next = restored.create_trip(to_market("Downtown Terminal"))?;
        assert_eq!(next.id, TripId(3));
        Ok(())
    }

    #[test]
    fn snapshots_need_in_memory_store() {
        let clock = Arc::new(ManualClock::new(start()));
        let core = TransitCore::with_repository(
            AppConfig::default(),
            RouteTable::builtin(),
            Arc::new(MemoryStore::new()),
            clock,
        )
        .unwrap();
        let manager = SnapshotManager::new(std::env::temp_dir());
        assert!(matches!(
            core.snapshot(&manager, "nope"),
            Err(TransitError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn subscribers_see_trip_and_queue_events() -> Result<()> {
        let (core, _clock) = harness();
        let mut mall = core.subscribe(TopicFilter::Destination("Shopping Mall".to_string()));
        let trip = core.create_trip(to_market("Downtown Terminal"))?;
        core.end_trip(trip.id)?;

        let first = mall.recv().await.expect("queue event");
        assert!(matches!(first, ChangeEvent::QueueUpdated { .. }));
        match mall.recv().await.expect("trip event") {
            ChangeEvent::TripEnded { queue_position, .. } => assert_eq!(queue_position, Some(1)),
            other => panic!("unexpected event {}", other.name()),
        }
        Ok(())
    }
}
