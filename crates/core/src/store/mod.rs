//! Persistence collaborator interface and implementations.

use anyhow::Result;

use crate::models::{EventId, PassengerEvent, QueueEntry, QueueId, Trip, TripId};

/// In-process store keeping everything in memory.
pub mod memory;
/// JSON snapshots of the in-memory store.
pub mod snapshot;

pub use memory::MemoryStore;
pub use snapshot::{SnapshotEntry, SnapshotManager, StoreSnapshot};

/// CRUD by id for trips, passenger events and queue entries.
///
/// Queue positions written here are a record of what the scheduler decided;
/// the scheduler recomputes them on load and never treats them as authoritative.
pub trait Repository: Send + Sync {
    /// Reserve the next trip identifier.
    fn next_trip_id(&self) -> Result<TripId>;
    /// Insert or replace a trip.
    fn save_trip(&self, trip: &Trip) -> Result<()>;
    /// Fetch a trip by id.
    fn trip(&self, id: TripId) -> Result<Option<Trip>>;
    /// All stored trips in unspecified order.
    fn trips(&self) -> Result<Vec<Trip>>;

    /// Reserve the next passenger event identifier.
    fn next_event_id(&self) -> Result<EventId>;
    /// Append a passenger event; events are never updated.
    fn append_event(&self, event: &PassengerEvent) -> Result<()>;
    /// Events for a trip, oldest first.
    fn events_for_trip(&self, trip_id: TripId) -> Result<Vec<PassengerEvent>>;

    /// Reserve the next queue entry identifier.
    fn next_queue_id(&self) -> Result<QueueId>;
    /// Insert or replace a queue entry.
    fn save_queue_entry(&self, entry: &QueueEntry) -> Result<()>;
    /// Fetch a queue entry by id.
    fn queue_entry(&self, id: QueueId) -> Result<Option<QueueEntry>>;
    /// All stored queue entries, departed ones included.
    fn queue_entries(&self) -> Result<Vec<QueueEntry>>;
    /// Delete a queue entry, returning whether it existed.
    fn delete_queue_entry(&self, id: QueueId) -> Result<bool>;
}
