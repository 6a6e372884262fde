use std::collections::BTreeMap;

use anyhow::Result;
use parking_lot::RwLock;

use crate::models::{EventId, PassengerEvent, QueueEntry, QueueId, Trip, TripId};

use super::{snapshot::StoreSnapshot, Repository};

/// Thread-safe in-memory [`Repository`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    trips: BTreeMap<TripId, Trip>,
    events: BTreeMap<EventId, PassengerEvent>,
    queue: BTreeMap<QueueId, QueueEntry>,
    last_trip_id: u64,
    last_event_id: u64,
    last_queue_id: u64,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from a snapshot, continuing id allocation after the highest id seen.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let mut inner = Inner::default();
        for trip in snapshot.trips {
            inner.last_trip_id = inner.last_trip_id.max(trip.id.0);
            inner.trips.insert(trip.id, trip);
        }
        for event in snapshot.events {
            inner.last_event_id = inner.last_event_id.max(event.id.0);
            inner.events.insert(event.id, event);
        }
        for entry in snapshot.queue_entries {
            inner.last_queue_id = inner.last_queue_id.max(entry.id.0);
            inner.queue.insert(entry.id, entry);
        }
        Self {
            inner: RwLock::new(inner),
        }
    }

    /// Copy the current contents into a snapshot labelled `label`.
    pub fn snapshot(&self, label: &str) -> StoreSnapshot {
        let inner = self.inner.read();
        StoreSnapshot::new(
            label,
            inner.trips.values().cloned().collect(),
            inner.events.values().cloned().collect(),
            inner.queue.values().cloned().collect(),
        )
    }
}

impl Repository for MemoryStore {
    fn next_trip_id(&self) -> Result<TripId> {
        let mut inner = self.inner.write();
        inner.last_trip_id += 1;
        Ok(TripId(inner.last_trip_id))
    }

    fn save_trip(&self, trip: &Trip) -> Result<()> {
        self.inner.write().trips.insert(trip.id, trip.clone());
        Ok(())
    }

    fn trip(&self, id: TripId) -> Result<Option<Trip>> {
        Ok(self.inner.read().trips.get(&id).cloned())
    }

    fn trips(&self) -> Result<Vec<Trip>> {
        Ok(self.inner.read().trips.values().cloned().collect())
    }

    fn next_event_id(&self) -> Result<EventId> {
        let mut inner = self.inner.write();
        inner.last_event_id += 1;
        Ok(EventId(inner.last_event_id))
    }

    fn append_event(&self, event: &PassengerEvent) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.events.contains_key(&event.id) {
            anyhow::bail!("passenger event {} already recorded", event.id);
        }
        inner.events.insert(event.id, event.clone());
        Ok(())
    }

    fn events_for_trip(&self, trip_id: TripId) -> Result<Vec<PassengerEvent>> {
        let mut events: Vec<_> = self
            .inner
            .read()
            .events
            .values()
            .filter(|event| event.trip_id == trip_id)
            .cloned()
            .collect();
        events.sort_by_key(|event| (event.timestamp, event.id));
        Ok(events)
    }

    fn next_queue_id(&self) -> Result<QueueId> {
        let mut inner = self.inner.write();
        inner.last_queue_id += 1;
        Ok(QueueId(inner.last_queue_id))
    }

    fn save_queue_entry(&self, entry: &QueueEntry) -> Result<()> {
        self.inner.write().queue.insert(entry.id, entry.clone());
        Ok(())
    }

    fn queue_entry(&self, id: QueueId) -> Result<Option<QueueEntry>> {
        Ok(self.inner.read().queue.get(&id).cloned())
    }

    fn queue_entries(&self) -> Result<Vec<QueueEntry>> {
        Ok(self.inner.read().queue.values().cloned().collect())
    }

    fn delete_queue_entry(&self, id: QueueId) -> Result<bool> {
        Ok(self.inner.write().queue.remove(&id).is_some())
    }
}
