use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::{
    clock::Clock,
    error::{Result, TransitError},
    events::{ChangeEvent, EventBus},
    models::{DriverId, QueueEntry, QueueId, QueueStatus, TripId},
    store::Repository,
};

use super::estimate::BoardingEstimator;

/// Active (non-departed) entries of one destination, ordered by position.
#[derive(Debug, Default)]
struct Lane {
    active: Vec<QueueEntry>,
}

impl Lane {
    fn index_of(&self, id: QueueId) -> Option<usize> {
        self.active.iter().position(|entry| entry.id == id)
    }

    /// Positions must be exactly 1..=N in arrival order. Anything else is a bug.
    fn assert_consistent(&self, destination: &str) {
        for (index, entry) in self.active.iter().enumerate() {
            assert_eq!(
                entry.queue_position as usize,
                index + 1,
                "queue for '{destination}' has entry {} at position {} but slot {}",
                entry.id,
                entry.queue_position,
                index + 1
            );
            assert!(
                entry.status.is_active(),
                "departed entry {} still counted in queue for '{destination}'",
                entry.id
            );
        }
        assert!(
            self.active
                .windows(2)
                .all(|pair| pair[0].arrival_key() < pair[1].arrival_key()),
            "queue for '{destination}' is out of arrival order"
        );
    }
}

/// First-arrived, first-served queues of completed trips, one per destination.
///
/// Each destination lane has its own lock, so position assignment and
/// compaction are serialized per destination while different destinations
/// proceed in parallel.
pub struct QueueScheduler {
    repo: Arc<dyn Repository>,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    estimator: Arc<dyn BoardingEstimator>,
    lanes: RwLock<HashMap<String, Arc<Mutex<Lane>>>>,
    sequence: AtomicU64,
}

impl QueueScheduler {
    /// Build a scheduler, rebuilding lanes from whatever the repository holds.
    ///
    /// Stored positions are ignored: active entries are re-ranked by arrival.
    pub fn new(
        repo: Arc<dyn Repository>,
        bus: EventBus,
        clock: Arc<dyn Clock>,
        estimator: Arc<dyn BoardingEstimator>,
    ) -> Result<Self> {
        let stored = repo.queue_entries()?;
        let last_seq = stored.iter().map(|entry| entry.arrival_seq).max().unwrap_or(0);

        let mut grouped: HashMap<String, Vec<QueueEntry>> = HashMap::new();
        for entry in stored.into_iter().filter(|entry| entry.status.is_active()) {
            grouped
                .entry(lane_key(&entry.destination))
                .or_default()
                .push(entry);
        }

        let now = clock.now();
        let mut lanes = HashMap::with_capacity(grouped.len());
        for (key, mut entries) in grouped {
            entries.sort_by_key(QueueEntry::arrival_key);
            for (index, entry) in entries.iter_mut().enumerate() {
                let position = index as u32 + 1;
                if entry.queue_position != position {
                    debug!(queue_id = %entry.id, stored = entry.queue_position, position, "Re-ranked stored queue entry");
                    entry.queue_position = position;
                    entry.estimated_boarding_time = estimator.estimate(position, now);
                    repo.save_queue_entry(entry)?;
                }
            }
            let lane = Lane { active: entries };
            lane.assert_consistent(&key);
            lanes.insert(key, Arc::new(Mutex::new(lane)));
        }

        info!(destinations = lanes.len(), "Queue scheduler ready");
        Ok(Self {
            repo,
            bus,
            clock,
            estimator,
            lanes: RwLock::new(lanes),
            sequence: AtomicU64::new(last_seq),
        })
    }

    /// Append `trip_id` to the tail of `destination`'s queue.
    ///
    /// A trip already waiting in that queue gets its existing entry back.
    pub fn enqueue(
        &self,
        trip_id: TripId,
        destination: &str,
        driver_id: Option<DriverId>,
    ) -> Result<QueueEntry> {
        let destination = destination.trim();
        if destination.is_empty() {
            return Err(TransitError::validation("queue destination must be named"));
        }

        let lane = self.lane(destination);
        let mut lane = lane.lock();
        if let Some(existing) = lane.active.iter().find(|entry| entry.trip_id == trip_id) {
            debug!(trip_id = %trip_id, destination, "Trip already queued");
            return Ok(existing.clone());
        }

        let now = self.clock.now();
        // Arrival times never go backwards within a lane, even if the wall clock does.
        let arrival_time = lane
            .active
            .last()
            .map(|tail| tail.arrival_time.max(now))
            .unwrap_or(now);
        let position = lane.active.len() as u32 + 1;
        let entry = QueueEntry {
            id: self.repo.next_queue_id()?,
            trip_id,
            destination: destination.to_string(),
            driver_id,
            arrival_time,
            arrival_seq: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            queue_position: position,
            status: QueueStatus::Waiting,
            estimated_boarding_time: self.estimator.estimate(position, now),
        };
        self.repo.save_queue_entry(&entry)?;
        lane.active.push(entry.clone());
        lane.assert_consistent(destination);

        info!(
            trip_id = %trip_id,
            queue_id = %entry.id,
            destination,
            position,
            "Vehicle joined destination queue"
        );
        self.bus.publish(ChangeEvent::QueueUpdated {
            entry: entry.clone(),
        });
        Ok(entry)
    }

    /// Move an entry to `status`. Departing compacts the rest of its queue.
    ///
    /// Re-applying the current status is a no-op.
    pub fn set_status(&self, queue_id: QueueId, status: QueueStatus) -> Result<QueueEntry> {
        let outcome = self.with_active_entry(queue_id, |lane, index, destination| {
            let current = lane.active[index].status;
            match (current, status) {
                (current, status) if current == status => Ok(lane.active[index].clone()),
                (QueueStatus::Waiting, QueueStatus::Boarding) => {
                    let mut updated = lane.active[index].clone();
                    updated.status = QueueStatus::Boarding;
                    self.repo.save_queue_entry(&updated)?;
                    lane.active[index] = updated.clone();
                    info!(queue_id = %queue_id, destination, "Vehicle boarding");
                    self.bus.publish(ChangeEvent::QueueUpdated {
                        entry: updated.clone(),
                    });
                    Ok(updated)
                }
                (_, QueueStatus::Departed) => self.depart(lane, index, destination),
                (current, _) => Err(TransitError::queue_conflict(
                    queue_id,
                    current.as_str(),
                    "return to waiting",
                )),
            }
        })?;

        match outcome {
            Some(entry) => Ok(entry),
            None => {
                let stored = self
                    .repo
                    .queue_entry(queue_id)?
                    .ok_or(TransitError::QueueEntryNotFound(queue_id))?;
                if status == QueueStatus::Departed {
                    Ok(stored)
                } else {
                    Err(TransitError::queue_conflict(
                        queue_id,
                        stored.status.as_str(),
                        "change status",
                    ))
                }
            }
        }
    }

    /// Depart (with compaction) and drop the entry from storage entirely.
    pub fn remove(&self, queue_id: QueueId) -> Result<QueueEntry> {
        let outcome = self.with_active_entry(queue_id, |lane, index, destination| {
            let departed = self.depart(lane, index, destination)?;
            self.repo.delete_queue_entry(queue_id)?;
            Ok(departed)
        })?;

        let removed = match outcome {
            Some(entry) => entry,
            None => {
                let stored = self
                    .repo
                    .queue_entry(queue_id)?
                    .ok_or(TransitError::QueueEntryNotFound(queue_id))?;
                if !self.repo.delete_queue_entry(queue_id)? {
                    return Err(TransitError::QueueEntryNotFound(queue_id));
                }
                stored
            }
        };

        info!(queue_id = %queue_id, destination = %removed.destination, "Queue entry removed");
        self.bus.publish(ChangeEvent::QueueRemoved {
            entry: removed.clone(),
        });
        Ok(removed)
    }

    /// Remove every active entry held by `driver_id`, across all destinations.
    pub fn release_driver(&self, driver_id: DriverId) -> Result<Vec<QueueEntry>> {
        let held: Vec<QueueId> = self
            .all_lanes()
            .into_iter()
            .flat_map(|lane| {
                lane.lock()
                    .active
                    .iter()
                    .filter(|entry| entry.driver_id == Some(driver_id))
                    .map(|entry| entry.id)
                    .collect::<Vec<_>>()
            })
            .collect();

        let mut released = Vec::with_capacity(held.len());
        for queue_id in held {
            match self.remove(queue_id) {
                Ok(entry) => released.push(entry),
                // Someone else removed it first.
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
        if !released.is_empty() {
            info!(driver_id = %driver_id, released = released.len(), "Released driver from queues");
        }
        Ok(released)
    }

    /// Active entry for `trip_id`, whichever destination it waits at.
    pub fn position_of(&self, trip_id: TripId) -> Option<QueueEntry> {
        self.all_lanes().into_iter().find_map(|lane| {
            lane.lock()
                .active
                .iter()
                .find(|entry| entry.trip_id == trip_id)
                .cloned()
        })
    }

    /// Active entries for `destination`, by position. Empty for unknown destinations.
    pub fn queue_for(&self, destination: &str) -> Vec<QueueEntry> {
        let lane = self.lanes.read().get(&lane_key(destination)).cloned();
        lane.map(|lane| lane.lock().active.clone())
            .unwrap_or_default()
    }

    /// Departed entries still retained in storage for `destination`, oldest first.
    pub fn departed_for(&self, destination: &str) -> Result<Vec<QueueEntry>> {
        let key = lane_key(destination);
        let mut departed: Vec<_> = self
            .repo
            .queue_entries()?
            .into_iter()
            .filter(|entry| !entry.status.is_active() && lane_key(&entry.destination) == key)
            .collect();
        departed.sort_by_key(QueueEntry::arrival_key);
        Ok(departed)
    }

    /// Destinations that currently have vehicles waiting or boarding.
    pub fn destinations(&self) -> Vec<String> {
        let mut destinations: Vec<String> = self
            .all_lanes()
            .into_iter()
            .filter_map(|lane| {
                lane.lock()
                    .active
                    .first()
                    .map(|entry| entry.destination.clone())
            })
            .collect();
        destinations.sort();
        destinations
    }

    fn lane(&self, destination: &str) -> Arc<Mutex<Lane>> {
        let key = lane_key(destination);
        if let Some(lane) = self.lanes.read().get(&key) {
            return lane.clone();
        }
        self.lanes.write().entry(key).or_default().clone()
    }

    fn all_lanes(&self) -> Vec<Arc<Mutex<Lane>>> {
        self.lanes.read().values().cloned().collect()
    }

    /// Run `op` under the lock of the lane holding active entry `queue_id`.
    ///
    /// `Ok(None)` means no lane holds it as active.
    fn with_active_entry<T>(
        &self,
        queue_id: QueueId,
        op: impl FnOnce(&mut Lane, usize, &str) -> Result<T>,
    ) -> Result<Option<T>> {
        for lane in self.all_lanes() {
            let mut lane = lane.lock();
            if let Some(index) = lane.index_of(queue_id) {
                let destination = lane.active[index].destination.clone();
                return op(&mut lane, index, &destination).map(Some);
            }
        }
        Ok(None)
    }

    /// Mark `lane.active[index]` departed and close the gap it leaves.
    ///
    /// Entries behind it move up one place and get an ETA measured from now;
    /// entries ahead of it are untouched.
    fn depart(&self, lane: &mut Lane, index: usize, destination: &str) -> Result<QueueEntry> {
        let now = self.clock.now();
        let mut remaining = lane.active.clone();
        let mut departed = remaining.remove(index);
        departed.status = QueueStatus::Departed;
        let vacated = departed.queue_position;

        let shifted = compact(&mut remaining, vacated, now, self.estimator.as_ref());

        self.repo.save_queue_entry(&departed)?;
        for entry in &remaining[shifted.clone()] {
            self.repo.save_queue_entry(entry)?;
        }
        lane.active = remaining;
        lane.assert_consistent(destination);

        info!(
            queue_id = %departed.id,
            trip_id = %departed.trip_id,
            destination,
            vacated,
            moved_up = shifted.len(),
            "Vehicle departed queue"
        );
        self.bus.publish(ChangeEvent::QueueUpdated {
            entry: departed.clone(),
        });
        for entry in &lane.active[shifted] {
            self.bus.publish(ChangeEvent::QueueUpdated {
                entry: entry.clone(),
            });
        }
        Ok(departed)
    }
}

/// Decrement every position behind `vacated`, re-estimating from `now`.
///
/// Returns the index range of entries that moved.
fn compact(
    entries: &mut [QueueEntry],
    vacated: u32,
    now: DateTime<Utc>,
    estimator: &dyn BoardingEstimator,
) -> std::ops::Range<usize> {
    let first = entries
        .iter()
        .position(|entry| entry.queue_position > vacated)
        .unwrap_or(entries.len());
    for entry in &mut entries[first..] {
        entry.queue_position -= 1;
        entry.estimated_boarding_time = estimator.estimate(entry.queue_position, now);
    }
    first..entries.len()
}

fn lane_key(destination: &str) -> String {
    destination.trim().to_lowercase()
}
