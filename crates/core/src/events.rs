//! Best-effort change notifications.
//!
//! Delivery is at-most-once to whoever is subscribed at publish time. A
//! subscriber that falls behind loses the oldest events and must resync
//! through the query surface.

use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, warn};

use crate::models::{
    same_location, Coordinates, PassengerEvent, QueueEntry, Trip, TripId,
};

/// State change emitted by the core, carrying the post-change entity.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    /// A trip became active.
    TripStarted {
        /// Trip after the change.
        trip: Trip,
    },
    /// Any other trip change (creation in pending, cancellation).
    TripUpdated {
        /// Trip after the change.
        trip: Trip,
    },
    /// A trip completed and joined its destination queue.
    #[serde(rename_all = "camelCase")]
    TripEnded {
        /// Trip after the change.
        trip: Trip,
        /// Position assigned in the destination queue.
        queue_position: Option<u32>,
    },
    /// A new position was reported for an active trip.
    #[serde(rename_all = "camelCase")]
    TripLocationUpdate {
        /// Trip the position belongs to.
        trip_id: TripId,
        /// Reported position.
        location: Coordinates,
    },
    /// Passengers boarded or alighted.
    #[serde(rename_all = "camelCase")]
    PassengerUpdate {
        /// Trip the event belongs to.
        trip_id: TripId,
        /// The recorded event.
        event: PassengerEvent,
        /// Passengers aboard after the event.
        new_passenger_count: u32,
    },
    /// A queue entry was created or changed position or status.
    QueueUpdated {
        /// Entry after the change.
        entry: QueueEntry,
    },
    /// A queue entry left the active view.
    QueueRemoved {
        /// Entry as it was when removed.
        entry: QueueEntry,
    },
}

impl ChangeEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::TripStarted { .. } => "trip_started",
            Self::TripUpdated { .. } => "trip_updated",
            Self::TripEnded { .. } => "trip_ended",
            Self::TripLocationUpdate { .. } => "trip_location_update",
            Self::PassengerUpdate { .. } => "passenger_update",
            Self::QueueUpdated { .. } => "queue_updated",
            Self::QueueRemoved { .. } => "queue_removed",
        }
    }

    /// Trip this event concerns.
    pub fn trip_id(&self) -> TripId {
        match self {
            Self::TripStarted { trip } | Self::TripUpdated { trip } | Self::TripEnded { trip, .. } => {
                trip.id
            }
            Self::TripLocationUpdate { trip_id, .. } | Self::PassengerUpdate { trip_id, .. } => {
                *trip_id
            }
            Self::QueueUpdated { entry } | Self::QueueRemoved { entry } => entry.trip_id,
        }
    }

    /// Destination queue this event concerns, if any.
    pub fn destination(&self) -> Option<&str> {
        match self {
            Self::TripEnded { trip, .. } => Some(&trip.destination),
            Self::QueueUpdated { entry } | Self::QueueRemoved { entry } => {
                Some(&entry.destination)
            }
            _ => None,
        }
    }
}

/// Which events a subscription receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicFilter {
    /// Everything.
    All,
    /// Events about a single trip, including its queue entry.
    Trip(TripId),
    /// Queue events for one destination, plus trips ending there.
    Destination(String),
}

impl TopicFilter {
    /// Whether `event` belongs to this topic.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        match self {
            Self::All => true,
            Self::Trip(id) => event.trip_id() == *id,
            Self::Destination(name) => event
                .destination()
                .map(|destination| same_location(destination, name))
                .unwrap_or(false),
        }
    }
}

/// Publish/subscribe hub for [`ChangeEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ChangeEvent>,
}

impl EventBus {
    /// Bus buffering up to `capacity` undelivered events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Fire-and-forget publish.
    pub fn publish(&self, event: ChangeEvent) {
        let name = event.name();
        match self.sender.send(event) {
            Ok(receivers) => debug!(event = name, receivers, "Published change"),
            Err(_) => debug!(event = name, "No subscribers; change dropped"),
        }
    }

    /// Subscribe to events matching `filter` from now on.
    pub fn subscribe(&self, filter: TopicFilter) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
            filter,
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Receiving end of an [`EventBus`] topic.
#[derive(Debug)]
pub struct Subscription {
    receiver: broadcast::Receiver<ChangeEvent>,
    filter: TopicFilter,
}

impl Subscription {
    /// Topic of this subscription.
    pub fn filter(&self) -> &TopicFilter {
        &self.filter
    }

    /// Wait for the next matching event; `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, filter = ?self.filter, "Subscriber lagged; events lost");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event already buffered, without waiting.
    pub fn try_next(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, filter = ?self.filter, "Subscriber lagged; events lost");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Drain every buffered matching event.
    pub fn drain(&mut self) -> Vec<ChangeEvent> {
        std::iter::from_fn(|| self.try_next()).collect()
    }
}
