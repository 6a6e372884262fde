//! Shared domain models.

mod queue;
mod trip;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use queue::{QueueEntry, QueueStatus};
pub use trip::{
    DropOffPoint, NewTrip, PassengerEvent, PassengerEventKind, PickupRequest, Trip, TripStatus,
};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Identifier of a [`Trip`].
    TripId
);
id_type!(
    /// Identifier of a [`QueueEntry`].
    QueueId
);
id_type!(
    /// Identifier of a [`PassengerEvent`].
    EventId
);
id_type!(
    /// Identifier of the driver operating a trip.
    DriverId
);
id_type!(
    /// Identifier of the vehicle used for a trip.
    VehicleId
);

/// WGS84 position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
}

impl Coordinates {
    /// Build a coordinate pair.
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Case-insensitive, whitespace-trimmed comparison used for location names.
pub(crate) fn same_location(left: &str, right: &str) -> bool {
    left.trim().eq_ignore_ascii_case(right.trim())
}
