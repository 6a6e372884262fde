//! Trip state machine and passenger accounting.

mod lifecycle;

pub use lifecycle::{CompletedTrip, TripLifecycle};
