#![warn(clippy::all, missing_docs)]

//! Core domain logic for the shared-vehicle transit tracker.
//!
//! This crate hosts the route table and stage-fare rules, the trip
//! lifecycle, per-destination vehicle queues, analytics rollups and the
//! persistence and notification seams used by the CLI and any future
//! frontends.

pub mod analytics;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod queue;
pub mod routes;
pub mod service;
pub mod store;
pub mod trips;

pub use config::AppConfig;
pub use error::{Result, TransitError};
pub use events::{ChangeEvent, EventBus, Subscription, TopicFilter};
pub use models::{
    Coordinates, DriverId, NewTrip, PassengerEvent, PickupRequest, QueueEntry, QueueId,
    QueueStatus, Trip, TripId, TripStatus, VehicleId,
};
pub use routes::{FareCalculator, RouteTable};
pub use service::TransitCore;
pub use trips::CompletedTrip;
