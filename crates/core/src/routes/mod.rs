//! Predefined routes and stage-fare computation.

/// Stage-fare calculation along a route.
pub mod fare;
/// Route definitions and lookup.
pub mod table;

pub use fare::FareCalculator;
pub use table::{RouteDefinition, RoutePoint, RouteTable};
