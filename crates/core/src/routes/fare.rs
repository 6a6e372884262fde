use std::sync::Arc;

use crate::models::same_location;

use super::table::{RouteDefinition, RouteTable};

/// Where a named location sits along a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    /// The route origin, ahead of every stop.
    Origin,
    /// Index into the stop list.
    Stop(usize),
    /// The destination, past every stop.
    Destination,
}

impl Position {
    /// Ordering key where the origin is -1 and the destination is the stop count.
    fn rank(self, stops: usize) -> isize {
        match self {
            Self::Origin => -1,
            Self::Stop(index) => index as isize,
            Self::Destination => stops as isize,
        }
    }
}

/// Stage-fare computation over a [`RouteTable`].
///
/// Stop fares are cumulative from the origin, so a rider pays the
/// difference between the cumulative fare at drop-off and at pickup.
#[derive(Debug, Clone)]
pub struct FareCalculator {
    routes: Arc<RouteTable>,
}

impl FareCalculator {
    /// Calculator over a shared route table.
    pub fn new(routes: Arc<RouteTable>) -> Self {
        Self { routes }
    }

    /// Underlying route table.
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Per-passenger fare from `pickup` to `drop_off` on the route `origin → destination`.
    ///
    /// Returns 0 for undefined routes, unknown locations and backwards or
    /// zero-length segments.
    pub fn fare(&self, pickup: &str, drop_off: &str, origin: &str, destination: &str) -> f64 {
        let Some(route) = self.routes.route(origin, destination) else {
            return 0.0;
        };
        let stops = route.drop_off_points.len();
        let Some(from) = locate(route, pickup) else {
            return 0.0;
        };
        let Some(to) = locate(route, drop_off) else {
            return 0.0;
        };
        if to.rank(stops) <= from.rank(stops) {
            return 0.0;
        }

        let fare_at_drop_off = cumulative_fare(route, to);
        match from {
            Position::Origin => fare_at_drop_off,
            _ => (fare_at_drop_off - cumulative_fare(route, from)).max(0.0),
        }
    }

    /// Drop-off choices still ahead of `pickup`, ending with the destination.
    ///
    /// Stops at or behind the pickup point have already been served and are
    /// excluded. An unknown pickup or one at the destination yields nothing.
    pub fn valid_drop_offs_from(
        &self,
        pickup: &str,
        origin: &str,
        destination: &str,
    ) -> Vec<String> {
        if same_location(pickup, destination) {
            return Vec::new();
        }
        let route = self.routes.route(origin, destination);
        let from = match route {
            Some(route) => locate(route, pickup),
            None if same_location(pickup, origin) => Some(Position::Origin),
            None => None,
        };

        let first_ahead = match from {
            None | Some(Position::Destination) => return Vec::new(),
            Some(Position::Origin) => 0,
            Some(Position::Stop(index)) => index + 1,
        };

        let mut choices: Vec<String> = route
            .map(|route| {
                route.drop_off_points[first_ahead.min(route.drop_off_points.len())..]
                    .iter()
                    .map(|point| point.name.clone())
                    .collect()
            })
            .unwrap_or_default();
        if !choices.iter().any(|name| same_location(name, destination)) {
            choices.push(destination.trim().to_string());
        }
        choices
    }
}

fn locate(route: &RouteDefinition, name: &str) -> Option<Position> {
    if let Some(index) = route.stop_index(name) {
        return Some(Position::Stop(index));
    }
    if same_location(name, &route.origin) {
        Some(Position::Origin)
    } else if same_location(name, &route.destination) {
        Some(Position::Destination)
    } else {
        None
    }
}

fn cumulative_fare(route: &RouteDefinition, position: Position) -> f64 {
    match position {
        Position::Origin => 0.0,
        Position::Stop(index) => route.drop_off_points[index].fare_per_passenger,
        Position::Destination => route.final_fare(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Coordinates;
    use crate::routes::{RouteDefinition, RoutePoint};

    fn market_route() -> FareCalculator {
        let stop = |name: &str, fare: f64| RoutePoint {
            name: name.to_string(),
            coordinates: Coordinates::new(0.0, 0.0),
            fare_per_passenger: fare,
        };
        let table = RouteTable::new(vec![RouteDefinition {
            origin: "A".to_string(),
            destination: "B".to_string(),
            drop_off_points: vec![stop("X", 5.0), stop("Y", 8.0), stop("Z", 12.0)],
        }])
        .unwrap();
        FareCalculator::new(Arc::new(table))
    }

    #[test]
    fn fare_from_origin_is_listed_stop_fare() {
        let fares = market_route();
        assert_eq!(fares.fare("A", "X", "A", "B"), 5.0);
        assert_eq!(fares.fare("A", "Y", "A", "B"), 8.0);
        assert_eq!(fares.fare("A", "Z", "A", "B"), 12.0);
    }

    #[test]
    fn fare_between_stops_is_the_difference() {
        let fares = market_route();
        assert_eq!(fares.fare("X", "Y", "A", "B"), 3.0);
        assert_eq!(fares.fare("X", "Z", "A", "B"), 7.0);
        assert_eq!(fares.fare("Y", "Z", "A", "B"), 4.0);
    }

    #[test]
    fn riding_to_destination_uses_final_stop_fare() {
        let fares = market_route();
        assert_eq!(fares.fare("A", "B", "A", "B"), 12.0);
        assert_eq!(fares.fare("Y", "B", "A", "B"), 4.0);
        assert_eq!(fares.fare("Z", "B", "A", "B"), 0.0);
    }

    #[test]
    fn backwards_and_same_point_travel_is_free() {
        let fares = market_route();
        assert_eq!(fares.fare("Z", "X", "A", "B"), 0.0);
        assert_eq!(fares.fare("Y", "Y", "A", "B"), 0.0);
        assert_eq!(fares.fare("B", "Z", "A", "B"), 0.0);
        assert_eq!(fares.fare("X", "A", "A", "B"), 0.0);
    }

    #[test]
    fn unknown_locations_and_routes_are_free() {
        let fares = market_route();
        assert_eq!(fares.fare("Nowhere", "Z", "A", "B"), 0.0);
        assert_eq!(fares.fare("A", "Nowhere", "A", "B"), 0.0);
        assert_eq!(fares.fare("A", "X", "B", "A"), 0.0);
    }

    #[test]
    fn valid_drop_offs_only_look_forward() {
        let fares = market_route();
        assert_eq!(fares.valid_drop_offs_from("A", "A", "B"), ["X", "Y", "Z", "B"]);
        assert_eq!(fares.valid_drop_offs_from("x", "A", "B"), ["Y", "Z", "B"]);
        assert_eq!(fares.valid_drop_offs_from("Z", "A", "B"), ["B"]);
        assert!(fares.valid_drop_offs_from("B", "A", "B").is_empty());
        assert!(fares.valid_drop_offs_from("Nowhere", "A", "B").is_empty());
    }

    #[test]
    fn destination_listed_as_stop_is_not_repeated() {
        let fares = FareCalculator::new(Arc::new(RouteTable::builtin()));
        let choices = fares.valid_drop_offs_from("Airport", "Airport", "Downtown Terminal");
        assert_eq!(
            choices,
            ["Highway Plaza", "Metro Station", "Downtown Terminal"]
        );
        assert!(fares
            .valid_drop_offs_from("Downtown Terminal", "Airport", "Downtown Terminal")
            .is_empty());
    }

    #[test]
    fn undefined_route_offers_only_destination_from_origin() {
        let fares = market_route();
        assert_eq!(fares.valid_drop_offs_from("C", "C", "D"), ["D"]);
        assert!(fares.valid_drop_offs_from("E", "C", "D").is_empty());
    }
}
