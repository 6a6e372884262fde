use std::{collections::BTreeSet, fs, path::Path};

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::models::{same_location, Coordinates};

/// A named stop with its cumulative fare from the route origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutePoint {
    /// Stop name.
    pub name: String,
    /// Stop position.
    pub coordinates: Coordinates,
    /// Fare from the origin to this stop; non-decreasing along the route.
    pub fare_per_passenger: f64,
}

/// Ordered stops for one direction between two locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteDefinition {
    /// Departure location.
    pub origin: String,
    /// Final destination.
    pub destination: String,
    /// Intermediate drop-off points in travel order.
    pub drop_off_points: Vec<RoutePoint>,
}

impl RouteDefinition {
    /// Index of the stop called `name`, if it is on this route.
    pub fn stop_index(&self, name: &str) -> Option<usize> {
        self.drop_off_points
            .iter()
            .position(|point| same_location(&point.name, name))
    }

    /// Fare listed for the final stop, used when riding through to the destination.
    pub fn final_fare(&self) -> f64 {
        self.drop_off_points
            .last()
            .map(|point| point.fare_per_passenger)
            .unwrap_or(0.0)
    }

    fn matches(&self, origin: &str, destination: &str) -> bool {
        same_location(&self.origin, origin) && same_location(&self.destination, destination)
    }
}

/// Immutable lookup of predefined routes keyed by (origin, destination).
///
/// Each direction is authored on its own; the reverse of a route is never
/// derived from the forward stop list.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<RouteDefinition>,
}

impl RouteTable {
    /// Build a table, rejecting duplicate pairs and decreasing fares.
    pub fn new(routes: Vec<RouteDefinition>) -> Result<Self> {
        for (index, route) in routes.iter().enumerate() {
            validate_route(route)?;
            if routes[..index]
                .iter()
                .any(|other| other.matches(&route.origin, &route.destination))
            {
                bail!(
                    "duplicate route {} → {}",
                    route.origin.trim(),
                    route.destination.trim()
                );
            }
        }
        Ok(Self { routes })
    }

    /// Read a JSON array of route definitions from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read route table {}", path.display()))?;
        let routes: Vec<RouteDefinition> = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse route table {}", path.display()))?;
        Self::new(routes).with_context(|| format!("invalid route table {}", path.display()))
    }

    /// Table shipped with the crate.
    pub fn builtin() -> Self {
        Self {
            routes: BUILTIN_ROUTES.clone(),
        }
    }

    /// Route between `origin` and `destination`, if one is defined.
    pub fn route(&self, origin: &str, destination: &str) -> Option<&RouteDefinition> {
        self.routes
            .iter()
            .find(|route| route.matches(origin, destination))
    }

    /// Ordered stops for the pair; empty when no route is predefined.
    pub fn drop_off_points_for(&self, origin: &str, destination: &str) -> Vec<RoutePoint> {
        self.route(origin, destination)
            .map(|route| route.drop_off_points.clone())
            .unwrap_or_default()
    }

    /// Every origin and destination, sorted and deduplicated.
    pub fn all_locations(&self) -> Vec<String> {
        let locations: BTreeSet<String> = self
            .routes
            .iter()
            .flat_map(|route| [route.origin.trim(), route.destination.trim()])
            .map(str::to_string)
            .collect();
        locations.into_iter().collect()
    }

    /// Destinations reachable from `origin` by a predefined route.
    pub fn destinations_from(&self, origin: &str) -> Vec<String> {
        self.routes
            .iter()
            .filter(|route| same_location(&route.origin, origin))
            .map(|route| route.destination.trim().to_string())
            .collect()
    }

    /// Stop called `name` on the pair's route.
    pub fn stop(&self, origin: &str, destination: &str, name: &str) -> Option<&RoutePoint> {
        let route = self.route(origin, destination)?;
        route
            .stop_index(name)
            .map(|index| &route.drop_off_points[index])
    }

    /// All route definitions.
    pub fn routes(&self) -> &[RouteDefinition] {
        &self.routes
    }

    /// Number of defined routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the table defines no routes.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

fn validate_route(route: &RouteDefinition) -> Result<()> {
    if route.origin.trim().is_empty() || route.destination.trim().is_empty() {
        bail!("route endpoints must be named");
    }
    if same_location(&route.origin, &route.destination) {
        bail!("route {} starts and ends at the same place", route.origin);
    }
    let mut previous = 0.0_f64;
    for point in &route.drop_off_points {
        if point.name.trim().is_empty() {
            bail!(
                "unnamed stop on route {} → {}",
                route.origin,
                route.destination
            );
        }
        if !point.fare_per_passenger.is_finite() || point.fare_per_passenger < 0.0 {
            bail!(
                "stop '{}' on {} → {} has invalid fare {}",
                point.name,
                route.origin,
                route.destination,
                point.fare_per_passenger
            );
        }
        if point.fare_per_passenger < previous {
            bail!(
                "fare decreases at stop '{}' on {} → {} ({} < {})",
                point.name,
                route.origin,
                route.destination,
                point.fare_per_passenger,
                previous
            );
        }
        previous = point.fare_per_passenger;
    }
    Ok(())
}

fn point(name: &str, lat: f64, lng: f64, fare: f64) -> RoutePoint {
    RoutePoint {
        name: name.to_string(),
        coordinates: Coordinates::new(lat, lng),
        fare_per_passenger: fare,
    }
}

fn route(origin: &str, destination: &str, drop_off_points: Vec<RoutePoint>) -> RouteDefinition {
    RouteDefinition {
        origin: origin.to_string(),
        destination: destination.to_string(),
        drop_off_points,
    }
}

static BUILTIN_ROUTES: Lazy<Vec<RouteDefinition>> = Lazy::new(|| {
    vec![
        route(
            "Downtown Terminal",
            "Airport",
            vec![
                point("Metro Station", 40.7280, -74.0020, 5.50),
                point("Highway Plaza", 40.6800, -73.8500, 7.00),
                point("Airport Terminal", 40.6405, -73.7789, 10.00),
            ],
        ),
        route(
            "Downtown Terminal",
            "University Campus",
            vec![
                point("City Hall", 40.7420, -73.9890, 4.00),
                point("Library", 40.7489, -73.9680, 6.00),
            ],
        ),
        route(
            "Downtown Terminal",
            "Shopping Mall",
            vec![point("Midtown Plaza", 40.7505, -73.9934, 5.00)],
        ),
        route(
            "Airport",
            "Downtown Terminal",
            vec![
                point("Highway Plaza", 40.6800, -73.8500, 4.50),
                point("Metro Station", 40.7280, -74.0020, 7.00),
                point("Downtown Terminal", 40.7128, -74.0060, 10.00),
            ],
        ),
        route(
            "Airport",
            "University Campus",
            vec![
                point("City Center", 40.7200, -73.9000, 8.00),
                point("University Campus", 40.7489, -73.9680, 12.00),
            ],
        ),
        route(
            "Airport",
            "Business District",
            vec![point("Corporate Center", 40.7580, -73.9855, 9.00)],
        ),
        route(
            "University Campus",
            "Downtown Terminal",
            vec![
                point("Student Union", 40.7489, -73.9680, 3.00),
                point("City Hall", 40.7420, -73.9890, 4.00),
                point("Downtown Terminal", 40.7128, -74.0060, 6.00),
            ],
        ),
        route(
            "University Campus",
            "Shopping Mall",
            vec![
                point("Campus Gate", 40.7500, -73.9700, 4.50),
                point("Shopping Mall", 40.7505, -73.9934, 5.50),
            ],
        ),
        route(
            "University Campus",
            "Central Park",
            vec![point("Museum District", 40.7829, -73.9654, 4.00)],
        ),
        route(
            "Shopping Mall",
            "Downtown Terminal",
            vec![
                point("Retail Plaza", 40.7505, -73.9934, 4.00),
                point("Downtown Terminal", 40.7128, -74.0060, 5.00),
            ],
        ),
        route(
            "Shopping Mall",
            "University Campus",
            vec![
                point("Student Plaza", 40.7500, -73.9700, 4.50),
                point("University Campus", 40.7489, -73.9680, 5.50),
            ],
        ),
        route(
            "Shopping Mall",
            "Business District",
            vec![point("Commerce Center", 40.7580, -73.9855, 6.00)],
        ),
        route(
            "Central Park",
            "Downtown Terminal",
            vec![
                point("Park Entrance", 40.7829, -73.9654, 3.50),
                point("Midtown", 40.7505, -73.9934, 4.00),
                point("Downtown Terminal", 40.7128, -74.0060, 5.50),
            ],
        ),
        route(
            "Central Park",
            "University Campus",
            vec![
                point("Museum District", 40.7600, -73.9700, 4.00),
                point("University Campus", 40.7489, -73.9680, 5.00),
            ],
        ),
        route(
            "Business District",
            "Airport",
            vec![
                point("Corporate Plaza", 40.7580, -73.9855, 7.00),
                point("Airport Terminal", 40.6405, -73.7789, 9.00),
            ],
        ),
        route(
            "Business District",
            "Downtown Terminal",
            vec![
                point("Financial District", 40.7580, -73.9855, 5.00),
                point("Downtown Terminal", 40.7128, -74.0060, 6.00),
            ],
        ),
        route(
            "Business District",
            "Shopping Mall",
            vec![
                point("Commerce Center", 40.7580, -73.9855, 4.50),
                point("Shopping Mall", 40.7505, -73.9934, 6.00),
            ],
        ),
    ]
});

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn builtin_table_is_valid() {
        let table = RouteTable::builtin();
        assert!(RouteTable::new(table.routes().to_vec()).is_ok());
        assert!(!table.is_empty());
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let table = RouteTable::builtin();
        let stops = table.drop_off_points_for("downtown terminal", "AIRPORT");
        let names: Vec<_> = stops.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["Metro Station", "Highway Plaza", "Airport Terminal"]);
    }

    #[test]
    fn undefined_route_has_no_stops() {
        let table = RouteTable::builtin();
        assert!(table.drop_off_points_for("Airport", "Nowhere").is_empty());
    }

    #[test]
    fn reverse_direction_is_authored_separately() {
        let table = RouteTable::builtin();
        let forward = table.drop_off_points_for("Downtown Terminal", "Airport");
        let reverse = table.drop_off_points_for("Airport", "Downtown Terminal");
        let mut mirrored = forward.clone();
        mirrored.reverse();
        assert_ne!(mirrored, reverse);
        assert_eq!(reverse[0].name, "Highway Plaza");
        assert_eq!(reverse[0].fare_per_passenger, 4.50);
    }

    #[test]
    fn locations_and_destinations() {
        let table = RouteTable::builtin();
        let locations = table.all_locations();
        assert!(locations.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(locations.contains(&"Central Park".to_string()));
        assert_eq!(
            table.destinations_from("Airport"),
            ["Downtown Terminal", "University Campus", "Business District"]
        );
        assert!(table.destinations_from("Nowhere").is_empty());
    }

    #[test]
    fn rejects_decreasing_fares() {
        let result = RouteTable::new(vec![route(
            "A",
            "B",
            vec![point("X", 0.0, 0.0, 8.0), point("Y", 0.0, 0.0, 5.0)],
        )]);
        let err = result.unwrap_err().to_string();
        assert!(err.contains("fare decreases"), "{err}");
    }

    #[test]
    fn rejects_duplicate_pairs() {
        let result = RouteTable::new(vec![
            route("A", "B", vec![]),
            route("a", " b ", vec![]),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn loads_json_table() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("routes.json");
        fs::write(
            &path,
            r#"[
  {
    "origin": "A",
    "destination": "B",
    "dropOffPoints": [
      { "name": "X", "coordinates": { "lat": 1.0, "lng": 2.0 }, "farePerPassenger": 5 },
      { "name": "Y", "coordinates": { "lat": 1.5, "lng": 2.5 }, "farePerPassenger": 8 }
    ]
  }
]"#,
        )?;
        let table = RouteTable::load(&path)?;
        assert_eq!(table.len(), 1);
        assert_eq!(table.stop("A", "B", "y").map(|p| p.fare_per_passenger), Some(8.0));
        Ok(())
    }
}
