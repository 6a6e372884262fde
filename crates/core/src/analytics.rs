//! Read-only rollups over completed trips.
//!
//! Every function here is pure: it takes a slice of trips, ignores anything
//! that is not completed and returns zeros or empty lists for empty input.

#![allow(missing_docs)]

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use serde::Serialize;

use crate::models::{DriverId, Trip, TripStatus};

/// Totals for a window of trips.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TripSummary {
    pub trips: usize,
    pub passengers: u64,
    pub revenue: f64,
    pub average_passengers: f64,
    pub average_revenue: f64,
}

/// Passenger flow for one hour of the day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HourlyFlow {
    /// Hour of day, 0 through 23 (UTC).
    pub hour: u32,
    pub trips: usize,
    pub passengers: u64,
}

/// Popularity of one origin/destination pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStat {
    pub origin: String,
    pub destination: String,
    pub trips: usize,
    pub average_passengers: f64,
}

/// Per-driver totals.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverStat {
    pub driver_id: DriverId,
    pub trips: usize,
    pub passengers: u64,
    pub revenue: f64,
}

/// End-of-day figures for one calendar date.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyReport {
    pub date: NaiveDate,
    pub summary: TripSummary,
    pub peak_hour: Option<u32>,
    pub hourly_flow: Vec<HourlyFlow>,
    pub top_routes: Vec<RouteStat>,
    pub drivers: Vec<DriverStat>,
}

fn completed(trips: &[Trip]) -> impl Iterator<Item = &Trip> {
    trips
        .iter()
        .filter(|trip| trip.status == TripStatus::Completed)
}

fn passengers(trip: &Trip) -> u64 {
    u64::from(trip.passengers_served())
}

fn summarize<'a>(trips: impl Iterator<Item = &'a Trip>) -> TripSummary {
    let mut summary = TripSummary::default();
    for trip in trips {
        summary.trips += 1;
        summary.passengers += passengers(trip);
        summary.revenue += trip.revenue;
    }
    if summary.trips > 0 {
        let count = summary.trips as f64;
        summary.average_passengers = summary.passengers as f64 / count;
        summary.average_revenue = summary.revenue / count;
    }
    summary
}

/// Totals for completed trips that started on `date` (UTC).
pub fn day_summary(trips: &[Trip], date: NaiveDate) -> TripSummary {
    summarize(completed(trips).filter(|trip| trip.start_time.date_naive() == date))
}

/// Totals for completed trips started in `[start, end)`.
pub fn summary_between(trips: &[Trip], start: DateTime<Utc>, end: DateTime<Utc>) -> TripSummary {
    summarize(completed(trips).filter(|trip| trip.start_time >= start && trip.start_time < end))
}

/// Twenty-four buckets keyed by the hour each trip started.
pub fn hourly_flow(trips: &[Trip]) -> Vec<HourlyFlow> {
    let mut buckets: Vec<HourlyFlow> = (0..24)
        .map(|hour| HourlyFlow {
            hour,
            ..HourlyFlow::default()
        })
        .collect();
    for trip in completed(trips) {
        let bucket = &mut buckets[trip.start_time.hour() as usize];
        bucket.trips += 1;
        bucket.passengers += passengers(trip);
    }
    buckets
}

/// Busiest hour by passengers; the earliest wins a tie. `None` when nothing moved.
pub fn peak_hour(flow: &[HourlyFlow]) -> Option<u32> {
    flow.iter()
        .filter(|bucket| bucket.passengers > 0)
        .fold(None::<&HourlyFlow>, |best, bucket| match best {
            Some(current) if current.passengers >= bucket.passengers => Some(current),
            _ => Some(bucket),
        })
        .map(|bucket| bucket.hour)
}

/// The `limit` most travelled routes, by trip count then average load.
pub fn top_routes(trips: &[Trip], limit: usize) -> Vec<RouteStat> {
    let mut groups: HashMap<(String, String), (String, String, usize, u64)> = HashMap::new();
    for trip in completed(trips) {
        let key = (
            trip.origin.trim().to_lowercase(),
            trip.destination.trim().to_lowercase(),
        );
        let group = groups
            .entry(key)
            .or_insert_with(|| (trip.origin.clone(), trip.destination.clone(), 0, 0));
        group.2 += 1;
        group.3 += passengers(trip);
    }

    let mut stats: Vec<RouteStat> = groups
        .into_values()
        .map(|(origin, destination, trips, passengers)| RouteStat {
            origin,
            destination,
            trips,
            average_passengers: passengers as f64 / trips as f64,
        })
        .collect();
    stats.sort_by(|a, b| {
        b.trips
            .cmp(&a.trips)
            .then(b.average_passengers.total_cmp(&a.average_passengers))
            .then_with(|| a.origin.cmp(&b.origin))
            .then_with(|| a.destination.cmp(&b.destination))
    });
    stats.truncate(limit);
    stats
}

/// Totals per driver, highest revenue first. Trips without a driver are skipped.
pub fn driver_rollups(trips: &[Trip]) -> Vec<DriverStat> {
    let mut by_driver: HashMap<DriverId, DriverStat> = HashMap::new();
    for trip in completed(trips) {
        let Some(driver_id) = trip.driver_id else {
            continue;
        };
        let stat = by_driver.entry(driver_id).or_insert_with(|| DriverStat {
            driver_id,
            trips: 0,
            passengers: 0,
            revenue: 0.0,
        });
        stat.trips += 1;
        stat.passengers += passengers(trip);
        stat.revenue += trip.revenue;
    }

    let mut stats: Vec<_> = by_driver.into_values().collect();
    stats.sort_by(|a, b| {
        b.revenue
            .total_cmp(&a.revenue)
            .then(a.driver_id.cmp(&b.driver_id))
    });
    stats
}

/// Everything an end-of-day report shows for `date`.
pub fn daily_report(trips: &[Trip], date: NaiveDate, top_limit: usize) -> DailyReport {
    let day: Vec<Trip> = completed(trips)
        .filter(|trip| trip.start_time.date_naive() == date)
        .cloned()
        .collect();
    let hourly_flow = hourly_flow(&day);
    DailyReport {
        date,
        summary: summarize(day.iter()),
        peak_hour: peak_hour(&hourly_flow),
        hourly_flow,
        top_routes: top_routes(&day, top_limit),
        drivers: driver_rollups(&day),
    }
}
