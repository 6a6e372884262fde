mod scenario;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use std::{
    fs::{self, OpenOptions},
    path::PathBuf,
    sync::{Arc, Mutex},
};

use tracing::{error, info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};
use transit_core::{
    clock::{Clock, ManualClock},
    config::{self, AppConfig},
    store::SnapshotManager,
    TopicFilter, TransitCore,
};

use scenario::{Runner, Scenario};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    config::ensure_default_config()?;
    let config = AppConfig::load()?;

    let scenario = match std::env::args_os().nth(1) {
        Some(path) => Some(Scenario::load(&PathBuf::from(path)).await?),
        None => None,
    };

    let clock = Arc::new(ManualClock::new(Utc::now()));
    let core = TransitCore::open_with_clock(config.clone(), clock.clone())?;

    let mut changes = core.subscribe(TopicFilter::All);
    let watcher = tokio::spawn(async move {
        while let Some(change) = changes.recv().await {
            info!(event = change.name(), trip_id = %change.trip_id(), "Change published");
        }
    });

    let label = match &scenario {
        Some(scenario) => {
            let rejected = Runner::new(&core, &clock).run(scenario);
            if rejected > 0 {
                warn!(rejected, "Scenario finished with rejected steps");
            }
            scenario.label.clone()
        }
        None => "session".to_string(),
    };

    print_overview(&core, clock.now().date_naive())?;

    let snapshots = SnapshotManager::new(config.snapshot_dir());
    core.snapshot(&snapshots, &label)?;

    // Dropping the core closes the bus, which ends the watcher.
    drop(core);
    if let Err(err) = watcher.await {
        error!(?err, "Change watcher failed");
    }
    Ok(())
}

fn print_overview(core: &TransitCore, date: NaiveDate) -> Result<()> {
    println!("Recent trips");
    for trip in core.recent_trips(None)? {
        println!(
            "  #{:<4} {:<40} {:<9} {:>3} pax  {:>8.2}",
            trip.id,
            trip.route_label(),
            trip.status.as_str(),
            trip.passengers_served(),
            trip.revenue
        );
    }

    for destination in core.queued_destinations() {
        println!("Queue at {destination}");
        for entry in core.queue_for(&destination) {
            println!(
                "  {:>2}. trip #{:<4} {:<9} boards ~{}",
                entry.queue_position,
                entry.trip_id,
                entry.status.as_str(),
                entry.estimated_boarding_time.format("%H:%M")
            );
        }
    }

    let report = core.daily_report(date)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn init_logging() -> Result<()> {
    let log_dir = std::env::current_dir()?.join("logs");
    fs::create_dir_all(&log_dir)?;
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("transit.log"))?;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .compact()
        .with_writer(Mutex::new(log_file));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    Ok(())
}
