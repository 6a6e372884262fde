//! Layered application configuration.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Directory name under the platform config/data roots.
pub const APP_DIR: &str = "transit-tracker";

/// Prefix for environment overrides, e.g. `TRANSIT__BOARDING_SLOT_MINUTES=3`.
pub const ENV_PREFIX: &str = "TRANSIT";

/// Longest boarding slot accepted, one day per vehicle ahead.
pub const MAX_BOARDING_SLOT_MINUTES: i64 = 24 * 60;

const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Transit tracker configuration.
#
# Every key may be overridden through the environment using the
# TRANSIT__ prefix, e.g. TRANSIT__BOARDING_SLOT_MINUTES=3.

# Directory holding store snapshots.
# data_dir = "/var/lib/transit-tracker"

# JSON route table; the built-in table is used when unset.
# route_table = "/etc/transit-tracker/routes.json"

# Minutes each vehicle ahead in a destination queue adds to the boarding ETA.
boarding_slot_minutes = 5

recent_trips_limit = 10
max_recent_trips = 100
event_capacity = 256
top_routes_limit = 5
restore_latest_snapshot = true
"#;

/// Runtime settings for the core and its frontends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Root for persisted snapshots.
    pub data_dir: PathBuf,
    /// Optional route table file overriding the built-in routes.
    #[serde(default)]
    pub route_table: Option<PathBuf>,
    /// Boarding slot per queue position, in minutes.
    pub boarding_slot_minutes: i64,
    /// Default number of trips returned by recent-trip queries.
    pub recent_trips_limit: usize,
    /// Upper bound applied to caller-supplied recent-trip limits.
    pub max_recent_trips: usize,
    /// Buffer size of the change-notification channel.
    pub event_capacity: usize,
    /// Default length of the top-routes ranking.
    pub top_routes_limit: usize,
    /// Whether frontends should resume from the newest snapshot on start.
    pub restore_latest_snapshot: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            route_table: None,
            boarding_slot_minutes: 5,
            recent_trips_limit: 10,
            max_recent_trips: 100,
            event_capacity: 256,
            top_routes_limit: 5,
            restore_latest_snapshot: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default file location and the environment.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load configuration from `path` (optional on disk) layered under the environment.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let defaults = AppConfig::default();

        let settings = Config::builder()
            .set_default("data_dir", defaults.data_dir.to_string_lossy().to_string())?
            .set_default("boarding_slot_minutes", defaults.boarding_slot_minutes)?
            .set_default("recent_trips_limit", defaults.recent_trips_limit as i64)?
            .set_default("max_recent_trips", defaults.max_recent_trips as i64)?
            .set_default("event_capacity", defaults.event_capacity as i64)?
            .set_default("top_routes_limit", defaults.top_routes_limit as i64)?
            .set_default("restore_latest_snapshot", defaults.restore_latest_snapshot)?
            .add_source(
                File::from(path.to_path_buf())
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("failed to read configuration {}", path.display()))?;

        let config: AppConfig = settings
            .try_deserialize()
            .context("failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(0..=MAX_BOARDING_SLOT_MINUTES).contains(&self.boarding_slot_minutes) {
            anyhow::bail!(
                "boarding_slot_minutes must be between 0 and {MAX_BOARDING_SLOT_MINUTES} (got {})",
                self.boarding_slot_minutes
            );
        }
        if self.event_capacity == 0 {
            anyhow::bail!("event_capacity must be at least 1");
        }
        if self.max_recent_trips == 0 {
            anyhow::bail!("max_recent_trips must be at least 1");
        }
        Ok(())
    }

    /// Directory where store snapshots are written.
    pub fn snapshot_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }
}

/// Default configuration file path under the user's config directory.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("config.toml")
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// Write the commented default configuration when no file exists yet.
pub fn ensure_default_config() -> Result<()> {
    write_default_config(default_config_path())
}

fn write_default_config(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory {}", parent.display()))?;
    }
    fs::write(path, DEFAULT_CONFIG_TEMPLATE)
        .with_context(|| format!("failed to write default config {}", path.display()))?;
    info!(path = %path.display(), "Wrote default configuration");
    Ok(())
}
