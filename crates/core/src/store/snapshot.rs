use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::{PassengerEvent, QueueEntry, Trip};

/// Directory name below the data root used for snapshots.
pub const SNAPSHOT_DIR: &str = "snapshots";

const SNAPSHOT_EXT: &str = "json";

/// A snapshot file found on disk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotEntry {
    /// File holding the snapshot.
    pub path: PathBuf,
    /// Label given when it was taken.
    pub label: String,
    /// When it was taken.
    pub saved_at: DateTime<Utc>,
    /// Trips it holds.
    pub trip_count: usize,
}

/// Full contents of a [`MemoryStore`](super::MemoryStore) at one instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    label: String,
    saved_at: DateTime<Utc>,
    #[serde(default)]
    pub(crate) trips: Vec<Trip>,
    #[serde(default)]
    pub(crate) events: Vec<PassengerEvent>,
    #[serde(default)]
    pub(crate) queue_entries: Vec<QueueEntry>,
}

impl StoreSnapshot {
    pub(crate) fn new(
        label: &str,
        trips: Vec<Trip>,
        events: Vec<PassengerEvent>,
        queue_entries: Vec<QueueEntry>,
    ) -> Self {
        let label = match label.trim() {
            "" => "snapshot".to_string(),
            trimmed => trimmed.to_string(),
        };
        Self {
            label,
            saved_at: Utc::now(),
            trips,
            events,
            queue_entries,
        }
    }

    /// Snapshot label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// When the snapshot was taken.
    pub fn saved_at(&self) -> DateTime<Utc> {
        self.saved_at
    }

    /// Captured trips.
    pub fn trips(&self) -> &[Trip] {
        &self.trips
    }

    /// Captured queue entries, departed ones included.
    pub fn queue_entries(&self) -> &[QueueEntry] {
        &self.queue_entries
    }

    fn entry_at(&self, path: PathBuf) -> SnapshotEntry {
        SnapshotEntry {
            path,
            label: self.label.clone(),
            saved_at: self.saved_at,
            trip_count: self.trips.len(),
        }
    }
}

/// Reads and writes store snapshots as JSON files in one directory.
#[derive(Debug, Clone)]
pub struct SnapshotManager {
    root: PathBuf,
}

impl SnapshotManager {
    /// Manager for snapshots kept in `root`; the directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory the manager writes into.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Readable snapshots, newest first. Files that fail to parse are skipped.
    pub fn entries(&self) -> Result<Vec<SnapshotEntry>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let listing = fs::read_dir(&self.root)
            .with_context(|| format!("failed to list snapshots in {}", self.root.display()))?;
        let mut entries = Vec::new();
        for dirent in listing {
            let path = dirent?.path();
            if !path.is_file() || path.extension().and_then(|ext| ext.to_str()) != Some(SNAPSHOT_EXT)
            {
                continue;
            }
            match read_snapshot(&path) {
                Ok(snapshot) => entries.push(snapshot.entry_at(path)),
                Err(err) => warn!(path = %path.display(), "Skipping unreadable snapshot: {err:#}"),
            }
        }

        entries.sort_by(|a, b| b.saved_at.cmp(&a.saved_at).then_with(|| b.path.cmp(&a.path)));
        Ok(entries)
    }

    /// Persist `snapshot`, replacing the file in one rename so readers never see partial JSON.
    pub fn create_snapshot(&self, snapshot: &StoreSnapshot) -> Result<SnapshotEntry> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("failed to create snapshot dir {}", self.root.display()))?;

        let stem = format!(
            "{}_{}",
            file_stem_for(&snapshot.label),
            snapshot.saved_at.format("%Y%m%d%H%M%S%3f")
        );
        let path = self.root.join(&stem).with_extension(SNAPSHOT_EXT);
        let staging = self.root.join(&stem).with_extension("partial");

        let body = serde_json::to_vec_pretty(snapshot).context("failed to encode snapshot")?;
        fs::write(&staging, body)
            .with_context(|| format!("failed to write {}", staging.display()))?;
        fs::rename(&staging, &path)
            .with_context(|| format!("failed to move snapshot into {}", path.display()))?;

        debug!(path = %path.display(), trips = snapshot.trips.len(), "Snapshot written");
        Ok(snapshot.entry_at(path))
    }

    /// Load the snapshot behind `entry`.
    pub fn load(&self, entry: &SnapshotEntry) -> Result<StoreSnapshot> {
        read_snapshot(&entry.path)
    }

    /// Newest snapshot, if any.
    pub fn latest(&self) -> Result<Option<SnapshotEntry>> {
        Ok(self.entries()?.into_iter().next())
    }
}

fn read_snapshot(path: &Path) -> Result<StoreSnapshot> {
    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("malformed snapshot {}", path.display()))
}

/// Keep only characters that are safe in a file name on every platform.
fn file_stem_for(label: &str) -> String {
    let stem: String = label
        .chars()
        .map(|ch| if ch.is_whitespace() { '-' } else { ch })
        .filter(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_'))
        .collect();
    if stem.trim_matches('-').is_empty() {
        "snapshot".to_string()
    } else {
        stem
    }
}
