//! Checkpoint store: durable JSON record of poll progress.
//!
//! Writes go through a temp file + fsync + rename, so a crash mid-save
//! leaves either the previous checkpoint or the new one, never a torn
//! file. Loading fails soft: anything unreadable yields fresh state.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::CheckpointError;
use crate::state::PollerState;

const CHECKPOINT_VERSION: u32 = 1;

/// On-disk layout. Also accepts the legacy key names
/// (`last_poll_time`, `total_polls`, ...).
#[derive(Debug, Serialize, Deserialize)]
struct CheckpointRecord {
    #[serde(default = "current_version")]
    version: u32,
    #[serde(default, alias = "last_poll_time", deserialize_with = "deserialize_marker")]
    last_marker: Option<DateTime<Utc>>,
    #[serde(default, alias = "total_polls")]
    total_cadences: u64,
    #[serde(default, alias = "total_highlights_found")]
    total_items: u64,
    #[serde(default, alias = "error_count")]
    total_errors: u64,
    #[serde(default)]
    saved_at: Option<DateTime<Utc>>,
}

fn current_version() -> u32 {
    CHECKPOINT_VERSION
}

/// RFC 3339, or a naive ISO timestamp. Legacy files wrote naive local
/// time, so those are read in the host's zone.
fn deserialize_marker<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    let Some(raw) = raw else {
        return Ok(None);
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(dt.with_timezone(&Utc)));
    }
    let naive = NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map_err(serde::de::Error::custom)?;
    Ok(Some(naive_local_to_utc(naive)))
}

/// Skipped local times (DST gaps) fall back to reading the value as UTC.
fn naive_local_to_utc(naive: NaiveDateTime) -> DateTime<Utc> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or_else(|| naive.and_utc())
}

impl From<&PollerState> for CheckpointRecord {
    fn from(state: &PollerState) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            last_marker: state.last_marker,
            total_cadences: state.total_cadences,
            total_items: state.total_items,
            total_errors: state.total_errors,
            saved_at: Some(Utc::now()),
        }
    }
}

impl From<CheckpointRecord> for PollerState {
    fn from(record: CheckpointRecord) -> Self {
        PollerState {
            last_marker: record.last_marker,
            total_cadences: record.total_cadences,
            total_items: record.total_items,
            total_errors: record.total_errors,
            ..PollerState::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load state, falling back to a fresh one on any problem.
    pub fn load(&self) -> PollerState {
        match self.try_load() {
            Ok(Some(state)) => {
                info!(
                    path = %self.path.display(),
                    marker = ?state.last_marker,
                    total_cadences = state.total_cadences,
                    "Checkpoint loaded"
                );
                state
            }
            Ok(None) => {
                warn!(path = %self.path.display(), "No checkpoint found — starting fresh");
                PollerState::default()
            }
            Err(e) => {
                warn!(path = %self.path.display(), "Checkpoint unusable — starting fresh: {}", e);
                PollerState::default()
            }
        }
    }

    /// Strict variant of [`load`](Self::load): `Ok(None)` when absent.
    pub fn try_load(&self) -> Result<Option<PollerState>, CheckpointError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CheckpointError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let record: CheckpointRecord =
            serde_json::from_str(&raw).map_err(|source| CheckpointError::Parse {
                path: self.path.clone(),
                source,
            })?;
        Ok(Some(record.into()))
    }

    pub fn save(&self, state: &PollerState) -> Result<(), CheckpointError> {
        let body = serde_json::to_vec_pretty(&CheckpointRecord::from(state))?;
        atomic_write(&self.path, &body).map_err(|source| CheckpointError::Io {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path.display(), "Checkpoint saved");
        Ok(())
    }

    /// Delete the checkpoint. Returns whether a file was removed.
    pub fn reset(&self) -> Result<bool, CheckpointError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "Checkpoint reset");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(CheckpointError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

/// Write `contents` to `path` using a sibling temp file and an atomic rename.
///
///   1. write `<name>.tmp`
///   2. fsync it
///   3. rename over `<name>` (atomic on POSIX)
///   4. fsync the directory so the rename itself survives power loss
pub(crate) fn atomic_write(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = temp_path_for(path);
    {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }

    fs::rename(&tmp_path, path)?;
    sync_parent_dir(path)
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::File::open(parent)?.sync_all()
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name: OsString = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("checkpoint"));
    name.push(".tmp");
    path.with_file_name(name)
}
