//! JSON spool callback: drops each delivered batch into a directory.
//!
//! One file per cadence: `highlights_<YYYYmmdd_HHMMSS>_<cadence>.json`,
//! written atomically so downstream readers never see a partial batch.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::checkpoint::atomic_write;
use crate::dispatch::HighlightCallback;
use crate::highlight::Highlight;
use crate::state::PollerState;

#[derive(Serialize)]
struct SpoolFile<'a> {
    written_at: chrono::DateTime<Utc>,
    cadence: u64,
    count: usize,
    highlights: &'a [Highlight],
}

pub struct JsonSpool {
    dir: PathBuf,
}

impl JsonSpool {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl HighlightCallback for JsonSpool {
    async fn invoke(&self, items: &[Highlight], stats: &PollerState) -> Result<()> {
        let now = Utc::now();
        let name = format!(
            "highlights_{}_{}.json",
            now.format("%Y%m%d_%H%M%S"),
            stats.total_cadences
        );
        let path = self.dir.join(name);

        let body = serde_json::to_vec_pretty(&SpoolFile {
            written_at: now,
            cadence: stats.total_cadences,
            count: items.len(),
            highlights: items,
        })?;
        atomic_write(&path, &body)
            .with_context(|| format!("Failed to write spool file {}", path.display()))?;

        info!(path = %path.display(), items = items.len(), "Highlights spooled");
        Ok(())
    }
}
