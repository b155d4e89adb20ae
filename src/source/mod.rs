//! Fetch capability: where new highlights come from.
//!
//! The poller only sees this trait. Implementations classify their
//! failures into [`FetchError`] variants; the retry controller decides
//! what to do with each class.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::FetchError;
use crate::highlight::Highlight;

pub mod readwise;

#[async_trait]
pub trait HighlightSource: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Return up to `limit` highlights strictly newer than `since`,
    /// oldest first.
    async fn fetch(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<Highlight>, FetchError>;
}
