//! Highlight poller: durable background polling of Readwise highlights.
//!
//! A [`Poller`] runs fetch cadences on a fixed interval, retries
//! transient failures with exponential backoff, honors server rate
//! limits, checkpoints its progress to disk and hands each batch of new
//! highlights to a user callback. Shutdown is cooperative: an in-flight
//! cadence finishes and the final checkpoint is written before `stop`
//! returns.
//!
//! Guarantees:
//! - The progress marker never moves backwards
//! - One failed cadence bumps the error counter exactly once
//! - Cadences never overlap, scheduled or manual
//! - Callback errors and panics never reach the loop

pub mod checkpoint;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod highlight;
pub mod poller;
pub mod retry;
pub mod shutdown;
pub mod sink;
pub mod source;
pub mod state;

#[cfg(test)]
mod test_support;

pub use checkpoint::CheckpointStore;
pub use config::PollingConfig;
pub use dispatch::{CallbackDispatcher, DispatchOutcome, HighlightCallback};
pub use error::{CheckpointError, ConfigError, FetchError, PollerError};
pub use highlight::{Highlight, Tag};
pub use poller::Poller;
pub use retry::{RetryController, RetryPolicy};
pub use shutdown::ShutdownCoordinator;
pub use sink::JsonSpool;
pub use source::readwise::ReadwiseSource;
pub use source::HighlightSource;
pub use state::{PollFailure, PollResult, PollerState, PollerStatus};
