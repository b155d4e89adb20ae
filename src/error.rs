//! Error taxonomy for the poller.
//!
//! Fetch errors decide retry behaviour; checkpoint and config errors
//! are reported but never tear down a running loop.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure raised by a fetch capability.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Network or server hiccup. Retried with backoff.
    #[error("transient fetch failure: {0}")]
    Transient(String),

    /// The server asked us to slow down.
    #[error("rate limited (retry after {}s): {message}", retry_after.as_secs())]
    RateLimited {
        retry_after: Duration,
        message: String,
    },

    /// Not retried within a cadence (bad credentials, malformed request).
    #[error("fatal fetch failure: {0}")]
    Fatal(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FetchError::Fatal(_))
    }

    /// Short machine-readable tag, used in `PollResult` and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Transient(_) => "transient",
            FetchError::RateLimited { .. } => "rate_limited",
            FetchError::Fatal(_) => "fatal",
        }
    }
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("checkpoint at {path} is unparseable: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize checkpoint: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum PollerError {
    #[error("poller is already running")]
    AlreadyRunning,

    #[error("poller is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_fatal_is_not_retryable() {
        assert!(FetchError::Transient("reset by peer".into()).is_retryable());
        assert!(FetchError::RateLimited {
            retry_after: Duration::from_secs(5),
            message: "slow down".into(),
        }
        .is_retryable());
        assert!(!FetchError::Fatal("401".into()).is_retryable());
    }

    #[test]
    fn test_rate_limited_display_includes_delay() {
        let err = FetchError::RateLimited {
            retry_after: Duration::from_secs(42),
            message: "429".into(),
        };
        assert_eq!(err.to_string(), "rate limited (retry after 42s): 429");
        assert_eq!(err.kind(), "rate_limited");
    }
}
