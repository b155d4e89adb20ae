//! Poller configuration: defaults, YAML file, env overrides.
//!
//! The config is immutable once a poller is built. Credentials are not
//! part of it; the Readwise key comes from `READWISE_API_KEY`.

use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

const DATA_DIR_NAME: &str = ".readwise-poller";
const STATE_FILE_NAME: &str = "poller_state.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Time between cadence starts.
    pub interval_secs: u64,
    /// Total fetch attempts per cadence, first try included.
    pub max_retries: u32,
    pub retry_backoff_factor: f64,
    pub retry_base_delay_ms: u64,
    /// Upper bound on any single backoff sleep.
    pub retry_max_delay_secs: u64,
    /// Query range used only when no checkpoint exists.
    pub lookback_hours: u32,
    pub enable_persistence: bool,
    pub state_file: PathBuf,
    pub max_highlights_per_poll: usize,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            max_retries: 3,
            retry_backoff_factor: 2.0,
            retry_base_delay_ms: 1000,
            retry_max_delay_secs: 300,
            lookback_hours: 1,
            enable_persistence: true,
            state_file: default_state_file(),
            max_highlights_per_poll: 1000,
        }
    }
}

/// `~/.readwise-poller/poller_state.json`, or the working directory
/// when no home directory can be determined.
pub fn default_state_file() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join(DATA_DIR_NAME).join(STATE_FILE_NAME),
        None => PathBuf::from(STATE_FILE_NAME),
    }
}

impl PollingConfig {
    /// Load from a YAML file. Missing fields take their defaults.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `POLLER_*` environment overrides on top of `self`.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(v) = lookup("POLLER_INTERVAL_SECS") {
            self.interval_secs = v.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("POLLER_INTERVAL_SECS is not an integer: {v:?}"))
            })?;
        }
        if let Some(v) = lookup("POLLER_MAX_RETRIES") {
            self.max_retries = v.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("POLLER_MAX_RETRIES is not an integer: {v:?}"))
            })?;
        }
        if let Some(v) = lookup("POLLER_STATE_FILE") {
            self.state_file = PathBuf::from(v);
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_secs == 0 {
            return Err(ConfigError::Invalid("interval_secs must be > 0".into()));
        }
        if self.max_retries == 0 {
            return Err(ConfigError::Invalid("max_retries must be at least 1".into()));
        }
        if !self.retry_backoff_factor.is_finite() || self.retry_backoff_factor < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "retry_backoff_factor must be a finite number >= 1.0, got {}",
                self.retry_backoff_factor
            )));
        }
        if self.retry_max_delay() < self.retry_base_delay() {
            return Err(ConfigError::Invalid(
                "retry_max_delay_secs must not be below retry_base_delay_ms".into(),
            ));
        }
        if self.max_highlights_per_poll == 0 {
            return Err(ConfigError::Invalid("max_highlights_per_poll must be > 0".into()));
        }
        if self.enable_persistence && self.state_file.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "state_file is required when persistence is enabled".into(),
            ));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_secs(self.retry_max_delay_secs)
    }

    pub fn lookback(&self) -> ChronoDuration {
        ChronoDuration::hours(i64::from(self.lookback_hours))
    }
}
