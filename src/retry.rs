//! Retry controller: one fetch with bounded attempts and backoff.
//!
//! Transient errors wait `min(cap, base * factor^n)`; rate limits wait
//! at least as long as the server asked; fatal errors stop at once.
//! Exhausting the budget is a failed cadence, not a crash. Backoff
//! sleeps are not cancellable: a cadence that started retrying runs to
//! its last attempt even while the poller is stopping.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{error, warn};

use crate::config::PollingConfig;
use crate::error::FetchError;
use crate::highlight::Highlight;
use crate::source::HighlightSource;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &PollingConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            base_delay: config.retry_base_delay(),
            backoff_factor: config.retry_backoff_factor,
            max_delay: config.retry_max_delay(),
        }
    }

    /// Backoff after the `attempt`-th failure (0-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }

    /// How long to wait before retrying after `err`.
    pub fn delay_for(&self, attempt: u32, err: &FetchError) -> Duration {
        let backoff = self.backoff_delay(attempt);
        match err {
            FetchError::RateLimited { retry_after, .. } => backoff.max(*retry_after),
            _ => backoff,
        }
    }
}

/// Result of one retried fetch.
#[derive(Debug)]
pub struct FetchOutcome {
    pub result: Result<Vec<Highlight>, FetchError>,
    pub attempts: u32,
}

pub struct RetryController {
    policy: RetryPolicy,
}

impl RetryController {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Fetch highlights newer than `since`, retrying per policy.
    pub async fn fetch(
        &self,
        source: &dyn HighlightSource,
        since: DateTime<Utc>,
        limit: usize,
    ) -> FetchOutcome {
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let err = match source.fetch(since, limit).await {
                Ok(items) => {
                    return FetchOutcome {
                        result: Ok(items),
                        attempts,
                    }
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                error!(source = source.name(), attempt = attempts, "Fatal fetch error — not retrying: {}", err);
                return FetchOutcome {
                    result: Err(err),
                    attempts,
                };
            }

            if attempts >= self.policy.max_attempts {
                error!(
                    source = source.name(),
                    attempts = attempts,
                    "Fetch failed, retries exhausted: {}",
                    err
                );
                return FetchOutcome {
                    result: Err(err),
                    attempts,
                };
            }

            let delay = self.policy.delay_for(attempts - 1, &err);
            warn!(
                source = source.name(),
                attempt = attempts,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Fetch failed, retrying: {}",
                err
            );

            tokio::time::sleep(delay).await;
        }
    }
}
