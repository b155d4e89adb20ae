//! Poll loop: the cadence scheduler.
//!
//! One background task per poller runs cadences on a fixed interval,
//! measured from cadence start. Each cadence: read the marker, fetch
//! with retries, record + persist the outcome, then hand highlights to
//! the callback. The inter-cadence sleep is the only point where
//! cancellation is observed.
//!
//! Scheduled cadences and `poll_once` share `cadence_lock`, so at most
//! one cadence mutates state at a time; a manual poll issued mid-cadence
//! waits for the in-flight one to finish.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::checkpoint::CheckpointStore;
use crate::config::PollingConfig;
use crate::dispatch::{CallbackDispatcher, HighlightCallback};
use crate::error::PollerError;
use crate::retry::{RetryController, RetryPolicy};
use crate::source::HighlightSource;
use crate::state::{PollResult, PollerState, PollerStatus};

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner {
    config: PollingConfig,
    source: Arc<dyn HighlightSource>,
    dispatcher: CallbackDispatcher,
    retry: RetryController,
    checkpoint: Option<CheckpointStore>,
    state: Mutex<PollerState>,
    cadence_lock: tokio::sync::Mutex<()>,
    worker: tokio::sync::Mutex<Option<Worker>>,
    root_cancel: CancellationToken,
}

/// Handle to a poller. Cheap to clone; all clones drive the same loop.
#[derive(Clone)]
pub struct Poller {
    inner: Arc<Inner>,
}

impl Poller {
    /// Build a poller. State is loaded from the checkpoint when
    /// persistence is enabled, otherwise it starts fresh.
    ///
    /// Cancelling `cancel` ends every worker this poller ever starts.
    pub fn new(
        config: PollingConfig,
        source: Arc<dyn HighlightSource>,
        callback: Option<Arc<dyn HighlightCallback>>,
        cancel: CancellationToken,
    ) -> Result<Self, PollerError> {
        config.validate()?;

        let checkpoint = config
            .enable_persistence
            .then(|| CheckpointStore::new(config.state_file.clone()));
        let mut state = checkpoint
            .as_ref()
            .map(CheckpointStore::load)
            .unwrap_or_default();
        state.status = PollerStatus::Idle;

        Ok(Self {
            inner: Arc::new(Inner {
                retry: RetryController::new(RetryPolicy::from_config(&config)),
                config,
                source,
                dispatcher: CallbackDispatcher::new(callback),
                checkpoint,
                state: Mutex::new(state),
                cadence_lock: tokio::sync::Mutex::new(()),
                worker: tokio::sync::Mutex::new(None),
                root_cancel: cancel,
            }),
        })
    }

    /// Start the background loop. No-op if it is already running.
    pub async fn start(&self) -> Result<(), PollerError> {
        let mut worker = self.inner.worker.lock().await;

        match self.inner.status() {
            PollerStatus::Running => {
                warn!("Poller is already running");
                return Ok(());
            }
            PollerStatus::ShuttingDown => return Err(PollerError::ShuttingDown),
            _ => {}
        }

        let cancel = self.inner.root_cancel.child_token();
        self.inner.set_status(PollerStatus::Running);

        let inner = Arc::clone(&self.inner);
        let token = cancel.clone();
        let handle = tokio::spawn(async move { inner.run_loop(token).await });
        *worker = Some(Worker { cancel, handle });

        info!(
            source = self.inner.source.name(),
            interval_secs = self.inner.config.interval_secs,
            "Highlight poller started"
        );
        Ok(())
    }

    /// Stop the loop, let an in-flight cadence finish, write a final
    /// checkpoint. Also valid on a poller that was never started. Safe
    /// to call repeatedly and concurrently; every caller returns only
    /// after the final save.
    pub async fn stop(&self) {
        let mut worker = self.inner.worker.lock().await;

        let final_status = match worker.take() {
            Some(Worker { cancel, handle }) => {
                info!("Stopping highlight poller...");
                self.inner.set_status(PollerStatus::ShuttingDown);
                cancel.cancel();

                match handle.await {
                    Ok(()) => PollerStatus::Stopped,
                    Err(e) => {
                        error!("Poll loop task failed: {}", e);
                        PollerStatus::Errored
                    }
                }
            }
            None if self.inner.status() == PollerStatus::Errored => PollerStatus::Errored,
            None => PollerStatus::Stopped,
        };

        {
            let _cadence = self.inner.cadence_lock.lock().await;
            self.inner.persist(&self.inner.snapshot());
        }
        self.inner.set_status(final_status);
        info!(status = ?final_status, "Highlight poller stopped");
    }

    /// Run exactly one cadence now. Waits for any in-flight cadence.
    pub async fn poll_once(&self) -> PollResult {
        self.inner.run_cadence().await
    }

    pub fn get_status(&self) -> PollerState {
        self.inner.snapshot()
    }

    /// Forget all progress: delete the checkpoint and zero the counters.
    pub async fn reset(&self) -> Result<(), PollerError> {
        let worker = self.inner.worker.lock().await;
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            return Err(PollerError::AlreadyRunning);
        }

        let _cadence = self.inner.cadence_lock.lock().await;
        if let Some(store) = &self.inner.checkpoint {
            store.reset()?;
        }
        let mut state = self.inner.lock_state();
        let status = state.status;
        *state = PollerState {
            status,
            ..PollerState::default()
        };
        info!("Poller state reset");
        Ok(())
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, PollerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> PollerState {
        self.lock_state().clone()
    }

    fn status(&self) -> PollerStatus {
        self.lock_state().status
    }

    fn set_status(&self, status: PollerStatus) {
        self.lock_state().status = status;
    }

    /// Save failures are logged; in-memory state stays authoritative.
    fn persist(&self, state: &PollerState) {
        if let Some(store) = &self.checkpoint {
            if let Err(e) = store.save(state) {
                error!("Failed to save checkpoint: {}", e);
            }
        }
    }

    async fn run_loop(self: Arc<Self>, cancel: CancellationToken) {
        let interval = self.config.interval();

        while !cancel.is_cancelled() {
            let started = Instant::now();
            self.run_cadence().await;

            let wait = interval.saturating_sub(started.elapsed());
            if wait.is_zero() {
                debug!("Cadence overran the interval — starting the next one now");
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        // Cancelled through the root token rather than `stop()`.
        if self.status() == PollerStatus::Running {
            let _cadence = self.cadence_lock.lock().await;
            self.persist(&self.snapshot());
            self.set_status(PollerStatus::Stopped);
        }
        info!("Poll loop exited");
    }

    async fn run_cadence(&self) -> PollResult {
        let _cadence = self.cadence_lock.lock().await;
        let span = info_span!("cadence", cadence_id = %Uuid::new_v4());
        self.execute_cadence().instrument(span).await
    }

    /// Body of a cadence. Caller holds `cadence_lock`.
    async fn execute_cadence(&self) -> PollResult {
        let started = Instant::now();
        let attempted_at = Utc::now();
        let since = self
            .lock_state()
            .last_marker
            .unwrap_or_else(|| attempted_at - self.config.lookback());
        let cap = self.config.max_highlights_per_poll;

        debug!(since = %since, "Starting cadence");

        // One past the cap tells us whether anything was left behind.
        let outcome = self
            .retry
            .fetch(self.source.as_ref(), since, cap.saturating_add(1))
            .await;

        let (mut result, items, snapshot) = match outcome.result {
            Ok(mut items) => {
                // Oldest first; untimestamped highlights last.
                items.sort_by_key(|h| (h.progress_at().is_none(), h.progress_at()));

                let overflow = items.get(cap).map(|h| h.progress_at());
                let marker = match overflow {
                    Some(next) => {
                        items.truncate(cap);
                        warn!(cap = cap, "More highlights than the per-cadence cap — deferring the rest");
                        let last = items.iter().rev().find_map(|h| h.progress_at());
                        resume_after_cut(since, last, next, attempted_at)
                    }
                    None => attempted_at,
                };

                let snapshot = {
                    let mut state = self.lock_state();
                    state.record_success(attempted_at, items.len(), marker);
                    state.clone()
                };
                self.persist(&snapshot);

                info!(
                    items = items.len(),
                    attempts = outcome.attempts,
                    "Cadence complete"
                );

                let result = PollResult {
                    success: true,
                    items_found: items.len(),
                    error: None,
                    attempted_at,
                    attempts: outcome.attempts,
                    duration_ms: 0,
                };
                (result, items, snapshot)
            }
            Err(err) => {
                let snapshot = {
                    let mut state = self.lock_state();
                    state.record_failure(attempted_at, &err);
                    state.clone()
                };
                self.persist(&snapshot);

                error!(
                    kind = err.kind(),
                    attempts = outcome.attempts,
                    total_errors = snapshot.total_errors,
                    "Cadence failed: {}",
                    err
                );

                let result = PollResult {
                    success: false,
                    items_found: 0,
                    error: Some((&err).into()),
                    attempted_at,
                    attempts: outcome.attempts,
                    duration_ms: 0,
                };
                (result, Vec::new(), snapshot)
            }
        };

        self.dispatcher.dispatch(items, snapshot).await;

        result.duration_ms = started.elapsed().as_millis() as u64;
        result
    }
}

/// Marker for a batch that was cut at the cap.
///
/// `last` is the newest delivered timestamp, `next` the first one left
/// behind. On a tie the next cadence resumes just before `last`, so the
/// rest of the tie group comes back along with the delivered part of it.
fn resume_after_cut(
    since: DateTime<Utc>,
    last: Option<DateTime<Utc>>,
    next: Option<DateTime<Utc>>,
    attempted_at: DateTime<Utc>,
) -> DateTime<Utc> {
    let Some(last) = last else {
        warn!("No delivered highlight carries a timestamp — resuming from the cadence start");
        return attempted_at;
    };
    match next {
        Some(next) if next <= last => {
            let before = last - ChronoDuration::microseconds(1);
            if before > since {
                before
            } else {
                // The whole batch is one tie group we already resumed into.
                warn!(at = %last, "More highlights share one timestamp than the cap allows — skipping past them");
                last
            }
        }
        _ => last,
    }
}
