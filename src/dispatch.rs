//! Callback dispatcher: hands fetched highlights to user code.
//!
//! User code runs on its own task so that an error or a panic in the
//! handler is logged and dropped here; it never reaches the poll loop.
//! Invocations are not retried.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, Instrument};

use crate::highlight::Highlight;
use crate::state::PollerState;

/// User-supplied handler for new highlights.
///
/// Implemented for plain closures too:
/// `|items: &[Highlight], stats: &PollerState| -> anyhow::Result<()>`.
#[async_trait]
pub trait HighlightCallback: Send + Sync {
    async fn invoke(&self, items: &[Highlight], stats: &PollerState) -> Result<()>;
}

#[async_trait]
impl<F> HighlightCallback for F
where
    F: Fn(&[Highlight], &PollerState) -> Result<()> + Send + Sync,
{
    async fn invoke(&self, items: &[Highlight], stats: &PollerState) -> Result<()> {
        self(items, stats)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No callback registered, or nothing to deliver.
    Skipped,
    Delivered,
    Failed,
    Panicked,
}

#[derive(Clone, Default)]
pub struct CallbackDispatcher {
    callback: Option<Arc<dyn HighlightCallback>>,
}

impl CallbackDispatcher {
    pub fn new(callback: Option<Arc<dyn HighlightCallback>>) -> Self {
        Self { callback }
    }

    pub async fn dispatch(&self, items: Vec<Highlight>, stats: PollerState) -> DispatchOutcome {
        let Some(callback) = &self.callback else {
            return DispatchOutcome::Skipped;
        };
        if items.is_empty() {
            return DispatchOutcome::Skipped;
        }

        let callback = Arc::clone(callback);
        let count = items.len();
        let handle = tokio::spawn(
            async move { callback.invoke(&items, &stats).await }.in_current_span(),
        );

        match handle.await {
            Ok(Ok(())) => {
                debug!(items = count, "Highlights delivered to callback");
                DispatchOutcome::Delivered
            }
            Ok(Err(e)) => {
                error!(items = count, "Highlight callback failed: {:#}", e);
                DispatchOutcome::Failed
            }
            Err(join_err) if join_err.is_panic() => {
                error!(items = count, "Highlight callback panicked");
                DispatchOutcome::Panicked
            }
            Err(join_err) => {
                error!(items = count, "Highlight callback task aborted: {}", join_err);
                DispatchOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::highlight;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Recorder {
        seen: AtomicUsize,
        cadences: AtomicUsize,
    }

    #[async_trait]
    impl HighlightCallback for Recorder {
        async fn invoke(&self, items: &[Highlight], stats: &PollerState) -> Result<()> {
            self.seen.fetch_add(items.len(), Ordering::SeqCst);
            self.cadences.store(stats.total_cadences as usize, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_trait_object_receives_items_and_stats() {
        let recorder = Arc::new(Recorder {
            seen: AtomicUsize::new(0),
            cadences: AtomicUsize::new(0),
        });
        let dispatcher = CallbackDispatcher::new(Some(recorder.clone()));
        let stats = PollerState {
            total_cadences: 4,
            ..PollerState::default()
        };

        let outcome = dispatcher
            .dispatch(vec![highlight(1, 0), highlight(2, 1)], stats)
            .await;

        assert_eq!(outcome, DispatchOutcome::Delivered);
        assert_eq!(recorder.seen.load(Ordering::SeqCst), 2);
        assert_eq!(recorder.cadences.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_closure_callback() {
        let total = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&total);
        let callback = move |items: &[Highlight], _stats: &PollerState| -> Result<()> {
            sink.fetch_add(items.len(), Ordering::SeqCst);
            Ok(())
        };
        let dispatcher = CallbackDispatcher::new(Some(Arc::new(callback)));

        dispatcher.dispatch(vec![highlight(1, 0)], PollerState::default()).await;
        assert_eq!(total.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_error_is_contained() {
        let callback = |_: &[Highlight], _: &PollerState| -> Result<()> {
            anyhow::bail!("disk full")
        };
        let dispatcher = CallbackDispatcher::new(Some(Arc::new(callback)));

        let outcome = dispatcher.dispatch(vec![highlight(1, 0)], PollerState::default()).await;
        assert_eq!(outcome, DispatchOutcome::Failed);
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let callback = |_: &[Highlight], _: &PollerState| -> Result<()> {
            panic!("handler bug")
        };
        let dispatcher = CallbackDispatcher::new(Some(Arc::new(callback)));

        let outcome = dispatcher.dispatch(vec![highlight(1, 0)], PollerState::default()).await;
        assert_eq!(outcome, DispatchOutcome::Panicked);
    }

    #[tokio::test]
    async fn test_nothing_to_deliver() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let callback = move |_: &[Highlight], _: &PollerState| -> Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };
        let dispatcher = CallbackDispatcher::new(Some(Arc::new(callback)));
        assert_eq!(
            dispatcher.dispatch(vec![], PollerState::default()).await,
            DispatchOutcome::Skipped
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let empty = CallbackDispatcher::default();
        assert_eq!(
            empty.dispatch(vec![highlight(1, 0)], PollerState::default()).await,
            DispatchOutcome::Skipped
        );
    }
}
