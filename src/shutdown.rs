//! Graceful shutdown: one stop, however many triggers.
//!
//! Signals and explicit API calls both land in [`ShutdownCoordinator::shutdown`].
//! The first caller runs `Poller::stop`; everyone else waits on the same
//! completion, so nobody returns before the final checkpoint is written.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{error, info};

use crate::poller::Poller;

#[derive(Clone)]
pub struct ShutdownCoordinator {
    poller: Poller,
    done: Arc<OnceCell<()>>,
    stops: Arc<AtomicU32>,
}

impl ShutdownCoordinator {
    pub fn new(poller: Poller) -> Self {
        Self {
            poller,
            done: Arc::new(OnceCell::new()),
            stops: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Stop the poller once. Concurrent and repeated calls wait for the
    /// same stop to finish.
    pub async fn shutdown(&self, reason: &str) {
        self.done
            .get_or_init(|| async {
                info!(reason = reason, "Shutdown requested");
                self.stops.fetch_add(1, Ordering::SeqCst);
                self.poller.stop().await;
                info!("Shutdown complete");
            })
            .await;
    }

    pub fn is_complete(&self) -> bool {
        self.done.initialized()
    }

    /// Number of times the poller was actually stopped through here.
    pub fn stop_count(&self) -> u32 {
        self.stops.load(Ordering::SeqCst)
    }

    /// Block until SIGINT/SIGTERM, then shut down.
    pub async fn listen(&self) -> std::io::Result<()> {
        self.listen_on(wait_for_signal()).await
    }

    /// Shut down when `signal` resolves. If listening itself fails the
    /// poller is still stopped before the error is returned.
    pub async fn listen_on<F>(&self, signal: F) -> std::io::Result<()>
    where
        F: Future<Output = std::io::Result<&'static str>>,
    {
        match signal.await {
            Ok(name) => {
                self.shutdown(name).await;
                Ok(())
            }
            Err(e) => {
                error!("Signal listener failed: {}", e);
                self.shutdown("signal listener failed").await;
                Err(e)
            }
        }
    }
}

/// Resolve with the name of the first termination signal received.
#[cfg(unix)]
pub async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.map(|_| "SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
pub async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}
