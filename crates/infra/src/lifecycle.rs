//! Graceful shutdown coordination.
//!
//! One [`Lifecycle`] owns the global closing signal and tracks every task the
//! commander spawns (fan-out loop, delivery workers, handlers). Shutdown is:
//!
//! ```text
//! cancel closing token ─► subscriptions stop accepting ─► delivery channels close
//!                      ─► handlers finish their current envelope and exit
//!                      ─► tracker drained ─► broker released (by the caller)
//! ```

use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct Lifecycle {
    closing: CancellationToken,
    tracker: TaskTracker,
    closed: AtomicBool,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal observed by everything that must stop before the broker goes away.
    ///
    /// Requesting it repeatedly hands out clones of the same token; it is
    /// cancelled exactly once, by [`Lifecycle::shutdown`].
    pub fn before_closing(&self) -> CancellationToken {
        self.closing.clone()
    }

    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Cancel the closing signal and wait for every tracked task to finish.
    ///
    /// Returns `false` without waiting if shutdown had already begun.
    pub async fn shutdown(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }

        self.closing.cancel();
        self.tracker.close();
        debug!(tasks = self.tracker.len(), "waiting for tracked tasks");
        self.tracker.wait().await;

        true
    }
}

/// Resolve once the process is asked to terminate (SIGINT, or SIGTERM on unix).
pub async fn termination() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable, waiting for ctrl-c only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
