//! Sync scheduler - drives the synchronizer on a poll interval
//!
//! The [`SyncScheduler`] runs one synchronization cycle immediately, then one
//! every `poll_interval`. A [`SyncTrigger`] requests an extra cycle without
//! waiting for the timer, which is how "sync now" commands reach a running
//! scheduler.
//!
//! ## Flow
//!
//! ```text
//! interval tick ──┐
//!                 ├──→ ChangeSynchronizer::sync_until_cancelled ──→ summary / error log
//! SyncTrigger ────┘
//! ```
//!
//! Cancelling the token stops the loop: a pending change request is
//! abandoned and no further cycle starts.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use nodemirror_core::domain::MirrorError;

use crate::engine::{ChangeSynchronizer, SyncSummary};

/// Shortest accepted poll interval
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Handle that requests an immediate sync cycle
///
/// Requests made while a cycle runs are coalesced into a single follow-up
/// cycle.
#[derive(Clone)]
pub struct SyncTrigger {
    notify: Arc<Notify>,
}

impl SyncTrigger {
    pub fn request_sync(&self) {
        debug!("Immediate sync requested");
        self.notify.notify_one();
    }
}

/// Periodic driver for a [`ChangeSynchronizer`]
pub struct SyncScheduler {
    synchronizer: Arc<ChangeSynchronizer>,
    poll_interval: Duration,
    notify: Arc<Notify>,
    cancel: CancellationToken,
}

impl SyncScheduler {
    /// Creates a scheduler; nothing runs until [`run`](Self::run) is awaited
    ///
    /// # Arguments
    /// * `synchronizer` - Executes each cycle
    /// * `poll_interval` - Time between cycle starts
    /// * `cancel` - Stops the loop when cancelled
    pub fn new(
        synchronizer: Arc<ChangeSynchronizer>,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            synchronizer,
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
            notify: Arc::new(Notify::new()),
            cancel,
        }
    }

    /// A cloneable handle for requesting immediate cycles
    pub fn trigger(&self) -> SyncTrigger {
        SyncTrigger {
            notify: self.notify.clone(),
        }
    }

    /// Requests an immediate cycle
    pub fn request_sync(&self) {
        self.trigger().request_sync();
    }

    /// Runs cycles until the token is cancelled
    ///
    /// Errors of a cycle are logged and the loop keeps going: an expired
    /// authorization or an unreachable remote may recover by the next tick.
    /// Returns the number of cycles that completed successfully.
    pub async fn run(&self) -> u32 {
        info!(
            poll_ms = self.poll_interval.as_millis() as u64,
            "Sync scheduler starting"
        );

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut completed = 0;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = self.notify.notified() => {
                    debug!("Running requested sync cycle");
                    interval.reset();
                }
                _ = interval.tick() => {}
            }

            match self.synchronizer.sync_until_cancelled(&self.cancel).await {
                Ok(summary) => {
                    completed += 1;
                    log_summary(&summary);
                }
                Err(MirrorError::Cancelled) => break,
                Err(err) if err.is_auth() => {
                    error!(error = %err, "Sync cycle needs authorization");
                }
                Err(err) => {
                    warn!(error = %err, transient = err.is_transient(), "Sync cycle failed");
                }
            }
        }

        info!(completed, "Sync scheduler stopped");
        completed
    }
}

fn log_summary(summary: &SyncSummary) {
    info!(
        pages = summary.pages,
        applied = summary.nodes_applied,
        purged = summary.nodes_purged,
        resets = summary.resets,
        "Sync cycle completed"
    );
}
