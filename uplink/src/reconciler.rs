use crate::history::HistoryCache;
use crate::metrics_defs::STALE_RECORDS_FAILED;
use crate::store::HistoryStore;
use chrono::Utc;
use shared::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Periodically fails processing records that outlived their submission.
///
/// A record can be orphaned in `processing` when the process crashes or is
/// killed between dispatch and settlement. Each sweep fails every record
/// older than the staleness window; records younger than the window are left
/// alone, their submissions may still settle.
pub struct Reconciler {
    store: Arc<dyn HistoryStore>,
    cache: Option<Arc<HistoryCache>>,
    interval: Duration,
    stale_after: Duration,
}

/// Handle to a running reconciler. Dropping it without `stop` leaves the
/// sweep loop running for the life of the runtime.
pub struct ReconcilerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReconcilerHandle {
    /// Ask the loop to exit and wait for it.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn HistoryStore>,
        cache: Option<Arc<HistoryCache>>,
        interval: Duration,
        stale_after: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            interval,
            stale_after,
        }
    }

    /// Run one sweep, returning how many records were failed.
    pub async fn sweep(&self) -> u64 {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.stale_after).unwrap_or(chrono::Duration::zero());

        let failed = match self.store.fail_stale(cutoff).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(error = %e, "stale-record sweep failed");
                return 0;
            }
        };

        if failed > 0 {
            tracing::info!(count = failed, "failed stale processing records");
            counter!(STALE_RECORDS_FAILED).increment(failed);
        }

        // The tick is the only pull path: refresh even on a quiet sweep so
        // rows written to the store out of band reach the view
        if let Some(cache) = &self.cache
            && let Err(e) = cache.refresh().await
        {
            tracing::warn!(error = %e, "history refresh after sweep failed");
        }
        failed
    }

    /// Start the sweep loop on the current runtime.
    pub fn spawn(self) -> ReconcilerHandle {
        let (shutdown, mut stopped) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so a fresh start does
            // not race submissions still settling
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep().await;
                    }
                    _ = stopped.changed() => {
                        tracing::debug!("reconciler stopping");
                        return;
                    }
                }
            }
        });
        ReconcilerHandle { shutdown, task }
    }
}
