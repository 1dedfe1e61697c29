use super::refresh_cache;
use crate::db::Database;
use crate::error::AppError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Cloneable trigger for on-demand refreshes.
#[derive(Clone)]
pub struct RefreshHandle {
    trigger: Arc<Notify>,
    running: Arc<AtomicBool>,
}

impl RefreshHandle {
    /// Ask the scheduler to refresh as soon as it is idle.
    pub fn request(&self) {
        self.trigger.notify_one();
    }

    /// Whether a refresh is in flight.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

/// Owned background task that rebuilds the statistics cache.
pub struct RefreshScheduler {
    cancel: CancellationToken,
    handle: RefreshHandle,
    task: JoinHandle<()>,
}

impl RefreshScheduler {
    /// Spawn the refresh loop on the current runtime.
    ///
    /// With `run_immediately` the first refresh starts right away, otherwise
    /// after one full `period`.
    pub fn start(db: Database, period: Duration, run_immediately: bool) -> Self {
        let cancel = CancellationToken::new();
        let handle = RefreshHandle {
            trigger: Arc::new(Notify::new()),
            running: Arc::new(AtomicBool::new(false)),
        };

        let task = tokio::spawn(run_loop(
            db,
            period,
            run_immediately,
            handle.clone(),
            cancel.clone(),
        ));

        Self {
            cancel,
            handle,
            task,
        }
    }

    /// Trigger handle to share with request handlers.
    pub fn handle(&self) -> RefreshHandle {
        self.handle.clone()
    }

    /// Stop the loop and wait for it to exit.
    ///
    /// A refresh in flight observes the cancellation between users and is
    /// abandoned without swapping.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Cache refresh task ended abnormally");
        }
    }
}

async fn run_loop(
    db: Database,
    period: Duration,
    run_immediately: bool,
    handle: RefreshHandle,
    cancel: CancellationToken,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    if !run_immediately {
        ticker.tick().await;
    }

    info!(interval_secs = period.as_secs(), "Cache refresh task started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Cache refresh task shutting down");
                break;
            }
            _ = ticker.tick() => {
                debug!("Running scheduled cache refresh");
            }
            _ = handle.trigger.notified() => {
                debug!("Running requested cache refresh");
            }
        }

        if cancel.is_cancelled() {
            break;
        }

        run_once(&db, &handle, &cancel).await;
    }
}

async fn run_once(db: &Database, handle: &RefreshHandle, cancel: &CancellationToken) {
    if handle.running.swap(true, Ordering::AcqRel) {
        info!("Cache refresh already in progress, skipping");
        return;
    }

    let db = db.clone();
    let token = cancel.clone();
    let result =
        tokio::task::spawn_blocking(move || refresh_cache(&db, chrono::Utc::now(), &token)).await;

    match result {
        Ok(Ok(summary)) => info!(
            users = summary.users,
            documents = summary.documents,
            "Cache refresh complete"
        ),
        Ok(Err(AppError::Cancelled)) => info!("Cache refresh abandoned on shutdown"),
        Ok(Err(e)) => warn!(error = %e, "Cache refresh failed, keeping previous cache"),
        Err(e) => warn!(error = %e, "Cache refresh task panicked"),
    }

    handle.running.store(false, Ordering::Release);
}
