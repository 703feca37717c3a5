use crate::metrics_defs::{SYNC_CYCLE_DURATION, SYNC_KEYS_PUSHED, SYNC_PROJECT_FAILURES};
use crate::shared_cache::{SharedCache, SharedCacheError};
use crate::store::{RouteStore, StoreError};
use shared::metrics::Metrics;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("refresh failed for projects: {0:?}")]
    ProjectsFailed(Vec<String>),

    #[error("sync worker is gone")]
    WorkerGone,
}

#[derive(Error, Debug)]
enum RefreshError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Shared(#[from] SharedCacheError),
}

#[derive(Debug)]
pub enum Command {
    // Run a refresh cycle outside the normal interval. The worker sends
    // the cycle outcome when the attempt finishes.
    Refresh(oneshot::Sender<Result<(), SyncError>>),
    // Stop the worker after the in-flight cycle, if any.
    Shutdown,
}

/// Owner's handle to a running sync worker.
pub struct SyncHandle {
    tx: mpsc::Sender<Command>,
    handle: tokio::task::JoinHandle<()>,
}

impl SyncHandle {
    /// Run a cycle now and wait for its outcome.
    pub async fn refresh(&self) -> Result<(), SyncError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Command::Refresh(tx))
            .await
            .map_err(|_| SyncError::WorkerGone)?;
        rx.await.map_err(|_| SyncError::WorkerGone)?
    }

    /// Stop the worker and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.tx.send(Command::Shutdown).await;
        let _ = self.handle.await;
    }
}

/// Periodically copies every project's current key set from the
/// authoritative store into the shared cache tier, so router instances
/// rarely have to consult the store directly.
///
/// Each cycle is self-contained: one project's failure is counted,
/// logged and skipped while the remaining projects still refresh.
/// Cycles run strictly one at a time: the worker loop is serial and a
/// tick that fires mid-cycle is skipped, never queued, so a slow store
/// cannot stack concurrent load. The worker only ever overwrites: the
/// shared tier lags the store by at most one interval plus one cycle's
/// processing time, and key removal stays an explicit
/// [`Resolver::invalidate`](crate::Resolver::invalidate) action.
pub struct SyncTask {
    store: Arc<dyn RouteStore>,
    shared: Arc<dyn SharedCache>,
    batch_size: u32,
    metrics: Metrics,
}

impl SyncTask {
    pub fn new(
        store: Arc<dyn RouteStore>,
        shared: Arc<dyn SharedCache>,
        batch_size: u32,
        metrics: Metrics,
    ) -> Self {
        SyncTask {
            store,
            shared,
            batch_size,
            metrics,
        }
    }

    /// Spawn the worker loop. The first cycle runs immediately; later
    /// cycles follow `interval`.
    pub fn start(self, interval: Duration) -> SyncHandle {
        let (tx, rx) = mpsc::channel(16);
        let handle = tokio::spawn(self.run(interval, rx));
        SyncHandle { tx, handle }
    }

    async fn run(self, interval: Duration, mut rx: mpsc::Receiver<Command>) {
        let mut ticker = tokio::time::interval(interval);
        // A tick that lands while a cycle is still running is dropped
        // rather than queued; cycles must not overlap.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.run_cycle().await {
                        tracing::warn!(error = %err, "scheduled refresh cycle incomplete");
                    }
                }
                cmd = rx.recv() => match cmd {
                    Some(Command::Refresh(done)) => {
                        let _ = done.send(self.run_cycle().await);
                    }
                    Some(Command::Shutdown) | None => break,
                },
            }
        }
        tracing::debug!("sync worker stopped");
    }

    /// One full pass over every project. Failures are collected, never
    /// propagated mid-cycle.
    async fn run_cycle(&self) -> Result<(), SyncError> {
        let started = Instant::now();
        let mut failed = Vec::new();

        for project in self.store.projects() {
            if let Err(err) = self.refresh_project(&project).await {
                tracing::warn!(project = %project, error = %err, "project refresh failed");
                self.metrics
                    .incr(SYNC_PROJECT_FAILURES.name, &[("project", &project)]);
                failed.push(project);
            }
        }

        self.metrics
            .timing(SYNC_CYCLE_DURATION.name, started.elapsed(), &[]);

        if failed.is_empty() {
            Ok(())
        } else {
            Err(SyncError::ProjectsFailed(failed))
        }
    }

    /// Page through the project's keys and overwrite them into the
    /// shared tier, one pipelined batch per page.
    async fn refresh_project(&self, project: &str) -> Result<(), RefreshError> {
        let mut after: Option<String> = None;
        let mut pushed = 0usize;

        loop {
            let page = self
                .store
                .project_keys(project, after.as_deref(), self.batch_size)
                .await?;
            if page.keys.is_empty() {
                break;
            }

            self.shared.set_batch(&page.keys, project).await?;
            pushed += page.keys.len();

            match page.next {
                Some(cursor) => after = Some(cursor),
                None => break,
            }
        }

        self.metrics
            .count(SYNC_KEYS_PUSHED.name, pushed as i64, &[("project", project)]);
        tracing::debug!(project, pushed, "refreshed shared routes");
        Ok(())
    }
}
