use crate::config::SnapConfig;
use crate::error::SnapError;
use crate::replication::remote::{RemoteDatabase, push_head};
use crate::storage::address::Address;
use crate::storage::commit_store::CommitStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc as tokio_mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Latest known head of one dataset, as reported by a commit.
#[derive(Clone)]
pub struct HeadUpdate {
    pub dataset: String,
    /// `None` when the dataset was deleted.
    pub head: Option<Address>,
    pub source: Arc<dyn CommitStore>,
}

impl std::fmt::Debug for HeadUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadUpdate")
            .field("dataset", &self.dataset)
            .field("head", &self.head)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct ReplicationStats {
    enqueued: AtomicU64,
    coalesced: AtomicU64,
    pushed: AtomicU64,
    deleted: AtomicU64,
    failed: AtomicU64,
    unchanged: AtomicU64,
    flushes: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicationStatsSnapshot {
    pub enqueued: u64,
    /// Updates overwritten by a newer head before they were flushed.
    pub coalesced: u64,
    pub pushed: u64,
    pub deleted: u64,
    pub failed: u64,
    /// Updates skipped because the remote already had that head.
    pub unchanged: u64,
    pub flushes: u64,
}

impl ReplicationStats {
    pub fn snapshot(&self) -> ReplicationStatsSnapshot {
        ReplicationStatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            pushed: self.pushed.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            unchanged: self.unchanged.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorHealth {
    Running,
    Stopped,
    /// A background task ended without shutdown being requested.
    Failed(String),
}

/// Sending side of the coordinator queue. Cloned into every async hook.
#[derive(Clone)]
pub struct ReplicationHandle {
    tx: tokio_mpsc::Sender<HeadUpdate>,
    stats: Arc<ReplicationStats>,
}

impl ReplicationHandle {
    /// Waits for queue space; returns `Cancelled` once the coordinator stopped.
    pub async fn enqueue(&self, update: HeadUpdate) -> Result<(), SnapError> {
        self.tx
            .send(update)
            .await
            .map_err(|_| SnapError::Cancelled)?;
        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

type PendingHeads = Arc<Mutex<HashMap<String, HeadUpdate>>>;

/// Batches head updates from many datasets and pushes the latest head of
/// each to one remote on a fixed interval.
///
/// Intermediate heads of a dataset are coalesced away, so the remote may
/// never observe them, and pushes of different datasets are not ordered
/// relative to each other.
pub struct AsyncReplicationCoordinator {
    remote: Arc<dyn RemoteDatabase>,
    handle: ReplicationHandle,
    stats: Arc<ReplicationStats>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    collector: Option<JoinHandle<()>>,
    flusher: Option<JoinHandle<()>>,
}

impl AsyncReplicationCoordinator {
    /// Starts the collector and flusher tasks on the current tokio runtime.
    pub fn spawn(remote: Arc<dyn RemoteDatabase>, config: &SnapConfig) -> Self {
        let (tx, rx) = tokio_mpsc::channel(config.replication_queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (final_tx, final_rx) = oneshot::channel();
        let stats = Arc::new(ReplicationStats::default());
        let pending: PendingHeads = Arc::new(Mutex::new(HashMap::new()));

        let collector = tokio::spawn(run_collector(
            rx,
            Arc::clone(&pending),
            shutdown_rx,
            final_tx,
            Arc::clone(&stats),
        ));
        let flusher = tokio::spawn(run_flusher(
            Arc::clone(&remote),
            pending,
            config.flush_interval(),
            final_rx,
            Arc::clone(&stats),
        ));
        info!(
            remote = remote.name(),
            interval_ms = config.replication_flush_interval_ms,
            "replication coordinator started"
        );
        Self {
            handle: ReplicationHandle {
                tx,
                stats: Arc::clone(&stats),
            },
            remote,
            stats,
            shutdown_tx: Some(shutdown_tx),
            collector: Some(collector),
            flusher: Some(flusher),
        }
    }

    pub fn handle(&self) -> ReplicationHandle {
        self.handle.clone()
    }

    pub fn remote(&self) -> &Arc<dyn RemoteDatabase> {
        &self.remote
    }

    pub fn stats(&self) -> ReplicationStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn health(&self) -> CoordinatorHealth {
        if self.shutdown_tx.is_none() {
            return CoordinatorHealth::Stopped;
        }
        if self.collector.as_ref().is_none_or(JoinHandle::is_finished) {
            return CoordinatorHealth::Failed("collector task exited".into());
        }
        if self.flusher.as_ref().is_none_or(JoinHandle::is_finished) {
            return CoordinatorHealth::Failed("flusher task exited".into());
        }
        CoordinatorHealth::Running
    }

    /// Stops intake, drains what is already queued, flushes once more and
    /// waits for both tasks.
    pub async fn shutdown(&mut self) -> Result<(), SnapError> {
        let Some(shutdown_tx) = self.shutdown_tx.take() else {
            return Ok(());
        };
        let _ = shutdown_tx.send(());
        let mut failures = Vec::new();
        for (name, task) in [("collector", self.collector.take()), ("flusher", self.flusher.take())] {
            if let Some(task) = task
                && let Err(e) = task.await
            {
                error!(task = name, error = %e, "replication task failed");
                failures.push(format!("{name}: {e}"));
            }
        }
        info!(remote = self.remote.name(), "replication coordinator stopped");
        if failures.is_empty() {
            Ok(())
        } else {
            Err(SnapError::InternalInvariantViolation(failures.join("; ")))
        }
    }
}

fn record(pending: &PendingHeads, stats: &ReplicationStats, update: HeadUpdate) {
    if pending.lock().insert(update.dataset.clone(), update).is_some() {
        stats.coalesced.fetch_add(1, Ordering::Relaxed);
    }
}

async fn run_collector(
    mut rx: tokio_mpsc::Receiver<HeadUpdate>,
    pending: PendingHeads,
    mut shutdown_rx: oneshot::Receiver<()>,
    final_tx: oneshot::Sender<()>,
    stats: Arc<ReplicationStats>,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown_rx => break,
            update = rx.recv() => match update {
                Some(update) => record(&pending, &stats, update),
                None => break,
            },
        }
    }
    rx.close();
    while let Some(update) = rx.recv().await {
        record(&pending, &stats, update);
    }
    debug!("replication collector drained");
    let _ = final_tx.send(());
}

async fn run_flusher(
    remote: Arc<dyn RemoteDatabase>,
    pending: PendingHeads,
    interval: Duration,
    mut final_rx: oneshot::Receiver<()>,
    stats: Arc<ReplicationStats>,
) {
    let mut last_heads: HashMap<String, Address> = HashMap::new();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => flush(&remote, &pending, &mut last_heads, &stats).await,
            _ = &mut final_rx => {
                flush(&remote, &pending, &mut last_heads, &stats).await;
                break;
            }
        }
    }
    debug!("replication flusher finished final flush");
}

async fn flush(
    remote: &Arc<dyn RemoteDatabase>,
    pending: &PendingHeads,
    last_heads: &mut HashMap<String, Address>,
    stats: &ReplicationStats,
) {
    let batch = std::mem::take(&mut *pending.lock());
    if batch.is_empty() {
        return;
    }
    stats.flushes.fetch_add(1, Ordering::Relaxed);

    let mut pushes = Vec::with_capacity(batch.len());
    for (dataset, update) in batch {
        if let Some(head) = update.head
            && last_heads.get(&dataset) == Some(&head)
        {
            stats.unchanged.fetch_add(1, Ordering::Relaxed);
            continue;
        }
        let task = tokio::spawn(push_head(
            Arc::clone(remote),
            Arc::clone(&update.source),
            dataset.clone(),
            update.head,
        ));
        pushes.push((dataset, update, task));
    }

    for (dataset, update, task) in pushes {
        let result = match task.await {
            Ok(result) => result,
            Err(e) => Err(SnapError::Remote(format!("push task aborted: {e}"))),
        };
        match (result, update.head) {
            (Ok(()), Some(head)) => {
                last_heads.insert(dataset, head);
                stats.pushed.fetch_add(1, Ordering::Relaxed);
            }
            (Ok(()), None) => {
                last_heads.remove(&dataset);
                stats.deleted.fetch_add(1, Ordering::Relaxed);
            }
            (Err(e), _) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    remote = remote.name(),
                    dataset = %dataset,
                    error = %e,
                    "replication push failed, retrying next flush"
                );
                // A newer head queued meanwhile wins over the retry.
                pending.lock().entry(dataset).or_insert(update);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AsyncReplicationCoordinator, CoordinatorHealth};
    use crate::config::SnapConfig;
    use crate::replication::remote::MemoryRemote;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn health_reports_running_then_stopped() {
        let remote = Arc::new(MemoryRemote::new("origin"));
        let config = SnapConfig::default().with_flush_interval(Duration::from_millis(10));
        let mut coordinator = AsyncReplicationCoordinator::spawn(remote, &config);
        assert_eq!(coordinator.health(), CoordinatorHealth::Running);
        coordinator.shutdown().await.expect("shutdown");
        assert_eq!(coordinator.health(), CoordinatorHealth::Stopped);
        coordinator.shutdown().await.expect("second shutdown is a no-op");
        assert_eq!(coordinator.stats().flushes, 0);
    }
}
