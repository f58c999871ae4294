/// Poll-based reconciler.
///
/// Reads the versioned store every `interval` and republishes the snapshot
/// through a broadcast channel whenever its version is newer than anything
/// seen locally. Push delivery, if it is ever added, should feed the same
/// "newer version observed -> publish" path.
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::control::PollControl;
use crate::storage::versioned::VersionedStore;
use crate::types::Snapshot;

const CHANNEL_CAPACITY: usize = 64;

/// What a single poll did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Published(u64),
    Unchanged,
    /// Skipped: a local mutation is in flight or cooling down.
    Suspended,
    /// The store could not be read; the next tick retries.
    Failed,
}

pub struct Reconciler {
    store: Arc<VersionedStore>,
    control: Arc<PollControl>,
    interval: Duration,
    tx: broadcast::Sender<Snapshot>,
}

impl Reconciler {
    pub fn new(store: Arc<VersionedStore>, control: Arc<PollControl>, interval: Duration) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            store,
            control,
            interval,
            tx,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Snapshot> {
        self.tx.subscribe()
    }

    /// Call `callback` with every published snapshot until the reconciler
    /// is dropped. Must be called from within a tokio runtime.
    pub fn on_snapshot_changed<F>(&self, mut callback: F) -> JoinHandle<()>
    where
        F: FnMut(Snapshot) + Send + 'static,
    {
        let mut rx = self.tx.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(snapshot) => callback(snapshot),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!(
                            "[taskboard.reconciler] Subscriber lagged, skipped {} snapshots",
                            skipped
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// One reconciliation step.
    pub fn poll_once(&self) -> PollOutcome {
        if self.control.is_suspended() {
            log::trace!("[taskboard.reconciler] Poll skipped, local mutation active");
            return PollOutcome::Suspended;
        }

        let snapshot = match self.store.read() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::warn!("[taskboard.reconciler] Poll failed: {}", e);
                return PollOutcome::Failed;
            }
        };

        let version = snapshot.version;
        if !self.control.observe(version) {
            return PollOutcome::Unchanged;
        }

        log::debug!(
            "[taskboard.reconciler] Version {} by {} observed",
            version,
            snapshot.last_updated_by
        );
        if self.tx.send(snapshot).is_err() {
            log::trace!("[taskboard.reconciler] No subscribers for version {}", version);
        }
        PollOutcome::Published(version)
    }

    /// Start polling on the current tokio runtime.
    pub fn spawn(self: Arc<Self>) -> ReconcilerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let reconciler = self;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(reconciler.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                        reconciler.poll_once();
                    }
                }
            }
            log::debug!("[taskboard.reconciler] Polling stopped");
        });

        ReconcilerHandle {
            shutdown_tx,
            task: Some(task),
        }
    }
}

/// Running poll loop. Stopping (or dropping) it cancels the pending tick.
pub struct ReconcilerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ReconcilerHandle {
    /// Stop polling and wait for the loop to exit. No poll runs after this
    /// returns.
    pub async fn stop(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for ReconcilerHandle {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
