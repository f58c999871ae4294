/// One device's view of the shared board: the store, lock registry,
/// pipeline, and reconciler wired together from a `CoreConfig`.
use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::clock::{Clock, SystemClock};
use crate::config::CoreConfig;
use crate::lock::{EditPermission, LockError, LockId, LockRegistry, UnlockError};
use crate::pipeline::{MutationError, MutationPipeline, TrashBin};
use crate::storage::versioned::VersionedStore;
use crate::storage::{KeyValueBackend, StoreError};
use crate::sync::{PollControl, Reconciler, ReconcilerHandle};
use crate::types::{Board, Snapshot, User};

/// Result of a housekeeping pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Maintenance {
    pub expired_sessions: usize,
    pub purged_cards: usize,
}

pub struct BoardClient {
    config: CoreConfig,
    store: Arc<VersionedStore>,
    locks: Arc<LockRegistry>,
    reconciler: Arc<Reconciler>,
    pipeline: Arc<MutationPipeline>,
}

impl BoardClient {
    pub fn new(
        backend: Arc<dyn KeyValueBackend>,
        config: CoreConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let store = Arc::new(VersionedStore::new(backend.clone(), clock.clone()));
        let locks = Arc::new(
            LockRegistry::new(backend.clone(), clock.clone())
                .with_min_password_len(config.min_password_len),
        );
        let trash = Arc::new(TrashBin::new(backend, clock, config.trash_retention()));
        let control = Arc::new(PollControl::new(config.cooldown()));
        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            control.clone(),
            config.poll_interval(),
        ));
        let pipeline = Arc::new(MutationPipeline::load(
            store.clone(),
            locks.clone(),
            trash,
            control,
        )?);

        log::info!(
            "[taskboard.client] Loaded version {} (poll every {:?})",
            pipeline.current().version,
            reconciler.interval()
        );
        Ok(Self {
            config,
            store,
            locks,
            reconciler,
            pipeline,
        })
    }

    /// `new` with the system clock.
    pub fn open(backend: Arc<dyn KeyValueBackend>, config: CoreConfig) -> Result<Self, StoreError> {
        Self::new(backend, config, Arc::new(SystemClock))
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<VersionedStore> {
        &self.store
    }

    pub fn locks(&self) -> &Arc<LockRegistry> {
        &self.locks
    }

    pub fn pipeline(&self) -> &Arc<MutationPipeline> {
        &self.pipeline
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Read the stored snapshot, bypassing optimistic state.
    pub fn load_snapshot(&self) -> Result<Snapshot, StoreError> {
        self.store.read()
    }

    /// Persist a whole board collection as `actor`.
    pub async fn save_snapshot(
        &self,
        actor: &User,
        boards: Vec<Board>,
    ) -> Result<Snapshot, MutationError> {
        self.pipeline.replace_boards(actor, boards).await
    }

    /// What this device currently shows.
    pub fn current(&self) -> Snapshot {
        self.pipeline.current()
    }

    pub fn watch(&self) -> watch::Receiver<Snapshot> {
        self.pipeline.watch()
    }

    /// Snapshots written by other devices, as the reconciler finds them.
    pub fn subscribe(&self) -> broadcast::Receiver<Snapshot> {
        self.reconciler.subscribe()
    }

    pub fn on_snapshot_changed<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: FnMut(Snapshot) + Send + 'static,
    {
        self.reconciler.on_snapshot_changed(callback)
    }

    pub fn lock_card(
        &self,
        card_id: i64,
        password: &str,
        owner: &User,
        contact_email: &str,
    ) -> Result<LockId, LockError> {
        self.locks.lock(card_id, password, &owner.username, contact_email)
    }

    pub fn unlock_card(&self, card_id: i64, password: &str, actor: &User) -> Result<(), UnlockError> {
        self.locks.unlock(card_id, password, actor)
    }

    /// Permission check against the card's creator as currently shown.
    /// A card this device cannot see is denied.
    pub fn can_user_edit_card(&self, card_id: i64, actor: &User) -> EditPermission {
        let snapshot = self.pipeline.current();
        match snapshot.find_card(card_id) {
            Some((_, card)) => self
                .locks
                .can_user_edit_card(card_id, actor, &card.created_by),
            None => EditPermission::deny(),
        }
    }

    /// Drop expired unlock sessions and purge expired trash.
    pub fn maintain(&self) -> Result<Maintenance, StoreError> {
        let report = Maintenance {
            expired_sessions: self.locks.sweep_expired_sessions()?,
            purged_cards: self.pipeline.purge_trash()?,
        };
        if report != Maintenance::default() {
            log::debug!("[taskboard.client] Maintenance: {:?}", report);
        }
        Ok(report)
    }

    /// Start polling and feed newer remote snapshots into the pipeline.
    /// Must be called from within a tokio runtime.
    pub fn start_polling(&self) -> SyncHandle {
        let mut rx = self.reconciler.subscribe();
        let pipeline = self.pipeline.clone();
        let forwarder = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(snapshot) => {
                        pipeline.adopt_remote(snapshot).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!(
                            "[taskboard.client] Fell behind by {} snapshots, reloading",
                            skipped
                        );
                        if let Err(e) = pipeline.reload().await {
                            log::warn!("[taskboard.client] Reload failed: {}", e);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        let poller = self.reconciler.clone().spawn();

        SyncHandle {
            poller: Some(poller),
            forwarder: Some(forwarder),
        }
    }
}

/// Running sync for a `BoardClient`. Dropping it stops polling too.
pub struct SyncHandle {
    poller: Option<ReconcilerHandle>,
    forwarder: Option<JoinHandle<()>>,
}

impl SyncHandle {
    pub async fn stop(mut self) {
        if let Some(poller) = self.poller.take() {
            poller.stop().await;
        }
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.poller.as_ref().is_some_and(|p| p.is_running())
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::EditReason;
    use crate::pipeline::CardDraft;
    use crate::storage::memory::MemoryBackend;
    use std::time::Duration;

    fn client(backend: &Arc<MemoryBackend>) -> BoardClient {
        BoardClient::open(backend.clone(), CoreConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_fresh_store_shows_seed() {
        let backend = Arc::new(MemoryBackend::new());
        let c = client(&backend);
        let snapshot = c.load_snapshot().unwrap();
        let titles: Vec<_> = snapshot.boards.iter().map(|b| b.title.as_str()).collect();
        assert_eq!(titles, vec!["To Do", "In Progress", "Done"]);
        assert_eq!(snapshot.version, 0);
        assert_eq!(c.current(), snapshot);
        // Reading never writes the seed back.
        assert!(backend.keys().is_empty());
    }

    #[tokio::test]
    async fn test_last_writer_wins_across_devices() {
        let backend = Arc::new(MemoryBackend::new());
        let alice_device = client(&backend);
        let bob_device = client(&backend);

        let mut alice_boards = alice_device.current().boards;
        alice_boards[0].title = "Alice".to_string();
        let mut bob_boards = bob_device.current().boards;
        bob_boards[0].title = "Bob".to_string();

        let first = alice_device
            .save_snapshot(&User::member("alice"), alice_boards)
            .await
            .unwrap();
        let second = bob_device
            .save_snapshot(&User::member("bob"), bob_boards)
            .await
            .unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);

        let stored = alice_device.load_snapshot().unwrap();
        assert_eq!(stored.boards[0].title, "Bob");
        assert_eq!(stored.last_updated_by, "bob");
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_brings_in_remote_changes() {
        let backend = Arc::new(MemoryBackend::new());
        let viewer = client(&backend);
        let editor = client(&backend);
        let mut changes = viewer.subscribe();
        let sync = viewer.start_polling();
        assert!(sync.is_running());

        let card = editor
            .pipeline()
            .create_card(&User::member("bob"), 1, CardDraft::titled("Remote"))
            .await
            .unwrap();

        let published = tokio::time::timeout(Duration::from_secs(10), changes.recv())
            .await
            .expect("published within one poll interval")
            .unwrap();
        assert_eq!(published.version, 1);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(viewer.current().find_card(card.id).is_some());

        sync.stop().await;
    }

    #[tokio::test]
    async fn test_lock_unlock_relock_flow() {
        let backend = Arc::new(MemoryBackend::new());
        let c = client(&backend);
        let alice = User::member("alice");
        let bob = User::member("bob");

        let card = c
            .pipeline()
            .create_card(&bob, 1, CardDraft::titled("Budget"))
            .await
            .unwrap();
        c.lock_card(card.id, "s3cret", &alice, "alice@example.com")
            .unwrap();

        let denied = c.can_user_edit_card(card.id, &bob);
        assert!(!denied.can_edit);
        assert_eq!(denied.reason, EditReason::Locked);

        assert!(matches!(
            c.unlock_card(card.id, "s3cret", &bob),
            Err(UnlockError::Forbidden)
        ));
        c.unlock_card(card.id, "s3cret", &alice).unwrap();
        assert_eq!(
            c.can_user_edit_card(card.id, &bob).reason,
            EditReason::Unlocked
        );

        // Relocking keeps alice's session from the unlock.
        c.lock_card(card.id, "s3cret", &alice, "alice@example.com")
            .unwrap();
        let permission = c.can_user_edit_card(card.id, &alice);
        assert!(permission.can_edit);
        assert_eq!(permission.reason, EditReason::LockCreatorWithSession);
        assert!(!c.can_user_edit_card(card.id, &bob).can_edit);
    }

    #[tokio::test]
    async fn test_unknown_card_is_not_editable() {
        let backend = Arc::new(MemoryBackend::new());
        let c = client(&backend);
        let permission = c.can_user_edit_card(424242, &User::admin("root"));
        assert!(!permission.can_edit);
        assert_eq!(permission.reason, EditReason::Locked);
    }

    #[tokio::test]
    async fn test_config_sets_password_policy() {
        let backend = Arc::new(MemoryBackend::new());
        let config = CoreConfig {
            min_password_len: 8,
            ..CoreConfig::default()
        };
        let c = BoardClient::open(backend, config).unwrap();
        let result = c.lock_card(1, "short", &User::member("alice"), "a@x.com");
        assert!(matches!(
            result,
            Err(LockError::InvalidPassword { min_len: 8 })
        ));
    }

    #[tokio::test]
    async fn test_maintain_on_empty_store() {
        let backend = Arc::new(MemoryBackend::new());
        let c = client(&backend);
        assert_eq!(c.maintain().unwrap(), Maintenance::default());
    }

    #[test]
    fn test_new_fails_when_store_unreadable() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_fail_reads(true);
        assert!(matches!(
            BoardClient::open(backend, CoreConfig::default()),
            Err(StoreError::StorageUnavailable(_))
        ));
    }
}
