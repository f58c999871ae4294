/// Whole-snapshot versioned store.
///
/// Holds the board collection plus a monotonic version counter and
/// last-writer metadata under the `snapshot` key. Writes always carry the
/// full board collection: there is no merge and no store-level locking, so
/// concurrent writers resolve as last-write-wins.
use std::sync::Arc;

use super::{load_json, save_json, KeyValueBackend, StoreError, SNAPSHOT_KEY};
use crate::clock::Clock;
use crate::types::{Board, Snapshot};

pub struct VersionedStore {
    backend: Arc<dyn KeyValueBackend>,
    clock: Arc<dyn Clock>,
}

impl VersionedStore {
    pub fn new(backend: Arc<dyn KeyValueBackend>, clock: Arc<dyn Clock>) -> Self {
        Self { backend, clock }
    }

    pub fn backend(&self) -> &Arc<dyn KeyValueBackend> {
        &self.backend
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Last persisted snapshot, or the seeded default on first run.
    /// Reading never persists the seed.
    pub fn read(&self) -> Result<Snapshot, StoreError> {
        match load_json::<Snapshot>(self.backend.as_ref(), SNAPSHOT_KEY)? {
            Some(snapshot) => Ok(snapshot),
            None => {
                log::debug!("[taskboard.store.read] No snapshot stored, using seed");
                Ok(Snapshot::seeded(self.clock.now()))
            }
        }
    }

    /// Persist `boards` as the next version and return the stored snapshot.
    pub fn write(&self, boards: Vec<Board>, actor_name: &str) -> Result<Snapshot, StoreError> {
        let current = self.read()?;
        let snapshot = Snapshot {
            boards,
            version: current.version + 1,
            last_updated: self.clock.now(),
            last_updated_by: actor_name.to_string(),
        };

        if let Err(e) = save_json(self.backend.as_ref(), SNAPSHOT_KEY, &snapshot) {
            log::warn!(
                "[taskboard.store.write] Write of version {} by {} failed: {}",
                snapshot.version,
                actor_name,
                e
            );
            return Err(e);
        }

        log::debug!(
            "[taskboard.store.write] Stored version {} by {}",
            snapshot.version,
            actor_name
        );
        Ok(snapshot)
    }
}
