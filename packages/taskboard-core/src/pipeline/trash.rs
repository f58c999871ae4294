/// Soft-deleted cards, kept under the `trash` key until they expire.
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::storage::{load_json, save_json, KeyValueBackend, StoreError, TRASH_KEY};
use crate::types::Card;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrashEntry {
    pub card: Card,
    pub board_id: i64,
    pub board_title: String,
    pub deleted_by: String,
    pub deleted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl TrashEntry {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Upper bound on how long trashed cards are kept (ten years).
pub const MAX_TRASH_RETENTION_HOURS: i64 = 24 * 365 * 10;

pub struct TrashBin {
    backend: Arc<dyn KeyValueBackend>,
    clock: Arc<dyn Clock>,
    retention: Duration,
    op_lock: Mutex<()>,
}

impl TrashBin {
    pub fn new(
        backend: Arc<dyn KeyValueBackend>,
        clock: Arc<dyn Clock>,
        retention: Duration,
    ) -> Self {
        Self {
            backend,
            clock,
            retention: retention.clamp(
                Duration::hours(1),
                Duration::hours(MAX_TRASH_RETENTION_HOURS),
            ),
            op_lock: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<Vec<TrashEntry>, StoreError> {
        Ok(load_json(self.backend.as_ref(), TRASH_KEY)?.unwrap_or_default())
    }

    fn save(&self, entries: &[TrashEntry]) -> Result<(), StoreError> {
        save_json(self.backend.as_ref(), TRASH_KEY, &entries)
    }

    /// Put a card in the trash. Succeeds only once the entry is persisted.
    pub fn add(
        &self,
        card: Card,
        board_id: i64,
        board_title: &str,
        deleted_by: &str,
    ) -> Result<TrashEntry, StoreError> {
        let _guard = self.op_lock.lock().unwrap_or_else(|e| e.into_inner());
        let now = self.clock.now();
        let mut entries = self.load()?;
        entries.retain(|e| e.card.id != card.id);

        let entry = TrashEntry {
            card,
            board_id,
            board_title: board_title.to_string(),
            deleted_by: deleted_by.to_string(),
            deleted_at: now,
            expires_at: now + self.retention,
        };
        entries.push(entry.clone());
        self.save(&entries)?;

        log::debug!(
            "[taskboard.trash] Card {} trashed by {}",
            entry.card.id,
            deleted_by
        );
        Ok(entry)
    }

    /// Remove and return an unexpired entry.
    pub fn take(&self, card_id: i64) -> Result<Option<TrashEntry>, StoreError> {
        let _guard = self.op_lock.lock().unwrap_or_else(|e| e.into_inner());
        let now = self.clock.now();
        let mut entries = self.load()?;
        // Expired rows stay for `purge_expired`, which reports them so their
        // locks get released.
        let Some(pos) = entries
            .iter()
            .position(|e| e.card.id == card_id && !e.is_expired_at(now))
        else {
            return Ok(None);
        };
        let entry = entries.remove(pos);
        self.save(&entries)?;
        Ok(Some(entry))
    }

    /// Put a previously taken entry back unchanged.
    pub fn put_back(&self, entry: TrashEntry) -> Result<(), StoreError> {
        let _guard = self.op_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries = self.load()?;
        entries.retain(|e| e.card.id != entry.card.id);
        entries.push(entry);
        self.save(&entries)
    }

    /// Unexpired entries, oldest first.
    pub fn entries(&self) -> Result<Vec<TrashEntry>, StoreError> {
        let now = self.clock.now();
        let mut entries = self.load()?;
        entries.retain(|e| !e.is_expired_at(now));
        entries.sort_by_key(|e| e.deleted_at);
        Ok(entries)
    }

    /// Physically remove expired entries and return them.
    pub fn purge_expired(&self) -> Result<Vec<TrashEntry>, StoreError> {
        let _guard = self.op_lock.lock().unwrap_or_else(|e| e.into_inner());
        let now = self.clock.now();
        let (expired, kept): (Vec<_>, Vec<_>) = self
            .load()?
            .into_iter()
            .partition(|e| e.is_expired_at(now));
        if !expired.is_empty() {
            self.save(&kept)?;
            log::info!("[taskboard.trash] Purged {} expired cards", expired.len());
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::memory::MemoryBackend;

    fn card(id: i64) -> Card {
        Card {
            id,
            title: format!("C{}", id),
            description: String::new(),
            background_color: String::new(),
            due_date: None,
            created_by: "alice".to_string(),
            assigned_to: None,
            created_at: Utc::now(),
        }
    }

    fn bin() -> (Arc<MemoryBackend>, Arc<ManualClock>, TrashBin) {
        let backend = Arc::new(MemoryBackend::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let bin = TrashBin::new(backend.clone(), clock.clone(), Duration::hours(24));
        (backend, clock, bin)
    }

    #[test]
    fn test_add_and_take() {
        let (_, _, bin) = bin();
        let entry = bin.add(card(1), 10, "To Do", "alice").unwrap();
        assert_eq!(entry.expires_at - entry.deleted_at, Duration::hours(24));
        assert_eq!(bin.entries().unwrap().len(), 1);

        let taken = bin.take(1).unwrap().unwrap();
        assert_eq!(taken.board_id, 10);
        assert!(bin.entries().unwrap().is_empty());
        assert!(bin.take(1).unwrap().is_none());
    }

    #[test]
    fn test_expired_entries_are_absent() {
        let (_, clock, bin) = bin();
        bin.add(card(1), 10, "To Do", "alice").unwrap();
        clock.advance(Duration::hours(24));
        assert!(bin.entries().unwrap().is_empty());
        assert!(bin.take(1).unwrap().is_none());

        // Still there for the purge to report.
        let purged = bin.purge_expired().unwrap();
        assert_eq!(purged.len(), 1);
        assert_eq!(purged[0].card.id, 1);
    }

    #[test]
    fn test_retention_is_bounded() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let long = TrashBin::new(
            Arc::new(MemoryBackend::new()),
            clock.clone(),
            Duration::weeks(1_000_000),
        );
        let entry = long.add(card(1), 10, "To Do", "alice").unwrap();
        assert_eq!(
            entry.expires_at - entry.deleted_at,
            Duration::hours(MAX_TRASH_RETENTION_HOURS)
        );

        let negative = TrashBin::new(Arc::new(MemoryBackend::new()), clock, Duration::hours(-3));
        negative.add(card(2), 10, "To Do", "alice").unwrap();
        assert_eq!(negative.take(2).unwrap().unwrap().card.id, 2);
    }
}
