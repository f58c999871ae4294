/// Unlock sessions: 24h grants keyed by (card id, username).
///
/// A session is created when a user supplies the right password. Readers
/// treat a session as valid only while `now < expires_at`; the sweep that
/// physically deletes expired rows is cleanup only.
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::storage::{load_json, save_json, KeyValueBackend, StoreError, UNLOCK_SESSIONS_KEY};

pub const SESSION_DURATION_HOURS: i64 = 24;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockSession {
    pub card_id: i64,
    pub username: String,
    pub unlocked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl UnlockSession {
    pub fn new(card_id: i64, username: &str, unlocked_at: DateTime<Utc>) -> Self {
        Self {
            card_id,
            username: username.to_string(),
            unlocked_at,
            expires_at: unlocked_at + Duration::hours(SESSION_DURATION_HOURS),
        }
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

pub struct SessionTable {
    backend: Arc<dyn KeyValueBackend>,
    clock: Arc<dyn Clock>,
}

impl SessionTable {
    pub fn new(backend: Arc<dyn KeyValueBackend>, clock: Arc<dyn Clock>) -> Self {
        Self { backend, clock }
    }

    fn load(&self) -> Result<Vec<UnlockSession>, StoreError> {
        Ok(load_json(self.backend.as_ref(), UNLOCK_SESSIONS_KEY)?.unwrap_or_default())
    }

    fn save(&self, sessions: &[UnlockSession]) -> Result<(), StoreError> {
        save_json(self.backend.as_ref(), UNLOCK_SESSIONS_KEY, &sessions)
    }

    /// Start (or restart) the session for `(card_id, username)`.
    pub fn grant(&self, card_id: i64, username: &str) -> Result<UnlockSession, StoreError> {
        let now = self.clock.now();
        let mut sessions = self.load()?;
        // Expired rows are dropped while we are rewriting anyway.
        sessions.retain(|s| {
            s.is_valid_at(now) && !(s.card_id == card_id && s.username == username)
        });
        let session = UnlockSession::new(card_id, username, now);
        sessions.push(session.clone());
        self.save(&sessions)?;
        Ok(session)
    }

    fn find_valid(&self, card_id: i64, username: &str) -> Result<Option<UnlockSession>, StoreError> {
        let now = self.clock.now();
        Ok(self
            .load()?
            .into_iter()
            .find(|s| s.card_id == card_id && s.username == username && s.is_valid_at(now)))
    }

    pub fn has_valid(&self, card_id: i64, username: &str) -> Result<bool, StoreError> {
        Ok(self.find_valid(card_id, username)?.is_some())
    }

    /// Drop the session for `(card_id, username)`. Returns whether one existed.
    pub fn revoke(&self, card_id: i64, username: &str) -> Result<bool, StoreError> {
        let mut sessions = self.load()?;
        let before = sessions.len();
        sessions.retain(|s| !(s.card_id == card_id && s.username == username));
        if sessions.len() == before {
            return Ok(false);
        }
        self.save(&sessions)?;
        Ok(true)
    }

    /// Physically remove expired sessions. Returns how many were removed.
    pub fn sweep_expired(&self) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let mut sessions = self.load()?;
        let before = sessions.len();
        sessions.retain(|s| s.is_valid_at(now));
        let removed = before - sessions.len();
        if removed > 0 {
            self.save(&sessions)?;
            log::info!("[taskboard.lock.session] Swept {} expired sessions", removed);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::memory::MemoryBackend;

    fn table() -> (Arc<ManualClock>, SessionTable) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let table = SessionTable::new(Arc::new(MemoryBackend::new()), clock.clone());
        (clock, table)
    }

    #[test]
    fn test_expiry_is_exactly_24h() {
        let t0 = Utc::now();
        let session = UnlockSession::new(1, "alice", t0);
        assert_eq!(session.expires_at - session.unlocked_at, Duration::hours(24));
    }

    #[test]
    fn test_session_expiry_window() {
        let (clock, table) = table();
        let t0 = clock.now();
        table.grant(7, "alice").unwrap();

        clock.set(t0 + Duration::hours(23) + Duration::minutes(59));
        assert!(table.has_valid(7, "alice").unwrap());

        clock.set(t0 + Duration::hours(24) + Duration::minutes(1));
        assert!(!table.has_valid(7, "alice").unwrap());
    }

    #[test]
    fn test_session_scoped_to_card_and_user() {
        let (_, table) = table();
        table.grant(7, "alice").unwrap();
        assert!(!table.has_valid(7, "bob").unwrap());
        assert!(!table.has_valid(8, "alice").unwrap());
    }

    #[test]
    fn test_regrant_replaces_session() {
        let (clock, table) = table();
        let t0 = clock.now();
        table.grant(7, "alice").unwrap();
        clock.advance(Duration::hours(10));
        let renewed = table.grant(7, "alice").unwrap();

        assert_eq!(renewed.unlocked_at, t0 + Duration::hours(10));
        assert_eq!(table.load().unwrap().len(), 1);
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let (clock, table) = table();
        table.grant(1, "alice").unwrap();
        clock.advance(Duration::hours(20));
        table.grant(2, "bob").unwrap();
        clock.advance(Duration::hours(5));

        assert_eq!(table.sweep_expired().unwrap(), 1);
        let remaining = table.load().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].card_id, 2);
    }

    #[test]
    fn test_revoke_single_session() {
        let (_, table) = table();
        table.grant(1, "alice").unwrap();
        table.grant(1, "bob").unwrap();
        assert!(table.revoke(1, "alice").unwrap());
        assert!(!table.revoke(1, "alice").unwrap());
        assert!(!table.has_valid(1, "alice").unwrap());
        assert!(table.has_valid(1, "bob").unwrap());
    }
}
