/// Lock registry: card id -> lock metadata, persisted under `lock-registry`.
///
/// Every call reads through the backend so locks placed from another device
/// are visible on the next operation. Read-modify-write cycles are serialized
/// within the process by `op_lock`; across processes the registry is
/// last-write-wins like everything else in the store.
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock, Mutex};

use regex::Regex;

use super::secret::{PlaintextSecrets, SecretKeeper};
use super::session::SessionTable;
use super::{
    EditPermission, EditReason, Lock, LockError, LockId, LockInfo, Recovery, RecoveryError,
    UnlockError,
};
use crate::clock::Clock;
use crate::storage::{load_json, save_json, KeyValueBackend, StoreError, LOCK_REGISTRY_KEY};
use crate::types::User;

pub const DEFAULT_MIN_PASSWORD_LEN: usize = 4;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+$").expect("valid email pattern"));

/// Lock map keyed by card id. Stored as a JSON object, so keys are strings.
type LockMap = BTreeMap<String, Lock>;

pub struct LockRegistry {
    backend: Arc<dyn KeyValueBackend>,
    clock: Arc<dyn Clock>,
    secrets: Box<dyn SecretKeeper>,
    sessions: SessionTable,
    min_password_len: usize,
    op_lock: Mutex<()>,
}

impl LockRegistry {
    pub fn new(backend: Arc<dyn KeyValueBackend>, clock: Arc<dyn Clock>) -> Self {
        Self::with_secrets(backend, clock, Box::new(PlaintextSecrets))
    }

    pub fn with_secrets(
        backend: Arc<dyn KeyValueBackend>,
        clock: Arc<dyn Clock>,
        secrets: Box<dyn SecretKeeper>,
    ) -> Self {
        Self {
            sessions: SessionTable::new(backend.clone(), clock.clone()),
            backend,
            clock,
            secrets,
            min_password_len: DEFAULT_MIN_PASSWORD_LEN,
            op_lock: Mutex::new(()),
        }
    }

    pub fn with_min_password_len(mut self, min_len: usize) -> Self {
        self.min_password_len = min_len;
        self
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    fn load(&self) -> Result<LockMap, StoreError> {
        Ok(load_json(self.backend.as_ref(), LOCK_REGISTRY_KEY)?.unwrap_or_default())
    }

    fn save(&self, locks: &LockMap) -> Result<(), StoreError> {
        save_json(self.backend.as_ref(), LOCK_REGISTRY_KEY, locks)
    }

    fn get(&self, card_id: i64) -> Result<Option<Lock>, StoreError> {
        Ok(self.load()?.remove(&card_id.to_string()))
    }

    /// Lock a card. The password must be at least `min_password_len` chars
    /// and the contact email must look like `local@domain`.
    pub fn lock(
        &self,
        card_id: i64,
        password: &str,
        owner_username: &str,
        contact_email: &str,
    ) -> Result<LockId, LockError> {
        if password.is_empty() || password.chars().count() < self.min_password_len {
            return Err(LockError::InvalidPassword {
                min_len: self.min_password_len,
            });
        }
        if !EMAIL_RE.is_match(contact_email.trim()) {
            return Err(LockError::InvalidEmail);
        }

        let _guard = self.op_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut locks = self.load()?;
        let key = card_id.to_string();
        if locks.contains_key(&key) {
            return Err(LockError::AlreadyLocked(card_id));
        }

        let lock_id = uuid::Uuid::new_v4().to_string();
        locks.insert(
            key,
            Lock {
                card_id,
                lock_id: lock_id.clone(),
                password: self.secrets.seal(password),
                created_by: owner_username.to_string(),
                user_email: contact_email.trim().to_string(),
                locked_at: self.clock.now(),
            },
        );
        self.save(&locks)?;

        log::info!(
            "[taskboard.lock] Card {} locked by {}",
            card_id,
            owner_username
        );
        Ok(lock_id)
    }

    /// `lock` behind a password + confirmation form.
    pub fn lock_with_confirmation(
        &self,
        card_id: i64,
        password: &str,
        confirmation: &str,
        owner_username: &str,
        contact_email: &str,
    ) -> Result<LockId, LockError> {
        if password != confirmation {
            return Err(LockError::PasswordMismatch);
        }
        self.lock(card_id, password, owner_username, contact_email)
    }

    /// Remove a lock with its password. Only the lock creator or an admin
    /// may try; success grants the actor a 24h unlock session for the card.
    pub fn unlock(&self, card_id: i64, password: &str, actor: &User) -> Result<(), UnlockError> {
        let _guard = self.op_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut locks = self.load()?;
        let key = card_id.to_string();
        let lock = locks.get(&key).ok_or(UnlockError::NotLocked(card_id))?;

        if !actor.is_admin() && actor.username != lock.created_by {
            log::warn!(
                "[taskboard.lock] {} tried to unlock card {} owned by {}",
                actor.username,
                card_id,
                lock.created_by
            );
            return Err(UnlockError::Forbidden);
        }
        if !self.secrets.verify(&lock.password, password) {
            log::warn!(
                "[taskboard.lock] Wrong password for card {} from {}",
                card_id,
                actor.username
            );
            return Err(UnlockError::WrongPassword);
        }

        // Session first: if it cannot be stored the card stays locked.
        let had_session = self.sessions.has_valid(card_id, &actor.username)?;
        self.sessions.grant(card_id, &actor.username)?;
        locks.remove(&key);
        if let Err(e) = self.save(&locks) {
            // The lock is still in place, so the new session must not be.
            if !had_session {
                if let Err(revoke_err) = self.sessions.revoke(card_id, &actor.username) {
                    log::error!(
                        "[taskboard.lock] Could not revoke session for card {} after failed unlock: {}",
                        card_id,
                        revoke_err
                    );
                }
            }
            return Err(e.into());
        }

        log::info!(
            "[taskboard.lock] Card {} unlocked by {}",
            card_id,
            actor.username
        );
        Ok(())
    }

    /// Administrative override: drop the lock without a password.
    /// No session is granted.
    pub fn force_unlock(&self, card_id: i64, admin: &User) -> Result<(), UnlockError> {
        if !admin.is_admin() {
            return Err(UnlockError::Forbidden);
        }
        let _guard = self.op_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut locks = self.load()?;
        if locks.remove(&card_id.to_string()).is_none() {
            return Err(UnlockError::NotLocked(card_id));
        }
        self.save(&locks)?;

        log::warn!(
            "[taskboard.lock] Card {} force-unlocked by admin {}",
            card_id,
            admin.username
        );
        Ok(())
    }

    /// Drop the lock of a card that no longer exists. Missing locks are fine.
    pub fn release_deleted_card(&self, card_id: i64) -> Result<(), StoreError> {
        let _guard = self.op_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut locks = self.load()?;
        if locks.remove(&card_id.to_string()).is_some() {
            self.save(&locks)?;
        }
        Ok(())
    }

    pub fn try_is_locked(&self, card_id: i64) -> Result<bool, StoreError> {
        Ok(self.load()?.contains_key(&card_id.to_string()))
    }

    /// Whether an active lock exists. An unreadable registry counts as
    /// locked.
    pub fn is_locked(&self, card_id: i64) -> bool {
        self.try_is_locked(card_id).unwrap_or_else(|e| {
            log::warn!(
                "[taskboard.lock] Lock registry unreadable, treating card {} as locked: {}",
                card_id,
                e
            );
            true
        })
    }

    pub fn lock_info(&self, card_id: i64) -> Result<Option<LockInfo>, StoreError> {
        Ok(self.get(card_id)?.as_ref().map(LockInfo::from))
    }

    pub fn locked_cards(&self) -> Result<Vec<LockInfo>, StoreError> {
        Ok(self.load()?.values().map(LockInfo::from).collect())
    }

    pub fn has_valid_session(&self, card_id: i64, username: &str) -> Result<bool, StoreError> {
        self.sessions.has_valid(card_id, username)
    }

    pub fn sweep_expired_sessions(&self) -> Result<usize, StoreError> {
        self.sessions.sweep_expired()
    }

    /// Decide whether `actor` may edit a card created by `card_creator`.
    ///
    /// While a card is locked, being its creator, an admin, or the lock's
    /// owner is not enough on its own: the actor also needs a valid unlock
    /// session for the card.
    pub fn try_can_user_edit_card(
        &self,
        card_id: i64,
        actor: &User,
        card_creator: &str,
    ) -> Result<EditPermission, StoreError> {
        let Some(lock) = self.get(card_id)? else {
            return Ok(EditPermission::allow(EditReason::Unlocked));
        };
        if !self.sessions.has_valid(card_id, &actor.username)? {
            return Ok(EditPermission::deny());
        }

        let permission = if actor.username == card_creator {
            EditPermission::allow(EditReason::CardCreatorWithSession)
        } else if actor.is_admin() {
            EditPermission::allow(EditReason::AdminWithSession)
        } else if actor.username == lock.created_by {
            EditPermission::allow(EditReason::LockCreatorWithSession)
        } else {
            EditPermission::deny()
        };
        Ok(permission)
    }

    /// `try_can_user_edit_card`, denying when the registry cannot be read.
    pub fn can_user_edit_card(
        &self,
        card_id: i64,
        actor: &User,
        card_creator: &str,
    ) -> EditPermission {
        self.try_can_user_edit_card(card_id, actor, card_creator)
            .unwrap_or_else(|e| {
                log::warn!(
                    "[taskboard.lock] Permission check for card {} failed, denying: {}",
                    card_id,
                    e
                );
                EditPermission::deny()
            })
    }

    /// Return the lock password to someone who knows the lock's contact
    /// email. KNOWN WEAKNESS: discloses the plaintext password; kept because
    /// recovery-by-email is the documented way to regain access.
    pub fn request_password_recovery(
        &self,
        card_id: i64,
        supplied_email: &str,
    ) -> Result<Recovery, RecoveryError> {
        let lock = self.get(card_id)?.ok_or(RecoveryError::NotLocked(card_id))?;
        if lock.user_email != supplied_email {
            log::warn!(
                "[taskboard.lock] Recovery for card {} with non-matching email",
                card_id
            );
            return Err(RecoveryError::EmailMismatch);
        }

        log::info!("[taskboard.lock] Password recovery for card {}", card_id);
        Ok(Recovery {
            message: format!("Password for card {} recovered", card_id),
            password: self.secrets.reveal(&lock.password),
        })
    }
}
