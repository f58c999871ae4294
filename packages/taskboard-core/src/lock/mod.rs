//! Per-card password locks and the unlock sessions that let users past them.
//!
//! A Lock is an application-level convention: it gates the mutation
//! pipeline, but nothing stops another process from writing the snapshot
//! directly.

pub mod registry;
pub mod secret;
pub mod session;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::StoreError;

pub use registry::LockRegistry;
pub use secret::{PlaintextSecrets, SecretKeeper};
pub use session::{SessionTable, UnlockSession, SESSION_DURATION_HOURS};

pub type LockId = String;

/// Stored lock record. `password` holds whatever the `SecretKeeper` sealed,
/// which for `PlaintextSecrets` is the password itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lock {
    pub card_id: i64,
    pub lock_id: LockId,
    pub password: String,
    pub created_by: String,
    pub user_email: String,
    pub locked_at: DateTime<Utc>,
}

/// A lock as shown to UI code: everything but the secret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockInfo {
    pub card_id: i64,
    pub lock_id: LockId,
    pub created_by: String,
    pub user_email: String,
    pub locked_at: DateTime<Utc>,
}

impl From<&Lock> for LockInfo {
    fn from(lock: &Lock) -> Self {
        Self {
            card_id: lock.card_id,
            lock_id: lock.lock_id.clone(),
            created_by: lock.created_by.clone(),
            user_email: lock.user_email.clone(),
            locked_at: lock.locked_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditReason {
    Unlocked,
    CardCreatorWithSession,
    AdminWithSession,
    LockCreatorWithSession,
    Locked,
}

impl EditReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EditReason::Unlocked => "unlocked",
            EditReason::CardCreatorWithSession => "card_creator_with_session",
            EditReason::AdminWithSession => "admin_with_session",
            EditReason::LockCreatorWithSession => "lock_creator_with_session",
            EditReason::Locked => "locked",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditPermission {
    pub can_edit: bool,
    pub reason: EditReason,
}

impl EditPermission {
    pub fn allow(reason: EditReason) -> Self {
        Self {
            can_edit: true,
            reason,
        }
    }

    pub fn deny() -> Self {
        Self {
            can_edit: false,
            reason: EditReason::Locked,
        }
    }
}

/// Successful password recovery payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recovery {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Card {0} is already locked")]
    AlreadyLocked(i64),

    #[error("Password must be at least {min_len} characters")]
    InvalidPassword { min_len: usize },

    #[error("Password confirmation does not match")]
    PasswordMismatch,

    #[error("A valid contact email is required to lock a card")]
    InvalidEmail,

    #[error(transparent)]
    Storage(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum UnlockError {
    #[error("Card {0} is not locked")]
    NotLocked(i64),

    #[error("Only the lock owner or an administrator can unlock this card")]
    Forbidden,

    #[error("Wrong password")]
    WrongPassword,

    #[error(transparent)]
    Storage(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error("Card {0} is not locked")]
    NotLocked(i64),

    #[error("Email does not match the lock's contact address")]
    EmailMismatch,

    #[error(transparent)]
    Storage(#[from] StoreError),
}
