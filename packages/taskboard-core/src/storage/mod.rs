pub mod local;
pub mod memory;
pub mod versioned;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Key holding the board snapshot.
pub const SNAPSHOT_KEY: &str = "snapshot";
/// Key holding the card id -> lock map.
pub const LOCK_REGISTRY_KEY: &str = "lock-registry";
/// Key holding the list of unlock sessions.
pub const UNLOCK_SESSIONS_KEY: &str = "unlock-sessions";
/// Key holding soft-deleted cards.
pub const TRASH_KEY: &str = "trash";

/// String-keyed blob storage the core persists into.
/// Implementations: MemoryBackend (in-process), FileBackend (one file per key).
/// Anything that can map a string key to a JSON string (browser storage,
/// an HTTP key-value endpoint) can implement it.
pub trait KeyValueBackend: Send + Sync {
    /// Read the value stored under `key`, `None` if never written.
    fn get(&self, key: &str) -> Result<Option<String>, BackendError>;

    /// Replace the value under `key`. Must be atomic: readers see either the
    /// old or the new value, never a torn write.
    fn put(&self, key: &str, value: &str) -> Result<(), BackendError>;

    /// Delete `key`. Deleting a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), BackendError>;
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage quota exceeded writing {key}")]
    QuotaExceeded { key: String },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Changes not saved, please retry ({0})")]
    Persist(BackendError),

    #[error("Stored value under {key} is corrupt: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode value: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Read and decode a JSON blob. Missing keys decode to `None`.
pub fn load_json<T: DeserializeOwned>(
    backend: &dyn KeyValueBackend,
    key: &str,
) -> Result<Option<T>, StoreError> {
    let raw = backend
        .get(key)
        .map_err(|e| StoreError::StorageUnavailable(e.to_string()))?;
    match raw {
        Some(text) => serde_json::from_str(&text)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

/// Encode a value as JSON and store it under `key`.
pub fn save_json<T: Serialize>(
    backend: &dyn KeyValueBackend,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let text = serde_json::to_string(value)?;
    backend.put(key, &text).map_err(StoreError::Persist)
}
