//! Shared-board core: a versioned snapshot store, per-card password locks,
//! a serialized optimistic mutation pipeline, and a polling reconciler.

pub mod client;
pub mod clock;
pub mod config;
pub mod lock;
pub mod pipeline;
pub mod reorder;
pub mod storage;
pub mod sync;
pub mod types;

pub use client::{BoardClient, Maintenance, SyncHandle};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CoreConfig;
pub use lock::{EditPermission, EditReason, LockRegistry};
pub use pipeline::{CardDraft, CardPatch, MutationError, MutationPipeline};
pub use reorder::{reorder, DropPosition};
pub use storage::versioned::VersionedStore;
pub use storage::{KeyValueBackend, StoreError};
pub use types::{Board, Card, Role, Snapshot, User};
