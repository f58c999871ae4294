//! The single write path for boards and cards.

pub mod mutation;
pub mod trash;

use crate::lock::EditReason;
use crate::storage::StoreError;

pub use mutation::{CardDraft, CardPatch, MutationPipeline};
pub use trash::{TrashBin, TrashEntry};

#[derive(Debug, thiserror::Error)]
pub enum MutationError {
    #[error("Card {card_id} is locked ({}); unlock it to make changes", reason.as_str())]
    Blocked { card_id: i64, reason: EditReason },

    #[error("Board {0} not found")]
    BoardNotFound(i64),

    #[error("Card {0} not found")]
    CardNotFound(i64),

    #[error("Could not check the card lock: {0}")]
    LockRegistry(#[source] StoreError),

    #[error("Could not move the card to the trash: {0}")]
    Trash(#[source] StoreError),

    #[error("{0}")]
    Persist(#[source] StoreError),
}
