/// Mutation pipeline: guard -> optimistic apply -> persist -> commit/rollback.
///
/// Every board or card change goes through here. Mutations are serialized by
/// `gate`, so each one is computed against the state left by the previous
/// one (optimistic or committed) and a rollback restores exactly what was
/// visible before it started. The visible snapshot lives in a `watch`
/// channel that UI code can subscribe to.
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex as AsyncMutex};

use super::trash::{TrashBin, TrashEntry};
use super::MutationError;
use crate::lock::LockRegistry;
use crate::reorder::{reorder, DropPosition};
use crate::storage::versioned::VersionedStore;
use crate::storage::StoreError;
use crate::sync::PollControl;
use crate::types::{next_board_id, next_card_id, Board, Card, Snapshot, User};

/// Fields for a new card. Id, author, and creation time are filled in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub background_color: String,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assigned_to: Option<String>,
}

impl CardDraft {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// Partial card update. `None` leaves a field alone; for the optional
/// fields `Some(None)` clears them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CardPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub background_color: Option<String>,
    pub due_date: Option<Option<DateTime<Utc>>>,
    pub assigned_to: Option<Option<String>>,
}

impl CardPatch {
    fn apply_to(&self, card: &mut Card) {
        if let Some(title) = &self.title {
            card.title = title.clone();
        }
        if let Some(description) = &self.description {
            card.description = description.clone();
        }
        if let Some(color) = &self.background_color {
            card.background_color = color.clone();
        }
        if let Some(due_date) = self.due_date {
            card.due_date = due_date;
        }
        if let Some(assigned_to) = &self.assigned_to {
            card.assigned_to = assigned_to.clone();
        }
    }
}

fn card_mut(boards: &mut [Board], card_id: i64) -> Option<&mut Card> {
    boards
        .iter_mut()
        .flat_map(|b| b.cards.iter_mut())
        .find(|c| c.id == card_id)
}

pub struct MutationPipeline {
    store: Arc<VersionedStore>,
    locks: Arc<LockRegistry>,
    trash: Arc<TrashBin>,
    control: Arc<PollControl>,
    gate: AsyncMutex<()>,
    visible: watch::Sender<Snapshot>,
}

impl MutationPipeline {
    /// Build a pipeline whose visible state starts at the stored snapshot.
    pub fn load(
        store: Arc<VersionedStore>,
        locks: Arc<LockRegistry>,
        trash: Arc<TrashBin>,
        control: Arc<PollControl>,
    ) -> Result<Self, StoreError> {
        let snapshot = store.read()?;
        control.observe(snapshot.version);
        let (visible, _) = watch::channel(snapshot);
        Ok(Self {
            store,
            locks,
            trash,
            control,
            gate: AsyncMutex::new(()),
            visible,
        })
    }

    /// The snapshot UI code should render, including optimistic changes.
    pub fn current(&self) -> Snapshot {
        self.visible.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Snapshot> {
        self.visible.subscribe()
    }

    pub fn locks(&self) -> &Arc<LockRegistry> {
        &self.locks
    }

    pub fn trash(&self) -> &Arc<TrashBin> {
        &self.trash
    }

    /// Take a snapshot published by the reconciler if it is newer than the
    /// visible one.
    pub async fn adopt_remote(&self, snapshot: Snapshot) -> bool {
        let _gate = self.gate.lock().await;
        let current_version = self.visible.borrow().version;
        if snapshot.version <= current_version {
            return false;
        }
        log::debug!(
            "[taskboard.pipeline] Adopting version {} (was {}) from {}",
            snapshot.version,
            current_version,
            snapshot.last_updated_by
        );
        self.control.observe(snapshot.version);
        self.visible.send_replace(snapshot);
        true
    }

    /// Re-read the store and make it the visible state.
    pub async fn reload(&self) -> Result<Snapshot, StoreError> {
        let _gate = self.gate.lock().await;
        let snapshot = self.store.read()?;
        self.control.observe(snapshot.version);
        self.visible.send_replace(snapshot.clone());
        Ok(snapshot)
    }

    fn guard_card(&self, card: &Card, actor: &User) -> Result<(), MutationError> {
        let permission = self
            .locks
            .try_can_user_edit_card(card.id, actor, &card.created_by)
            .map_err(MutationError::LockRegistry)?;
        if !permission.can_edit {
            log::info!(
                "[taskboard.pipeline] {} blocked on locked card {}",
                actor.username,
                card.id
            );
            return Err(MutationError::Blocked {
                card_id: card.id,
                reason: permission.reason,
            });
        }
        Ok(())
    }

    /// Show `boards` immediately, persist them, then commit or roll back.
    /// Callers hold `gate`. Nothing here awaits: a caller that drops the
    /// mutation future either never reaches this point or sees it finish.
    fn persist(
        &self,
        before: Snapshot,
        boards: Vec<Board>,
        actor: &User,
        action: &str,
    ) -> Result<Snapshot, MutationError> {
        let _in_flight = self.control.begin_mutation();

        self.visible.send_replace(Snapshot {
            boards: boards.clone(),
            ..before.clone()
        });

        match self.store.write(boards, &actor.username) {
            Ok(stored) => {
                self.control.observe(stored.version);
                self.visible.send_replace(stored.clone());
                log::debug!(
                    "[taskboard.pipeline] {} by {} committed as version {}",
                    action,
                    actor.username,
                    stored.version
                );
                Ok(stored)
            }
            Err(e) => {
                self.visible.send_replace(before);
                log::warn!(
                    "[taskboard.pipeline] {} by {} rolled back: {}",
                    action,
                    actor.username,
                    e
                );
                Err(MutationError::Persist(e))
            }
        }
    }

    fn withdraw_from_trash(&self, card_ids: &[i64]) {
        for card_id in card_ids {
            if let Err(e) = self.trash.take(*card_id) {
                log::warn!(
                    "[taskboard.pipeline] Could not withdraw card {} from trash: {}",
                    card_id,
                    e
                );
            }
        }
    }

    pub async fn create_card(
        &self,
        actor: &User,
        board_id: i64,
        draft: CardDraft,
    ) -> Result<Card, MutationError> {
        let _gate = self.gate.lock().await;
        let before = self.current();
        let mut boards = before.boards.clone();

        let now = self.store.clock().now();
        let card = Card {
            id: next_card_id(&boards, now),
            title: draft.title,
            description: draft.description,
            background_color: draft.background_color,
            due_date: draft.due_date,
            created_by: actor.username.clone(),
            assigned_to: draft.assigned_to,
            created_at: now,
        };
        boards
            .iter_mut()
            .find(|b| b.id == board_id)
            .ok_or(MutationError::BoardNotFound(board_id))?
            .cards
            .push(card.clone());

        self.persist(before, boards, actor, "create card")?;
        Ok(card)
    }

    pub async fn edit_card(
        &self,
        actor: &User,
        card_id: i64,
        patch: CardPatch,
    ) -> Result<Card, MutationError> {
        let _gate = self.gate.lock().await;
        let before = self.current();
        let (_, card) = before
            .find_card(card_id)
            .ok_or(MutationError::CardNotFound(card_id))?;
        self.guard_card(card, actor)?;

        let mut boards = before.boards.clone();
        let card = card_mut(&mut boards, card_id).ok_or(MutationError::CardNotFound(card_id))?;
        patch.apply_to(card);
        let edited = card.clone();

        self.persist(before, boards, actor, "edit card")?;
        Ok(edited)
    }

    /// Move a card to the trash. The trash entry must be stored before the
    /// card is removed from its board; if the board write then fails the
    /// entry is withdrawn again.
    pub async fn delete_card(&self, actor: &User, card_id: i64) -> Result<TrashEntry, MutationError> {
        let _gate = self.gate.lock().await;
        let before = self.current();
        let (board_id, board_title, card) = {
            let (board, card) = before
                .find_card(card_id)
                .ok_or(MutationError::CardNotFound(card_id))?;
            (board.id, board.title.clone(), card.clone())
        };
        self.guard_card(&card, actor)?;

        let entry = self
            .trash
            .add(card, board_id, &board_title, &actor.username)
            .map_err(MutationError::Trash)?;

        let mut boards = before.boards.clone();
        for board in &mut boards {
            board.cards.retain(|c| c.id != card_id);
        }

        if let Err(e) = self.persist(before, boards, actor, "delete card") {
            self.withdraw_from_trash(&[card_id]);
            return Err(e);
        }
        Ok(entry)
    }

    /// Drag a card, see [`reorder`]. Dropping a card where it already is
    /// writes nothing.
    pub async fn move_card(
        &self,
        actor: &User,
        card_id: i64,
        source_board_id: i64,
        target_board_id: i64,
        target_card_id: Option<i64>,
        position: DropPosition,
    ) -> Result<Snapshot, MutationError> {
        let _gate = self.gate.lock().await;
        let before = self.current();
        let card = before
            .board(source_board_id)
            .ok_or(MutationError::BoardNotFound(source_board_id))?
            .card(card_id)
            .ok_or(MutationError::CardNotFound(card_id))?;
        if before.board(target_board_id).is_none() {
            return Err(MutationError::BoardNotFound(target_board_id));
        }
        self.guard_card(card, actor)?;

        let boards = reorder(
            &before.boards,
            card_id,
            source_board_id,
            target_board_id,
            target_card_id,
            position,
        );
        if boards == before.boards {
            return Ok(before);
        }
        self.persist(before, boards, actor, "move card")
    }

    pub async fn create_board(
        &self,
        actor: &User,
        title: &str,
        color: &str,
    ) -> Result<Board, MutationError> {
        let _gate = self.gate.lock().await;
        let before = self.current();
        let mut boards = before.boards.clone();
        let board = Board::new(next_board_id(&boards), title.trim(), color);
        boards.push(board.clone());

        self.persist(before, boards, actor, "create board")?;
        Ok(board)
    }

    pub async fn rename_board(
        &self,
        actor: &User,
        board_id: i64,
        title: &str,
    ) -> Result<Snapshot, MutationError> {
        let _gate = self.gate.lock().await;
        let before = self.current();
        let mut boards = before.boards.clone();
        boards
            .iter_mut()
            .find(|b| b.id == board_id)
            .ok_or(MutationError::BoardNotFound(board_id))?
            .title = title.trim().to_string();

        self.persist(before, boards, actor, "rename board")
    }

    /// Delete a board, trashing its cards. Every card must be editable by
    /// the actor, and every card must reach the trash, or nothing happens.
    pub async fn delete_board(&self, actor: &User, board_id: i64) -> Result<Snapshot, MutationError> {
        let _gate = self.gate.lock().await;
        let before = self.current();
        let board = before
            .board(board_id)
            .ok_or(MutationError::BoardNotFound(board_id))?
            .clone();
        for card in &board.cards {
            self.guard_card(card, actor)?;
        }

        let mut trashed = Vec::with_capacity(board.cards.len());
        for card in &board.cards {
            if let Err(e) = self
                .trash
                .add(card.clone(), board.id, &board.title, &actor.username)
            {
                self.withdraw_from_trash(&trashed);
                return Err(MutationError::Trash(e));
            }
            trashed.push(card.id);
        }

        let boards = before
            .boards
            .iter()
            .filter(|b| b.id != board_id)
            .cloned()
            .collect();
        match self.persist(before, boards, actor, "delete board") {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => {
                self.withdraw_from_trash(&trashed);
                Err(e)
            }
        }
    }

    /// Bring a trashed card back to the end of its board, or of the first
    /// board if its board is gone.
    pub async fn restore_card(&self, actor: &User, card_id: i64) -> Result<Card, MutationError> {
        let _gate = self.gate.lock().await;
        let entry = self
            .trash
            .entries()
            .map_err(MutationError::Trash)?
            .into_iter()
            .find(|e| e.card.id == card_id)
            .ok_or(MutationError::CardNotFound(card_id))?;
        self.guard_card(&entry.card, actor)?;

        let before = self.current();
        let mut boards = before.boards.clone();
        let target = boards
            .iter()
            .position(|b| b.id == entry.board_id)
            .or(if boards.is_empty() { None } else { Some(0) })
            .ok_or(MutationError::BoardNotFound(entry.board_id))?;

        let entry = self
            .trash
            .take(card_id)
            .map_err(MutationError::Trash)?
            .ok_or(MutationError::CardNotFound(card_id))?;
        boards[target].cards.push(entry.card.clone());

        let card = entry.card.clone();
        if let Err(e) = self.persist(before, boards, actor, "restore card") {
            if let Err(put_back_err) = self.trash.put_back(entry) {
                log::warn!(
                    "[taskboard.pipeline] Could not return card {} to trash: {}",
                    card_id,
                    put_back_err
                );
            }
            return Err(e);
        }
        Ok(card)
    }

    /// Persist a full board collection supplied by the caller. No lock
    /// checks: callers that edit cards should use the specific mutations.
    pub async fn replace_boards(
        &self,
        actor: &User,
        boards: Vec<Board>,
    ) -> Result<Snapshot, MutationError> {
        let _gate = self.gate.lock().await;
        let before = self.current();
        self.persist(before, boards, actor, "save snapshot")
    }

    /// Purge expired trash and drop any locks left on the purged cards.
    pub fn purge_trash(&self) -> Result<usize, StoreError> {
        let purged = self.trash.purge_expired()?;
        for entry in &purged {
            if let Err(e) = self.locks.release_deleted_card(entry.card.id) {
                log::warn!(
                    "[taskboard.pipeline] Could not release lock of purged card {}: {}",
                    entry.card.id,
                    e
                );
            }
        }
        Ok(purged.len())
    }
}
