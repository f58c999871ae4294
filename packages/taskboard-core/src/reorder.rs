//! Drag-and-drop reorder.
//!
//! Pure: takes the current boards and returns the new collection. The dragged
//! card is removed first, and the target index is looked up in the reduced
//! sequence, so "before/after" always refers to where the target sits once
//! the dragged card is gone.

use serde::{Deserialize, Serialize};

use crate::types::Board;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DropPosition {
    Before,
    After,
}

/// Move `dragged_card_id` from `source_board_id` to `target_board_id`,
/// placing it before/after `target_card_id`, or at the end when there is no
/// target or the target is not on the destination board.
///
/// Dropping a card onto itself, or naming a board or card that does not
/// exist, returns the boards unchanged.
pub fn reorder(
    boards: &[Board],
    dragged_card_id: i64,
    source_board_id: i64,
    target_board_id: i64,
    target_card_id: Option<i64>,
    position: DropPosition,
) -> Vec<Board> {
    if target_card_id == Some(dragged_card_id) {
        return boards.to_vec();
    }

    let Some(src) = boards.iter().position(|b| b.id == source_board_id) else {
        log::debug!("[taskboard.reorder] Source board {} not found", source_board_id);
        return boards.to_vec();
    };
    let Some(dst) = boards.iter().position(|b| b.id == target_board_id) else {
        log::debug!("[taskboard.reorder] Target board {} not found", target_board_id);
        return boards.to_vec();
    };
    let Some(from) = boards[src].position_of(dragged_card_id) else {
        log::debug!(
            "[taskboard.reorder] Card {} not on board {}",
            dragged_card_id,
            source_board_id
        );
        return boards.to_vec();
    };

    let mut next = boards.to_vec();
    let card = next[src].cards.remove(from);

    let dest = &mut next[dst].cards;
    let insert_at = target_card_id
        .and_then(|target| dest.iter().position(|c| c.id == target))
        .map(|i| match position {
            DropPosition::Before => i,
            DropPosition::After => i + 1,
        })
        .unwrap_or(dest.len());
    dest.insert(insert_at, card);

    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Card;
    use chrono::Utc;

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

    fn boards() -> Vec<Board> {
        let mut todo = Board::new(1, "To Do", "blue");
        todo.cards = vec![card(1), card(2), card(3)];
        let mut done = Board::new(2, "Done", "green");
        done.cards = vec![card(10), card(11)];
        vec![todo, done]
    }

    fn ids(board: &Board) -> Vec<i64> {
        board.cards.iter().map(|c| c.id).collect()
    }

    #[test]
    fn test_same_board_move_before() {
        let result = reorder(&boards(), 3, 1, 1, Some(1), DropPosition::Before);
        assert_eq!(ids(&result[0]), vec![3, 1, 2]);
    }

    #[test]
    fn test_same_board_move_after() {
        let result = reorder(&boards(), 1, 1, 1, Some(3), DropPosition::After);
        assert_eq!(ids(&result[0]), vec![2, 3, 1]);
    }

    #[test]
    fn test_drop_on_itself_is_noop() {
        let input = boards();
        for position in [DropPosition::Before, DropPosition::After] {
            assert_eq!(reorder(&input, 2, 1, 1, Some(2), position), input);
        }
    }

    #[test]
    fn test_drop_in_current_place_is_noop() {
        let input = boards();
        assert_eq!(reorder(&input, 2, 1, 1, Some(1), DropPosition::After), input);
        assert_eq!(reorder(&input, 2, 1, 1, Some(3), DropPosition::Before), input);
    }

    #[test]
    fn test_same_board_without_target_appends() {
        let result = reorder(&boards(), 1, 1, 1, None, DropPosition::Before);
        assert_eq!(ids(&result[0]), vec![2, 3, 1]);
    }

    #[test]
    fn test_cross_board_move() {
        let result = reorder(&boards(), 2, 1, 2, Some(11), DropPosition::Before);
        assert_eq!(ids(&result[0]), vec![1, 3]);
        assert_eq!(ids(&result[1]), vec![10, 2, 11]);
    }

    #[test]
    fn test_cross_board_missing_target_appends() {
        // Target was deleted concurrently.
        let result = reorder(&boards(), 2, 1, 2, Some(99), DropPosition::Before);
        assert_eq!(ids(&result[0]), vec![1, 3]);
        assert_eq!(ids(&result[1]), vec![10, 11, 2]);
    }

    #[test]
    fn test_cross_board_to_empty_board() {
        let mut input = boards();
        input.push(Board::new(3, "Later", "grey"));
        let result = reorder(&input, 1, 1, 3, None, DropPosition::After);
        assert_eq!(ids(&result[2]), vec![1]);
        assert_eq!(ids(&result[0]), vec![2, 3]);
    }

    #[test]
    fn test_unknown_card_or_board_unchanged() {
        let input = boards();
        assert_eq!(reorder(&input, 42, 1, 2, None, DropPosition::After), input);
        assert_eq!(reorder(&input, 1, 9, 2, None, DropPosition::After), input);
        assert_eq!(reorder(&input, 1, 1, 9, None, DropPosition::After), input);
        // Card exists, but not on the named source board.
        assert_eq!(reorder(&input, 10, 1, 2, None, DropPosition::After), input);
    }

    #[test]
    fn test_card_count_preserved() {
        let input = boards();
        let result = reorder(&input, 3, 1, 2, Some(10), DropPosition::After);
        let before: usize = input.iter().map(|b| b.cards.len()).sum();
        let after: usize = result.iter().map(|b| b.cards.len()).sum();
        assert_eq!(before, after);
    }
}
