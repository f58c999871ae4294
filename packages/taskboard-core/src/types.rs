//! Board, card, and snapshot model shared by every component.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Actor name stamped on the seeded snapshot.
pub const SYSTEM_ACTOR: &str = "system";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    /// Creation-timestamp-derived id, unique across the whole snapshot.
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub background_color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    pub created_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Board {
    pub id: i64,
    pub title: String,
    pub color: String,
    #[serde(default)]
    pub cards: Vec<Card>,
}

impl Board {
    pub fn new(id: i64, title: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            color: color.into(),
            cards: Vec::new(),
        }
    }

    pub fn card(&self, card_id: i64) -> Option<&Card> {
        self.cards.iter().find(|c| c.id == card_id)
    }

    pub fn position_of(&self, card_id: i64) -> Option<usize> {
        self.cards.iter().position(|c| c.id == card_id)
    }
}

/// The full board collection plus version metadata; the unit of persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub boards: Vec<Board>,
    pub version: u64,
    pub last_updated: DateTime<Utc>,
    pub last_updated_by: String,
}

impl Snapshot {
    /// First-run snapshot: three empty columns at version 0.
    pub fn seeded(now: DateTime<Utc>) -> Self {
        Self {
            boards: vec![
                Board::new(1, "To Do", "blue"),
                Board::new(2, "In Progress", "yellow"),
                Board::new(3, "Done", "green"),
            ],
            version: 0,
            last_updated: now,
            last_updated_by: SYSTEM_ACTOR.to_string(),
        }
    }

    pub fn board(&self, board_id: i64) -> Option<&Board> {
        self.boards.iter().find(|b| b.id == board_id)
    }

    /// Locate a card and the board that currently owns it.
    pub fn find_card(&self, card_id: i64) -> Option<(&Board, &Card)> {
        self.boards
            .iter()
            .find_map(|b| b.card(card_id).map(|c| (b, c)))
    }

    pub fn card_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.boards.iter().flat_map(|b| b.cards.iter().map(|c| c.id))
    }
}

/// Next card id: the creation time in milliseconds, bumped past any id
/// already present so ids stay unique across all boards.
pub fn next_card_id(boards: &[Board], now: DateTime<Utc>) -> i64 {
    let max_existing = boards
        .iter()
        .flat_map(|b| b.cards.iter().map(|c| c.id))
        .max();
    let ts = now.timestamp_millis();
    match max_existing {
        Some(max) if max >= ts => max + 1,
        _ => ts,
    }
}

/// Next board id, one past the largest in use.
pub fn next_board_id(boards: &[Board]) -> i64 {
    boards.iter().map(|b| b.id).max().unwrap_or(0) + 1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Member,
}

/// The acting user of a mutation or lock operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    pub role: Role,
}

impl User {
    pub fn member(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            email: None,
            role: Role::Member,
        }
    }

    pub fn admin(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            email: None,
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn card(id: i64) -> Card {
        Card {
            id,
            title: format!("C{}", id),
            description: String::new(),
            background_color: String::new(),
            due_date: None,
            created_by: "alice".to_string(),
            assigned_to: None,
            created_at: Utc.timestamp_millis_opt(id).unwrap(),
        }
    }

    #[test]
    fn test_next_card_id_uses_timestamp() {
        let now = Utc.timestamp_millis_opt(5_000).unwrap();
        let mut board = Board::new(1, "To Do", "blue");
        board.cards.push(card(1_000));
        assert_eq!(next_card_id(&[board], now), 5_000);
    }

    #[test]
    fn test_next_card_id_unique_across_boards() {
        let now = Utc.timestamp_millis_opt(5_000).unwrap();
        let mut a = Board::new(1, "To Do", "blue");
        let mut b = Board::new(2, "Done", "green");
        a.cards.push(card(4_000));
        b.cards.push(card(5_000));
        assert_eq!(next_card_id(&[a, b], now), 5_001);
    }

    #[test]
    fn test_find_card() {
        let mut snapshot = Snapshot::seeded(Utc::now());
        snapshot.boards[1].cards.push(card(42));
        let (board, found) = snapshot.find_card(42).unwrap();
        assert_eq!(board.title, "In Progress");
        assert_eq!(found.id, 42);
        assert!(snapshot.find_card(7).is_none());
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let snapshot = Snapshot::seeded(Utc::now());
        let json = serde_json::to_value(&snapshot).unwrap();
        assert!(json.get("lastUpdatedBy").is_some());
        assert_eq!(json["version"], 0);
    }
}
