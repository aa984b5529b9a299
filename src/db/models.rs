use serde::{Deserialize, Serialize};

use crate::{MatchId, UserId};

/// A user profile row. Account creation is external; the match engine
/// only adjusts `rating`, `wins` and `losses`.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub rating: i64,
    pub wins: i64,
    pub losses: i64,
}

/// A transient match row as stored in the `matches` table.
/// `state` carries the latest JSON checkpoint, or None before the first
/// snapshot was persisted.
#[derive(Debug, Clone)]
pub struct MatchRow {
    pub id: MatchId,
    pub participants: [UserId; 2],
    pub state: Option<String>,
}

/// Terminal outcome of a match. Written once at finalize, then immutable.
/// Serialized shape doubles as the payload of the `finished` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchHistoryRecord {
    pub id: MatchId,
    pub winner_id: UserId,
    pub winner_score: u32,
    pub loser_id: UserId,
    pub loser_score: u32,
}
