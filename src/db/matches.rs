//! Durable match store: transient match rows checkpointed by the live
//! simulation, plus the immutable match_history outcomes.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::models::{MatchHistoryRecord, MatchRow};
use super::{DbPool, StoreError};
use crate::{MatchId, UserId};

/// Insert a fresh match row with no state. The first snapshot arrives
/// right after session construction.
pub async fn insert_match(
    db: &DbPool,
    id: &MatchId,
    participants: [UserId; 2],
) -> Result<(), StoreError> {
    let db = db.clone();
    let id = id.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StoreError::Lock)?;
        conn.execute(
            "INSERT INTO matches (id, player_a, player_b, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                id,
                participants[0],
                participants[1],
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    })
    .await
    .map_err(|_| StoreError::Join)?
}

/// Checkpoint the simulation state. A no-op when the row is already gone
/// (finalize raced a late save) — matching behaviour the tick loop relies
/// on: checkpoints never fail a finished match.
pub async fn save_state(db: &DbPool, id: &MatchId, state_json: String) -> Result<(), StoreError> {
    let db = db.clone();
    let id = id.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StoreError::Lock)?;
        conn.execute(
            "UPDATE matches SET state = ?1 WHERE id = ?2",
            params![state_json, id],
        )?;
        Ok(())
    })
    .await
    .map_err(|_| StoreError::Join)?
}

fn match_from_row(row: &Row<'_>) -> rusqlite::Result<MatchRow> {
    Ok(MatchRow {
        id: row.get(0)?,
        participants: [row.get(1)?, row.get(2)?],
        state: row.get(3)?,
    })
}

/// Every match row holding a snapshot — the rehydration set after a
/// process restart. Rows with NULL state never got a first checkpoint
/// and are not resumable.
pub async fn load_active(db: &DbPool) -> Result<Vec<MatchRow>, StoreError> {
    let db = db.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StoreError::Lock)?;
        let mut stmt = conn
            .prepare("SELECT id, player_a, player_b, state FROM matches WHERE state IS NOT NULL")?;
        let rows = stmt
            .query_map([], match_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    })
    .await
    .map_err(|_| StoreError::Join)?
}

fn history_from_row(row: &Row<'_>) -> rusqlite::Result<MatchHistoryRecord> {
    Ok(MatchHistoryRecord {
        id: row.get(0)?,
        winner_id: row.get(1)?,
        winner_score: row.get(2)?,
        loser_id: row.get(3)?,
        loser_score: row.get(4)?,
    })
}

/// Terminal transition, atomically: write the history record, apply the
/// flat rating adjustment and win/loss counters to both participants,
/// and delete the transient match row.
pub async fn finalize_match(
    db: &DbPool,
    record: MatchHistoryRecord,
    rating_delta: i64,
) -> Result<(), StoreError> {
    let db = db.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = db.lock().map_err(|_| StoreError::Lock)?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO match_history (id, winner_id, winner_score, loser_id, loser_score, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.id,
                record.winner_id,
                record.winner_score,
                record.loser_id,
                record.loser_score,
                Utc::now().to_rfc3339()
            ],
        )?;
        tx.execute(
            "UPDATE users SET rating = rating + ?1, wins = wins + 1 WHERE id = ?2",
            params![rating_delta, record.winner_id],
        )?;
        tx.execute(
            "UPDATE users SET rating = rating - ?1, losses = losses + 1 WHERE id = ?2",
            params![rating_delta, record.loser_id],
        )?;
        tx.execute("DELETE FROM matches WHERE id = ?1", params![record.id])?;
        tx.commit()?;
        Ok(())
    })
    .await
    .map_err(|_| StoreError::Join)?
}

/// Look up a terminal outcome, e.g. when a stale `connect` arrives for a
/// match that has already been finalized.
pub async fn find_history(
    db: &DbPool,
    id: &MatchId,
) -> Result<Option<MatchHistoryRecord>, StoreError> {
    let db = db.clone();
    let id = id.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StoreError::Lock)?;
        let record = conn
            .query_row(
                "SELECT id, winner_id, winner_score, loser_id, loser_score
                 FROM match_history WHERE id = ?1",
                params![id],
                history_from_row,
            )
            .optional()?;
        Ok(record)
    })
    .await
    .map_err(|_| StoreError::Join)?
}

/// Match history involving a user, newest first. Feeds the profile
/// endpoint.
pub async fn history_for_user(
    db: &DbPool,
    user_id: UserId,
) -> Result<Vec<MatchHistoryRecord>, StoreError> {
    let db = db.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StoreError::Lock)?;
        let mut stmt = conn.prepare(
            "SELECT id, winner_id, winner_score, loser_id, loser_score
             FROM match_history WHERE winner_id = ?1 OR loser_id = ?1
             ORDER BY created_at DESC",
        )?;
        let rows = stmt
            .query_map(params![user_id], history_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    })
    .await
    .map_err(|_| StoreError::Join)?
}
