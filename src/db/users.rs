//! Durable user store. Account issuance is an external concern; these
//! operations cover the slices the profile surface needs: lookups and
//! the rating-ordered leaderboard. Rating and win/loss updates happen
//! inside the finalize transaction in the match store.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::models::User;
use super::{DbPool, StoreError};
use crate::UserId;

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        rating: row.get(3)?,
        wins: row.get(4)?,
        losses: row.get(5)?,
    })
}

const USER_COLUMNS: &str = "id, username, email, rating, wins, losses";

/// Insert a user row. Registration happens in the external auth service;
/// this exists for provisioning and test fixtures.
pub async fn create_user(
    db: &DbPool,
    id: UserId,
    username: &str,
    email: &str,
) -> Result<(), StoreError> {
    let db = db.clone();
    let username = username.to_string();
    let email = email.to_string();
    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StoreError::Lock)?;
        conn.execute(
            "INSERT INTO users (id, username, email, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, username, email, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    })
    .await
    .map_err(|_| StoreError::Join)?
}

pub async fn get_by_id(db: &DbPool, id: UserId) -> Result<Option<User>, StoreError> {
    let db = db.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StoreError::Lock)?;
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    })
    .await
    .map_err(|_| StoreError::Join)?
}

pub async fn get_by_username(db: &DbPool, username: &str) -> Result<Option<User>, StoreError> {
    let db = db.clone();
    let username = username.to_string();
    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StoreError::Lock)?;
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                params![username],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    })
    .await
    .map_err(|_| StoreError::Join)?
}

/// All users ordered by rating, best first.
pub async fn leaderboard(db: &DbPool) -> Result<Vec<User>, StoreError> {
    let db = db.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StoreError::Lock)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY rating DESC, wins DESC, username ASC"
        ))?;
        let users = stmt
            .query_map([], user_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    })
    .await
    .map_err(|_| StoreError::Join)?
}
