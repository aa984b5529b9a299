use rusqlite_migration::{Migrations, M};

/// Define all schema migrations.
/// Uses SQLite user_version pragma for tracking — no migration table needed.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        "-- Migration 1: Initial schema

-- User records. Credential issuance lives in an external service;
-- this table only carries the profile and match statistics the match
-- engine reads and updates.
CREATE TABLE users (
    id INTEGER PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    email TEXT NOT NULL,
    rating INTEGER NOT NULL DEFAULT 0,
    wins INTEGER NOT NULL DEFAULT 0,
    losses INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

-- Transient match records. `state` is the JSON checkpoint of the live
-- simulation; NULL means the match never received its first snapshot.
-- Rows are deleted at finalize and replaced by a match_history row.
CREATE TABLE matches (
    id TEXT PRIMARY KEY,
    player_a INTEGER NOT NULL,
    player_b INTEGER NOT NULL,
    state TEXT,
    created_at TEXT NOT NULL,
    FOREIGN KEY (player_a) REFERENCES users(id),
    FOREIGN KEY (player_b) REFERENCES users(id)
);

CREATE INDEX idx_matches_player_a ON matches(player_a);
CREATE INDEX idx_matches_player_b ON matches(player_b);

-- Terminal match outcomes, immutable once written.
CREATE TABLE match_history (
    id TEXT PRIMARY KEY,
    winner_id INTEGER NOT NULL,
    winner_score INTEGER NOT NULL,
    loser_id INTEGER NOT NULL,
    loser_score INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    FOREIGN KEY (winner_id) REFERENCES users(id),
    FOREIGN KEY (loser_id) REFERENCES users(id)
);

CREATE INDEX idx_match_history_winner ON match_history(winner_id);
CREATE INDEX idx_match_history_loser ON match_history(loser_id);
",
    )])
}
