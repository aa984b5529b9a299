//! Rally match server library.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod auth;
pub mod config;
pub mod db;
pub mod game;
pub mod rooms;
pub mod routes;
pub mod state;
pub mod ws;

/// Opaque user identifier. Accounts are created externally; the server
/// only ever sees the id carried inside a validated access token.
pub type UserId = i64;

/// Match identifier (UUIDv7 string, also the durable primary key).
pub type MatchId = String;
