//! Lifecycle of active match sessions: creation on challenge acceptance
//! or queue pairing, lookup for inbound gameplay events, and startup
//! rehydration so in-flight matches survive a process restart.

use std::sync::Arc;

use dashmap::DashMap;

use crate::db::{self, DbPool, StoreError};
use crate::game::match_topic;
use crate::game::session::{MatchSession, SessionContext};
use crate::game::state::MatchState;
use crate::rooms::RoomBroker;
use crate::ws::protocol::ServerEvent;
use crate::ws::ConnectionRegistry;
use crate::{MatchId, UserId};

pub struct MatchRegistry {
    db: DbPool,
    rooms: Arc<RoomBroker>,
    connections: Arc<ConnectionRegistry>,
    sessions: DashMap<MatchId, Arc<MatchSession>>,
}

impl MatchRegistry {
    pub fn new(
        db: DbPool,
        rooms: Arc<RoomBroker>,
        connections: Arc<ConnectionRegistry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            db,
            rooms,
            connections,
            sessions: DashMap::new(),
        })
    }

    fn context(self: &Arc<Self>) -> SessionContext {
        SessionContext {
            db: self.db.clone(),
            rooms: self.rooms.clone(),
            connections: self.connections.clone(),
            registry: Arc::downgrade(self),
        }
    }

    /// Create a match: persist the initial record, construct the session
    /// (which fixes sides and checkpoints the first snapshot), and
    /// announce it on the match topic.
    pub async fn create(
        self: &Arc<Self>,
        participants: [UserId; 2],
    ) -> Result<Arc<MatchSession>, StoreError> {
        let id: MatchId = uuid::Uuid::now_v7().to_string();
        db::matches::insert_match(&self.db, &id, participants).await?;

        let session = MatchSession::fresh(id.clone(), participants, self.context());
        // First snapshot lands before anything is broadcast.
        let snapshot = serde_json::to_string(&session.snapshot().await)?;
        db::matches::save_state(&self.db, &id, snapshot).await?;

        self.sessions.insert(id.clone(), session.clone());
        tracing::info!(match_id = %id, ?participants, "match created");

        // Nobody is on the match topic yet, so the start announcement goes
        // straight to each participant; the negotiator subscribes them
        // right after this returns.
        for participant in participants {
            self.connections.send_to(
                participant,
                &ServerEvent::Start {
                    match_id: id.clone(),
                },
            );
        }
        Ok(session)
    }

    pub fn get(&self, id: &MatchId) -> Option<Arc<MatchSession>> {
        self.sessions.get(id).map(|s| s.clone())
    }

    pub fn remove(&self, id: &MatchId) {
        self.sessions.remove(id);
    }

    /// The session a user is currently part of, if any. Used by the
    /// negotiator's busy checks and the connect-time re-subscription.
    pub fn find_by_participant(&self, user_id: UserId) -> Option<Arc<MatchSession>> {
        self.sessions
            .iter()
            .find(|e| e.value().is_participant(user_id))
            .map(|e| e.value().clone())
    }

    /// All sessions containing a user — disconnect handling fans out over
    /// these.
    pub fn sessions_of(&self, user_id: UserId) -> Vec<Arc<MatchSession>> {
        self.sessions
            .iter()
            .filter(|e| e.value().is_participant(user_id))
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Startup rehydration: rebuild a session for every durable record
    /// that holds a snapshot, without re-randomizing sides, and
    /// re-subscribe any participant that is already connected. A snapshot
    /// that was already terminal goes straight through finalize.
    pub async fn rehydrate(self: &Arc<Self>) -> Result<usize, StoreError> {
        let rows = db::matches::load_active(&self.db).await?;
        let mut restored = 0usize;

        for row in rows {
            if self.sessions.contains_key(&row.id) {
                continue;
            }
            let Some(raw) = row.state else { continue };
            let state: MatchState = match serde_json::from_str(&raw) {
                Ok(state) => state,
                Err(err) => {
                    tracing::error!(match_id = %row.id, error = %err, "skipping corrupt checkpoint");
                    continue;
                }
            };

            let session =
                MatchSession::from_checkpoint(row.id.clone(), row.participants, state, self.context());
            self.sessions.insert(row.id.clone(), session.clone());
            restored += 1;

            let topic = match_topic(&row.id);
            for participant in row.participants {
                if self.connections.is_online(participant) {
                    self.rooms.subscribe(&self.connections, participant, &topic);
                }
            }

            if session.status().await == crate::game::state::MatchStatus::Finished {
                tracing::info!(match_id = %row.id, "rehydrated match was already over, finalizing");
                session.finalize(None).await;
            }
        }

        if restored > 0 {
            tracing::info!(restored, "rehydrated in-flight matches");
        }
        Ok(restored)
    }
}
