use std::sync::Arc;

use crate::db::DbPool;
use crate::game::challenge::ChallengeNegotiator;
use crate::game::registry::MatchRegistry;
use crate::rooms::RoomBroker;
use crate::ws::ConnectionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// JWT signing secret (256-bit random key)
    pub jwt_secret: Vec<u8>,
    /// Active WebSocket connections per user; presence derives from this
    pub connections: Arc<ConnectionRegistry>,
    /// Topic subscriptions for fan-out (the `everyone` topic and per-match topics)
    pub rooms: Arc<RoomBroker>,
    /// Pending challenges and the matchmaking queue
    pub challenges: Arc<ChallengeNegotiator>,
    /// Live match sessions
    pub matches: Arc<MatchRegistry>,
}

impl AppState {
    pub fn new(db: DbPool, jwt_secret: Vec<u8>) -> Self {
        let connections = Arc::new(ConnectionRegistry::new());
        let rooms = Arc::new(RoomBroker::new());
        let matches = MatchRegistry::new(db.clone(), rooms.clone(), connections.clone());
        Self {
            db,
            jwt_secret,
            connections,
            rooms,
            challenges: Arc::new(ChallengeNegotiator::new()),
            matches,
        }
    }
}
