pub mod challenge;
pub mod registry;
pub mod session;
pub mod state;

use crate::MatchId;

/// Broadcast topic for one match.
pub fn match_topic(id: &MatchId) -> String {
    format!("match:{id}")
}
