//! JSON wire protocol: `{event, data}` envelopes in both directions, and
//! the dispatch of inbound gameplay events onto the negotiator and match
//! sessions.
//!
//! Every validation failure turns into a `notification` back to the
//! requesting identity only; nothing here can close a connection or
//! crash a session.

use serde::{Deserialize, Serialize};

use crate::db;
use crate::db::models::MatchHistoryRecord;
use crate::game::challenge::{Challenge, QueueOutcome};
use crate::game::state::MatchState;
use crate::state::AppState;
use crate::{MatchId, UserId};

/// Events clients send over the WebSocket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "challenge")]
    Challenge {
        #[serde(rename = "targetId")]
        target_id: UserId,
    },
    #[serde(rename = "challenge-accept")]
    ChallengeAccept {
        #[serde(rename = "matchId")]
        match_id: MatchId,
    },
    #[serde(rename = "challenge-decline")]
    ChallengeDecline {
        #[serde(rename = "matchId")]
        match_id: MatchId,
    },
    #[serde(rename = "queue")]
    Queue,
    #[serde(rename = "connect")]
    Connect {
        #[serde(rename = "matchId")]
        match_id: MatchId,
    },
    #[serde(rename = "ready")]
    Ready {
        #[serde(rename = "matchId")]
        match_id: MatchId,
    },
    #[serde(rename = "moveUp")]
    MoveUp {
        #[serde(rename = "matchId")]
        match_id: MatchId,
    },
    #[serde(rename = "moveDown")]
    MoveDown {
        #[serde(rename = "matchId")]
        match_id: MatchId,
    },
    #[serde(rename = "quit")]
    Quit {
        #[serde(rename = "matchId")]
        match_id: MatchId,
    },
    #[serde(rename = "afk")]
    Afk {
        #[serde(rename = "matchId")]
        match_id: MatchId,
    },
}

/// Events the server pushes to clients: per match topic (`state`,
/// `ready`, `start`, `finished`), per identity (challenge lifecycle and
/// notifications), and the global presence `status`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "state")]
    State(MatchState),
    #[serde(rename = "ready")]
    Ready {},
    #[serde(rename = "start")]
    Start {
        #[serde(rename = "matchId")]
        match_id: MatchId,
    },
    #[serde(rename = "finished")]
    Finished(MatchHistoryRecord),
    #[serde(rename = "challenged")]
    Challenged(Challenge),
    #[serde(rename = "challenge-accepted")]
    ChallengeAccepted(Challenge),
    #[serde(rename = "challenge-declined")]
    ChallengeDeclined(Challenge),
    #[serde(rename = "notification")]
    Notification {
        message: String,
        #[serde(rename = "type")]
        kind: String,
    },
    #[serde(rename = "status")]
    Status {
        #[serde(rename = "userId")]
        user_id: UserId,
        online: bool,
    },
}

impl ServerEvent {
    /// Encode as a WebSocket text frame. Events that cannot serialize are
    /// dropped rather than tearing anything down.
    pub fn to_message(&self) -> Option<axum::extract::ws::Message> {
        match serde_json::to_string(self) {
            Ok(json) => Some(axum::extract::ws::Message::Text(json.into())),
            Err(err) => {
                tracing::error!(error = %err, "failed to encode server event");
                None
            }
        }
    }
}

/// Soft, user-visible error/info delivery.
pub fn notify(state: &AppState, user_id: UserId, message: &str, kind: &str) {
    state.connections.send_to(
        user_id,
        &ServerEvent::Notification {
            message: message.to_string(),
            kind: kind.to_string(),
        },
    );
}

/// Handle one inbound text frame from an authenticated connection.
pub async fn handle_text_message(text: &str, state: &AppState, user_id: UserId) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(err) => {
            tracing::debug!(user_id, error = %err, "undecodable client event");
            notify(state, user_id, "Unrecognized event", "error");
            return;
        }
    };
    dispatch(event, state, user_id).await;
}

async fn dispatch(event: ClientEvent, state: &AppState, user_id: UserId) {
    match event {
        ClientEvent::Challenge { target_id } => {
            if let Err(err) = state
                .challenges
                .create(&state.connections, &state.matches, user_id, target_id)
                .await
            {
                notify(state, user_id, &err.to_string(), "error");
            }
        }
        ClientEvent::ChallengeAccept { match_id } => {
            if let Err(err) = state
                .challenges
                .accept(
                    &state.connections,
                    &state.rooms,
                    &state.matches,
                    &match_id,
                    user_id,
                )
                .await
            {
                notify(state, user_id, &err.to_string(), "error");
            }
        }
        ClientEvent::ChallengeDecline { match_id } => {
            if let Err(err) = state
                .challenges
                .decline(&state.connections, &match_id, user_id)
                .await
            {
                notify(state, user_id, &err.to_string(), "error");
            }
        }
        ClientEvent::Queue => {
            match state
                .challenges
                .enqueue(&state.connections, &state.matches, user_id)
                .await
            {
                Ok(QueueOutcome::Queued) => {
                    notify(state, user_id, "You are now in queue", "success");
                }
                Ok(QueueOutcome::Challenged(_)) => {
                    // Both parties already received the challenge payload.
                }
                Err(err) => notify(state, user_id, &err.to_string(), "error"),
            }
        }
        ClientEvent::Connect { match_id } => match state.matches.get(&match_id) {
            Some(session) => session.connect(user_id).await,
            None => {
                // The match may already be finalized; surface its outcome.
                match db::matches::find_history(&state.db, &match_id).await {
                    Ok(Some(record)) => {
                        state
                            .connections
                            .send_to(user_id, &ServerEvent::Finished(record));
                    }
                    Ok(None) => notify(state, user_id, "Match not found", "error"),
                    Err(err) => {
                        tracing::error!(%match_id, error = %err, "history lookup failed");
                        notify(state, user_id, "Match not found", "error");
                    }
                }
            }
        },
        ClientEvent::Ready { match_id } => with_session(state, user_id, &match_id, |s| async move {
            s.set_ready(user_id).await
        })
        .await,
        ClientEvent::MoveUp { match_id } => with_session(state, user_id, &match_id, |s| async move {
            s.move_paddle(user_id, true).await
        })
        .await,
        ClientEvent::MoveDown { match_id } => {
            with_session(state, user_id, &match_id, |s| async move {
                s.move_paddle(user_id, false).await
            })
            .await
        }
        ClientEvent::Quit { match_id } => with_session(state, user_id, &match_id, |s| async move {
            s.quit(user_id).await
        })
        .await,
        ClientEvent::Afk { match_id } => with_session(state, user_id, &match_id, |s| async move {
            s.afk(user_id).await
        })
        .await,
    }
}

async fn with_session<F, Fut>(state: &AppState, user_id: UserId, match_id: &MatchId, f: F)
where
    F: FnOnce(std::sync::Arc<crate::game::session::MatchSession>) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    match state.matches.get(match_id) {
        Some(session) => f(session).await,
        None => notify(state, user_id, "Match not found", "error"),
    }
}
