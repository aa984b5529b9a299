//! Challenge negotiation and the FIFO matchmaking queue.
//!
//! Challenges are ephemeral, held only in memory, and expire lazily: an
//! expired challenge simply behaves as not-found the next time anything
//! touches it. The queue pairs a newcomer with the waiting head through
//! one atomic pop followed by a standard challenge.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::db::StoreError;
use crate::game::match_topic;
use crate::game::registry::MatchRegistry;
use crate::game::session::MatchSession;
use crate::rooms::RoomBroker;
use crate::ws::protocol::ServerEvent;
use crate::ws::ConnectionRegistry;
use crate::UserId;

/// How long a challenge stays acceptable.
pub const CHALLENGE_TTL_SECS: i64 = 15;

/// An ephemeral proposal to start a match between two identities.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub id: String,
    pub initiator: UserId,
    pub target: UserId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Challenge {
    fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    pub fn involves(&self, user_id: UserId) -> bool {
        self.initiator == user_id || self.target == user_id
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChallengeError {
    #[error("You cannot challenge yourself")]
    SelfTarget,
    #[error("User is offline")]
    TargetOffline,
    #[error("User is busy")]
    TargetBusy,
    #[error("You are already in a challenge, queue or match")]
    InitiatorBusy,
    #[error("You are already in queue")]
    AlreadyQueued,
    #[error("Challenge not found")]
    NotFound,
    #[error("Could not create the match")]
    MatchCreation,
}

/// What `enqueue` did with the caller.
#[derive(Debug, Clone)]
pub enum QueueOutcome {
    /// Queue was empty; the caller now waits at the head.
    Queued,
    /// A waiting opponent was popped and challenged immediately.
    Challenged(Challenge),
}

pub struct ChallengeNegotiator {
    challenges: DashMap<String, Challenge>,
    queue: Mutex<VecDeque<UserId>>,
    ttl: TimeDelta,
}

impl ChallengeNegotiator {
    pub fn new() -> Self {
        Self::with_ttl(TimeDelta::seconds(CHALLENGE_TTL_SECS))
    }

    /// Negotiator with a custom TTL. Tests use this to exercise expiry
    /// without waiting out the real window.
    pub fn with_ttl(ttl: TimeDelta) -> Self {
        Self {
            challenges: DashMap::new(),
            queue: Mutex::new(VecDeque::new()),
            ttl,
        }
    }

    /// True when the user is part of any unexpired challenge. Expired
    /// entries encountered on the way are dropped.
    fn in_challenge(&self, user_id: UserId) -> bool {
        self.challenges.retain(|_, c| !c.is_expired());
        self.challenges.iter().any(|c| c.involves(user_id))
    }

    pub async fn is_queued(&self, user_id: UserId) -> bool {
        self.queue.lock().await.contains(&user_id)
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Issue a challenge. Both parties are notified with the full
    /// challenge payload; the dedupe checks here are the only guard
    /// against duplicate outstanding challenges.
    pub async fn create(
        &self,
        connections: &ConnectionRegistry,
        matches: &MatchRegistry,
        initiator: UserId,
        target: UserId,
    ) -> Result<Challenge, ChallengeError> {
        if initiator == target {
            return Err(ChallengeError::SelfTarget);
        }
        if !connections.is_online(target) {
            return Err(ChallengeError::TargetOffline);
        }
        if self.is_queued(target).await
            || self.in_challenge(target)
            || matches.find_by_participant(target).is_some()
        {
            return Err(ChallengeError::TargetBusy);
        }
        if self.is_queued(initiator).await
            || self.in_challenge(initiator)
            || matches.find_by_participant(initiator).is_some()
        {
            return Err(ChallengeError::InitiatorBusy);
        }

        let now = Utc::now();
        let challenge = Challenge {
            id: uuid::Uuid::now_v7().to_string(),
            initiator,
            target,
            created_at: now,
            expires_at: now + self.ttl,
        };
        self.challenges
            .insert(challenge.id.clone(), challenge.clone());
        tracing::info!(challenge_id = %challenge.id, initiator, target, "challenge created");

        let event = ServerEvent::Challenged(challenge.clone());
        connections.send_to(initiator, &event);
        connections.send_to(target, &event);
        Ok(challenge)
    }

    /// Look up an unexpired challenge involving `user_id` and consume it.
    fn take(&self, challenge_id: &str, user_id: UserId) -> Result<Challenge, ChallengeError> {
        let found = self
            .challenges
            .get(challenge_id)
            .filter(|c| c.involves(user_id))
            .map(|c| c.clone());
        let Some(challenge) = found else {
            return Err(ChallengeError::NotFound);
        };

        // Lazy expiry: an expired challenge reads as not-found.
        self.challenges.remove(challenge_id);
        if challenge.is_expired() {
            return Err(ChallengeError::NotFound);
        }
        Ok(challenge)
    }

    /// Accept: consume the challenge, create the match, subscribe both
    /// identities to its topic and notify them.
    pub async fn accept(
        &self,
        connections: &ConnectionRegistry,
        rooms: &RoomBroker,
        matches: &Arc<MatchRegistry>,
        challenge_id: &str,
        accepter: UserId,
    ) -> Result<Arc<MatchSession>, ChallengeError> {
        let challenge = self.take(challenge_id, accepter)?;

        let session = matches
            .create([challenge.initiator, challenge.target])
            .await
            .map_err(|err: StoreError| {
                tracing::error!(challenge_id, error = %err, "match creation failed");
                ChallengeError::MatchCreation
            })?;

        let topic = match_topic(&session.id);
        rooms.subscribe(connections, challenge.initiator, &topic);
        rooms.subscribe(connections, challenge.target, &topic);

        let event = ServerEvent::ChallengeAccepted(challenge.clone());
        connections.send_to(challenge.initiator, &event);
        connections.send_to(challenge.target, &event);
        Ok(session)
    }

    /// Decline: remove the challenge and tell both parties. No match.
    pub async fn decline(
        &self,
        connections: &ConnectionRegistry,
        challenge_id: &str,
        decliner: UserId,
    ) -> Result<Challenge, ChallengeError> {
        let challenge = self.take(challenge_id, decliner)?;

        let event = ServerEvent::ChallengeDeclined(challenge.clone());
        connections.send_to(challenge.initiator, &event);
        connections.send_to(challenge.target, &event);
        Ok(challenge)
    }

    /// Join the matchmaking queue. With a waiting head, the pop and the
    /// follow-up challenge form one step from the callers' point of view:
    /// the head is popped under the queue lock, so two racing callers can
    /// never both pair with it. The resulting challenge is a standard one
    /// with the normal TTL.
    pub async fn enqueue(
        &self,
        connections: &ConnectionRegistry,
        matches: &MatchRegistry,
        user_id: UserId,
    ) -> Result<QueueOutcome, ChallengeError> {
        let head = {
            let mut queue = self.queue.lock().await;
            if queue.contains(&user_id) {
                return Err(ChallengeError::AlreadyQueued);
            }
            match queue.pop_front() {
                Some(head) => Some(head),
                None => {
                    queue.push_back(user_id);
                    None
                }
            }
        };

        match head {
            Some(opponent) => match self.create(connections, matches, user_id, opponent).await {
                Ok(challenge) => Ok(QueueOutcome::Challenged(challenge)),
                Err(err @ ChallengeError::InitiatorBusy) => {
                    // The newcomer was unfit to pair; the head keeps their
                    // turn at the front.
                    self.queue.lock().await.push_front(opponent);
                    Err(err)
                }
                Err(err) => {
                    // The popped head can no longer play. Tell them their
                    // spot is gone, if any of their connections survive.
                    tracing::debug!(head = opponent, error = %err, "queue head dropped");
                    connections.send_to(
                        opponent,
                        &ServerEvent::Notification {
                            message: "You are no longer in queue, please queue again".to_string(),
                            kind: "info".to_string(),
                        },
                    );
                    Err(err)
                }
            },
            None => {
                tracing::debug!(user_id, "queued for auto-match");
                Ok(QueueOutcome::Queued)
            }
        }
    }
}

impl Default for ChallengeNegotiator {
    fn default() -> Self {
        Self::new()
    }
}
