//! Per-match state machine and fixed-tick simulation loop.
//!
//! One session owns one match. While running, the tick task is the sole
//! mutator of ball and score state; paddle moves and lifecycle events
//! mutate out-of-band and become visible on the next tick. All durable
//! writes go through spawn_blocking so no match ever blocks another.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};

use crate::db::models::MatchHistoryRecord;
use crate::db::{self, DbPool};
use crate::game::match_topic;
use crate::game::registry::MatchRegistry;
use crate::game::state::{MatchState, MatchStatus, Side, TickOutcome};
use crate::rooms::RoomBroker;
use crate::ws::protocol::ServerEvent;
use crate::ws::ConnectionRegistry;
use crate::{MatchId, UserId};

/// Target tick interval, ~60 Hz. Best-effort: missed ticks are delayed,
/// never bunched.
const TICK_INTERVAL: Duration = Duration::from_micros(16_667);

/// Flat rating adjustment applied to both participants at finalize.
const RATING_DELTA: i64 = 20;

/// Collaborators a session needs: checkpoint store, broadcast fan-out,
/// presence, and a way back to the registry for removal at finalize.
#[derive(Clone)]
pub struct SessionContext {
    pub db: DbPool,
    pub rooms: Arc<RoomBroker>,
    pub connections: Arc<ConnectionRegistry>,
    pub registry: Weak<MatchRegistry>,
}

pub struct MatchSession {
    pub id: MatchId,
    pub participants: [UserId; 2],
    state: Mutex<MatchState>,
    /// Participants that have sent `connect` for this match.
    connected: Mutex<HashSet<UserId>>,
    /// Checked at the top of every tick; flipping it stops the loop
    /// after the current iteration completes.
    paused: AtomicBool,
    /// Exactly one tick task per session.
    running: AtomicBool,
    /// Finalize guard: the terminal transition runs its side effects once.
    finalized: AtomicBool,
    ctx: SessionContext,
}

impl std::fmt::Debug for MatchSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchSession")
            .field("id", &self.id)
            .field("participants", &self.participants)
            .finish_non_exhaustive()
    }
}

impl MatchSession {
    /// Fresh match: random side assignment and initial snapshot. The
    /// caller persists the snapshot before any broadcast.
    pub(crate) fn fresh(id: MatchId, participants: [UserId; 2], ctx: SessionContext) -> Arc<Self> {
        Self::with_state(id, participants, MatchState::new(participants), ctx)
    }

    /// Rebuild from a durable checkpoint. Sides are already fixed and are
    /// not re-randomized. Nobody is connected after a restart, so any
    /// non-terminal status reverts to waiting with ready flags cleared.
    pub(crate) fn from_checkpoint(
        id: MatchId,
        participants: [UserId; 2],
        mut state: MatchState,
        ctx: SessionContext,
    ) -> Arc<Self> {
        if state.status != MatchStatus::Finished {
            state.status = MatchStatus::Waiting;
            state.clear_ready();
            state.left.online = false;
            state.right.online = false;
        }
        Self::with_state(id, participants, state, ctx)
    }

    fn with_state(
        id: MatchId,
        participants: [UserId; 2],
        state: MatchState,
        ctx: SessionContext,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            participants,
            state: Mutex::new(state),
            connected: Mutex::new(HashSet::new()),
            paused: AtomicBool::new(true),
            running: AtomicBool::new(false),
            finalized: AtomicBool::new(false),
            ctx,
        })
    }

    pub fn is_participant(&self, user_id: UserId) -> bool {
        self.participants.contains(&user_id)
    }

    pub async fn snapshot(&self) -> MatchState {
        self.state.lock().await.clone()
    }

    pub async fn status(&self) -> MatchStatus {
        self.state.lock().await.status
    }

    fn topic(&self) -> String {
        match_topic(&self.id)
    }

    /// A participant's client entered the match page. Marks that side
    /// online; once every participant has connected the match moves to
    /// ready. A stale connect after the terminal state re-sends the
    /// outcome instead, running the (idempotent) finalize first.
    pub async fn connect(self: &Arc<Self>, user_id: UserId) {
        if !self.is_participant(user_id) {
            tracing::debug!(match_id = %self.id, user_id, "connect from non-participant ignored");
            return;
        }

        if self.status().await == MatchStatus::Finished {
            self.finalize(None).await;
            // The summary goes straight to the requester; their topic
            // membership is not guaranteed at this point.
            match db::matches::find_history(&self.ctx.db, &self.id).await {
                Ok(Some(record)) => {
                    self.ctx
                        .connections
                        .send_to(user_id, &ServerEvent::Finished(record));
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(match_id = %self.id, error = %err, "history lookup failed");
                }
            }
            return;
        }

        let all_connected = {
            let mut connected = self.connected.lock().await;
            connected.insert(user_id);
            self.participants.iter().all(|p| connected.contains(p))
        };

        {
            let mut state = self.state.lock().await;
            if let Some(side) = state.side_of(user_id) {
                state.paddle_mut(side).online = true;
            }
        }
        self.persist().await;

        if all_connected {
            self.get_ready().await;
        }
        self.broadcast_state().await;
    }

    /// Transition to ready and announce it. Does not imply running; both
    /// sides still have to flag ready.
    async fn get_ready(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().await;
            if state.status == MatchStatus::Finished {
                return;
            }
            state.status = MatchStatus::Ready;
        }
        self.persist().await;
        self.ctx.rooms.publish(&self.topic(), &ServerEvent::Ready {});

        // Both flags can already be set when ready is re-entered (AFK).
        self.try_start().await;
    }

    /// Flag one side as ready. Setting an already-true flag has no
    /// further effect. Starts the loop once both sides are ready and the
    /// session is in the ready state.
    pub async fn set_ready(self: &Arc<Self>, user_id: UserId) {
        {
            let mut state = self.state.lock().await;
            let Some(side) = state.side_of(user_id) else {
                return;
            };
            state.paddle_mut(side).ready = true;
        }
        self.broadcast_state().await;
        self.try_start().await;
    }

    async fn try_start(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().await;
            if state.status != MatchStatus::Ready || !state.both_ready() {
                return;
            }
            state.status = MatchStatus::Running;
            // Unpause inside the critical section so a racing disconnect
            // (pause flag first, status flip under the lock) cannot be
            // overwritten after it already reverted the status.
            self.paused.store(false, Ordering::SeqCst);
        }
        self.persist().await;
        self.broadcast_state().await;
        self.spawn_loop();
    }

    fn spawn_loop(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            // A loop is still alive; unpausing it was enough.
            return;
        }
        let session = Arc::clone(self);
        tokio::spawn(session.run_loop());
    }

    async fn run_loop(self: Arc<Self>) {
        tracing::debug!(match_id = %self.id, "tick loop started");
        let mut ticker = interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if self.paused.load(Ordering::SeqCst) {
                break;
            }

            let outcome = {
                let mut state = self.state.lock().await;
                // The status is the authority: only a running match may
                // advance, whatever the pause flag said a moment ago.
                if state.status != MatchStatus::Running {
                    break;
                }
                state.step()
            };
            self.broadcast_state().await;

            match outcome {
                TickOutcome::Continue => {}
                TickOutcome::RoundScored(side) => {
                    tracing::debug!(match_id = %self.id, ?side, "round scored");
                    self.persist().await;
                }
                TickOutcome::MatchOver(side) => {
                    tracing::info!(match_id = %self.id, ?side, "score limit reached");
                    self.persist().await;
                    self.finalize(None).await;
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        tracing::debug!(match_id = %self.id, "tick loop stopped");

        // An unpause can land between the pause check and the flag store;
        // re-arm so a running match never sits without its loop.
        if !self.paused.load(Ordering::SeqCst)
            && self.state.lock().await.status == MatchStatus::Running
        {
            self.spawn_loop();
        }
    }

    /// Either participant losing their last connection pauses the match
    /// for both sides: ready flags clear and the status reverts to
    /// waiting.
    pub async fn handle_disconnect(&self, user_id: UserId) {
        if !self.is_participant(user_id) {
            return;
        }
        self.paused.store(true, Ordering::SeqCst);
        self.connected.lock().await.remove(&user_id);

        {
            let mut state = self.state.lock().await;
            if state.status == MatchStatus::Finished {
                return;
            }
            if let Some(side) = state.side_of(user_id) {
                state.paddle_mut(side).online = false;
            }
            state.clear_ready();
            state.status = MatchStatus::Waiting;
        }
        self.persist().await;
        self.broadcast_state().await;
    }

    /// AFK flow: the idle side drops offline and unready, the match
    /// reverts to waiting, then immediately re-enters ready — both
    /// transitions persisted and broadcast, signalling that a re-ready is
    /// expected without requiring a reconnect.
    pub async fn afk(self: &Arc<Self>, user_id: UserId) {
        if !self.is_participant(user_id) {
            return;
        }
        self.paused.store(true, Ordering::SeqCst);

        {
            let mut state = self.state.lock().await;
            if state.status == MatchStatus::Finished {
                return;
            }
            if let Some(side) = state.side_of(user_id) {
                state.paddle_mut(side).online = false;
            }
            state.clear_ready();
            state.status = MatchStatus::Waiting;
        }
        self.broadcast_state().await;
        self.persist().await;

        {
            let mut state = self.state.lock().await;
            state.status = MatchStatus::Ready;
        }
        self.broadcast_state().await;
        self.persist().await;
    }

    /// Voluntary exit: finalize with whatever scores currently stand.
    pub async fn quit(&self, user_id: UserId) {
        if !self.is_participant(user_id) {
            return;
        }
        self.paused.store(true, Ordering::SeqCst);
        self.finalize(Some(user_id)).await;
    }

    /// Move a paddle one step, independent of the tick cadence; the next
    /// tick sees the new position.
    pub async fn move_paddle(&self, user_id: UserId, up: bool) {
        {
            let mut state = self.state.lock().await;
            let Some(side) = state.side_of(user_id) else {
                return;
            };
            state.move_paddle(side, up);
        }
        self.broadcast_state().await;
        self.persist().await;
    }

    /// Terminal transition. Idempotent: only the first call performs side
    /// effects. Writes the history record, applies the flat rating
    /// adjustment and win/loss counters, deletes the transient match row,
    /// removes the session from the registry, and broadcasts `finished`.
    ///
    /// Winner is the side with the strictly higher score. Scores can only
    /// be level when someone quit mid-match; the quitter loses the tie.
    pub async fn finalize(&self, quitter: Option<UserId>) {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return;
        }
        self.paused.store(true, Ordering::SeqCst);

        let record = {
            let mut state = self.state.lock().await;
            state.status = MatchStatus::Finished;

            let winner = match state.left.score.cmp(&state.right.score) {
                std::cmp::Ordering::Greater => Side::Left,
                std::cmp::Ordering::Less => Side::Right,
                std::cmp::Ordering::Equal => match quitter.and_then(|q| state.side_of(q)) {
                    Some(quit_side) => quit_side.opposite(),
                    None => {
                        tracing::warn!(match_id = %self.id, "tie finalize without a quitter");
                        Side::Left
                    }
                },
            };
            let loser = winner.opposite();
            MatchHistoryRecord {
                id: self.id.clone(),
                winner_id: state.paddle(winner).user_id,
                winner_score: state.paddle(winner).score,
                loser_id: state.paddle(loser).user_id,
                loser_score: state.paddle(loser).score,
            }
        };

        if let Err(err) =
            db::matches::finalize_match(&self.ctx.db, record.clone(), RATING_DELTA).await
        {
            // In-memory outcome still stands; the broadcast goes out.
            tracing::error!(match_id = %self.id, error = %err, "failed to persist match outcome");
        }

        if let Some(registry) = self.ctx.registry.upgrade() {
            registry.remove(&self.id);
        }

        tracing::info!(
            match_id = %self.id,
            winner_id = record.winner_id,
            winner_score = record.winner_score,
            loser_id = record.loser_id,
            loser_score = record.loser_score,
            "match finalized"
        );
        self.ctx
            .rooms
            .publish(&self.topic(), &ServerEvent::Finished(record));
    }

    pub(crate) async fn broadcast_state(&self) {
        let snapshot = self.state.lock().await.clone();
        self.ctx
            .rooms
            .publish(&self.topic(), &ServerEvent::State(snapshot));
    }

    /// Best-effort checkpoint. Failures are logged and never halt the
    /// simulation; memory stays authoritative until the next write lands.
    async fn persist(&self) {
        let json = {
            let state = self.state.lock().await;
            match serde_json::to_string(&*state) {
                Ok(json) => json,
                Err(err) => {
                    tracing::error!(match_id = %self.id, error = %err, "snapshot serialization failed");
                    return;
                }
            }
        };
        if let Err(err) = db::matches::save_state(&self.ctx.db, &self.id, json).await {
            tracing::warn!(match_id = %self.id, error = %err, "checkpoint write failed");
        }
    }
}
