//! Authoritative match state and the per-tick physics advance.
//!
//! Everything here is synchronous and deterministic apart from the serve
//! direction randomness, so the simulation can be unit-tested without a
//! runtime or a clock.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::UserId;

pub const COURT_WIDTH: f64 = 800.0;
pub const COURT_HEIGHT: f64 = 500.0;
pub const BALL_SIZE: f64 = 15.0;
pub const SERVE_SPEED: f64 = 3.0;
/// Distance from either wall within which paddle contact is tested.
pub const CONTACT_BAND: f64 = 27.5;
/// Paddle span relative to its `y`: [y - REACH_UP, y + REACH_DOWN].
pub const PADDLE_REACH_UP: f64 = 55.0;
pub const PADDLE_REACH_DOWN: f64 = 45.0;
pub const PADDLE_STEP: f64 = 10.0;
pub const PADDLE_MIN_Y: f64 = 45.0;
pub const PADDLE_MAX_Y: f64 = 455.0;
pub const SCORE_LIMIT: u32 = 5;

/// Court side. Two-element enum instead of string keys so a typo cannot
/// address a paddle that does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Waiting,
    Ready,
    Running,
    Finished,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ball {
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paddle {
    pub user_id: UserId,
    pub y: f64,
    pub ready: bool,
    pub online: bool,
    pub score: u32,
}

impl Paddle {
    fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            y: COURT_HEIGHT / 2.0,
            ready: false,
            online: false,
            score: 0,
        }
    }
}

/// Outcome of one simulation tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    /// A round ended; the side scored and the ball was re-served.
    RoundScored(Side),
    /// The scoring side reached the score limit; status is now Finished.
    MatchOver(Side),
}

/// Full simulation snapshot. Serialized whole, both as the `state`
/// broadcast payload and as the durable checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchState {
    pub ball: Ball,
    pub left: Paddle,
    pub right: Paddle,
    pub status: MatchStatus,
}

impl MatchState {
    /// First-time initialization: random 50/50 side assignment, ball
    /// centered with independently randomized velocity signs, paddles
    /// centered, scores zero. The caller persists this snapshot before
    /// any broadcast.
    pub fn new(participants: [UserId; 2]) -> Self {
        let mut rng = rand::rng();
        let [a, b] = participants;
        let (left_id, right_id) = if rng.random::<bool>() { (a, b) } else { (b, a) };

        Self {
            ball: Ball {
                x: COURT_WIDTH / 2.0,
                y: COURT_HEIGHT / 2.0,
                vx: if rng.random::<bool>() { SERVE_SPEED } else { -SERVE_SPEED },
                vy: if rng.random::<bool>() { SERVE_SPEED } else { -SERVE_SPEED },
            },
            left: Paddle::new(left_id),
            right: Paddle::new(right_id),
            status: MatchStatus::Waiting,
        }
    }

    pub fn side_of(&self, user_id: UserId) -> Option<Side> {
        if self.left.user_id == user_id {
            Some(Side::Left)
        } else if self.right.user_id == user_id {
            Some(Side::Right)
        } else {
            None
        }
    }

    pub fn paddle(&self, side: Side) -> &Paddle {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    pub fn paddle_mut(&mut self, side: Side) -> &mut Paddle {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }

    pub fn both_ready(&self) -> bool {
        self.left.ready && self.right.ready
    }

    pub fn clear_ready(&mut self) {
        self.left.ready = false;
        self.right.ready = false;
    }

    /// Move a paddle by one step, clamped so it stays inside the court.
    pub fn move_paddle(&mut self, side: Side, up: bool) {
        let paddle = self.paddle_mut(side);
        if up {
            paddle.y = (paddle.y - PADDLE_STEP).max(PADDLE_MIN_Y);
        } else {
            paddle.y = (paddle.y + PADDLE_STEP).min(PADDLE_MAX_Y);
        }
    }

    fn overlaps(ball: &Ball, paddle: &Paddle) -> bool {
        ball.y < paddle.y + PADDLE_REACH_DOWN && ball.y + BALL_SIZE > paddle.y - PADDLE_REACH_UP
    }

    /// Advance the simulation by one tick.
    ///
    /// Order: ball advance, right contact band (left scores past it),
    /// left contact band (right scores past it), vertical bounce.
    pub fn step(&mut self) -> TickOutcome {
        self.ball.x += self.ball.vx;
        self.ball.y += self.ball.vy;

        // Right boundary band: the right paddle defends; a full exit on
        // this side is a point for the left.
        if self.ball.x + BALL_SIZE >= COURT_WIDTH - CONTACT_BAND {
            if self.ball.x > COURT_WIDTH {
                return self.end_round(Side::Left);
            }
            if Self::overlaps(&self.ball, &self.right) {
                self.ball.vx = -self.ball.vx.abs();
            }
        }

        // Left boundary band, symmetric: right scores past the left paddle.
        if self.ball.x <= CONTACT_BAND {
            if self.ball.x < -BALL_SIZE {
                return self.end_round(Side::Right);
            }
            if Self::overlaps(&self.ball, &self.left) {
                self.ball.vx = self.ball.vx.abs();
            }
        }

        // Vertical bounds: simple bounce, no corner logic.
        if self.ball.y <= 0.0 {
            self.ball.vy = self.ball.vy.abs();
        } else if self.ball.y + BALL_SIZE >= COURT_HEIGHT {
            self.ball.vy = -self.ball.vy.abs();
        }

        TickOutcome::Continue
    }

    /// Score a round for `winner`: bump their score and re-serve toward
    /// the side that just conceded, with a randomized vertical sign.
    fn end_round(&mut self, winner: Side) -> TickOutcome {
        self.paddle_mut(winner).score += 1;

        let toward_conceder = match winner {
            // Left scored past the right side: serve travels right.
            Side::Left => SERVE_SPEED,
            Side::Right => -SERVE_SPEED,
        };
        self.ball = Ball {
            x: COURT_WIDTH / 2.0,
            y: COURT_HEIGHT / 2.0,
            vx: toward_conceder,
            vy: if rand::rng().random::<bool>() { SERVE_SPEED } else { -SERVE_SPEED },
        };

        if self.paddle(winner).score >= SCORE_LIMIT {
            self.status = MatchStatus::Finished;
            return TickOutcome::MatchOver(winner);
        }
        TickOutcome::RoundScored(winner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> MatchState {
        MatchState::new([7, 9])
    }

    #[test]
    fn initial_snapshot_matches_conventions() {
        let state = fresh();
        let ids = [state.left.user_id, state.right.user_id];
        assert!(ids.contains(&7) && ids.contains(&9));
        assert_eq!(state.ball.x, 400.0);
        assert_eq!(state.ball.y, 250.0);
        assert_eq!(state.ball.vx.abs(), 3.0);
        assert_eq!(state.ball.vy.abs(), 3.0);
        assert_eq!(state.left.y, 250.0);
        assert_eq!(state.right.y, 250.0);
        assert_eq!(state.left.score, 0);
        assert_eq!(state.right.score, 0);
        assert_eq!(state.status, MatchStatus::Waiting);
    }

    #[test]
    fn step_advances_ball_by_velocity() {
        let mut state = fresh();
        state.ball = Ball { x: 400.0, y: 250.0, vx: 3.0, vy: -3.0 };
        assert_eq!(state.step(), TickOutcome::Continue);
        assert_eq!(state.ball.x, 403.0);
        assert_eq!(state.ball.y, 247.0);
    }

    #[test]
    fn right_paddle_reflects_ball_toward_center() {
        let mut state = fresh();
        state.right.y = 250.0;
        state.ball = Ball { x: 760.0, y: 250.0, vx: 3.0, vy: 0.0 };
        assert_eq!(state.step(), TickOutcome::Continue);
        assert_eq!(state.ball.vx, -3.0);
    }

    #[test]
    fn left_paddle_reflects_ball_toward_center() {
        let mut state = fresh();
        state.left.y = 250.0;
        state.ball = Ball { x: 25.0, y: 250.0, vx: -3.0, vy: 0.0 };
        assert_eq!(state.step(), TickOutcome::Continue);
        assert_eq!(state.ball.vx, 3.0);
    }

    #[test]
    fn missed_right_paddle_scores_for_left_and_serves_right() {
        let mut state = fresh();
        // Paddle far away from the ball's path.
        state.right.y = PADDLE_MIN_Y;
        state.ball = Ball { x: 799.0, y: 400.0, vx: 3.0, vy: 0.0 };
        assert_eq!(state.step(), TickOutcome::RoundScored(Side::Left));
        assert_eq!(state.left.score, 1);
        assert_eq!(state.ball.x, 400.0);
        assert_eq!(state.ball.y, 250.0);
        // Serve travels toward the side that conceded.
        assert_eq!(state.ball.vx, 3.0);
        assert_eq!(state.ball.vy.abs(), 3.0);
    }

    #[test]
    fn exit_on_left_side_scores_for_right() {
        let mut state = fresh();
        state.left.y = PADDLE_MAX_Y;
        state.ball = Ball { x: -14.0, y: 30.0, vx: -3.0, vy: 0.0 };
        assert_eq!(state.step(), TickOutcome::RoundScored(Side::Right));
        assert_eq!(state.right.score, 1);
        assert_eq!(state.ball.vx, -3.0);
    }

    #[test]
    fn vertical_bounds_reflect_vertical_velocity() {
        let mut state = fresh();
        state.ball = Ball { x: 400.0, y: 2.0, vx: 3.0, vy: -3.0 };
        state.step();
        assert_eq!(state.ball.vy, 3.0);

        state.ball = Ball { x: 400.0, y: 484.0, vx: 3.0, vy: 3.0 };
        state.step();
        assert_eq!(state.ball.vy, -3.0);
    }

    #[test]
    fn fifth_point_finishes_the_match() {
        let mut state = fresh();
        state.left.score = 4;
        state.right.score = 2;
        state.right.y = PADDLE_MIN_Y;
        state.ball = Ball { x: 799.0, y: 400.0, vx: 3.0, vy: 0.0 };
        assert_eq!(state.step(), TickOutcome::MatchOver(Side::Left));
        assert_eq!(state.left.score, 5);
        assert_eq!(state.status, MatchStatus::Finished);
    }

    #[test]
    fn paddle_moves_stay_clamped_to_court() {
        let mut state = fresh();
        for _ in 0..100 {
            state.move_paddle(Side::Left, true);
            assert!(state.left.y >= PADDLE_MIN_Y);
        }
        assert_eq!(state.left.y, PADDLE_MIN_Y);

        for _ in 0..100 {
            state.move_paddle(Side::Left, false);
            assert!(state.left.y <= PADDLE_MAX_Y);
        }
        assert_eq!(state.left.y, PADDLE_MAX_Y);
    }

    #[test]
    fn snapshot_round_trips_through_checkpoint_json() {
        let state = fresh();
        let json = serde_json::to_string(&state).expect("serialize");
        let back: MatchState = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.left.user_id, state.left.user_id);
        assert_eq!(back.status, MatchStatus::Waiting);
    }
}
