//! Integration tests for the match session lifecycle: creation,
//! readiness, pause on disconnect, AFK, quit finalization, and restart
//! rehydration from durable checkpoints.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use tokio::sync::mpsc;
use uuid::Uuid;

use rally_server::db::{self, DbPool};
use rally_server::game::match_topic;
use rally_server::game::registry::MatchRegistry;
use rally_server::game::state::MatchStatus;
use rally_server::rooms::RoomBroker;
use rally_server::ws::{ConnectionHandle, ConnectionRegistry};
use rally_server::UserId;

struct Harness {
    _tmp: tempfile::TempDir,
    db: DbPool,
    connections: Arc<ConnectionRegistry>,
    rooms: Arc<RoomBroker>,
    matches: Arc<MatchRegistry>,
}

async fn harness() -> Harness {
    let tmp = tempfile::tempdir().expect("temp dir");
    let db = db::init_db(tmp.path().to_str().unwrap()).expect("init db");
    for (id, name) in [(7, "seven"), (9, "nine")] {
        db::users::create_user(&db, id, name, &format!("{name}@test.local"))
            .await
            .expect("seed user");
    }
    let connections = Arc::new(ConnectionRegistry::new());
    let rooms = Arc::new(RoomBroker::new());
    let matches = MatchRegistry::new(db.clone(), rooms.clone(), connections.clone());
    Harness {
        _tmp: tmp,
        db,
        connections,
        rooms,
        matches,
    }
}

/// Register a fake connection for a user so tests can observe what the
/// session layer would push to them.
fn connect_user(h: &Harness, user_id: UserId) -> mpsc::UnboundedReceiver<Message> {
    let (tx, rx) = mpsc::unbounded_channel();
    h.connections.register(
        user_id,
        ConnectionHandle {
            id: Uuid::new_v4(),
            sender: tx,
        },
    );
    rx
}

/// Drain every queued frame into parsed events.
fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<serde_json::Value> {
    let mut events = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        if let Message::Text(text) = msg {
            events.push(serde_json::from_str(text.as_str()).expect("valid JSON event"));
        }
    }
    events
}

/// A registry over the same database, as after a process restart: empty
/// connection and room state, no live sessions.
fn new_registry(db: &DbPool) -> Arc<MatchRegistry> {
    MatchRegistry::new(
        db.clone(),
        Arc::new(RoomBroker::new()),
        Arc::new(ConnectionRegistry::new()),
    )
}

#[tokio::test]
async fn create_assigns_sides_and_writes_first_checkpoint() {
    let h = harness().await;
    let session = h.matches.create([7, 9]).await.expect("create");

    assert_eq!(session.participants, [7, 9]);
    let state = session.snapshot().await;
    let sides = [state.left.user_id, state.right.user_id];
    assert!(sides.contains(&7) && sides.contains(&9));
    assert_eq!(state.status, MatchStatus::Waiting);

    // The initial snapshot is durable before anything else happens.
    let rows = db::matches::load_active(&h.db).await.expect("load");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, session.id);
    let checkpoint: serde_json::Value =
        serde_json::from_str(rows[0].state.as_deref().expect("state")).expect("valid JSON");
    assert_eq!(checkpoint["status"], "waiting");
}

#[tokio::test]
async fn full_readiness_flow_reaches_running() {
    let h = harness().await;
    let session = h.matches.create([7, 9]).await.expect("create");

    session.connect(7).await;
    assert_eq!(session.status().await, MatchStatus::Waiting);

    session.connect(9).await;
    assert_eq!(session.status().await, MatchStatus::Ready);

    session.set_ready(7).await;
    assert_eq!(session.status().await, MatchStatus::Ready);

    session.set_ready(9).await;
    assert_eq!(session.status().await, MatchStatus::Running);

    // Let the tick loop advance a few frames.
    tokio::time::sleep(Duration::from_millis(60)).await;
    let state = session.snapshot().await;
    assert!(state.ball.x != 400.0 || state.ball.y != 250.0);
}

#[tokio::test]
async fn disconnect_pauses_and_clears_readiness() {
    let h = harness().await;
    let session = h.matches.create([7, 9]).await.expect("create");

    session.connect(7).await;
    session.connect(9).await;
    session.set_ready(7).await;
    session.set_ready(9).await;
    assert_eq!(session.status().await, MatchStatus::Running);

    session.handle_disconnect(7).await;
    let state = session.snapshot().await;
    assert_eq!(state.status, MatchStatus::Waiting);
    assert!(!state.left.ready && !state.right.ready);
    let offline_side = state
        .side_of(7)
        .expect("participant side");
    assert!(!state.paddle(offline_side).online);
}

#[tokio::test]
async fn disconnect_halts_the_tick_loop() {
    let h = harness().await;
    let session = h.matches.create([7, 9]).await.expect("create");

    session.connect(7).await;
    session.connect(9).await;
    session.set_ready(7).await;
    session.set_ready(9).await;
    assert_eq!(session.status().await, MatchStatus::Running);

    session.handle_disconnect(7).await;
    let frozen = session.snapshot().await;

    // A non-running match must not advance, whatever the loop was doing
    // when the disconnect landed.
    tokio::time::sleep(Duration::from_millis(80)).await;
    let later = session.snapshot().await;
    assert_eq!(later.status, MatchStatus::Waiting);
    assert_eq!(later.ball.x, frozen.ball.x);
    assert_eq!(later.ball.y, frozen.ball.y);
}

#[tokio::test]
async fn afk_reverts_to_waiting_then_ready() {
    let h = harness().await;
    let mut rx = connect_user(&h, 9);
    let session = h.matches.create([7, 9]).await.expect("create");
    h.rooms
        .subscribe(&h.connections, 9, &match_topic(&session.id));

    session.connect(7).await;
    session.connect(9).await;
    session.set_ready(9).await;
    drain(&mut rx);

    session.afk(7).await;

    // Both transitions are observable, in order: the match drops back to
    // waiting, then immediately re-enters ready.
    let statuses: Vec<String> = drain(&mut rx)
        .into_iter()
        .filter(|e| e["event"] == "state")
        .map(|e| e["data"]["status"].as_str().expect("status").to_string())
        .collect();
    assert_eq!(statuses, ["waiting", "ready"]);

    let state = session.snapshot().await;
    assert_eq!(state.status, MatchStatus::Ready);
    assert!(!state.left.ready && !state.right.ready);
    let afk_side = state.side_of(7).expect("participant side");
    assert!(!state.paddle(afk_side).online);

    // The durable checkpoint holds the final transition.
    let rows = db::matches::load_active(&h.db).await.expect("load");
    let checkpoint: serde_json::Value =
        serde_json::from_str(rows[0].state.as_deref().expect("state")).expect("valid JSON");
    assert_eq!(checkpoint["status"], "ready");
}

#[tokio::test]
async fn stale_connect_after_finish_resends_the_outcome() {
    let h = harness().await;
    let mut rx = connect_user(&h, 9);
    let session = h.matches.create([7, 9]).await.expect("create");

    session.connect(7).await;
    session.connect(9).await;
    session.quit(7).await;
    drain(&mut rx);

    // The session object can outlive its registry entry; a late connect
    // still gets the summary.
    session.connect(9).await;
    let events = drain(&mut rx);
    let finished = events
        .iter()
        .find(|e| e["event"] == "finished")
        .expect("finished resent");
    assert_eq!(finished["data"]["winnerId"], 9);
    assert_eq!(finished["data"]["loserId"], 7);
}

#[tokio::test]
async fn set_ready_is_idempotent_per_side() {
    let h = harness().await;
    let session = h.matches.create([7, 9]).await.expect("create");
    session.connect(7).await;
    session.connect(9).await;

    session.set_ready(7).await;
    session.set_ready(7).await;
    assert_eq!(session.status().await, MatchStatus::Ready);
    let state = session.snapshot().await;
    assert!(!state.both_ready());
}

#[tokio::test]
async fn quitting_a_level_match_loses_the_tie() {
    let h = harness().await;
    let session = h.matches.create([7, 9]).await.expect("create");
    let id = session.id.clone();
    session.connect(7).await;
    session.connect(9).await;

    session.quit(7).await;

    assert!(h.matches.is_empty());
    let record = db::matches::find_history(&h.db, &id)
        .await
        .expect("query")
        .expect("history written");
    assert_eq!(record.winner_id, 9);
    assert_eq!(record.winner_score, 0);
    assert_eq!(record.loser_id, 7);
    assert_eq!(record.loser_score, 0);

    // Transient row is gone; outcome applied to both profiles.
    assert!(db::matches::load_active(&h.db).await.expect("load").is_empty());
    let winner = db::users::get_by_id(&h.db, 9).await.expect("query").expect("user");
    let loser = db::users::get_by_id(&h.db, 7).await.expect("query").expect("user");
    assert_eq!(winner.rating, 20);
    assert_eq!(winner.wins, 1);
    assert_eq!(loser.rating, -20);
    assert_eq!(loser.losses, 1);
}

#[tokio::test]
async fn quit_is_final_even_if_repeated() {
    let h = harness().await;
    let session = h.matches.create([7, 9]).await.expect("create");
    let id = session.id.clone();
    session.connect(7).await;
    session.connect(9).await;

    session.quit(7).await;
    session.quit(9).await;

    // Only the first quit produced side effects.
    let record = db::matches::find_history(&h.db, &id)
        .await
        .expect("query")
        .expect("history written");
    assert_eq!(record.winner_id, 9);
    let loser = db::users::get_by_id(&h.db, 7).await.expect("query").expect("user");
    assert_eq!(loser.losses, 1);
    assert_eq!(loser.rating, -20);
}

#[tokio::test]
async fn rehydration_restores_checkpointed_matches_as_waiting() {
    let h = harness().await;
    let session = h.matches.create([7, 9]).await.expect("create");
    let id = session.id.clone();

    // Checkpoint a mid-game moment: running, both ready, a score on the
    // board.
    let mut checkpoint = serde_json::to_value(session.snapshot().await).expect("serialize");
    checkpoint["status"] = "running".into();
    checkpoint["left"]["ready"] = true.into();
    checkpoint["right"]["ready"] = true.into();
    checkpoint["left"]["score"] = 3.into();
    db::matches::save_state(&h.db, &id, checkpoint.to_string())
        .await
        .expect("save");

    let restarted = new_registry(&h.db);
    let restored = restarted.rehydrate().await.expect("rehydrate");
    assert_eq!(restored, 1);

    let session = restarted.get(&id).expect("session restored");
    let state = session.snapshot().await;
    // Sides and scores survive; readiness and status do not.
    assert_eq!(state.left.score, 3);
    assert_eq!(state.status, MatchStatus::Waiting);
    assert!(!state.left.ready && !state.right.ready);
    assert!(!state.left.online && !state.right.online);
}

#[tokio::test]
async fn rehydration_finalizes_a_finished_checkpoint() {
    let h = harness().await;
    let session = h.matches.create([7, 9]).await.expect("create");
    let id = session.id.clone();

    let snapshot = session.snapshot().await;
    let winner_id = snapshot.left.user_id;
    let loser_id = snapshot.right.user_id;
    let mut checkpoint = serde_json::to_value(&snapshot).expect("serialize");
    checkpoint["status"] = "finished".into();
    checkpoint["left"]["score"] = 5.into();
    checkpoint["right"]["score"] = 2.into();
    db::matches::save_state(&h.db, &id, checkpoint.to_string())
        .await
        .expect("save");

    let restarted = new_registry(&h.db);
    restarted.rehydrate().await.expect("rehydrate");

    // The terminal snapshot went straight through finalize.
    assert!(restarted.is_empty());
    let record = db::matches::find_history(&h.db, &id)
        .await
        .expect("query")
        .expect("history written");
    assert_eq!(record.winner_id, winner_id);
    assert_eq!(record.winner_score, 5);
    assert_eq!(record.loser_id, loser_id);
    assert_eq!(record.loser_score, 2);
    assert!(db::matches::load_active(&h.db).await.expect("load").is_empty());
}

#[tokio::test]
async fn rows_without_a_checkpoint_are_not_resumable() {
    let h = harness().await;
    db::matches::insert_match(&h.db, &"never-started".to_string(), [7, 9])
        .await
        .expect("insert");

    let restarted = new_registry(&h.db);
    let restored = restarted.rehydrate().await.expect("rehydrate");
    assert_eq!(restored, 0);
    assert!(restarted.is_empty());
}
