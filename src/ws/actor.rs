use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};
use uuid::Uuid;

use crate::game::match_topic;
use crate::rooms::EVERYONE_TOPIC;
use crate::state::AppState;
use crate::ws::protocol::{self, ServerEvent};
use crate::ws::ConnectionHandle;
use crate::UserId;

/// Ping interval: server sends WebSocket ping every 30 seconds.
/// Prevents connection leaks from abrupt disconnects.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Pong timeout: if pong not received within 10 seconds after ping, close.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the actor-per-connection pattern for an authenticated WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Reader task: processes incoming messages, dispatches to protocol handlers
///
/// The mpsc channel allows any part of the system to send messages to this client
/// by cloning the sender.
pub async fn run_connection(socket: WebSocket, state: AppState, user_id: UserId, username: String) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    let handle = ConnectionHandle {
        id: Uuid::new_v4(),
        sender: tx.clone(),
    };
    let connection_id = handle.id;
    let first_connection = state.connections.register(user_id, handle.clone());

    // Every connection hears global presence traffic.
    state.rooms.subscribe_connection(EVERYONE_TOPIC, &handle);

    // Re-attach to topics of any match this user is already part of, so a
    // fresh tab or a reconnect keeps receiving state frames.
    for session in state.matches.sessions_of(user_id) {
        state
            .rooms
            .subscribe_connection(&match_topic(&session.id), &handle);
    }

    // Broadcast the online presence edge only on the first connection.
    if first_connection {
        state.rooms.publish(
            EVERYONE_TOPIC,
            &ServerEvent::Status {
                user_id,
                online: true,
            },
        );
    }

    // Send the current presence snapshot to the newly connected client.
    for online_id in state.connections.online_users() {
        let event = ServerEvent::Status {
            user_id: online_id,
            online: true,
        };
        if let Some(msg) = event.to_message() {
            let _ = tx.send(msg);
        }
    }

    tracing::info!(
        user_id,
        username = %username,
        %connection_id,
        "WebSocket actor started"
    );

    // Spawn writer task: forwards mpsc messages to WebSocket sink
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Track pong reception
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();

    // Spawn ping task: sends periodic pings and monitors pong responses
    let ping_tx = tx.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(PING_INTERVAL);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                // Writer task has died — connection is gone
                break;
            }

            match timeout(PONG_TIMEOUT, pong_rx.recv()).await {
                Ok(Some(())) => {
                    // Pong received, continue
                }
                _ => {
                    tracing::warn!("Pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    });

    // Reader loop: process incoming WebSocket messages
    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    protocol::handle_text_message(&text, &state, user_id).await;
                }
                Message::Binary(_) => {
                    tracing::debug!(user_id, "Received binary message (expected JSON text)");
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(user_id, reason = ?frame, "Client initiated close");
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(user_id, error = %e, "WebSocket receive error");
                break;
            }
            None => {
                tracing::info!(user_id, "WebSocket stream ended");
                break;
            }
        }
    }

    // Cleanup: abort writer and ping tasks
    writer_handle.abort();
    ping_handle.abort();

    state.rooms.drop_connection(connection_id);
    let went_offline = state.connections.deregister(user_id, connection_id);

    // Only broadcast offline and pause matches when the last connection drops.
    if went_offline {
        state.rooms.publish(
            EVERYONE_TOPIC,
            &ServerEvent::Status {
                user_id,
                online: false,
            },
        );
        for session in state.matches.sessions_of(user_id) {
            session.handle_disconnect(user_id).await;
        }
    }

    tracing::info!(
        user_id,
        username = %username,
        %connection_id,
        "WebSocket actor stopped"
    );
}

/// Writer task: receives messages from mpsc channel and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed — connection is broken
            break;
        }
    }
}
