//! Relay wire protocol. Client messages: `join` (observe a session)
//! and `mutate` (drive a transition). Server messages: `delta` and
//! `error`. A `join` answers with a full-state snapshot delta, which
//! is how a reconnecting viewer catches up on anything it missed
//! while disconnected.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::api::AppState;
use crate::error::AppError;
use crate::models::Session;
use crate::relay::bridge::delta_message;
use crate::relay::SubscriptionHandle;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Join {
        session_id: String,
    },
    Mutate {
        session_id: String,
        transition: String,
        #[serde(default)]
        args: MutateArgs,
        expected_version: Option<i64>,
    },
}

#[derive(Debug, Deserialize, Default)]
struct MutateArgs {
    player: Option<String>,
    #[serde(rename = "move")]
    mv: Option<String>,
}

fn connected_payload() -> String {
    serde_json::json!({
        "type": "connected",
        "message": "Connected to session stream"
    })
    .to_string()
}

fn error_payload(code: &str, message: &str) -> String {
    serde_json::json!({
        "type": "error",
        "code": code,
        "message": message,
    })
    .to_string()
}

/// WebSocket handler for the session relay
/// GET /ws/session
pub async fn handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // All outbound traffic funnels through one queue so this
    // connection's sends never block relay fan-out to others.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let subscriptions: Arc<Mutex<Vec<SubscriptionHandle>>> = Arc::new(Mutex::new(Vec::new()));

    let _ = out_tx.send(connected_payload());

    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if sender.send(Message::Text(msg.into())).await.is_err() {
                return;
            }
        }
    });

    let recv_state = state.clone();
    let recv_out = out_tx.clone();
    let recv_subscriptions = subscriptions.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_client_message(&recv_state, &recv_out, &recv_subscriptions, &text)
                        .await;
                }
                Message::Close(_) => {
                    tracing::info!("Session stream client disconnected");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        }
        _ = &mut recv_task => {
            send_task.abort();
        }
    }

    // Closing the connection cancels only this connection's
    // subscriptions; committed writes it raced are unaffected.
    for handle in subscriptions.lock().expect("subscription list poisoned").drain(..) {
        state.relay.unsubscribe(&handle);
    }
    tracing::info!("Session WebSocket connection closed");
}

async fn handle_client_message(
    state: &AppState,
    out_tx: &mpsc::UnboundedSender<String>,
    subscriptions: &Mutex<Vec<SubscriptionHandle>>,
    text: &str,
) {
    let parsed = match serde_json::from_str::<ClientMessage>(text) {
        Ok(parsed) => parsed,
        Err(e) => {
            let _ = out_tx.send(error_payload("BAD_REQUEST", &format!("Bad message: {}", e)));
            return;
        }
    };

    match parsed {
        ClientMessage::Join { session_id } => {
            // Subscribe before the snapshot read so no delta between
            // the two is missed; the session version on each delta
            // lets the client discard the older of any overlap.
            let (handle, mut rx) = state.relay.subscribe(&session_id);

            let snapshot = match state.sessions.get(&session_id).await {
                Ok(session) => session,
                Err(e) => {
                    state.relay.unsubscribe(&handle);
                    let _ = out_tx.send(error_payload(e.code(), &e.to_string()));
                    return;
                }
            };

            let forward = out_tx.clone();
            tokio::spawn(async move {
                while let Some(delta) = rx.recv().await {
                    if forward.send(delta).is_err() {
                        return;
                    }
                }
            });

            subscriptions
                .lock()
                .expect("subscription list poisoned")
                .push(handle);
            let _ = out_tx.send(delta_message(&snapshot));
        }
        ClientMessage::Mutate {
            session_id,
            transition,
            args,
            expected_version,
        } => {
            if let Err(e) =
                dispatch_mutation(state, &session_id, &transition, args, expected_version).await
            {
                let _ = out_tx.send(error_payload(e.code(), &e.to_string()));
            }
        }
    }
}

async fn dispatch_mutation(
    state: &AppState,
    session_id: &str,
    transition: &str,
    args: MutateArgs,
    expected_version: Option<i64>,
) -> crate::error::Result<Session> {
    let player = args
        .player
        .as_deref()
        .ok_or_else(|| AppError::BadRequest("args.player is required".to_string()))?;

    match transition {
        "join" => {
            state
                .sessions
                .join(session_id, player, expected_version)
                .await
        }
        "move" => {
            let mv = args
                .mv
                .as_deref()
                .ok_or_else(|| AppError::BadRequest("args.move is required".to_string()))?;
            state
                .sessions
                .apply_move(session_id, player, mv, expected_version)
                .await
        }
        "resign" => {
            state
                .sessions
                .resign(session_id, player, expected_version)
                .await
        }
        "cancel" => {
            state
                .sessions
                .cancel(session_id, player, expected_version)
                .await
        }
        other => Err(AppError::BadRequest(format!(
            "Unknown transition: {}",
            other
        ))),
    }
}
