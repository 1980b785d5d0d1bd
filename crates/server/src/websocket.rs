//! WebSocket handling

use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use deskmate_protocol::{
    is_allowed_duration, ClientMessage, ServerMessage, SessionStatus, TicketSummary,
};

use crate::matchmaker;
use crate::negotiation;
use crate::session;
use crate::state::SharedState;
use crate::store::unix_now;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Frames that can be sent through the WebSocket
enum OutboundMessage {
    /// JSON-serialized ServerMessage
    Json(ServerMessage),
    /// Raw pong response
    Pong(Bytes),
}

/// Per-connection context: who this socket belongs to.
#[derive(Default)]
struct ConnContext {
    user_id: Option<String>,
    display_name: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: SharedState) {
    let conn_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    info!(
        component = "websocket",
        event = "ws.connection.opened",
        connection_id = conn_id,
        "WebSocket connection opened"
    );

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer channel for this client
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundMessage>(100);

    // Event channel: registered in AppState and subscribed to sessions;
    // drained into the writer below.
    let (event_tx, mut event_rx) = mpsc::channel::<ServerMessage>(100);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let result = match msg {
                OutboundMessage::Json(server_msg) => match serde_json::to_string(&server_msg) {
                    Ok(json) => ws_tx.send(Message::Text(json.into())).await,
                    Err(e) => {
                        warn!(
                            component = "websocket",
                            event = "ws.send.serialize_failed",
                            connection_id = conn_id,
                            error = %e,
                            "Failed to serialize server message"
                        );
                        continue;
                    }
                },
                OutboundMessage::Pong(data) => ws_tx.send(Message::Pong(data)).await,
            };

            if result.is_err() {
                debug!(
                    component = "websocket",
                    event = "ws.send.disconnected",
                    connection_id = conn_id,
                    "WebSocket send failed, client disconnected"
                );
                break;
            }
        }
    });

    let forward_tx = outbound_tx.clone();
    let forward_task = tokio::spawn(async move {
        while let Some(msg) = event_rx.recv().await {
            if forward_tx.send(OutboundMessage::Json(msg)).await.is_err() {
                break;
            }
        }
    });

    let mut ctx = ConnContext::default();

    while let Some(result) = ws_rx.next().await {
        let msg = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Ping(data)) => {
                let _ = outbound_tx.send(OutboundMessage::Pong(data)).await;
                continue;
            }
            Ok(Message::Close(_)) => {
                info!(
                    component = "websocket",
                    event = "ws.connection.close_frame",
                    connection_id = conn_id,
                    "Client sent close frame"
                );
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(
                    component = "websocket",
                    event = "ws.connection.error",
                    connection_id = conn_id,
                    error = %e,
                    "WebSocket error"
                );
                break;
            }
        };

        let client_msg: ClientMessage = match serde_json::from_str(&msg) {
            Ok(m) => m,
            Err(e) => {
                warn!(
                    component = "websocket",
                    event = "ws.message.parse_failed",
                    connection_id = conn_id,
                    error = %e,
                    payload_bytes = msg.len(),
                    payload_preview = %truncate_for_log(&msg, 240),
                    "Failed to parse client message"
                );
                send_error(&event_tx, "parse_error", &e.to_string(), None).await;
                continue;
            }
        };

        handle_client_message(client_msg, &mut ctx, &event_tx, &state, conn_id).await;
    }

    info!(
        component = "websocket",
        event = "ws.connection.closed",
        connection_id = conn_id,
        user_id = ctx.user_id.as_deref().unwrap_or("-"),
        "WebSocket connection closed"
    );

    if let Some(user_id) = &ctx.user_id {
        cleanup_connection(&state, user_id, &event_tx).await;
    }
    forward_task.abort();
    send_task.abort();
}

fn truncate_for_log(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

async fn send(tx: &mpsc::Sender<ServerMessage>, msg: ServerMessage) {
    let _ = tx.send(msg).await;
}

async fn send_error(
    tx: &mpsc::Sender<ServerMessage>,
    code: &str,
    message: &str,
    session_id: Option<String>,
) {
    send(
        tx,
        ServerMessage::Error {
            code: code.to_string(),
            message: message.to_string(),
            session_id,
        },
    )
    .await;
}

/// Dispatch one parsed client message.
async fn handle_client_message(
    msg: ClientMessage,
    ctx: &mut ConnContext,
    event_tx: &mpsc::Sender<ServerMessage>,
    state: &SharedState,
    conn_id: u64,
) {
    match msg {
        ClientMessage::Hello {
            user_id,
            display_name,
        } => {
            if ctx.user_id.is_some() {
                send_error(event_tx, "already_identified", "hello already received", None)
                    .await;
                return;
            }
            let user_id = user_id.trim().to_string();
            if user_id.is_empty() {
                send_error(event_tx, "invalid_user", "user_id must not be empty", None).await;
                return;
            }

            state
                .lock()
                .await
                .register_connection(&user_id, event_tx.clone());
            info!(
                component = "websocket",
                event = "ws.hello",
                connection_id = conn_id,
                user_id = %user_id,
                "Connection identified"
            );
            ctx.user_id = Some(user_id.clone());
            ctx.display_name = display_name;
            send(event_tx, ServerMessage::HelloAck { user_id }).await;
        }

        ClientMessage::JoinQueue {
            activity,
            duration_min,
        } => {
            let Some(user_id) = ctx.user_id.clone() else {
                send_error(event_tx, "not_identified", "send hello first", None).await;
                return;
            };
            if !is_allowed_duration(duration_min) {
                send_error(
                    event_tx,
                    "invalid_duration",
                    "duration_min must be one of 25, 30, 45, 50, 60",
                    None,
                )
                .await;
                return;
            }

            let store = state.lock().await.store.clone();
            match store.find_open_session(&user_id).await {
                Ok(Some(session)) => {
                    send_error(
                        event_tx,
                        "already_in_session",
                        "leave the current session before queueing",
                        Some(session.id),
                    )
                    .await;
                    return;
                }
                Ok(None) => {}
                Err(e) => {
                    send_error(event_tx, "store_error", &e.to_string(), None).await;
                    return;
                }
            }

            let ticket = TicketSummary {
                user_id: user_id.clone(),
                activity,
                duration_min,
                created_at: unix_now(),
            };
            if let Err(e) = store.put_ticket(ticket.clone()).await {
                send_error(event_tx, "store_error", &e.to_string(), None).await;
                return;
            }

            let matcher =
                matchmaker::spawn_matcher(state.clone(), ticket.clone(), ctx.display_name.clone());
            state.lock().await.set_matcher(&user_id, matcher);

            info!(
                component = "websocket",
                event = "queue.joined",
                connection_id = conn_id,
                user_id = %user_id,
                activity = activity.as_str(),
                duration_min = duration_min,
                "Ticket queued"
            );
            send(event_tx, ServerMessage::QueueJoined { ticket }).await;
        }

        ClientMessage::LeaveQueue => {
            let Some(user_id) = ctx.user_id.clone() else {
                send_error(event_tx, "not_identified", "send hello first", None).await;
                return;
            };

            let store = {
                let mut guard = state.lock().await;
                guard.abort_matcher(&user_id);
                guard.store.clone()
            };
            if let Err(e) = store.delete_ticket(&user_id).await {
                send_error(event_tx, "store_error", &e.to_string(), None).await;
                return;
            }
            let _ = store.remove_lobby(&user_id).await;

            info!(
                component = "websocket",
                event = "queue.left",
                connection_id = conn_id,
                user_id = %user_id,
                "Ticket withdrawn"
            );
            send(event_tx, ServerMessage::QueueLeft).await;
        }

        ClientMessage::ListLobby => {
            let store = state.lock().await.store.clone();
            match store.list_lobby(unix_now()).await {
                Ok(entries) => send(event_tx, ServerMessage::LobbyList { entries }).await,
                Err(e) => send_error(event_tx, "store_error", &e.to_string(), None).await,
            }
        }

        ClientMessage::SubscribeSession { session_id } => {
            let Some(user_id) = ctx.user_id.clone() else {
                send_error(event_tx, "not_identified", "send hello first", None).await;
                return;
            };

            // Live handle first.
            {
                let mut guard = state.lock().await;
                if let Some(handle) = guard.session_mut(&session_id) {
                    if !handle.includes(&user_id) {
                        drop(guard);
                        send_error(
                            event_tx,
                            "not_participant",
                            "not part of this session",
                            Some(session_id),
                        )
                        .await;
                        return;
                    }
                    handle.subscribe(event_tx.clone());
                    let view = handle.view();
                    drop(guard);
                    send(event_tx, ServerMessage::SessionSnapshot { session: view }).await;
                    return;
                }
            }

            // Not in memory: maybe an open session from before this
            // connection, or a finished one.
            let store = state.lock().await.store.clone();
            match store.get_session(&session_id).await {
                Ok(Some(view)) if view.includes(&user_id) => {
                    if view.status.is_open() {
                        session::ensure_session(state, &view).await;
                        let mut guard = state.lock().await;
                        if let Some(handle) = guard.session_mut(&session_id) {
                            handle.subscribe(event_tx.clone());
                        }
                    }
                    send(event_tx, ServerMessage::SessionSnapshot { session: view }).await;
                }
                Ok(Some(_)) => {
                    send_error(
                        event_tx,
                        "not_participant",
                        "not part of this session",
                        Some(session_id),
                    )
                    .await;
                }
                Ok(None) => {
                    send_error(event_tx, "unknown_session", "no such session", Some(session_id))
                        .await;
                }
                Err(e) => {
                    send_error(event_tx, "store_error", &e.to_string(), Some(session_id)).await;
                }
            }
        }

        ClientMessage::SubmitPreferences {
            session_id,
            preferences,
        } => {
            let Some(user_id) = ctx.user_id.clone() else {
                send_error(event_tx, "not_identified", "send hello first", None).await;
                return;
            };
            if let Err(reason) = negotiation::validate(&preferences) {
                send_error(event_tx, "invalid_preferences", reason, Some(session_id)).await;
                return;
            }
            if let Err(code) =
                session::submit_preferences(state, &session_id, &user_id, preferences, false)
                    .await
            {
                send_error(event_tx, code, "preference submission rejected", Some(session_id))
                    .await;
            }
        }

        ClientMessage::SetMicPreference {
            session_id,
            enabled,
        } => {
            let Some(user_id) = ctx.user_id.clone() else {
                send_error(event_tx, "not_identified", "send hello first", None).await;
                return;
            };

            let mut guard = state.lock().await;
            let Some(handle) = guard.session_mut(&session_id) else {
                drop(guard);
                send_error(event_tx, "unknown_session", "no such session", Some(session_id))
                    .await;
                return;
            };
            let Some((effective, forced)) = handle.set_mic_preference(&user_id, enabled) else {
                drop(guard);
                send_error(
                    event_tx,
                    "not_participant",
                    "not part of this session",
                    Some(session_id),
                )
                .await;
                return;
            };
            handle
                .broadcast(ServerMessage::MicState {
                    session_id: session_id.clone(),
                    user_id,
                    enabled: effective,
                    forced,
                })
                .await;
        }

        ClientMessage::LeaveSession { session_id } => {
            let Some(user_id) = ctx.user_id.clone() else {
                send_error(event_tx, "not_identified", "send hello first", None).await;
                return;
            };

            let is_participant = {
                let guard = state.lock().await;
                guard
                    .session(&session_id)
                    .map(|h| h.includes(&user_id))
                    .unwrap_or(false)
            };
            if !is_participant {
                send_error(
                    event_tx,
                    "unknown_session",
                    "no such session",
                    Some(session_id),
                )
                .await;
                return;
            }

            info!(
                component = "websocket",
                event = "session.left",
                connection_id = conn_id,
                user_id = %user_id,
                session_id = %session_id,
                "Participant left the session"
            );
            session::end_session(state, &session_id, SessionStatus::Abandoned, "peer_left").await;
        }
    }
}

/// Tear down everything a disconnecting user left behind: matcher,
/// ticket, lobby entry, and any open session.
async fn cleanup_connection(
    state: &SharedState,
    user_id: &str,
    event_tx: &mpsc::Sender<ServerMessage>,
) {
    let store = {
        let mut guard = state.lock().await;
        guard.abort_matcher(user_id);
        guard.unregister_connection(user_id, event_tx);
        guard.store.clone()
    };

    if let Err(e) = store.delete_ticket(user_id).await {
        warn!(
            component = "websocket",
            event = "ws.cleanup.ticket_failed",
            user_id = %user_id,
            error = %e,
            "Failed to delete ticket on disconnect"
        );
    }
    let _ = store.remove_lobby(user_id).await;

    let open_session = {
        let guard = state.lock().await;
        guard.session_for_user(user_id).map(|h| h.id().to_string())
    };
    if let Some(session_id) = open_session {
        info!(
            component = "websocket",
            event = "ws.cleanup.session_ended",
            user_id = %user_id,
            session_id = %session_id,
            "Ending session after disconnect"
        );
        session::end_session(
            state,
            &session_id,
            SessionStatus::Abandoned,
            "peer_disconnected",
        )
        .await;
    }
}
