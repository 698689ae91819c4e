//! WebSocket upgrade and the connection read/write loop, grounded on
//! `handlers/v1/websocket.rs`'s upgrade/select-loop shape. That handler fans
//! out through a pub-sub notifier; here the Hub's per-session broadcast
//! model plays that role, and the join handshake (§4.8) runs once, inline,
//! before the loop starts rather than as a message the client sends.

use std::time::Duration;

use axum::{
    extract::{
        ws::{self, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use relay_core::errors::{ErrorKind, SessionError};
use relay_core::id::{EventId, ParticipantId, UserId};
use relay_core::log;
use relay_core::protocol::{ClientMessage, ServerMessage};
use serde::Deserialize;
use std::sync::Arc;

use crate::connection::new_outbound;
use crate::join;
use crate::AppState;

const JOIN_GATE_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Query parameters carried on the `/ws` upgrade — the full join request of
/// §4.8, since this connection *is* the participant's join attempt rather
/// than a message sent after connecting.
#[derive(Debug, Deserialize)]
pub struct JoinParams {
    pub user_id: UserId,
    pub session_code: String,
    pub device_fingerprint: String,
    pub display_name: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

pub async fn upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<JoinParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, params, state))
}

#[tracing::instrument(name = "websocket", skip(socket, state))]
async fn handle_socket(mut socket: WebSocket, params: JoinParams, state: Arc<AppState>) {
    let event = match state.repository.get_event_by_code(&params.session_code).await {
        Ok(Some(event)) => event,
        Ok(None) => {
            send_error(
                &mut socket,
                &SessionError::new(ErrorKind::NotFound, "event not found"),
            )
            .await;
            return;
        }
        Err(err) => {
            let err: SessionError = err.into();
            send_error(&mut socket, &err).await;
            return;
        }
    };
    let event_id = event.event_id;
    let session = state.hub.get_or_create(event_id);

    let guard = match state
        .hub
        .join_gate
        .acquire(event_id, JOIN_GATE_ACQUIRE_TIMEOUT)
        .await
    {
        Ok(guard) => guard,
        Err(err) => {
            send_error(&mut socket, &err).await;
            return;
        }
    };
    let outcome = join::join_event(
        state.repository.as_ref(),
        &state.clock,
        &state.config,
        event_id,
        params.user_id,
        &params.device_fingerprint,
        &params.display_name,
        params.avatar.clone(),
        session.current_phase().await,
    )
    .await;
    drop(guard);

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(err) => {
            send_error(&mut socket, &err).await;
            return;
        }
    };

    let participant_id = outcome.participant.participant_id;
    let (handle, mut outbound_rx) =
        new_outbound(participant_id, state.config.outbound_queue_capacity);
    state.hub.register_connection(handle);
    state.hub.heartbeat.track(participant_id).await;

    if outcome.is_rejoining && session.reconnect_eligible(participant_id).await {
        let resume_broadcasts = session.mark_online(participant_id).await;
        state.hub.deliver(event_id, resume_broadcasts).await;
        if let Some(restored) = session.state_restored(participant_id).await {
            state.hub.send_to(participant_id, restored);
        }
    } else {
        let broadcasts = session
            .join(
                participant_id,
                outcome.participant.user_id,
                outcome.participant.display_name.clone(),
                outcome.participant.avatar.clone(),
                outcome.participant.is_late_joiner,
            )
            .await;
        state.hub.deliver(event_id, broadcasts).await;
    }

    log::info!(%participant_id, %event_id, "participant connected");

    let mut heartbeat_ticker = tokio::time::interval(state.config.heartbeat_interval());
    heartbeat_ticker.tick().await; // first tick fires immediately; skip it

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                if !handle_incoming(incoming, &mut socket, event_id, participant_id, &state).await {
                    break;
                }
            }
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(message) => {
                        if !send_message(&mut socket, &message).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = heartbeat_ticker.tick() => {
                if !send_message(&mut socket, &ServerMessage::Ping).await {
                    break;
                }
                if !state.hub.heartbeat.is_healthy(participant_id).await {
                    log::debug!(%participant_id, "heartbeat grace exceeded, closing connection");
                    break;
                }
            }
        }
    }

    log::info!(%participant_id, %event_id, "participant disconnected");
    state.hub.heartbeat.stop_tracking(participant_id).await;
    state.hub.unregister_connection(participant_id);
    state.hub.mark_participant_offline(event_id, participant_id).await;
}

async fn handle_incoming(
    incoming: Option<Result<ws::Message, axum::Error>>,
    socket: &mut WebSocket,
    event_id: EventId,
    participant_id: ParticipantId,
    state: &Arc<AppState>,
) -> bool {
    match incoming {
        Some(Ok(ws::Message::Text(text))) => {
            handle_text(&text.to_string(), socket, event_id, participant_id, state).await
        }
        Some(Ok(ws::Message::Pong(_))) => {
            state.hub.heartbeat.record_pong(participant_id).await;
            true
        }
        Some(Ok(ws::Message::Close(_))) => false,
        Some(Ok(_)) => true,
        Some(Err(err)) => {
            log::debug!(%participant_id, error = %err, "websocket read error");
            false
        }
        None => false,
    }
}

async fn handle_text(
    text: &str,
    socket: &mut WebSocket,
    event_id: EventId,
    participant_id: ParticipantId,
    state: &Arc<AppState>,
) -> bool {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(err) => {
            let error = SessionError::new(
                relay_core::errors::ErrorKind::InvalidMessage,
                err.to_string(),
            );
            return send_error(socket, &error).await;
        }
    };

    if matches!(message, ClientMessage::Pong) {
        state.hub.heartbeat.record_pong(participant_id).await;
        return true;
    }
    if matches!(message, ClientMessage::Join { .. }) {
        state.hub.heartbeat.record_pong(participant_id).await;
        return true;
    }

    if let Err(err) = state.hub.dispatch(event_id, participant_id, message).await {
        return send_error(socket, &err).await;
    }
    true
}

async fn send_error(socket: &mut WebSocket, error: &SessionError) -> bool {
    send_message(
        socket,
        &ServerMessage::Error {
            kind: error.kind,
            message: error.message.clone(),
        },
    )
    .await
}

async fn send_message(socket: &mut WebSocket, message: &ServerMessage) -> bool {
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(err) => {
            log::error!(error = %err, "failed to serialize outbound message");
            return false;
        }
    };
    if let Err(err) = socket.send(ws::Message::Text(json.into())).await {
        log::debug!(error = %err, "failed to write to websocket");
        return false;
    }
    true
}
