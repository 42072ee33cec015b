//! The `/ws` realtime endpoint.
//!
//! One WebSocket connection carries one interview: JSON text frames are
//! control events, binary frames are microphone audio. The handler
//! authenticates the signed token before upgrading, then bridges the socket
//! to a dedicated per-connection orchestrator: client frames become engine
//! commands, engine events become outgoing frames, and session budget
//! operations run against the database on the way through.

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        ConnectInfo, Extension, Query, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde::Deserialize;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::time::Instant;

use viva_interview::{spawn_engine, EngineCommand, EngineHandle};
use viva_session::SessionError;
use viva_types::events::{ClientEvent, ServerEvent, SessionOp};
use viva_types::TerminationReason;

use crate::{auth, AppState};

/// Minimum gap between `session:start` requests on one connection. Blunt
/// protection against a client looping starts to fish for session ids.
const START_THROTTLE: Duration = Duration::from_secs(5);

/// Query parameters for the WebSocket connection.
#[derive(Debug, Deserialize)]
pub struct WsConnectParams {
    pub token: Option<String>,
}

/// WebSocket handler: `GET /ws?token=...`.
///
/// The signed token is verified before the upgrade; invalid or expired
/// tokens are rejected with 401 and logged with the remote address.
pub async fn ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
    Query(params): Query<WsConnectParams>,
) -> impl IntoResponse {
    let Some(ref token) = params.token else {
        tracing::warn!(remote_addr = %addr, "websocket connect missing token");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let user_id = match auth::verify_token(token, &state.token_secret) {
        Ok(user_id) => user_id,
        Err(code) => {
            tracing::warn!(remote_addr = %addr, status = %code, "websocket token rejected");
            return code.into_response();
        }
    };

    // Provision the ledger row before upgrading (blocking DB operation).
    let pool = state.pool.clone();
    let provision_user = user_id.clone();
    let provisioned = tokio::task::spawn_blocking(move || {
        let conn = pool
            .get()
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        viva_session::ensure_user(&conn, &provision_user, Utc::now())
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
    })
    .await;

    match provisioned {
        Ok(Ok(())) => {
            tracing::info!(user_id = %user_id, remote_addr = %addr, "websocket auth success");
            ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
        }
        Ok(Err(code)) => code.into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// Drives one connection: socket frames in, engine events out.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user_id: String) {
    let EngineHandle {
        commands,
        mut events,
    } = spawn_engine(state.engine_config.clone(), state.providers.clone());

    let (mut sender, mut receiver) = socket.split();
    let mut last_start: Option<Instant> = None;
    // Set once a terminal session:end frame has been sent, so the engine's
    // own termination event never produces a duplicate.
    let mut terminal_sent = false;

    loop {
        tokio::select! {
            maybe_event = events.recv() => {
                let Some(event) = maybe_event else { break };
                if matches!(event, ServerEvent::SessionEnd { .. }) {
                    if terminal_sent {
                        continue;
                    }
                    // A forced termination must charge the budget too.
                    end_budget_session(&state, &user_id).await;
                    terminal_sent = true;
                }
                if !send_event(&mut sender, &event).await {
                    break;
                }
            }

            maybe_msg = receiver.next() => {
                let Some(Ok(msg)) = maybe_msg else { break };
                match msg {
                    WsMessage::Text(text) => {
                        let Ok(event) = serde_json::from_str::<ClientEvent>(&text) else {
                            tracing::warn!(user_id = %user_id, "unparseable control frame");
                            send_event(&mut sender, &ServerEvent::Error {
                                message: "invalid message format".to_string(),
                            })
                            .await;
                            continue;
                        };
                        handle_client_event(
                            event,
                            &state,
                            &user_id,
                            &commands,
                            &mut sender,
                            &mut last_start,
                            &mut terminal_sent,
                        )
                        .await;
                    }
                    WsMessage::Binary(data) => {
                        if commands
                            .send(EngineCommand::Audio(data.to_vec()))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    WsMessage::Close(_) => break,
                    // Pings are answered by axum automatically.
                    _ => {}
                }
            }
        }
    }

    // The STT stream closes with the engine; the budget end is idempotent,
    // so running both unconditionally on disconnect is safe.
    let _ = commands.send(EngineCommand::End).await;
    end_budget_session(&state, &user_id).await;
    tracing::info!(user_id = %user_id, "websocket connection closed");
}

async fn handle_client_event(
    event: ClientEvent,
    state: &Arc<AppState>,
    user_id: &str,
    commands: &tokio::sync::mpsc::Sender<EngineCommand>,
    sender: &mut SplitSink<WebSocket, WsMessage>,
    last_start: &mut Option<Instant>,
    terminal_sent: &mut bool,
) {
    match event {
        ClientEvent::SessionStart => {
            let now = Instant::now();
            if last_start.is_some_and(|t| now.duration_since(t) < START_THROTTLE) {
                send_event(
                    sender,
                    &ServerEvent::op_failed(
                        SessionOp::Start,
                        "please wait a moment before starting another session",
                    ),
                )
                .await;
                return;
            }
            *last_start = Some(now);

            let policy = state.session_policy;
            let uid = user_id.to_string();
            let ack = match run_blocking_op(state, move |conn| {
                viva_session::start_session(conn, &uid, Utc::now(), &policy)
            })
            .await
            {
                OpResult::Ok(outcome) => {
                    ServerEvent::start_ok(outcome.session_id, outcome.remaining_secs)
                }
                OpResult::Session(SessionError::BudgetExceeded { used_secs, limit_secs }) => {
                    ServerEvent::op_failed(
                        SessionOp::Start,
                        format!(
                            "daily interview budget exhausted ({used_secs}s of {limit_secs}s used)"
                        ),
                    )
                }
                OpResult::Session(err) => {
                    tracing::error!(user_id = %user_id, error = %err, "session start failed");
                    ServerEvent::op_failed(SessionOp::Start, "could not start a session")
                }
                OpResult::Internal(e) => {
                    tracing::error!(user_id = %user_id, "session start failed: {e}");
                    ServerEvent::op_failed(SessionOp::Start, "could not start a session")
                }
            };
            send_event(sender, &ack).await;
        }

        ClientEvent::SessionHeartbeat => {
            let policy = state.session_policy;
            let uid = user_id.to_string();
            match run_blocking_op(state, move |conn| {
                viva_session::heartbeat_session(conn, &uid, Utc::now(), &policy)
            })
            .await
            {
                OpResult::Ok(()) => {
                    send_event(sender, &ServerEvent::op_ok(SessionOp::Heartbeat)).await;
                }
                OpResult::Session(SessionError::DurationCeilingExceeded {
                    ceiling_secs, ..
                }) => {
                    // The budget manager already force-ended and charged the
                    // session; tell the client and stop the interview.
                    *terminal_sent = true;
                    send_event(
                        sender,
                        &ServerEvent::SessionEnd {
                            reason: TerminationReason::MaxDuration,
                            message: format!(
                                "the session exceeded the maximum duration of {ceiling_secs}s"
                            ),
                        },
                    )
                    .await;
                    let _ = commands.send(EngineCommand::End).await;
                }
                OpResult::Session(err) => {
                    tracing::error!(user_id = %user_id, error = %err, "heartbeat failed");
                    send_event(
                        sender,
                        &ServerEvent::op_failed(SessionOp::Heartbeat, "heartbeat failed"),
                    )
                    .await;
                }
                OpResult::Internal(e) => {
                    tracing::error!(user_id = %user_id, "heartbeat failed: {e}");
                    send_event(
                        sender,
                        &ServerEvent::op_failed(SessionOp::Heartbeat, "heartbeat failed"),
                    )
                    .await;
                }
            }
        }

        ClientEvent::SessionEnd => {
            let uid = user_id.to_string();
            match run_blocking_op(state, move |conn| {
                viva_session::end_session(conn, &uid, Utc::now())
            })
            .await
            {
                OpResult::Ok(_) => {
                    send_event(sender, &ServerEvent::op_ok(SessionOp::End)).await;
                    // Stop the interview loop; the engine's terminal event is
                    // forwarded to the client as the session:end frame.
                    let _ = commands.send(EngineCommand::End).await;
                }
                OpResult::Session(err) => {
                    tracing::error!(user_id = %user_id, error = %err, "session end failed");
                    send_event(
                        sender,
                        &ServerEvent::op_failed(SessionOp::End, "could not end the session"),
                    )
                    .await;
                }
                OpResult::Internal(e) => {
                    tracing::error!(user_id = %user_id, "session end failed: {e}");
                    send_event(
                        sender,
                        &ServerEvent::op_failed(SessionOp::End, "could not end the session"),
                    )
                    .await;
                }
            }
        }

        ClientEvent::InterviewStart => {
            // The budget manager is the gatekeeper: no active session lock,
            // no interview loop. Otherwise a client could skip session:start
            // (or shrug off a refused one) and consume providers unmetered.
            if !holds_active_session(state, user_id).await {
                send_event(
                    sender,
                    &ServerEvent::Error {
                        message: "start a session before beginning the interview".to_string(),
                    },
                )
                .await;
                return;
            }
            let _ = commands.send(EngineCommand::Begin).await;
        }

        ClientEvent::SessionViolation => {
            let _ = commands.send(EngineCommand::Violation).await;
        }
    }
}

/// Outcome of a budget operation dispatched to the blocking pool.
enum OpResult<T> {
    Ok(T),
    /// The operation ran and returned a domain error.
    Session(SessionError),
    /// The operation never ran (pool exhausted, task panicked).
    Internal(String),
}

async fn run_blocking_op<T, F>(state: &Arc<AppState>, op: F) -> OpResult<T>
where
    T: Send + 'static,
    F: FnOnce(&rusqlite::Connection) -> Result<T, SessionError> + Send + 'static,
{
    let pool = state.pool.clone();
    let result = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| format!("pool error: {e}"))?;
        Ok::<_, String>(op(&conn))
    })
    .await;

    match result {
        Ok(Ok(Ok(value))) => OpResult::Ok(value),
        Ok(Ok(Err(err))) => OpResult::Session(err),
        Ok(Err(e)) => OpResult::Internal(e),
        Err(e) => OpResult::Internal(format!("task join error: {e}")),
    }
}

/// Whether the user currently holds the active-session lock. Anything that
/// prevents the check from answering counts as "no".
async fn holds_active_session(state: &Arc<AppState>, user_id: &str) -> bool {
    let uid = user_id.to_string();
    match run_blocking_op(state, move |conn| viva_session::get_account(conn, &uid)).await {
        OpResult::Ok(account) => account.active_session_id.is_some(),
        OpResult::Session(err) => {
            tracing::warn!(user_id = %user_id, error = %err, "session lookup failed");
            false
        }
        OpResult::Internal(e) => {
            tracing::error!(user_id = %user_id, "session lookup failed: {e}");
            false
        }
    }
}

/// Charges and releases any active session. Idempotent; errors are logged
/// and swallowed because this runs on cleanup paths.
async fn end_budget_session(state: &Arc<AppState>, user_id: &str) {
    let uid = user_id.to_string();
    match run_blocking_op(state, move |conn| {
        viva_session::end_session(conn, &uid, Utc::now())
    })
    .await
    {
        OpResult::Ok(_) => {}
        OpResult::Session(err) => {
            tracing::warn!(user_id = %user_id, error = %err, "cleanup session end failed");
        }
        OpResult::Internal(e) => {
            tracing::warn!(user_id = %user_id, "cleanup session end failed: {e}");
        }
    }
}

/// Serializes and sends one event frame. Returns `false` when the socket is
/// gone and the connection loop should stop.
async fn send_event(sender: &mut SplitSink<WebSocket, WsMessage>, event: &ServerEvent) -> bool {
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!("failed to serialize outgoing event: {e}");
            return true;
        }
    };
    sender.send(WsMessage::Text(json.into())).await.is_ok()
}
