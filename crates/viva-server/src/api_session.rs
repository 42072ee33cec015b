//! HTTP session-control endpoints.
//!
//! Mirrors of the WebSocket session events for clients that manage the
//! budget over plain HTTP: `POST /api/session/start|heartbeat|end` and
//! `GET /api/profile`. All of them run behind the auth middleware.

use axum::{http::StatusCode, Extension, Json};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use viva_session::{SessionError, UserAccount};

use crate::middleware::IdentityContext;
use crate::AppState;

/// Uniform response shape for the session operations.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionResponse {
    fn ok() -> Self {
        Self {
            success: true,
            session_id: None,
            remaining_seconds: None,
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            session_id: None,
            remaining_seconds: None,
            error: Some(error.into()),
        }
    }
}

/// `POST /api/session/start`
pub async fn start_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
) -> Result<Json<SessionResponse>, StatusCode> {
    let policy = state.session_policy;
    let pool = state.pool.clone();
    let user_id = identity.user_id;

    let result = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| {
            tracing::error!(error = %e, "database pool exhausted");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
        Ok::<_, StatusCode>(viva_session::start_session(&conn, &user_id, Utc::now(), &policy))
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    match result {
        Ok(outcome) => Ok(Json(SessionResponse {
            success: true,
            session_id: Some(outcome.session_id),
            remaining_seconds: Some(outcome.remaining_secs),
            error: None,
        })),
        Err(err) => session_error_response(err),
    }
}

/// `POST /api/session/heartbeat`
pub async fn heartbeat_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
) -> Result<Json<SessionResponse>, StatusCode> {
    let policy = state.session_policy;
    let pool = state.pool.clone();
    let user_id = identity.user_id;

    let result = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| {
            tracing::error!(error = %e, "database pool exhausted");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
        Ok::<_, StatusCode>(viva_session::heartbeat_session(&conn, &user_id, Utc::now(), &policy))
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    match result {
        Ok(()) => Ok(Json(SessionResponse::ok())),
        Err(err) => session_error_response(err),
    }
}

/// `POST /api/session/end`
pub async fn end_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
) -> Result<Json<SessionResponse>, StatusCode> {
    let pool = state.pool.clone();
    let user_id = identity.user_id;

    let result = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| {
            tracing::error!(error = %e, "database pool exhausted");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
        Ok::<_, StatusCode>(viva_session::end_session(&conn, &user_id, Utc::now()))
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    match result {
        // Ending without an active session is a success: the endpoint is
        // called defensively on page unload.
        Ok(_) => Ok(Json(SessionResponse::ok())),
        Err(err) => session_error_response(err),
    }
}

/// `GET /api/profile` response payload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    pub user_id: String,
    pub role: viva_types::Role,
    pub daily_limit_secs: i64,
    pub daily_used_secs: i64,
    pub remaining_seconds: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_session_id: Option<String>,
}

/// `GET /api/profile`
pub async fn profile_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(identity): Extension<IdentityContext>,
) -> Result<Json<ProfileResponse>, StatusCode> {
    let pool = state.pool.clone();
    let user_id = identity.user_id;

    let account = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| {
            tracing::error!(error = %e, "database pool exhausted");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
        viva_session::get_account(&conn, &user_id).map_err(|err| match err {
            SessionError::UserNotFound(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        })
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(profile_of(account)))
}

/// Presents the ledger as of today: a stale reset date means the counter
/// would be zeroed by the next operation, so it is reported as zero.
fn profile_of(account: UserAccount) -> ProfileResponse {
    let today = Utc::now().date_naive();
    let used = if account.last_reset_date == today {
        account.daily_used_secs
    } else {
        0
    };
    ProfileResponse {
        remaining_seconds: (account.daily_limit_secs - used).max(0),
        user_id: account.user_id,
        role: account.role,
        daily_limit_secs: account.daily_limit_secs,
        daily_used_secs: used,
        active_session_id: account.active_session_id,
    }
}

fn session_error_response(err: SessionError) -> Result<Json<SessionResponse>, StatusCode> {
    match err {
        SessionError::BudgetExceeded { used_secs, limit_secs } => {
            Ok(Json(SessionResponse::failed(format!(
                "daily interview budget exhausted ({used_secs}s of {limit_secs}s used)"
            ))))
        }
        SessionError::DurationCeilingExceeded { ceiling_secs, .. } => {
            Ok(Json(SessionResponse::failed(format!(
                "session exceeded the maximum duration of {ceiling_secs}s and was ended"
            ))))
        }
        SessionError::UserNotFound(_) => Err(StatusCode::UNAUTHORIZED),
        SessionError::Database(e) => {
            tracing::error!(error = %e, "session operation failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
