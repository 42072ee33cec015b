//! User account row mapping and provisioning.

use crate::error::SessionError;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use viva_types::Role;

/// The durable per-user budget ledger and session lock.
///
/// Invariant (schema-enforced): `active_session_id` is non-null iff
/// `session_started_at_ms` is non-null.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserAccount {
    pub user_id: String,
    pub role: Role,
    pub daily_limit_secs: i64,
    pub daily_used_secs: i64,
    pub last_reset_date: NaiveDate,
    pub active_session_id: Option<String>,
    pub session_started_at_ms: Option<i64>,
    pub last_heartbeat_at_ms: Option<i64>,
}

impl UserAccount {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let role_label: String = row.get("role")?;
        let reset_date: String = row.get("last_reset_date")?;
        Ok(Self {
            user_id: row.get("user_id")?,
            role: Role::from_str_opt(&role_label).unwrap_or_default(),
            daily_limit_secs: row.get("daily_limit_secs")?,
            daily_used_secs: row.get("daily_used_secs")?,
            last_reset_date: reset_date.parse().map_err(|_| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    format!("invalid last_reset_date: {reset_date}").into(),
                )
            })?,
            active_session_id: row.get("active_session_id")?,
            session_started_at_ms: row.get("session_started_at_ms")?,
            last_heartbeat_at_ms: row.get("last_heartbeat_at_ms")?,
        })
    }

    /// Seconds of budget left today, never negative.
    pub fn remaining_secs(&self) -> i64 {
        (self.daily_limit_secs - self.daily_used_secs).max(0)
    }
}

const SELECT_COLUMNS: &str = "user_id, role, daily_limit_secs, daily_used_secs, \
     last_reset_date, active_session_id, session_started_at_ms, last_heartbeat_at_ms";

/// Retrieves a user's account row.
///
/// # Errors
///
/// Returns [`SessionError::UserNotFound`] when no row exists.
pub fn get_account(conn: &Connection, user_id: &str) -> Result<UserAccount, SessionError> {
    conn.query_row(
        &format!("SELECT {SELECT_COLUMNS} FROM users WHERE user_id = ?1"),
        params![user_id],
        UserAccount::from_row,
    )
    .optional()?
    .ok_or_else(|| SessionError::UserNotFound(user_id.to_string()))
}

/// Creates the user row with defaults if it does not exist yet.
///
/// The identity provider owns credentials; Viva only owns counters, so a
/// first authenticated operation is allowed to provision the ledger row.
pub fn ensure_user(
    conn: &Connection,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<(), SessionError> {
    conn.execute(
        "INSERT OR IGNORE INTO users (user_id, last_reset_date) VALUES (?1, ?2)",
        params![user_id, now.date_naive().to_string()],
    )?;
    Ok(())
}
