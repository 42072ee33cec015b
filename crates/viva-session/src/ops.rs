//! Transactional Start / Heartbeat / End operations.
//!
//! Each operation runs inside one immediate transaction so the read, the
//! accounting, and the lock mutation commit (or roll back) together. The
//! elapsed-time arithmetic always uses server-held timestamps — nothing from
//! the client is trusted for duration accounting.

use crate::account::{get_account, UserAccount};
use crate::error::SessionError;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, Transaction, TransactionBehavior};
use uuid::Uuid;

/// Tunables for the budget manager, loaded from server configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    /// Hard absolute ceiling on a single session's duration, in seconds.
    /// A safety valve independent of the daily budget.
    pub hard_ceiling_secs: i64,

    /// A session whose last heartbeat is older than this is considered
    /// abandoned ("zombie"). Affects only logging; reconciliation charges
    /// the elapsed time either way.
    pub zombie_threshold_secs: i64,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            hard_ceiling_secs: 3_600,
            zombie_threshold_secs: 120,
        }
    }
}

/// Result of a successful [`start_session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOutcome {
    /// The freshly issued session lock token.
    pub session_id: String,
    /// Budget left after reset and reconciliation, before the new clock runs.
    pub remaining_secs: i64,
    /// Seconds charged for an abandoned prior session, if any.
    pub reconciled_secs: i64,
}

/// Result of [`end_session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndOutcome {
    /// Whether an active session was actually closed. `false` means the call
    /// was a defensive no-op.
    pub ended: bool,
    /// Seconds charged to the daily budget by this call.
    pub charged_secs: i64,
}

/// Starts a new interview session for `user_id`, returning the new lock token.
///
/// Within one transaction: lazily resets the daily counter on a date change,
/// charges any abandoned prior session's elapsed time (capped at the daily
/// limit — the "refresh to reset timer" defense), then grants a fresh
/// session. Granting fails with [`SessionError::BudgetExceeded`] only when
/// the ledger already sits at or over the cap *before* the new clock starts;
/// the reset and reconciliation are committed even in that case, so the
/// charge is never lost.
pub fn start_session(
    conn: &Connection,
    user_id: &str,
    now: DateTime<Utc>,
    policy: &SessionPolicy,
) -> Result<StartOutcome, SessionError> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

    let mut account = get_account(&tx, user_id)?;
    apply_daily_reset(&tx, &mut account, now.date_naive())?;

    let mut reconciled_secs = 0;
    if let (Some(prior_id), Some(started_ms)) = (
        account.active_session_id.clone(),
        account.session_started_at_ms,
    ) {
        let elapsed_secs = elapsed_secs_ceil(started_ms, now);
        let stale_heartbeat_secs = account
            .last_heartbeat_at_ms
            .map(|hb| elapsed_secs_ceil(hb, now))
            .unwrap_or(elapsed_secs);
        if stale_heartbeat_secs > policy.zombie_threshold_secs {
            tracing::info!(
                user_id,
                session_id = %prior_id,
                stale_secs = stale_heartbeat_secs,
                "reconciling zombie session at start"
            );
        } else {
            tracing::info!(
                user_id,
                session_id = %prior_id,
                elapsed_secs,
                "superseding live session at start"
            );
        }

        // Charge the prior session, capped at the daily limit, and release
        // the lock. The cap keeps one runaway zombie from producing an
        // absurd ledger value.
        let charged = (account.daily_used_secs + elapsed_secs).min(account.daily_limit_secs);
        tx.execute(
            "UPDATE users
             SET daily_used_secs = ?2,
                 active_session_id = NULL,
                 session_started_at_ms = NULL,
                 last_heartbeat_at_ms = NULL
             WHERE user_id = ?1",
            params![user_id, charged],
        )?;
        reconciled_secs = charged - account.daily_used_secs;
        account.daily_used_secs = charged;
        account.active_session_id = None;
        account.session_started_at_ms = None;
    }

    if account.daily_used_secs >= account.daily_limit_secs {
        // Keep the reset/reconciliation: committing here is what makes the
        // charge stick even though no session is granted.
        tx.commit()?;
        return Err(SessionError::BudgetExceeded {
            used_secs: account.daily_used_secs,
            limit_secs: account.daily_limit_secs,
        });
    }

    let session_id = Uuid::new_v4().to_string();
    let now_ms = now.timestamp_millis();
    tx.execute(
        "UPDATE users
         SET active_session_id = ?2,
             session_started_at_ms = ?3,
             last_heartbeat_at_ms = ?3
         WHERE user_id = ?1",
        params![user_id, session_id, now_ms],
    )?;
    tx.commit()?;

    Ok(StartOutcome {
        session_id,
        remaining_secs: account.remaining_secs(),
        reconciled_secs,
    })
}

/// Records a liveness pulse for the user's active session.
///
/// A heartbeat without an active session is a warn-level no-op: clients send
/// heartbeats on a timer and may race a graceful end. When the session has
/// outlived the hard duration ceiling, it is force-ended (and charged) inside
/// this same transaction and [`SessionError::DurationCeilingExceeded`] is
/// returned so the caller can tell the client the session was killed.
pub fn heartbeat_session(
    conn: &Connection,
    user_id: &str,
    now: DateTime<Utc>,
    policy: &SessionPolicy,
) -> Result<(), SessionError> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

    let mut account = get_account(&tx, user_id)?;
    apply_daily_reset(&tx, &mut account, now.date_naive())?;

    let Some(started_ms) = account.session_started_at_ms else {
        tracing::warn!(user_id, "heartbeat without an active session, ignoring");
        tx.commit()?;
        return Ok(());
    };

    let duration_secs = elapsed_secs_ceil(started_ms, now);
    if duration_secs > policy.hard_ceiling_secs {
        close_active_session(&tx, user_id, duration_secs)?;
        tx.commit()?;
        return Err(SessionError::DurationCeilingExceeded {
            duration_secs,
            ceiling_secs: policy.hard_ceiling_secs,
        });
    }

    tx.execute(
        "UPDATE users SET last_heartbeat_at_ms = ?2 WHERE user_id = ?1",
        params![user_id, now.timestamp_millis()],
    )?;
    tx.commit()?;
    Ok(())
}

/// Gracefully ends the user's active session, charging its duration.
///
/// Calling End with no active session is a warn-level no-op — clients call
/// End defensively on page unload and may have already been force-ended.
pub fn end_session(
    conn: &Connection,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<EndOutcome, SessionError> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

    let mut account = get_account(&tx, user_id)?;
    apply_daily_reset(&tx, &mut account, now.date_naive())?;

    let Some(started_ms) = account.session_started_at_ms else {
        tracing::warn!(user_id, "end without an active session, ignoring");
        tx.commit()?;
        return Ok(EndOutcome {
            ended: false,
            charged_secs: 0,
        });
    };

    let duration_secs = elapsed_secs_ceil(started_ms, now);
    close_active_session(&tx, user_id, duration_secs)?;
    tx.commit()?;

    tracing::info!(user_id, duration_secs, "session ended");
    Ok(EndOutcome {
        ended: true,
        charged_secs: duration_secs,
    })
}

/// Charges `duration_secs` and releases the lock, as one SQL statement.
///
/// The increment happens in SQL rather than read-then-write so a concurrent
/// transaction on the same row can never produce a lost update.
fn close_active_session(
    tx: &Transaction<'_>,
    user_id: &str,
    duration_secs: i64,
) -> Result<(), SessionError> {
    tx.execute(
        "UPDATE users
         SET daily_used_secs = daily_used_secs + ?2,
             active_session_id = NULL,
             session_started_at_ms = NULL,
             last_heartbeat_at_ms = NULL
         WHERE user_id = ?1",
        params![user_id, duration_secs],
    )?;
    Ok(())
}

/// Zeroes the daily counter when the ledger date is not `today`.
fn apply_daily_reset(
    tx: &Transaction<'_>,
    account: &mut UserAccount,
    today: NaiveDate,
) -> Result<(), SessionError> {
    if account.last_reset_date == today {
        return Ok(());
    }
    tracing::info!(
        user_id = %account.user_id,
        from = %account.last_reset_date,
        to = %today,
        "resetting daily budget"
    );
    tx.execute(
        "UPDATE users SET daily_used_secs = 0, last_reset_date = ?2 WHERE user_id = ?1",
        params![account.user_id, today.to_string()],
    )?;
    account.daily_used_secs = 0;
    account.last_reset_date = today;
    Ok(())
}

/// Whole seconds between a stored millisecond timestamp and `now`, rounded
/// up, never negative.
fn elapsed_secs_ceil(start_ms: i64, now: DateTime<Utc>) -> i64 {
    let diff_ms = (now.timestamp_millis() - start_ms).max(0) as u64;
    diff_ms.div_ceil(1000) as i64
}
