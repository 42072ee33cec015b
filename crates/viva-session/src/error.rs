use thiserror::Error;

/// Errors produced by budget-manager operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The user row does not exist. A precondition violation the caller must
    /// react to — provisioning happens at authentication time, not here.
    #[error("user not found: {0}")]
    UserNotFound(String),

    /// The daily time budget is exhausted; no session was created.
    #[error("daily time budget exhausted ({used_secs}s of {limit_secs}s used)")]
    BudgetExceeded { used_secs: i64, limit_secs: i64 },

    /// The hard absolute session-duration ceiling was breached. The session
    /// has already been force-ended and charged when this is returned.
    #[error("session exceeded maximum duration ({duration_secs}s > {ceiling_secs}s)")]
    DurationCeilingExceeded {
        duration_secs: i64,
        ceiling_secs: i64,
    },
}
