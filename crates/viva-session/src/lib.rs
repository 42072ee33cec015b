//! Session budget manager for the Viva platform.
//!
//! Owns the authoritative per-user interview state: the daily time budget,
//! the exclusive active-session lock, and the server-computed session clock.
//! All mutations happen through three operations — [`start_session`],
//! [`heartbeat_session`], [`end_session`] — each executed as a single
//! immediate SQLite transaction against the user's row, so two connections
//! racing on the same user (e.g. two browser tabs) can never lose an update
//! or double-charge.
//!
//! Timestamps are passed in explicitly (`now: DateTime<Utc>`) rather than
//! read from the wall clock inside the operations. The server always passes
//! `Utc::now()`; tests pass fixed instants.

mod account;
mod error;
mod ops;

pub use account::{ensure_user, get_account, UserAccount};
pub use error::SessionError;
pub use ops::{
    end_session, heartbeat_session, start_session, EndOutcome, SessionPolicy, StartOutcome,
};
