//! SQLite storage for the budget ledger.
//!
//! Viva's only durable state is one table of per-user counters, so this
//! crate stays deliberately small: a bounded connection pool tuned for many
//! short single-row transactions, and a schema ledger versioned through
//! `PRAGMA user_version`. Schema SQL is embedded with `include_str!` so the
//! binary can never run against a schema it does not know.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use thiserror::Error;

/// Pooled SQLite handle shared across request handlers.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Connection tunables, surfaced through server configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// How long a writer waits on a locked database, in milliseconds.
    pub busy_timeout_ms: u64,
    /// Upper bound on pooled connections.
    pub pool_max_size: u32,
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            pool_max_size: 8,
        }
    }
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("could not build the sqlite connection pool: {0}")]
    Build(#[from] r2d2::Error),
}

/// Opens (or creates) the database at `db_path` and returns a bounded pool.
///
/// Every pooled connection starts in WAL mode with `synchronous = NORMAL`
/// and the configured busy timeout. Budget operations touch a single row
/// inside a short transaction, so a writer never holds the database long;
/// the busy timeout absorbs the rare collision between two connections of
/// the same user.
pub fn create_pool(db_path: &str, settings: DbRuntimeSettings) -> Result<DbPool, PoolError> {
    let manager = SqliteConnectionManager::file(db_path)
        .with_flags(
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )
        .with_init(move |conn| init_connection(conn, settings.busy_timeout_ms));

    Ok(Pool::builder()
        .max_size(settings.pool_max_size)
        .build(manager)?)
}

fn init_connection(conn: &Connection, busy_timeout_ms: u64) -> Result<(), rusqlite::Error> {
    // In-memory databases report "memory" here; anything else must be WAL.
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "wal", |row| row.get(0))?;
    if mode != "wal" && mode != "memory" {
        return Err(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
            Some(format!("journal_mode is {mode}, expected wal")),
        ));
    }
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "busy_timeout", busy_timeout_ms as i64)?;
    Ok(())
}

/// Ordered schema steps. Append-only: `PRAGMA user_version` records how many
/// of these have run, so reordering or editing a shipped step corrupts the
/// ledger's idea of where it stands.
const SCHEMA_STEPS: &[(&str, &str)] = &[("000_users", include_str!("migrations/000_users.sql"))];

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("schema step {0} failed: {1}")]
    Step(&'static str, #[source] rusqlite::Error),

    #[error("could not read the schema version: {0}")]
    Version(#[from] rusqlite::Error),

    /// The database was written by a newer build. Refusing is the only safe
    /// move; running old code against an unknown schema loses data.
    #[error("database schema version {found} is ahead of this build ({known} steps known)")]
    VersionAhead { found: usize, known: usize },
}

/// Brings the schema up to date, returning how many steps ran.
///
/// Each pending step executes inside one transaction together with its
/// `user_version` bump, so a failed step leaves both the schema and the
/// version counter exactly where they were.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    apply_steps(conn, SCHEMA_STEPS)
}

fn apply_steps(
    conn: &Connection,
    steps: &[(&'static str, &'static str)],
) -> Result<usize, MigrationError> {
    let done: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    let done = usize::try_from(done).unwrap_or(0);
    if done > steps.len() {
        return Err(MigrationError::VersionAhead {
            found: done,
            known: steps.len(),
        });
    }

    for (position, &(name, sql)) in steps.iter().enumerate().skip(done) {
        tracing::info!(step = name, "applying schema step");
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| MigrationError::Step(name, e))?;
        tx.execute_batch(sql)
            .map_err(|e| MigrationError::Step(name, e))?;
        tx.pragma_update(None, "user_version", (position + 1) as i64)
            .map_err(|e| MigrationError::Step(name, e))?;
        tx.commit().map_err(|e| MigrationError::Step(name, e))?;
    }

    Ok(steps.len() - done)
}
