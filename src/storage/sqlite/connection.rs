//! Connection handling: opening, pragmas, and poison-tolerant locking.

use crate::{Error, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Busy timeout applied to every connection, in milliseconds.
pub const BUSY_TIMEOUT_MS: u32 = 5000;

/// Acquires a mutex, recovering the guard if a previous holder panicked.
///
/// A panic while holding the connection cannot leave a half-written row
/// behind (every write is a single statement or an explicit transaction), so
/// the connection is still usable.
pub fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("SQLite mutex was poisoned, recovering");
            metrics::counter!("sqlite_mutex_poison_recovery_total").increment(1);
            poisoned.into_inner()
        },
    }
}

/// Applies WAL journaling, NORMAL synchronous mode and the busy timeout.
///
/// In-memory databases silently keep their `memory` journal mode.
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] if the busy timeout cannot be set.
pub fn configure_connection(conn: &Connection) -> Result<()> {
    // journal_mode returns a row, so pragma_update may report it as an error
    // even though the mode was switched.
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    let _ = conn.pragma_update(None, "synchronous", "NORMAL");
    conn.pragma_update(None, "busy_timeout", BUSY_TIMEOUT_MS)
        .map_err(|e| Error::io("configure_sqlite", e))?;
    Ok(())
}

/// Opens and configures a database file, creating parent directories.
///
/// # Errors
///
/// Returns an error if the directory or database cannot be created.
pub fn open_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io("create_data_dir", e))?;
        }
    }
    let conn = Connection::open(path).map_err(|e| Error::io("open_sqlite", e))?;
    configure_connection(&conn)?;
    Ok(conn)
}

/// Opens a configured in-memory database.
///
/// # Errors
///
/// Returns an error if `SQLite` cannot allocate the database.
pub fn open_in_memory() -> Result<Connection> {
    let conn =
        Connection::open_in_memory().map_err(|e| Error::io("open_sqlite_in_memory", e))?;
    configure_connection(&conn)?;
    Ok(conn)
}
