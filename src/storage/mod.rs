//! Storage layer.
//!
//! Everything durable lives in one `SQLite` file (`<data_dir>/briefcast.db`):
//! - **Summary cache**: chunk summaries keyed by their idempotency tuple
//! - **Run recorder**: append-only stage headers and run summaries
//!
//! Failed runs additionally leave a JSON diagnostic artifact on disk.

// Dropping the connection guard a few statements early buys nothing here.
#![allow(clippy::significant_drop_tightening)]

mod diagnostics;
mod run_recorder;
pub mod sqlite;
mod summary_cache;

pub use diagnostics::{DiagnosticsWriter, slugify};
pub use run_recorder::{RunRecorder, SqliteRunRecorder};
pub use summary_cache::{SqliteSummaryCache, SummaryCache};

use crate::{Error, Result};
use std::path::PathBuf;

/// Database file name inside the data directory.
pub const DATABASE_FILE: &str = "briefcast.db";

/// Diagnostics directory name inside the data directory.
pub const DIAGNOSTICS_DIR: &str = "diagnostics";

/// Returns the per-user data directory (`<data_local_dir>/briefcast`).
///
/// # Errors
///
/// Returns an error if the platform has no home directory.
pub fn default_data_dir() -> Result<PathBuf> {
    directories::BaseDirs::new()
        .map(|b| b.data_local_dir().join("briefcast"))
        .ok_or_else(|| Error::OperationFailed {
            operation: "default_data_dir".to_string(),
            cause: "Could not determine user data directory".to_string(),
        })
}
