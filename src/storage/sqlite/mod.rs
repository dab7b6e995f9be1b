//! Shared `SQLite` plumbing for the summary cache and the run recorder.
//!
//! Both stores live in the same database file but each keeps its own
//! connection; WAL mode lets them work side by side.

mod connection;
mod metrics;

pub use connection::{acquire_lock, configure_connection, open_connection, open_in_memory};
pub use metrics::record_operation_metrics;
