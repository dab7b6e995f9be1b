//! Metrics for `SQLite` operations.

use std::time::Instant;

/// Records `sqlite_operations_total` and `sqlite_operation_duration_ms` for
/// one operation.
///
/// `store` names the table family (`summary_cache`, `run_recorder`) and
/// `status` is `"success"` or `"error"`.
pub fn record_operation_metrics(
    store: &'static str,
    operation: &'static str,
    start: Instant,
    status: &'static str,
) {
    metrics::counter!(
        "sqlite_operations_total",
        "store" => store,
        "operation" => operation,
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "sqlite_operation_duration_ms",
        "store" => store,
        "operation" => operation,
        "status" => status
    )
    .record(start.elapsed().as_secs_f64() * 1000.0);
}
