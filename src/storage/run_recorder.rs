//! Append-only run observability records.

use crate::models::{DigestStatus, RunHeader, RunSummary};
use crate::storage::sqlite::{
    acquire_lock, open_connection, open_in_memory, record_operation_metrics,
};
use crate::{Error, Result};
use rusqlite::{Connection, Row, params};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;
use tracing::instrument;

/// Persists per-stage headers and per-run summaries.
///
/// Rows are only ever appended.
pub trait RunRecorder: Send + Sync {
    /// Appends one stage header.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be written.
    fn record_stage(&self, header: &RunHeader) -> Result<()>;

    /// Appends one run summary.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be written.
    fn record_run(&self, summary: &RunSummary) -> Result<()>;

    /// Most recent run summaries, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn list_runs(&self, limit: usize) -> Result<Vec<RunSummary>>;

    /// Stage headers of one run, in recording order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn stages_for(&self, run_id: &str) -> Result<Vec<RunHeader>>;
}

/// `SQLite`-backed [`RunRecorder`].
///
/// Shares the database file with the summary cache; the tables are
/// `run_headers` and `run_summaries`. Episode id lists are stored as JSON
/// arrays.
pub struct SqliteRunRecorder {
    conn: Mutex<Connection>,
}

impl SqliteRunRecorder {
    /// Opens (and if needed creates) the recorder tables in a database file.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self> {
        let recorder = Self {
            conn: Mutex::new(open_connection(&db_path.into())?),
        };
        recorder.initialize()?;
        Ok(recorder)
    }

    /// Creates an in-memory recorder (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self> {
        let recorder = Self {
            conn: Mutex::new(open_in_memory()?),
        };
        recorder.initialize()?;
        Ok(recorder)
    }

    fn initialize(&self) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS run_headers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                component TEXT NOT NULL,
                model TEXT NOT NULL,
                tokens_in INTEGER NOT NULL,
                tokens_out INTEGER NOT NULL,
                retries INTEGER NOT NULL,
                wall_ms INTEGER NOT NULL,
                failures INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_run_headers_run_id ON run_headers (run_id);
            CREATE TABLE IF NOT EXISTS run_summaries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                topic TEXT NOT NULL,
                status TEXT NOT NULL,
                included_episode_ids TEXT NOT NULL,
                excluded_episode_ids TEXT NOT NULL,
                wall_ms INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_run_summaries_created ON run_summaries (created_at);",
        )
        .map_err(|e| Error::io("init_run_recorder", e))
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn encode_ids(ids: &[String]) -> Result<String> {
    serde_json::to_string(ids).map_err(|e| Error::io("encode_episode_ids", e))
}

fn decode_ids(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Unreadable episode id list in run_summaries");
        Vec::new()
    })
}

fn header_from_row(row: &Row<'_>) -> rusqlite::Result<RunHeader> {
    Ok(RunHeader {
        run_id: row.get(0)?,
        component: row.get(1)?,
        model: row.get(2)?,
        tokens_in: to_u64(row.get(3)?),
        tokens_out: to_u64(row.get(4)?),
        retries: to_u64(row.get(5)?),
        wall_ms: to_u64(row.get(6)?),
        failures: to_u64(row.get(7)?),
    })
}

fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<RunSummary> {
    let status: String = row.get(2)?;
    let included: String = row.get(3)?;
    let excluded: String = row.get(4)?;
    Ok(RunSummary {
        run_id: row.get(0)?,
        topic: row.get(1)?,
        status: DigestStatus::parse(&status).unwrap_or(DigestStatus::Failed),
        included_episode_ids: decode_ids(&included),
        excluded_episode_ids: decode_ids(&excluded),
        wall_ms: to_u64(row.get(5)?),
        created_at: to_u64(row.get(6)?),
    })
}

impl RunRecorder for SqliteRunRecorder {
    #[instrument(skip(self, header), fields(operation = "record_stage", store = "run_recorder", run_id = %header.run_id, component = %header.component))]
    fn record_stage(&self, header: &RunHeader) -> Result<()> {
        let start = Instant::now();
        let result = {
            let conn = acquire_lock(&self.conn);
            conn.execute(
                "INSERT INTO run_headers
                    (run_id, component, model, tokens_in, tokens_out, retries, wall_ms, failures)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    header.run_id,
                    header.component,
                    header.model,
                    to_i64(header.tokens_in),
                    to_i64(header.tokens_out),
                    to_i64(header.retries),
                    to_i64(header.wall_ms),
                    to_i64(header.failures),
                ],
            )
            .map(|_| ())
            .map_err(|e| Error::io("record_stage", e))
        };

        let status = if result.is_ok() { "success" } else { "error" };
        record_operation_metrics("run_recorder", "record_stage", start, status);
        result
    }

    #[instrument(skip(self, summary), fields(operation = "record_run", store = "run_recorder", run_id = %summary.run_id, status = %summary.status))]
    fn record_run(&self, summary: &RunSummary) -> Result<()> {
        let start = Instant::now();
        let included = encode_ids(&summary.included_episode_ids)?;
        let excluded = encode_ids(&summary.excluded_episode_ids)?;
        let result = {
            let conn = acquire_lock(&self.conn);
            conn.execute(
                "INSERT INTO run_summaries
                    (run_id, topic, status, included_episode_ids, excluded_episode_ids,
                     wall_ms, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    summary.run_id,
                    summary.topic,
                    summary.status.as_str(),
                    included,
                    excluded,
                    to_i64(summary.wall_ms),
                    to_i64(summary.created_at),
                ],
            )
            .map(|_| ())
            .map_err(|e| Error::io("record_run", e))
        };

        let status = if result.is_ok() { "success" } else { "error" };
        record_operation_metrics("run_recorder", "record_run", start, status);
        result
    }

    #[instrument(skip(self), fields(operation = "list_runs", store = "run_recorder"))]
    fn list_runs(&self, limit: usize) -> Result<Vec<RunSummary>> {
        let start = Instant::now();
        let result = (|| {
            let conn = acquire_lock(&self.conn);
            let mut stmt = conn.prepare(
                "SELECT run_id, topic, status, included_episode_ids, excluded_episode_ids,
                        wall_ms, created_at
                 FROM run_summaries
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?1",
            )?;
            let rows = stmt.query_map(
                params![i64::try_from(limit).unwrap_or(i64::MAX)],
                summary_from_row,
            )?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })()
        .map_err(|e| Error::io("list_runs", e));

        let status = if result.is_ok() { "success" } else { "error" };
        record_operation_metrics("run_recorder", "list_runs", start, status);
        result
    }

    #[instrument(skip(self), fields(operation = "stages_for", store = "run_recorder"))]
    fn stages_for(&self, run_id: &str) -> Result<Vec<RunHeader>> {
        let start = Instant::now();
        let result = (|| {
            let conn = acquire_lock(&self.conn);
            let mut stmt = conn.prepare(
                "SELECT run_id, component, model, tokens_in, tokens_out, retries, wall_ms, failures
                 FROM run_headers
                 WHERE run_id = ?1
                 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![run_id], header_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })()
        .map_err(|e| Error::io("stages_for", e));

        let status = if result.is_ok() { "success" } else { "error" };
        record_operation_metrics("run_recorder", "stages_for", start, status);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RunId;

    fn summary(run_id: &str, created_at: u64, status: DigestStatus) -> RunSummary {
        RunSummary {
            run_id: run_id.to_string(),
            topic: "AI News".to_string(),
            status,
            included_episode_ids: vec!["ep-a".to_string(), "ep-b".to_string()],
            excluded_episode_ids: vec!["ep-c".to_string()],
            wall_ms: 1234,
            created_at,
        }
    }

    #[test]
    fn test_stage_headers_round_trip_in_order() {
        let recorder = SqliteRunRecorder::in_memory().unwrap();
        let run_id = RunId::new("run-1");

        let mut chunk = RunHeader::new(&run_id, "chunk_summarizer", "gpt-5-mini");
        chunk.tokens_in = 9000;
        chunk.tokens_out = 700;
        chunk.retries = 2;
        let mut synth = RunHeader::new(&run_id, "digest_synthesizer", "gpt-5");
        synth.failures = 1;

        recorder.record_stage(&chunk).unwrap();
        recorder.record_stage(&synth).unwrap();
        recorder
            .record_stage(&RunHeader::new(&RunId::new("run-2"), "prose_validator", "gpt-5-mini"))
            .unwrap();

        let stages = recorder.stages_for("run-1").unwrap();
        assert_eq!(stages, vec![chunk, synth]);
    }

    #[test]
    fn test_list_runs_newest_first_with_limit() {
        let recorder = SqliteRunRecorder::in_memory().unwrap();
        recorder.record_run(&summary("run-1", 100, DigestStatus::Ok)).unwrap();
        recorder.record_run(&summary("run-2", 300, DigestStatus::Failed)).unwrap();
        recorder.record_run(&summary("run-3", 200, DigestStatus::Partial)).unwrap();

        let runs = recorder.list_runs(2).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].run_id, "run-2");
        assert_eq!(runs[0].status, DigestStatus::Failed);
        assert_eq!(runs[1].run_id, "run-3");
        assert_eq!(runs[1].included_episode_ids, vec!["ep-a", "ep-b"]);
        assert_eq!(runs[1].excluded_episode_ids, vec!["ep-c"]);
    }

    #[test]
    fn test_shares_database_with_cache() {
        use crate::storage::{SqliteSummaryCache, SummaryCache};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("briefcast.db");
        let cache = SqliteSummaryCache::new(&path).unwrap();
        let recorder = SqliteRunRecorder::new(&path).unwrap();

        recorder.record_run(&summary("run-1", 1, DigestStatus::Ok)).unwrap();
        assert_eq!(cache.count().unwrap(), 0);
        assert_eq!(recorder.list_runs(10).unwrap().len(), 1);
    }
}
