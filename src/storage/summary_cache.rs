//! Content-addressed cache of chunk summaries.

use crate::models::{ChunkSummaryRecord, SummaryKey};
use crate::storage::sqlite::{
    acquire_lock, open_connection, open_in_memory, record_operation_metrics,
};
use crate::{Error, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;
use tracing::instrument;

/// Store of chunk summaries keyed by `(episode, chunk, model, prompt_version)`.
///
/// Concurrent writers on one key leave exactly one row behind (last writer
/// wins), and readers never see a partially written row.
pub trait SummaryCache: Send + Sync {
    /// Looks up a summary.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn get(&self, key: &SummaryKey) -> Result<Option<ChunkSummaryRecord>>;

    /// Stores a summary, replacing any row with the same key.
    ///
    /// `topic` and `chunk_text` are kept alongside the record for audit: the
    /// content hash covers the chunk text so a changed transcript is visible.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be written.
    fn put(&self, record: &ChunkSummaryRecord, topic: &str, chunk_text: &str) -> Result<()>;

    /// Number of stored summaries.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn count(&self) -> Result<usize>;
}

/// `SQLite`-backed [`SummaryCache`].
///
/// # Schema
///
/// `chunk_summaries(content_hash PK, episode_id, chunk_index, char_start,
/// char_end, topic, summary, tokens_used, model, prompt_version, created_at)`
/// with a unique index on `(episode_id, chunk_index, prompt_version, model)`.
/// Rows for older models or prompt versions stay in the table and are never
/// read again.
pub struct SqliteSummaryCache {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl SqliteSummaryCache {
    /// Opens (and if needed creates) the cache in a database file.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        let conn = open_connection(&db_path)?;
        let cache = Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path),
        };
        cache.initialize()?;
        Ok(cache)
    }

    /// Creates an in-memory cache (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self> {
        let cache = Self {
            conn: Mutex::new(open_in_memory()?),
            db_path: None,
        };
        cache.initialize()?;
        Ok(cache)
    }

    /// Returns the database path (None for in-memory).
    #[must_use]
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn initialize(&self) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS chunk_summaries (
                content_hash TEXT PRIMARY KEY,
                episode_id TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                char_start INTEGER NOT NULL,
                char_end INTEGER NOT NULL,
                topic TEXT NOT NULL,
                summary TEXT NOT NULL,
                tokens_used INTEGER NOT NULL DEFAULT 0,
                model TEXT NOT NULL,
                prompt_version TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_chunk_summaries_key
                ON chunk_summaries (episode_id, chunk_index, prompt_version, model);",
        )
        .map_err(|e| Error::io("init_summary_cache", e))
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<ChunkSummaryRecord> {
    Ok(ChunkSummaryRecord {
        episode_id: row.get(0)?,
        chunk_index: to_usize(row.get(1)?),
        char_start: to_usize(row.get(2)?),
        char_end: to_usize(row.get(3)?),
        model: row.get(4)?,
        prompt_version: row.get(5)?,
        summary_text: row.get(6)?,
        tokens_used: to_u64(row.get(7)?),
        created_at: to_u64(row.get(8)?),
    })
}

fn to_usize(value: i64) -> usize {
    usize::try_from(value).unwrap_or(0)
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn to_i64<T: TryInto<i64>>(value: T) -> i64 {
    value.try_into().unwrap_or(i64::MAX)
}

impl SummaryCache for SqliteSummaryCache {
    #[instrument(skip(self), fields(operation = "get", store = "summary_cache", episode_id = %key.episode_id, chunk_index = key.chunk_index))]
    fn get(&self, key: &SummaryKey) -> Result<Option<ChunkSummaryRecord>> {
        let start = Instant::now();
        let result = {
            let conn = acquire_lock(&self.conn);
            conn.query_row(
                "SELECT episode_id, chunk_index, char_start, char_end, model, prompt_version,
                        summary, tokens_used, created_at
                 FROM chunk_summaries
                 WHERE episode_id = ?1 AND chunk_index = ?2 AND model = ?3 AND prompt_version = ?4",
                params![
                    key.episode_id,
                    to_i64(key.chunk_index),
                    key.model,
                    key.prompt_version
                ],
                record_from_row,
            )
            .optional()
            .map_err(|e| Error::io("summary_cache_get", e))
        };

        let status = if result.is_ok() { "success" } else { "error" };
        record_operation_metrics("summary_cache", "get", start, status);
        result
    }

    #[instrument(skip(self, record, chunk_text), fields(operation = "put", store = "summary_cache", episode_id = %record.episode_id, chunk_index = record.chunk_index))]
    fn put(&self, record: &ChunkSummaryRecord, topic: &str, chunk_text: &str) -> Result<()> {
        let start = Instant::now();
        let content_hash = record.key().content_hash(chunk_text);
        let result = {
            let conn = acquire_lock(&self.conn);
            // OR REPLACE resolves conflicts on both the hash and the key index,
            // so a concurrent writer's row is replaced rather than duplicated.
            conn.execute(
                "INSERT OR REPLACE INTO chunk_summaries
                    (content_hash, episode_id, chunk_index, char_start, char_end, topic,
                     summary, tokens_used, model, prompt_version, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    content_hash,
                    record.episode_id,
                    to_i64(record.chunk_index),
                    to_i64(record.char_start),
                    to_i64(record.char_end),
                    topic,
                    record.summary_text,
                    to_i64(record.tokens_used),
                    record.model,
                    record.prompt_version,
                    to_i64(record.created_at),
                ],
            )
            .map(|_| ())
            .map_err(|e| Error::io("summary_cache_put", e))
        };

        let status = if result.is_ok() { "success" } else { "error" };
        record_operation_metrics("summary_cache", "put", start, status);
        result
    }

    fn count(&self) -> Result<usize> {
        let start = Instant::now();
        let result = {
            let conn = acquire_lock(&self.conn);
            conn.query_row("SELECT COUNT(*) FROM chunk_summaries", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(to_usize)
            .map_err(|e| Error::io("summary_cache_count", e))
        };

        let status = if result.is_ok() { "success" } else { "error" };
        record_operation_metrics("summary_cache", "count", start, status);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn record(episode: &str, index: usize, version: &str, text: &str) -> ChunkSummaryRecord {
        ChunkSummaryRecord {
            episode_id: episode.to_string(),
            chunk_index: index,
            char_start: index * 2000,
            char_end: index * 2000 + 2200,
            model: "gpt-5-mini".to_string(),
            prompt_version: version.to_string(),
            summary_text: text.to_string(),
            tokens_used: 321,
            created_at: 1_700_000_000,
        }
    }

    #[test]
    fn test_put_and_get() {
        let cache = SqliteSummaryCache::in_memory().unwrap();
        let stored = record("ep-1", 0, "v1", "The host covered new chips.");
        cache.put(&stored, "AI News", "chunk text").unwrap();

        let loaded = cache.get(&stored.key()).unwrap().unwrap();
        assert_eq!(loaded, stored);
    }

    #[test]
    fn test_get_missing() {
        let cache = SqliteSummaryCache::in_memory().unwrap();
        let key = SummaryKey::new("ep-1", 0, "gpt-5-mini", "v1");
        assert!(cache.get(&key).unwrap().is_none());
    }

    #[test]
    fn test_prompt_version_isolates_rows() {
        let cache = SqliteSummaryCache::in_memory().unwrap();
        cache.put(&record("ep-1", 0, "v1", "old"), "AI News", "text").unwrap();

        let new_key = SummaryKey::new("ep-1", 0, "gpt-5-mini", "v2");
        assert!(cache.get(&new_key).unwrap().is_none());

        cache.put(&record("ep-1", 0, "v2", "new"), "AI News", "text").unwrap();
        assert_eq!(cache.get(&new_key).unwrap().unwrap().summary_text, "new");
        assert_eq!(cache.count().unwrap(), 2);
    }

    #[test]
    fn test_same_key_leaves_one_row() {
        let cache = SqliteSummaryCache::in_memory().unwrap();
        let first = record("ep-1", 0, "v1", "first");
        let second = record("ep-1", 0, "v1", "second");
        cache.put(&first, "AI News", "text one").unwrap();
        cache.put(&second, "AI News", "text two").unwrap();

        assert_eq!(cache.count().unwrap(), 1);
        assert_eq!(
            cache.get(&first.key()).unwrap().unwrap().summary_text,
            "second"
        );
    }

    #[test]
    fn test_concurrent_writers_same_key() {
        let cache = Arc::new(SqliteSummaryCache::in_memory().unwrap());
        std::thread::scope(|scope| {
            for writer in 0..8 {
                let cache = Arc::clone(&cache);
                scope.spawn(move || {
                    let text = format!("writer {writer}");
                    cache
                        .put(&record("ep-1", 3, "v1", &text), "AI News", &text)
                        .unwrap();
                });
            }
        });

        assert_eq!(cache.count().unwrap(), 1);
        let stored = cache
            .get(&SummaryKey::new("ep-1", 3, "gpt-5-mini", "v1"))
            .unwrap()
            .unwrap();
        assert!(stored.summary_text.starts_with("writer "));
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("briefcast.db");
        let stored = record("ep-7", 2, "v1", "persisted");
        {
            let cache = SqliteSummaryCache::new(&path).unwrap();
            cache.put(&stored, "AI News", "text").unwrap();
        }
        let cache = SqliteSummaryCache::new(&path).unwrap();
        assert_eq!(cache.db_path(), Some(path.as_path()));
        assert_eq!(cache.get(&stored.key()).unwrap().unwrap(), stored);
    }
}
