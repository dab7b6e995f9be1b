//! Chunk summary records and their idempotency key.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Identifies one unit of chunk-summarization work.
///
/// Repeating work with the same key must not trigger another completion call.
/// Changing `model` or `prompt_version` produces a new key, which is how a
/// prompt or model change invalidates earlier summaries without deleting them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SummaryKey {
    /// Episode identifier.
    pub episode_id: String,
    /// Chunk index within the episode.
    pub chunk_index: usize,
    /// Model that produced the summary.
    pub model: String,
    /// Version tag of the summarization prompt.
    pub prompt_version: String,
}

impl SummaryKey {
    /// Creates a key.
    #[must_use]
    pub fn new(
        episode_id: impl Into<String>,
        chunk_index: usize,
        model: impl Into<String>,
        prompt_version: impl Into<String>,
    ) -> Self {
        Self {
            episode_id: episode_id.into(),
            chunk_index,
            model: model.into(),
            prompt_version: prompt_version.into(),
        }
    }

    /// Content hash over the key and the chunk text (hex SHA-256).
    #[must_use]
    pub fn content_hash(&self, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.episode_id.as_bytes());
        hasher.update([0]);
        hasher.update(self.chunk_index.to_le_bytes());
        hasher.update(self.model.as_bytes());
        hasher.update([0]);
        hasher.update(self.prompt_version.as_bytes());
        hasher.update([0]);
        hasher.update(text.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Compact string form, used as the idempotency key on completion calls.
    #[must_use]
    pub fn idempotency_key(&self) -> String {
        format!(
            "{}#{}@{}/{}",
            self.episode_id, self.chunk_index, self.model, self.prompt_version
        )
    }
}

/// A stored chunk summary.
///
/// Records are never mutated once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSummaryRecord {
    /// Episode identifier.
    pub episode_id: String,
    /// Chunk index within the episode.
    pub chunk_index: usize,
    /// Inclusive start offset in characters.
    pub char_start: usize,
    /// Exclusive end offset in characters.
    pub char_end: usize,
    /// Model that produced the summary.
    pub model: String,
    /// Version tag of the summarization prompt.
    pub prompt_version: String,
    /// The summary.
    pub summary_text: String,
    /// Tokens spent producing the summary (0 for local fallbacks).
    pub tokens_used: u64,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: u64,
}

impl ChunkSummaryRecord {
    /// The idempotency key this record is stored under.
    #[must_use]
    pub fn key(&self) -> SummaryKey {
        SummaryKey::new(
            self.episode_id.clone(),
            self.chunk_index,
            self.model.clone(),
            self.prompt_version.clone(),
        )
    }
}
