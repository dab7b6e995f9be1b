//! Transcript input and derived chunks.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An episode transcript handed over by the ingestion side.
///
/// Transcripts are read-only inputs; nothing in this crate writes them back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    /// Opaque episode identifier.
    pub episode_id: String,
    /// Episode title.
    #[serde(default)]
    pub title: String,
    /// Show or feed the episode came from.
    #[serde(default)]
    pub source: String,
    /// Publication time (Unix epoch seconds).
    #[serde(default)]
    pub published_at: u64,
    /// Transcript body.
    pub text: String,
    /// Topic name to relevance score (0.0 to 1.0).
    #[serde(default)]
    pub scores: BTreeMap<String, f64>,
}

impl Transcript {
    /// Creates a transcript with no scores.
    #[must_use]
    pub fn new(episode_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            episode_id: episode_id.into(),
            title: String::new(),
            source: String::new(),
            published_at: 0,
            text: text.into(),
            scores: BTreeMap::new(),
        }
    }

    /// Sets the title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Sets the source.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Sets the publication timestamp.
    #[must_use]
    pub const fn with_published_at(mut self, published_at: u64) -> Self {
        self.published_at = published_at;
        self
    }

    /// Adds a relevance score for a topic.
    #[must_use]
    pub fn with_score(mut self, topic: impl Into<String>, score: f64) -> Self {
        self.scores.insert(topic.into(), score);
        self
    }

    /// Relevance score for `topic`; topics the scorer never saw count as 0.0.
    #[must_use]
    pub fn score_for(&self, topic: &str) -> f64 {
        self.scores.get(topic).copied().unwrap_or(0.0)
    }

    /// Transcript length in characters.
    #[must_use]
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// A window of transcript text, addressed by character offsets.
///
/// Chunks are recomputed on every run and never persisted; only their
/// summaries are.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    /// Position of the chunk within its transcript.
    pub index: usize,
    /// Inclusive start offset in characters.
    pub char_start: usize,
    /// Exclusive end offset in characters.
    pub char_end: usize,
    /// The chunk text.
    pub text: String,
}

impl Chunk {
    /// Number of characters covered by the chunk.
    #[must_use]
    pub const fn char_len(&self) -> usize {
        self.char_end - self.char_start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_for_missing_topic_is_zero() {
        let transcript = Transcript::new("ep-1", "text").with_score("AI News", 0.9);
        assert!((transcript.score_for("AI News") - 0.9).abs() < f64::EPSILON);
        assert!(transcript.score_for("Sports").abs() < f64::EPSILON);
    }

    #[test]
    fn test_char_len_counts_scalars() {
        let transcript = Transcript::new("ep-1", "héllo wörld");
        assert_eq!(transcript.char_len(), 11);
        assert!(transcript.text.len() > 11);
    }

    #[test]
    fn test_manifest_defaults() {
        let json = r#"{"episode_id": "ep-9", "text": "body"}"#;
        let transcript: Transcript = serde_json::from_str(json).unwrap();
        assert_eq!(transcript.episode_id, "ep-9");
        assert!(transcript.title.is_empty());
        assert!(transcript.scores.is_empty());
        assert_eq!(transcript.published_at, 0);
    }
}
