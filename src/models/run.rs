//! Run identifiers and per-run observability records.

use super::DigestStatus;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a digest run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Generates a new time-ordered run ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    /// Wraps an existing ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Token and call accounting for one API-calling stage of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunHeader {
    /// Run the stage belongs to.
    pub run_id: String,
    /// Stage name (e.g. `chunk_summarizer`).
    pub component: String,
    /// Model used by the stage.
    pub model: String,
    /// Prompt tokens consumed.
    pub tokens_in: u64,
    /// Completion tokens produced.
    pub tokens_out: u64,
    /// Attempts beyond the first, summed over all calls.
    pub retries: u64,
    /// Wall-clock time of the stage in milliseconds.
    pub wall_ms: u64,
    /// Calls that ended in an error.
    pub failures: u64,
}

impl RunHeader {
    /// An empty header for `component`.
    #[must_use]
    pub fn new(run_id: &RunId, component: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            run_id: run_id.to_string(),
            component: component.into(),
            model: model.into(),
            tokens_in: 0,
            tokens_out: 0,
            retries: 0,
            wall_ms: 0,
            failures: 0,
        }
    }

    /// Whether the stage made or attempted any call.
    #[must_use]
    pub const fn has_activity(&self) -> bool {
        self.tokens_in > 0 || self.tokens_out > 0 || self.retries > 0 || self.failures > 0
    }
}

/// Outcome of a whole topic run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Run identifier.
    pub run_id: String,
    /// Topic name.
    pub topic: String,
    /// Final status.
    pub status: DigestStatus,
    /// Episodes whose summaries went into the digest.
    pub included_episode_ids: Vec<String>,
    /// Episodes left out (below threshold, over the cap, or trimmed by budget).
    pub excluded_episode_ids: Vec<String>,
    /// Wall-clock time of the run in milliseconds.
    pub wall_ms: u64,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: u64,
}

/// Written for failed topic runs so an operator can retry them later.
///
/// Retrying reuses every cached chunk summary, so only the reduce phase is paid
/// for again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticArtifact {
    /// Run identifier.
    pub run_id: String,
    /// Topic name.
    pub topic: String,
    /// Why the run failed.
    pub reason: String,
    /// Reduce-phase token estimate at failure time.
    pub estimated_tokens: usize,
    /// Episodes that were going into the digest.
    pub included_episode_ids: Vec<String>,
    /// Episodes that had been left out.
    pub excluded_episode_ids: Vec<String>,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: u64,
}
