//! # Briefcast
//!
//! Map-reduce digest compiler for long transcripts.
//!
//! Briefcast turns a set of episode transcripts into one speech-ready narrative
//! digest per topic. Transcripts are split into overlapping chunks, each chunk
//! is summarized once (results are cached by an idempotency key), the relevant
//! episodes are ranked and trimmed to a token budget, and a single synthesis
//! call produces the digest, which is then checked for list/markup structure
//! and rewritten into flowing prose when needed.
//!
//! ## Pipeline
//!
//! ```text
//! transcripts ─► EpisodeSelector ─► ChunkSplitter ─► ChunkSummarizer ─► BudgetEnforcer
//!                                                     (SummaryCache)
//!             ─► DigestSynthesizer ─► ProseValidator ─► DigestResult
//! ```
//!
//! Every stage that talks to the completion service goes through
//! [`llm::ResilientCaller`], and every run is recorded by a
//! [`storage::RunRecorder`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use briefcast::config::DigestConfig;
//! use briefcast::services::DigestPipeline;
//! use std::path::Path;
//!
//! let config = DigestConfig::load_default()?;
//! let pipeline = DigestPipeline::from_config(config)?;
//! let transcripts = briefcast::io::load_manifest(Path::new("episodes.json"))?;
//! let digest = pipeline.run_topic("AI News", &transcripts, &pipeline.cancel_token())?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod config;
pub mod io;
pub mod llm;
pub mod models;
pub mod observability;
pub mod security;
pub mod services;
pub mod storage;

pub use config::DigestConfig;
pub use llm::{CompletionService, ResilientCaller};
pub use models::{
    Chunk, ChunkSummaryRecord, DigestItem, DigestResult, DigestStatus, EpisodeCandidate,
    RunHeader, RunId, Transcript,
};
pub use services::{
    BudgetEnforcer, ChunkSplitter, ChunkSummarizer, DigestPipeline, DigestSynthesizer,
    EpisodeSelector, ProseValidator,
};
pub use storage::{RunRecorder, SummaryCache};

/// Error type for briefcast operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When | Retried |
/// |---------|-------------|---------|
/// | `InvalidInput` | Bad configuration, malformed manifest, impossible chunk sizes | no |
/// | `OperationFailed` | I/O, SQLite, non-transient HTTP status, missing API key | no |
/// | `TransientApi` | Network error, HTTP 5xx, HTTP 429 rate limit | yes |
/// | `SafetyViolation` | Response contains injection phrases or prompt echo | no |
/// | `SchemaViolation` | Response does not parse into the requested schema | no |
/// | `RetryExhausted` | All attempts failed with transient errors | - |
/// | `BudgetInfeasible` | Two candidates still exceed the reduce budget | - |
/// | `Cancelled` | The run was aborted between stages | - |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed.
    ///
    /// Raised when:
    /// - `SQLite` database operations fail
    /// - Filesystem I/O errors occur
    /// - The completion service returns a non-retryable status
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// A transient completion-service failure (network, 5xx, rate limit).
    #[error("transient API error{}: {cause}", status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    TransientApi {
        /// HTTP status, when one was received.
        status: Option<u16>,
        /// The underlying cause.
        cause: String,
    },

    /// The response looked like a prompt-injection or prompt echo.
    ///
    /// Hard reject, never retried.
    #[error("safety violation: {reason}")]
    SafetyViolation {
        /// What was detected.
        reason: String,
    },

    /// The response did not match the requested structured schema.
    #[error("schema violation: {cause}")]
    SchemaViolation {
        /// Parse or validation failure.
        cause: String,
    },

    /// All retry attempts failed.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetryExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The last underlying error.
        last: Box<Error>,
    },

    /// Even the minimum candidate set does not fit the reduce budget.
    #[error("budget infeasible: {estimated_tokens} estimated tokens > limit {limit}")]
    BudgetInfeasible {
        /// Estimated tokens of the smallest allowed candidate set.
        estimated_tokens: usize,
        /// Effective token limit after the safety margin.
        limit: usize,
    },

    /// The run was cancelled before the named stage.
    #[error("run cancelled before stage '{stage}'")]
    Cancelled {
        /// Stage that was not started.
        stage: String,
    },
}

impl Error {
    /// Returns true if the error is worth retrying.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::TransientApi { .. })
    }

    /// Short machine-readable kind, used for metrics labels and audit entries.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::OperationFailed { .. } => "operation_failed",
            Self::TransientApi { .. } => "transient_api",
            Self::SafetyViolation { .. } => "safety_violation",
            Self::SchemaViolation { .. } => "schema_violation",
            Self::RetryExhausted { .. } => "retry_exhausted",
            Self::BudgetInfeasible { .. } => "budget_infeasible",
            Self::Cancelled { .. } => "cancelled",
        }
    }

    /// Number of attempts this error represents.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::RetryExhausted { attempts, .. } => *attempts,
            _ => 1,
        }
    }

    pub(crate) fn io(operation: &str, err: impl std::fmt::Display) -> Self {
        Self::OperationFailed {
            operation: operation.to_string(),
            cause: err.to_string(),
        }
    }
}

/// Result type alias for briefcast operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in seconds.
///
/// Falls back to 0 if the system clock is before the Unix epoch.
#[must_use]
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidInput("overlap too large".to_string());
        assert_eq!(err.to_string(), "invalid input: overlap too large");

        let err = Error::TransientApi {
            status: Some(503),
            cause: "unavailable".to_string(),
        };
        assert_eq!(err.to_string(), "transient API error (status 503): unavailable");

        let err = Error::TransientApi {
            status: None,
            cause: "connection reset".to_string(),
        };
        assert_eq!(err.to_string(), "transient API error: connection reset");

        let err = Error::RetryExhausted {
            attempts: 4,
            last: Box::new(Error::TransientApi {
                status: Some(429),
                cause: "slow down".to_string(),
            }),
        };
        assert!(err.to_string().starts_with("retries exhausted after 4 attempts"));
        assert!(err.to_string().contains("slow down"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(
            Error::TransientApi {
                status: None,
                cause: String::new()
            }
            .is_transient()
        );
        assert!(
            !Error::SafetyViolation {
                reason: String::new()
            }
            .is_transient()
        );
        assert!(
            !Error::SchemaViolation {
                cause: String::new()
            }
            .is_transient()
        );
    }

    #[test]
    fn test_error_kind_and_attempts() {
        let err = Error::RetryExhausted {
            attempts: 3,
            last: Box::new(Error::InvalidInput(String::new())),
        };
        assert_eq!(err.kind(), "retry_exhausted");
        assert_eq!(err.attempts(), 3);
        assert_eq!(Error::InvalidInput(String::new()).attempts(), 1);
    }
}
