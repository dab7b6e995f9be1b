//! Data models for briefcast.
//!
//! This module contains the core data structures passed between pipeline stages.

mod digest;
mod run;
mod summary;
mod transcript;

pub use digest::{
    DigestItem, DigestResult, DigestStatus, EpisodeCandidate, EpisodeCoverage, MAX_DIGEST_ITEMS,
    MAX_ITEM_BLURB_CHARS, MAX_ITEM_TITLE_CHARS,
};
pub use run::{DiagnosticArtifact, RunHeader, RunId, RunSummary};
pub use summary::{ChunkSummaryRecord, SummaryKey};
pub use transcript::{Chunk, Transcript};
