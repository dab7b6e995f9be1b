//! Pipeline stages.
//!
//! Each stage takes its settings from [`crate::config::DigestConfig`] at
//! construction and is driven by [`DigestPipeline`].

mod budget;
mod chunking;
mod meter;
mod pipeline;
mod prose;
mod selection;
mod summarizer;
mod synthesis;
mod workers;

pub use budget::{BUDGET_MARGIN_PCT, BudgetEnforcer, BudgetFit, MIN_CANDIDATES, estimate_tokens};
pub use chunking::{ChunkSplitter, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, split};
pub use meter::StageMeter;
pub use pipeline::{DigestPipeline, StageCallers, TopicBatch};
pub use prose::{ProseOutcome, ProseRewriteResponse, ProseState, ProseValidator};
pub use selection::{EpisodeSelector, Selection, rank_order};
pub use summarizer::{
    ChunkSummarizer, ChunkSummaryResponse, CoverageReport, FALLBACK_MODEL, MIN_CHUNK_CHARS,
    SummaryOutcome, local_summary,
};
pub use synthesis::{DigestSynthesizer, SynthesisResponse};
pub use workers::{CancelToken, DEFAULT_WORKERS, run_bounded, run_bounded_partial};
