//! Map phase: per-chunk summaries with caching and coverage accounting.

use super::meter::StageMeter;
use super::workers::{CancelToken, run_bounded};
use crate::config::{CoverageConfig, DigestConfig, StageConfig};
use crate::llm::{
    CHUNK_SUMMARY_PROMPT_VERSION, CompletionRequest, OperationMode, ResilientCaller,
    StructuredResponse, build_system_prompt, wrap_data,
};
use crate::models::{
    Chunk, ChunkSummaryRecord, DigestStatus, EpisodeCoverage, RunId, SummaryKey,
};
use crate::storage::SummaryCache;
use crate::{Result, current_timestamp};
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;

/// Chunks shorter than this many characters are not worth a call.
pub const MIN_CHUNK_CHARS: usize = 50;

/// Model name recorded on locally produced fallback summaries.
pub const FALLBACK_MODEL: &str = "local-fallback";

const FALLBACK_SENTENCES: usize = 2;
const FALLBACK_MAX_CHARS: usize = 400;

/// What happened to one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryOutcome {
    /// Served from the cache; no call was made.
    Cached(ChunkSummaryRecord),
    /// Produced by the model and stored.
    Fresh(ChunkSummaryRecord),
    /// The call failed; a local first-sentences summary stands in.
    Fallback(ChunkSummaryRecord),
    /// Too short to summarize.
    Skipped,
}

impl SummaryOutcome {
    /// The summary record, unless the chunk was skipped.
    #[must_use]
    pub const fn record(&self) -> Option<&ChunkSummaryRecord> {
        match self {
            Self::Cached(record) | Self::Fresh(record) | Self::Fallback(record) => Some(record),
            Self::Skipped => None,
        }
    }

    /// Whether the model's summary is available (cached or fresh).
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Cached(_) | Self::Fresh(_))
    }

    /// Label used in logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Cached(_) => "cached",
            Self::Fresh(_) => "fresh",
            Self::Fallback(_) => "fallback",
            Self::Skipped => "skipped",
        }
    }
}

/// Map-phase coverage over every chunk the splitter produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoverageReport {
    /// Chunks considered.
    pub total: usize,
    /// Chunks served from the cache.
    pub cached: usize,
    /// Chunks summarized by the model this run.
    pub fresh: usize,
    /// Chunks that fell back to a local summary.
    pub fallback: usize,
    /// Chunks too short to summarize.
    pub skipped: usize,
    /// Successful share of `total`, in percent.
    pub coverage_pct: f64,
    /// `Ok` when both thresholds are met, `Partial` otherwise.
    pub status: DigestStatus,
}

impl CoverageReport {
    /// Computes coverage for a set of outcomes.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_outcomes<'a>(
        outcomes: impl IntoIterator<Item = &'a SummaryOutcome>,
        thresholds: &CoverageConfig,
    ) -> Self {
        let mut report = Self {
            total: 0,
            cached: 0,
            fresh: 0,
            fallback: 0,
            skipped: 0,
            coverage_pct: 0.0,
            status: DigestStatus::Partial,
        };
        for outcome in outcomes {
            report.total += 1;
            match outcome {
                SummaryOutcome::Cached(_) => report.cached += 1,
                SummaryOutcome::Fresh(_) => report.fresh += 1,
                SummaryOutcome::Fallback(_) => report.fallback += 1,
                SummaryOutcome::Skipped => report.skipped += 1,
            }
        }

        let successful = report.successful();
        if report.total > 0 {
            report.coverage_pct = successful as f64 * 100.0 / report.total as f64;
        }
        // An episode shorter than `min_chunks_ok` chunks needs every chunk.
        let required = thresholds.min_chunks_ok.min(report.total);
        if report.total > 0
            && successful >= required
            && report.coverage_pct >= thresholds.min_coverage_pct
        {
            report.status = DigestStatus::Ok;
        }
        report
    }

    /// Chunks with a model summary (cached or fresh).
    #[must_use]
    pub const fn successful(&self) -> usize {
        self.cached + self.fresh
    }

    /// The report as the coverage entry of one episode.
    #[must_use]
    pub fn for_episode(&self, episode_id: impl Into<String>) -> EpisodeCoverage {
        EpisodeCoverage {
            episode_id: episode_id.into(),
            total: self.total,
            successful: self.successful(),
            fallback: self.fallback,
            skipped: self.skipped,
            coverage_pct: self.coverage_pct,
            status: self.status,
        }
    }
}

/// Structured response of a chunk summary call.
#[derive(Debug, Deserialize)]
pub struct ChunkSummaryResponse {
    /// The summary sentences.
    pub summary: String,
}

impl StructuredResponse for ChunkSummaryResponse {
    const SCHEMA_NAME: &'static str = "chunk_summary";

    fn schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "summary": {"type": "string"}
            },
            "required": ["summary"],
            "additionalProperties": false
        })
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.summary.trim().is_empty() {
            return Err("summary is empty".to_string());
        }
        Ok(())
    }
}

/// Summarizes chunks, consulting the cache before every call.
pub struct ChunkSummarizer {
    caller: ResilientCaller,
    cache: Arc<dyn SummaryCache>,
    prompt_version: String,
    stage: StageConfig,
    coverage: CoverageConfig,
}

impl ChunkSummarizer {
    /// Creates a summarizer.
    #[must_use]
    pub fn new(caller: ResilientCaller, cache: Arc<dyn SummaryCache>, config: &DigestConfig) -> Self {
        Self {
            caller,
            cache,
            prompt_version: CHUNK_SUMMARY_PROMPT_VERSION.to_string(),
            stage: config.summarizer.clone(),
            coverage: config.coverage,
        }
    }

    /// Overrides the prompt version (invalidates every cached summary).
    #[must_use]
    pub fn with_prompt_version(mut self, version: impl Into<String>) -> Self {
        self.prompt_version = version.into();
        self
    }

    /// Model summaries are cached under.
    #[must_use]
    pub fn model(&self) -> &str {
        self.caller.model()
    }

    /// Idempotency key of a chunk.
    #[must_use]
    pub fn key(&self, episode_id: &str, chunk_index: usize) -> SummaryKey {
        SummaryKey::new(
            episode_id,
            chunk_index,
            self.caller.model(),
            self.prompt_version.as_str(),
        )
    }

    /// Coverage of `outcomes` against the configured thresholds.
    #[must_use]
    pub fn coverage<'a>(
        &self,
        outcomes: impl IntoIterator<Item = &'a SummaryOutcome>,
    ) -> CoverageReport {
        CoverageReport::from_outcomes(outcomes, &self.coverage)
    }

    /// Summarizes one chunk.
    ///
    /// Never fails: cache errors degrade to a miss, call failures to a local
    /// fallback summary.
    #[instrument(skip(self, run_id, meter, chunk), fields(chunk_index = chunk.index))]
    pub fn summarize_chunk(
        &self,
        run_id: &RunId,
        meter: &StageMeter,
        episode_id: &str,
        chunk: &Chunk,
        topic: &str,
    ) -> SummaryOutcome {
        let key = self.key(episode_id, chunk.index);

        match self.cache.get(&key) {
            Ok(Some(record))
                if record.char_start == chunk.char_start && record.char_end == chunk.char_end =>
            {
                metrics::counter!("summary_cache_hits_total").increment(1);
                return SummaryOutcome::Cached(record);
            },
            Ok(Some(_)) => {
                tracing::debug!(episode_id, "Cached summary covers a different span, ignoring");
                metrics::counter!("summary_cache_misses_total").increment(1);
            },
            Ok(None) => metrics::counter!("summary_cache_misses_total").increment(1),
            Err(e) => {
                tracing::warn!(episode_id, error = %e, "Summary cache read failed, treating as miss");
                metrics::counter!("summary_cache_misses_total").increment(1);
            },
        }

        if chunk.char_len() < MIN_CHUNK_CHARS {
            return SummaryOutcome::Skipped;
        }

        let request = CompletionRequest::new(
            build_system_prompt(OperationMode::ChunkSummary, Some(topic)),
            format!(
                "Episode {episode_id}, chunk {} (characters {}..{}).\n\n{}",
                chunk.index,
                chunk.char_start,
                chunk.char_end,
                wrap_data("chunk", &chunk.text)
            ),
        )
        .with_max_output_tokens(self.stage.max_output_tokens)
        .with_reasoning_effort(self.stage.reasoning_effort)
        .with_timeout(self.stage.timeout());

        let component = OperationMode::ChunkSummary.component();
        match self.caller.call::<ChunkSummaryResponse>(
            component,
            run_id,
            &key.idempotency_key(),
            request,
        ) {
            Ok(result) => {
                meter.record_success(result.usage, result.attempts);
                let record = ChunkSummaryRecord {
                    episode_id: episode_id.to_string(),
                    chunk_index: chunk.index,
                    char_start: chunk.char_start,
                    char_end: chunk.char_end,
                    model: key.model,
                    prompt_version: key.prompt_version,
                    summary_text: result.value.summary.trim().to_string(),
                    tokens_used: result.usage.input + result.usage.output,
                    created_at: current_timestamp(),
                };
                if let Err(e) = self.cache.put(&record, topic, &chunk.text) {
                    tracing::warn!(episode_id, error = %e, "Failed to cache chunk summary");
                }
                SummaryOutcome::Fresh(record)
            },
            Err(e) => {
                meter.record_failure(&e);
                tracing::warn!(
                    episode_id,
                    chunk_index = chunk.index,
                    error = %e,
                    "Chunk summary failed, using local fallback"
                );
                SummaryOutcome::Fallback(ChunkSummaryRecord {
                    episode_id: episode_id.to_string(),
                    chunk_index: chunk.index,
                    char_start: chunk.char_start,
                    char_end: chunk.char_end,
                    model: FALLBACK_MODEL.to_string(),
                    prompt_version: self.prompt_version.clone(),
                    summary_text: local_summary(&chunk.text),
                    tokens_used: 0,
                    created_at: current_timestamp(),
                })
            },
        }
    }

    /// Summarizes every chunk of every episode on a bounded worker pool.
    ///
    /// The result is aligned with `episodes`, each inner list in chunk order.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Cancelled`] if the run was cancelled before all
    /// chunks were started.
    pub fn summarize_episodes(
        &self,
        run_id: &RunId,
        meter: &StageMeter,
        topic: &str,
        episodes: &[(String, Vec<Chunk>)],
        workers: usize,
        cancel: &CancelToken,
    ) -> Result<Vec<Vec<SummaryOutcome>>> {
        let jobs: Vec<(usize, &str, &Chunk)> = episodes
            .iter()
            .enumerate()
            .flat_map(|(slot, (episode_id, chunks))| {
                chunks.iter().map(move |chunk| (slot, episode_id.as_str(), chunk))
            })
            .collect();

        let results = run_bounded("chunk_summaries", &jobs, workers, cancel, |_, job| {
            let (slot, episode_id, chunk) = *job;
            let outcome = self.summarize_chunk(run_id, meter, episode_id, chunk, topic);
            metrics::counter!("chunk_summaries_total", "outcome" => outcome.label()).increment(1);
            (slot, outcome)
        })?;

        let mut grouped: Vec<Vec<SummaryOutcome>> = vec![Vec::new(); episodes.len()];
        for (slot, outcome) in results {
            grouped[slot].push(outcome);
        }
        Ok(grouped)
    }
}

/// Deterministic stand-in summary: the first sentences of the chunk.
#[must_use]
pub fn local_summary(text: &str) -> String {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut out = String::new();
    let mut sentences = 0;
    for (idx, c) in normalized.char_indices() {
        if matches!(c, '.' | '!' | '?')
            && normalized[idx + c.len_utf8()..].starts_with(' ')
        {
            sentences += 1;
            if sentences == FALLBACK_SENTENCES {
                out = normalized[..=idx].to_string();
                break;
            }
        }
    }
    if out.is_empty() {
        out = normalized;
    }
    truncate_with_ellipsis(&out, FALLBACK_MAX_CHARS)
}

fn truncate_with_ellipsis(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    let kept: String = input.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", kept.trim_end())
}
