//! Per-topic digest orchestration.
//!
//! ```text
//! select ─► split ─► summarize (pool) ─► coverage ─► budget ─► synthesize ─► prose
//! ```
//!
//! Stages run in order for one topic; topics run in parallel. Coverage is
//! judged per included episode, and the final status is the worst of those
//! coverage statuses and the synthesis and prose outcomes. Failed topics
//! leave a [`DiagnosticArtifact`] behind so a retry can reuse every cached
//! chunk summary.

use super::budget::BudgetEnforcer;
use super::chunking::ChunkSplitter;
use super::meter::StageMeter;
use super::prose::ProseValidator;
use super::selection::EpisodeSelector;
use super::summarizer::{ChunkSummarizer, SummaryOutcome};
use super::synthesis::DigestSynthesizer;
use super::workers::{CancelToken, run_bounded_partial};
use crate::config::{DigestConfig, StageConfig};
use crate::llm::{LlmHttpConfig, OpenAiClient, OperationMode, ResilientCaller, RetryPolicy};
use crate::models::{
    Chunk, DiagnosticArtifact, DigestResult, DigestStatus, EpisodeCandidate, EpisodeCoverage,
    RunId, RunSummary, Transcript,
};
use crate::security::{AuditConfig, CallAuditLog};
use crate::storage::{
    DiagnosticsWriter, RunRecorder, SqliteRunRecorder, SqliteSummaryCache, SummaryCache,
};
use crate::{Error, Result, current_timestamp};
use secrecy::ExposeSecret;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One resilient caller per API-calling stage.
pub struct StageCallers {
    /// Map phase.
    pub summarizer: ResilientCaller,
    /// Reduce phase.
    pub synthesizer: ResilientCaller,
    /// Prose repair.
    pub rewriter: ResilientCaller,
}

/// Outcome of [`DigestPipeline::run_topics`].
#[derive(Debug, Default)]
pub struct TopicBatch {
    /// Topics that finished, in the order they were given.
    pub results: Vec<DigestResult>,
    /// Topics that did not finish because the run was cancelled.
    pub cancelled: Vec<String>,
}

impl TopicBatch {
    /// Whether any topic was cut short by cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        !self.cancelled.is_empty()
    }
}

/// Runs topics through every stage and records the outcome.
pub struct DigestPipeline {
    config: DigestConfig,
    splitter: ChunkSplitter,
    selector: EpisodeSelector,
    budget: BudgetEnforcer,
    summarizer: ChunkSummarizer,
    synthesizer: DigestSynthesizer,
    prose: ProseValidator,
    recorder: Arc<dyn RunRecorder>,
    diagnostics: DiagnosticsWriter,
}

impl DigestPipeline {
    /// Assembles a pipeline from explicit collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the configuration is invalid.
    pub fn new(
        config: DigestConfig,
        callers: StageCallers,
        cache: Arc<dyn SummaryCache>,
        recorder: Arc<dyn RunRecorder>,
    ) -> Result<Self> {
        config.validate()?;
        let splitter = ChunkSplitter::new(config.chunking.chunk_size, config.chunking.chunk_overlap)?;
        Ok(Self {
            splitter,
            selector: EpisodeSelector::from_config(&config.selection),
            budget: BudgetEnforcer::from_config(&config.budget),
            summarizer: ChunkSummarizer::new(callers.summarizer, cache, &config),
            synthesizer: DigestSynthesizer::new(callers.synthesizer, &config),
            prose: ProseValidator::new(callers.rewriter, &config),
            recorder,
            diagnostics: DiagnosticsWriter::new(config.diagnostics_dir()),
            config,
        })
    }

    /// Builds the production pipeline: OpenAI-compatible clients, the audit
    /// log and the `SQLite` cache and recorder under the data directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the data directory,
    /// database or audit log cannot be opened.
    pub fn from_config(config: DigestConfig) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.data_dir).map_err(|e| Error::io("create_data_dir", e))?;

        if !config.has_api_key() {
            tracing::warn!("No API key configured; uncached chunks will fall back to local summaries");
        }

        let audit = Arc::new(if config.audit.enabled {
            let mut audit_config = AuditConfig::new().with_log_path(config.audit_log_path());
            if let Some(key) = &config.audit.hmac_key {
                audit_config = audit_config.with_hmac_key(key.expose_secret().as_bytes());
            }
            CallAuditLog::new(audit_config)?
        } else {
            CallAuditLog::in_memory()
        });

        let policy = RetryPolicy::from_config(&config.retry);
        let caller = |stage: &StageConfig| {
            let mut client = OpenAiClient::new()
                .with_endpoint(config.llm.endpoint.clone())
                .with_model(stage.model.clone())
                .with_http_config(LlmHttpConfig {
                    timeout_ms: stage.timeout_secs.saturating_mul(1000),
                    connect_timeout_ms: config.llm.connect_timeout_ms,
                });
            if let Some(key) = &config.llm.api_key {
                client = client.with_api_key(key.clone());
            }
            ResilientCaller::new(Arc::new(client), Arc::clone(&audit)).with_policy(policy)
        };
        let callers = StageCallers {
            summarizer: caller(&config.summarizer),
            synthesizer: caller(&config.synthesizer),
            rewriter: caller(&config.rewriter),
        };

        let db_path = config.database_path();
        let cache: Arc<dyn SummaryCache> = Arc::new(SqliteSummaryCache::new(&db_path)?);
        let recorder: Arc<dyn RunRecorder> = Arc::new(SqliteRunRecorder::new(&db_path)?);
        Self::new(config, callers, cache, recorder)
    }

    /// The configuration the pipeline was built with.
    #[must_use]
    pub const fn config(&self) -> &DigestConfig {
        &self.config
    }

    /// The run recorder.
    #[must_use]
    pub fn recorder(&self) -> &dyn RunRecorder {
        self.recorder.as_ref()
    }

    /// A cancel token honoring the configured run deadline.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        let token = CancelToken::new();
        match self.config.runtime.run_deadline_secs {
            Some(secs) => token.with_deadline(Duration::from_secs(secs)),
            None => token,
        }
    }

    /// Runs every topic, at most `topic_workers` at a time.
    ///
    /// Topics with no relevant episodes produce no result. Results follow the
    /// order of `topics`. A cancelled run keeps the topics that finished
    /// before cancellation and lists the rest in [`TopicBatch::cancelled`].
    ///
    /// # Errors
    ///
    /// Returns an error only if a topic fails with something other than
    /// [`Error::Cancelled`].
    pub fn run_topics(
        &self,
        topics: &[String],
        transcripts: &[Transcript],
        cancel: &CancelToken,
    ) -> Result<TopicBatch> {
        let finished = run_bounded_partial(
            topics,
            self.config.runtime.topic_workers,
            cancel,
            |_, topic| self.run_topic(topic, transcripts, cancel),
        );

        let mut batch = TopicBatch::default();
        let mut next = 0;
        for (index, outcome) in finished {
            batch.cancelled.extend(topics[next..index].iter().cloned());
            next = index + 1;
            match outcome {
                Ok(Some(result)) => batch.results.push(result),
                Ok(None) => {},
                Err(Error::Cancelled { stage }) => {
                    tracing::warn!(topic = %topics[index], stage = %stage, "Topic cancelled");
                    batch.cancelled.push(topics[index].clone());
                },
                Err(err) => return Err(err),
            }
        }
        batch.cancelled.extend(topics[next..].iter().cloned());
        if batch.is_cancelled() {
            tracing::warn!(
                completed = batch.results.len(),
                cancelled = batch.cancelled.len(),
                "Run cancelled"
            );
        }
        Ok(batch)
    }

    /// Runs one topic through every stage.
    ///
    /// Returns `None` when no episode reaches the relevance threshold. Stage
    /// failures do not surface as errors: they produce a `FAILED` result and a
    /// diagnostic artifact.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if the run was cancelled between stages.
    pub fn run_topic(
        &self,
        topic: &str,
        transcripts: &[Transcript],
        cancel: &CancelToken,
    ) -> Result<Option<DigestResult>> {
        let run_id = RunId::generate();
        let started = Instant::now();
        let span = tracing::info_span!("digest.run", topic, run_id = %run_id);
        let _enter = span.enter();

        cancel.check("select")?;
        let candidates = transcripts
            .iter()
            .map(|transcript| EpisodeCandidate::from_transcript(transcript, topic))
            .collect();
        let selection = self.selector.select(candidates, topic);
        if selection.is_empty() {
            tracing::info!(topic, "No relevant episodes, skipping topic");
            return Ok(None);
        }
        let mut selected = selection.selected;
        let mut excluded = selection.excluded_ids;
        let selected_ids: Vec<String> = selected.iter().map(|c| c.episode_id.clone()).collect();

        cancel.check("summarize")?;
        let by_id: HashMap<&str, &Transcript> = transcripts
            .iter()
            .rev()
            .map(|transcript| (transcript.episode_id.as_str(), transcript))
            .collect();
        let episodes: Vec<(String, Vec<Chunk>)> = selected
            .iter()
            .map(|candidate| {
                let chunks = by_id
                    .get(candidate.episode_id.as_str())
                    .map(|transcript| self.splitter.split(&transcript.text))
                    .unwrap_or_default();
                (candidate.episode_id.clone(), chunks)
            })
            .collect();

        let meter = StageMeter::start(OperationMode::ChunkSummary.component(), self.summarizer.model());
        let outcomes = self.summarizer.summarize_episodes(
            &run_id,
            &meter,
            topic,
            &episodes,
            self.config.runtime.workers,
            cancel,
        );
        self.record_stage(&meter, &run_id);
        let outcomes = outcomes?;

        let pooled = self.summarizer.coverage(outcomes.iter().flatten());
        tracing::info!(
            topic,
            total = pooled.total,
            cached = pooled.cached,
            fresh = pooled.fresh,
            fallback = pooled.fallback,
            skipped = pooled.skipped,
            coverage_pct = pooled.coverage_pct,
            "Map phase complete"
        );
        let outcomes_by_id: HashMap<&str, &[SummaryOutcome]> = episodes
            .iter()
            .zip(&outcomes)
            .map(|((episode_id, _), episode)| (episode_id.as_str(), episode.as_slice()))
            .collect();
        for (candidate, episode_outcomes) in selected.iter_mut().zip(&outcomes) {
            candidate.summaries = episode_outcomes
                .iter()
                .filter_map(|outcome| outcome.record().cloned())
                .collect();
        }

        cancel.check("budget")?;
        let fit = match self.budget.fit(selected) {
            Ok(fit) => fit,
            Err(err @ Error::BudgetInfeasible { estimated_tokens, .. }) => {
                return Ok(Some(self.fail(
                    &run_id,
                    topic,
                    &err.to_string(),
                    estimated_tokens,
                    selected_ids,
                    excluded,
                    started,
                )));
            },
            Err(err) => return Err(err),
        };
        excluded.extend(fit.dropped_ids);
        let included: Vec<String> = fit.kept.iter().map(|c| c.episode_id.clone()).collect();
        let coverage = self.episode_coverage(topic, &included, &outcomes_by_id);
        let coverage_status = coverage
            .iter()
            .fold(DigestStatus::Ok, |status, episode| status.worst(episode.status));

        cancel.check("synthesize")?;
        let meter = StageMeter::start(
            OperationMode::DigestSynthesis.component(),
            self.synthesizer.model(),
        );
        let synthesized = self.synthesizer.synthesize(&run_id, &meter, topic, &fit.kept);
        self.record_stage(&meter, &run_id);
        let mut result = match synthesized {
            Ok(result) if result.status == DigestStatus::Failed => {
                return Ok(Some(self.fail(
                    &run_id,
                    topic,
                    "synthesis returned no items",
                    fit.estimated_tokens,
                    included,
                    excluded,
                    started,
                )));
            },
            Ok(result) => result,
            Err(err) => {
                return Ok(Some(self.fail(
                    &run_id,
                    topic,
                    &format!("synthesis failed: {err}"),
                    fit.estimated_tokens,
                    included,
                    excluded,
                    started,
                )));
            },
        };
        result.excluded_episode_ids = excluded;

        cancel.check("prose")?;
        let meter = StageMeter::start(OperationMode::ProseRewrite.component(), self.prose.model());
        let prose = self.prose.ensure_prose(&run_id, &meter, topic, &result.text);
        self.record_stage(&meter, &run_id);
        let prose_status = if prose.ok {
            DigestStatus::Ok
        } else {
            DigestStatus::Partial
        };
        result.text_rewritten = prose.text != result.text;
        result.text = prose.text;
        result.issues = prose.issues;
        result.coverage = coverage;
        result.status = coverage_status.worst(result.status).worst(prose_status);

        self.finish(&result, started);
        Ok(Some(result))
    }

    fn episode_coverage(
        &self,
        topic: &str,
        included: &[String],
        outcomes_by_id: &HashMap<&str, &[SummaryOutcome]>,
    ) -> Vec<EpisodeCoverage> {
        included
            .iter()
            .map(|episode_id| {
                let outcomes = outcomes_by_id
                    .get(episode_id.as_str())
                    .copied()
                    .unwrap_or_default();
                let episode = self.summarizer.coverage(outcomes).for_episode(episode_id.as_str());
                tracing::info!(
                    topic,
                    episode_id = %episode.episode_id,
                    total = episode.total,
                    successful = episode.successful,
                    fallback = episode.fallback,
                    skipped = episode.skipped,
                    coverage_pct = episode.coverage_pct,
                    status = %episode.status,
                    "Episode coverage"
                );
                episode
            })
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn fail(
        &self,
        run_id: &RunId,
        topic: &str,
        reason: &str,
        estimated_tokens: usize,
        included: Vec<String>,
        excluded: Vec<String>,
        started: Instant,
    ) -> DigestResult {
        tracing::error!(topic, reason, "Topic failed");
        let artifact = DiagnosticArtifact {
            run_id: run_id.to_string(),
            topic: topic.to_string(),
            reason: reason.to_string(),
            estimated_tokens,
            included_episode_ids: included.clone(),
            excluded_episode_ids: excluded.clone(),
            created_at: current_timestamp(),
        };
        if let Err(e) = self.diagnostics.write(&artifact) {
            tracing::warn!(topic, error = %e, "Failed to write diagnostic artifact");
        }
        let result = DigestResult::failed(run_id.as_str(), topic, included, excluded);
        self.finish(&result, started);
        result
    }

    fn finish(&self, result: &DigestResult, started: Instant) {
        let wall_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let summary = RunSummary {
            run_id: result.run_id.clone(),
            topic: result.topic.clone(),
            status: result.status,
            included_episode_ids: result.included_episode_ids.clone(),
            excluded_episode_ids: result.excluded_episode_ids.clone(),
            wall_ms,
            created_at: current_timestamp(),
        };
        if let Err(e) = self.recorder.record_run(&summary) {
            tracing::warn!(topic = %result.topic, error = %e, "Failed to record run summary");
        }
        metrics::counter!("digest_runs_total", "status" => result.status.as_str()).increment(1);
        metrics::histogram!("digest_run_duration_ms")
            .record(Duration::from_millis(wall_ms).as_secs_f64() * 1000.0);
        tracing::info!(
            topic = %result.topic,
            status = %result.status,
            items = result.items.len(),
            included = result.included_episode_ids.len(),
            excluded = result.excluded_episode_ids.len(),
            wall_ms,
            "Topic finished"
        );
    }

    fn record_stage(&self, meter: &StageMeter, run_id: &RunId) {
        if let Err(e) = self.recorder.record_stage(&meter.header(run_id)) {
            tracing::warn!(component = meter.component(), error = %e, "Failed to record stage header");
        }
    }
}
