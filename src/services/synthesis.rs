//! Reduce phase: one structured synthesis call per topic.

use super::meter::StageMeter;
use crate::config::{DigestConfig, StageConfig};
use crate::llm::{
    CompletionRequest, OperationMode, ResilientCaller, StructuredResponse, build_system_prompt,
    wrap_data,
};
use crate::models::{
    DigestItem, DigestResult, DigestStatus, EpisodeCandidate, MAX_DIGEST_ITEMS,
    MAX_ITEM_BLURB_CHARS, MAX_ITEM_TITLE_CHARS, RunId,
};
use crate::Result;
use serde::Deserialize;
use std::fmt::Write as _;

/// Structured response of the synthesis call.
#[derive(Debug, Deserialize)]
pub struct SynthesisResponse {
    /// Episode the digest mainly draws on.
    pub episode_id: String,
    /// The model's own assessment of coverage.
    pub status: DigestStatus,
    /// Digest items.
    pub items: Vec<DigestItem>,
}

impl StructuredResponse for SynthesisResponse {
    const SCHEMA_NAME: &'static str = "digest_synthesis";

    fn schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "episode_id": {"type": "string"},
                "status": {"type": "string", "enum": ["OK", "PARTIAL"]},
                "items": {
                    "type": "array",
                    "maxItems": MAX_DIGEST_ITEMS,
                    "items": {
                        "type": "object",
                        "properties": {
                            "title": {"type": "string", "maxLength": MAX_ITEM_TITLE_CHARS},
                            "blurb": {"type": "string", "maxLength": MAX_ITEM_BLURB_CHARS},
                            "source_chunk_index": {"type": "integer", "minimum": 0}
                        },
                        "required": ["title", "blurb", "source_chunk_index"],
                        "additionalProperties": false
                    }
                }
            },
            "required": ["episode_id", "status", "items"],
            "additionalProperties": false
        })
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.status == DigestStatus::Failed {
            return Err("status must be OK or PARTIAL".to_string());
        }
        if self.items.len() > MAX_DIGEST_ITEMS {
            return Err(format!(
                "{} items (max {MAX_DIGEST_ITEMS})",
                self.items.len()
            ));
        }
        for (i, item) in self.items.iter().enumerate() {
            item.check_bounds().map_err(|e| format!("item {i}: {e}"))?;
        }
        Ok(())
    }
}

/// Produces the digest for one topic from the kept candidates.
pub struct DigestSynthesizer {
    caller: ResilientCaller,
    stage: StageConfig,
}

impl DigestSynthesizer {
    /// Creates a synthesizer.
    #[must_use]
    pub fn new(caller: ResilientCaller, config: &DigestConfig) -> Self {
        Self {
            caller,
            stage: config.synthesizer.clone(),
        }
    }

    /// Model used for synthesis.
    #[must_use]
    pub fn model(&self) -> &str {
        self.caller.model()
    }

    /// Builds the user payload listing every candidate and its chunk summaries.
    #[must_use]
    pub fn build_payload(topic: &str, candidates: &[EpisodeCandidate]) -> String {
        let mut body = String::new();
        for candidate in candidates {
            let _ = writeln!(body, "Episode: {}", candidate.episode_id);
            let _ = writeln!(body, "Title: {}", candidate.title);
            let _ = writeln!(body, "Source: {}", candidate.source);
            let _ = writeln!(body, "Relevance: {:.2}", candidate.topic_score);
            for record in &candidate.summaries {
                let _ = writeln!(body, "Chunk {}: {}", record.chunk_index, record.summary_text);
            }
            body.push('\n');
        }
        format!(
            "Write the digest for the topic \"{topic}\" from these episode summaries.\n\n{}",
            wrap_data("summaries", body.trim_end())
        )
    }

    /// Synthesizes the digest.
    ///
    /// A response with no items yields a `Failed` result. The returned result
    /// lists every candidate as included and leaves exclusions to the caller.
    ///
    /// # Errors
    ///
    /// Returns the caller's error (retries exhausted, safety or schema
    /// violation); the topic is then failed.
    pub fn synthesize(
        &self,
        run_id: &RunId,
        meter: &StageMeter,
        topic: &str,
        candidates: &[EpisodeCandidate],
    ) -> Result<DigestResult> {
        let included: Vec<String> = candidates.iter().map(|c| c.episode_id.clone()).collect();
        let request = CompletionRequest::new(
            build_system_prompt(OperationMode::DigestSynthesis, Some(topic)),
            Self::build_payload(topic, candidates),
        )
        .with_max_output_tokens(self.stage.max_output_tokens)
        .with_reasoning_effort(self.stage.reasoning_effort)
        .with_timeout(self.stage.timeout());

        let idempotency_key = format!("{run_id}/synthesis/{topic}");
        let result = self
            .caller
            .call::<SynthesisResponse>(
                OperationMode::DigestSynthesis.component(),
                run_id,
                &idempotency_key,
                request,
            )
            .inspect_err(|e| meter.record_failure(e))?;
        meter.record_success(result.usage, result.attempts);

        let response = result.value;
        if response.items.is_empty() {
            tracing::warn!(topic, "Synthesis returned no items");
            return Ok(DigestResult::failed(run_id.as_str(), topic, included, Vec::new()));
        }

        tracing::info!(
            topic,
            items = response.items.len(),
            status = %response.status,
            main_episode = %response.episode_id,
            "Synthesized digest"
        );
        Ok(DigestResult {
            run_id: run_id.to_string(),
            topic: topic.to_string(),
            status: response.status,
            text: DigestResult::narrative(&response.items),
            items: response.items,
            text_rewritten: false,
            issues: Vec::new(),
            coverage: Vec::new(),
            included_episode_ids: included,
            excluded_episode_ids: Vec::new(),
        })
    }
}
