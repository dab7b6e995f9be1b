//! Digest candidates and results.

use super::{ChunkSummaryRecord, Transcript};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum title length of a digest item, in characters.
pub const MAX_ITEM_TITLE_CHARS: usize = 140;
/// Maximum blurb length of a digest item, in characters.
pub const MAX_ITEM_BLURB_CHARS: usize = 800;
/// Maximum number of items in one digest.
pub const MAX_DIGEST_ITEMS: usize = 20;

/// Health of a digest run.
///
/// Ordered from best to worst so that combining stage outcomes is a `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DigestStatus {
    /// Every quality gate passed.
    Ok,
    /// Publishable, but at least one gate degraded.
    Partial,
    /// Must not be published.
    Failed,
}

impl DigestStatus {
    /// Returns the status as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Partial => "PARTIAL",
            Self::Failed => "FAILED",
        }
    }

    /// Parses a status string (case-insensitive).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "OK" => Some(Self::Ok),
            "PARTIAL" => Some(Self::Partial),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    /// The worse of two statuses.
    #[must_use]
    pub fn worst(self, other: Self) -> Self {
        self.max(other)
    }

    /// Whether a digest with this status may be handed to publishing.
    #[must_use]
    pub const fn is_publishable(self) -> bool {
        !matches!(self, Self::Failed)
    }
}

impl fmt::Display for DigestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An episode considered for a topic digest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpisodeCandidate {
    /// Episode identifier.
    pub episode_id: String,
    /// Episode title.
    pub title: String,
    /// Show or feed name.
    pub source: String,
    /// Publication time (Unix epoch seconds).
    pub published_at: u64,
    /// Relevance score for the topic being digested.
    pub topic_score: f64,
    /// Chunk summaries, ordered by chunk index.
    pub summaries: Vec<ChunkSummaryRecord>,
    /// Estimated reduce-phase tokens for this episode's summaries.
    pub estimated_tokens: usize,
}

impl EpisodeCandidate {
    /// Builds a candidate for `topic` with no summaries yet.
    #[must_use]
    pub fn from_transcript(transcript: &Transcript, topic: &str) -> Self {
        Self {
            episode_id: transcript.episode_id.clone(),
            title: transcript.title.clone(),
            source: transcript.source.clone(),
            published_at: transcript.published_at,
            topic_score: transcript.score_for(topic),
            summaries: Vec::new(),
            estimated_tokens: 0,
        }
    }

    /// Total characters across all chunk summaries.
    #[must_use]
    pub fn summary_chars(&self) -> usize {
        self.summaries
            .iter()
            .map(|record| record.summary_text.chars().count())
            .sum()
    }
}

/// One entry of a synthesized digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestItem {
    /// Short headline.
    pub title: String,
    /// Narrative paragraph.
    pub blurb: String,
    /// Chunk the item is mainly drawn from.
    pub source_chunk_index: usize,
}

impl DigestItem {
    /// Checks the item against the length bounds.
    ///
    /// Returns a description of the first violated bound.
    pub fn check_bounds(&self) -> std::result::Result<(), String> {
        let title_len = self.title.chars().count();
        if title_len > MAX_ITEM_TITLE_CHARS {
            return Err(format!(
                "title has {title_len} chars (max {MAX_ITEM_TITLE_CHARS})"
            ));
        }
        let blurb_len = self.blurb.chars().count();
        if blurb_len > MAX_ITEM_BLURB_CHARS {
            return Err(format!(
                "blurb has {blurb_len} chars (max {MAX_ITEM_BLURB_CHARS})"
            ));
        }
        if self.blurb.trim().is_empty() {
            return Err("blurb is empty".to_string());
        }
        Ok(())
    }
}

/// Map-phase coverage of one episode that went into a digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeCoverage {
    /// Episode id.
    pub episode_id: String,
    /// Chunks the splitter produced.
    pub total: usize,
    /// Chunks with a model summary (cached or fresh).
    pub successful: usize,
    /// Chunks that fell back to a local summary.
    pub fallback: usize,
    /// Chunks too short to summarize.
    pub skipped: usize,
    /// `successful / total`, in percent.
    pub coverage_pct: f64,
    /// `OK` when the coverage thresholds are met, `PARTIAL` otherwise.
    pub status: DigestStatus,
}

/// Terminal output of one topic run.
///
/// `text` is what gets narrated. `items` are the synthesizer's structured
/// output and keep their original blurbs when the prose check rewrote `text`;
/// `text_rewritten` tells the two cases apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestResult {
    /// Run that produced the digest.
    pub run_id: String,
    /// Topic name.
    pub topic: String,
    /// Overall status.
    pub status: DigestStatus,
    /// Digest items in narrative order.
    pub items: Vec<DigestItem>,
    /// Final narrative text, after prose validation.
    pub text: String,
    /// Whether `text` is a prose rewrite rather than the joined item blurbs.
    #[serde(default)]
    pub text_rewritten: bool,
    /// Prose issues that survived the rewrite loop (empty when accepted).
    #[serde(default)]
    pub issues: Vec<String>,
    /// Map-phase coverage per included episode, in inclusion order.
    #[serde(default)]
    pub coverage: Vec<EpisodeCoverage>,
    /// Episodes whose summaries went into the digest.
    pub included_episode_ids: Vec<String>,
    /// Episodes that were considered but left out.
    pub excluded_episode_ids: Vec<String>,
}

impl DigestResult {
    /// A failed result with no items.
    #[must_use]
    pub fn failed(
        run_id: impl Into<String>,
        topic: impl Into<String>,
        included_episode_ids: Vec<String>,
        excluded_episode_ids: Vec<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            topic: topic.into(),
            status: DigestStatus::Failed,
            items: Vec::new(),
            text: String::new(),
            text_rewritten: false,
            issues: Vec::new(),
            coverage: Vec::new(),
            included_episode_ids,
            excluded_episode_ids,
        }
    }

    /// Narrative form of `items`: blurbs separated by blank lines.
    #[must_use]
    pub fn narrative(items: &[DigestItem]) -> String {
        items
            .iter()
            .map(|item| item.blurb.trim())
            .filter(|blurb| !blurb.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
