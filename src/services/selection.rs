//! Episode selection for a topic.

use crate::config::SelectionConfig;
use crate::models::EpisodeCandidate;
use std::cmp::Ordering;

/// Candidates kept for a topic, plus the ids left out.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Selection {
    /// Kept candidates, best first.
    pub selected: Vec<EpisodeCandidate>,
    /// Episodes below the threshold or over the cap.
    pub excluded_ids: Vec<String>,
}

impl Selection {
    /// Whether no digest is possible for this topic.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }
}

/// Ranking order: higher score first, then most recent, then episode id.
///
/// The id tie-break makes the order total, so ranking never depends on input
/// order.
#[must_use]
pub fn rank_order(a: &EpisodeCandidate, b: &EpisodeCandidate) -> Ordering {
    b.topic_score
        .total_cmp(&a.topic_score)
        .then_with(|| b.published_at.cmp(&a.published_at))
        .then_with(|| a.episode_id.cmp(&b.episode_id))
}

/// Filters and ranks candidates by relevance.
#[derive(Debug, Clone, Copy)]
pub struct EpisodeSelector {
    threshold: f64,
    max_per_topic: usize,
}

impl EpisodeSelector {
    /// Creates a selector.
    #[must_use]
    pub const fn new(threshold: f64, max_per_topic: usize) -> Self {
        Self {
            threshold,
            max_per_topic,
        }
    }

    /// Creates a selector from configuration.
    #[must_use]
    pub const fn from_config(config: &SelectionConfig) -> Self {
        Self::new(config.relevance_threshold, config.max_episodes_per_topic)
    }

    /// Keeps candidates scoring at least the threshold, best first, capped.
    ///
    /// An empty selection means no digest is possible for `topic` this run;
    /// it is not an error.
    pub fn select(&self, candidates: Vec<EpisodeCandidate>, topic: &str) -> Selection {
        let (mut relevant, below): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|candidate| candidate.topic_score >= self.threshold);
        relevant.sort_by(rank_order);

        let over_cap = if relevant.len() > self.max_per_topic {
            relevant.split_off(self.max_per_topic)
        } else {
            Vec::new()
        };

        let excluded_ids: Vec<String> = below
            .into_iter()
            .chain(over_cap)
            .map(|candidate| candidate.episode_id)
            .collect();

        tracing::info!(
            topic,
            selected = relevant.len(),
            excluded = excluded_ids.len(),
            threshold = self.threshold,
            "Selected episodes"
        );
        Selection {
            selected: relevant,
            excluded_ids,
        }
    }
}
