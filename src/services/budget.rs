//! Reduce-phase token budget.
//!
//! There is no tokenizer: tokens are estimated with the usual four characters
//! per token, and only 80% of the configured budget is used to leave headroom
//! for the estimate's error.

use super::selection::rank_order;
use crate::config::BudgetConfig;
use crate::models::EpisodeCandidate;
use crate::{Error, Result};

/// Trimming never goes below this many candidates.
pub const MIN_CANDIDATES: usize = 2;

/// Percentage of `max_reduce_tokens` the estimate must stay under.
pub const BUDGET_MARGIN_PCT: usize = 80;

/// Estimated tokens for `chars` characters (`(chars + 3) / 4`).
#[must_use]
pub const fn estimate_tokens(chars: usize) -> usize {
    chars.saturating_add(3) / 4
}

/// Result of fitting candidates into the budget.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetFit {
    /// Candidates that fit, in ranked order, with `estimated_tokens` set.
    pub kept: Vec<EpisodeCandidate>,
    /// Episodes dropped to fit, lowest ranked first.
    pub dropped_ids: Vec<String>,
    /// Estimated tokens of `kept`.
    pub estimated_tokens: usize,
    /// Effective limit after the margin.
    pub limit: usize,
}

/// Drops the lowest-ranked candidates until the rest fit.
#[derive(Debug, Clone, Copy)]
pub struct BudgetEnforcer {
    max_reduce_tokens: usize,
}

impl BudgetEnforcer {
    /// Creates an enforcer.
    #[must_use]
    pub const fn new(max_reduce_tokens: usize) -> Self {
        Self { max_reduce_tokens }
    }

    /// Creates an enforcer from configuration.
    #[must_use]
    pub const fn from_config(config: &BudgetConfig) -> Self {
        Self::new(config.max_reduce_tokens)
    }

    /// The effective limit.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.max_reduce_tokens.saturating_mul(BUDGET_MARGIN_PCT) / 100
    }

    /// Estimated tokens of one candidate's summaries.
    #[must_use]
    pub fn estimate(candidate: &EpisodeCandidate) -> usize {
        estimate_tokens(candidate.summary_chars())
    }

    /// Fits `selected` into the budget.
    ///
    /// Candidates are dropped lowest score first (older first on equal scores)
    /// while the estimate exceeds the limit and more than [`MIN_CANDIDATES`]
    /// remain.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BudgetInfeasible`] if the estimate still exceeds the
    /// limit once the floor is reached.
    pub fn fit(&self, selected: Vec<EpisodeCandidate>) -> Result<BudgetFit> {
        let limit = self.limit();
        let mut kept = selected;
        kept.sort_by(rank_order);
        for candidate in &mut kept {
            candidate.estimated_tokens = Self::estimate(candidate);
        }

        let mut total: usize = kept.iter().map(|c| c.estimated_tokens).sum();
        let mut dropped_ids = Vec::new();
        while total > limit && kept.len() > MIN_CANDIDATES {
            let Some(lowest) = kept.pop() else {
                break;
            };
            total -= lowest.estimated_tokens;
            tracing::debug!(
                episode_id = %lowest.episode_id,
                tokens = lowest.estimated_tokens,
                remaining = total,
                limit,
                "Dropped candidate to fit budget"
            );
            dropped_ids.push(lowest.episode_id);
        }

        if total > limit {
            return Err(Error::BudgetInfeasible {
                estimated_tokens: total,
                limit,
            });
        }

        Ok(BudgetFit {
            kept,
            dropped_ids,
            estimated_tokens: total,
            limit,
        })
    }
}
