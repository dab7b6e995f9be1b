//! Property-based tests for the pipeline's pure stages.
//!
//! Uses proptest to verify invariants across random inputs:
//! - Chunks cover the whole transcript with bounded, overlapping windows
//! - Sentence-aware cuts land right after a period
//! - Selection respects the threshold and cap
//! - Budget fitting keeps a ranked prefix and never goes below two episodes

// Property tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use briefcast::Error;
use briefcast::models::{ChunkSummaryRecord, EpisodeCandidate};
use briefcast::services::{
    BudgetEnforcer, ChunkSplitter, EpisodeSelector, MIN_CANDIDATES, estimate_tokens, rank_order,
};
use proptest::prelude::*;

/// Text made of sentences, with some non-ASCII words mixed in.
fn transcript_text() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-zA-Zéü ]{1,40}\\. ", 0..80).prop_map(|sentences| sentences.concat())
}

/// Window size and an overlap below half the window.
fn splitter_params() -> impl Strategy<Value = (usize, usize)> {
    (10_usize..400).prop_flat_map(|size| (Just(size), 0..size / 2))
}

fn candidate(index: usize, score: f64, published_at: u64, summary_chars: usize) -> EpisodeCandidate {
    EpisodeCandidate {
        episode_id: format!("ep-{index:03}"),
        title: String::new(),
        source: String::new(),
        published_at,
        topic_score: score,
        summaries: vec![ChunkSummaryRecord {
            episode_id: format!("ep-{index:03}"),
            chunk_index: 0,
            char_start: 0,
            char_end: summary_chars,
            model: "gpt-4o-mini".to_string(),
            prompt_version: "chunk-summary-v1".to_string(),
            summary_text: "s".repeat(summary_chars),
            tokens_used: 0,
            created_at: 0,
        }],
        estimated_tokens: 0,
    }
}

fn candidates() -> impl Strategy<Value = Vec<EpisodeCandidate>> {
    prop::collection::vec((0.0_f64..=1.0, 0_u64..5, 0_usize..4000), 0..12).prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(i, (score, published_at, chars))| candidate(i, score, published_at, chars))
            .collect()
    })
}

fn ids(candidates: &[EpisodeCandidate]) -> Vec<String> {
    candidates.iter().map(|c| c.episode_id.clone()).collect()
}

// ============================================================================
// Chunking
// ============================================================================

proptest! {
    /// Property: chunks start at 0, end at the text length and leave no gaps.
    #[test]
    fn prop_chunks_cover_text(text in transcript_text(), (size, overlap) in splitter_params()) {
        let splitter = ChunkSplitter::new(size, overlap).unwrap();
        let chunks = splitter.split(&text);
        let len = text.chars().count();

        if len == 0 {
            prop_assert!(chunks.is_empty());
        } else {
            prop_assert_eq!(chunks[0].char_start, 0);
            prop_assert_eq!(chunks[chunks.len() - 1].char_end, len);
            for pair in chunks.windows(2) {
                prop_assert!(pair[1].char_start <= pair[0].char_end);
                prop_assert!(pair[1].char_start > pair[0].char_start);
                prop_assert!(pair[1].char_end > pair[0].char_end);
            }
        }
    }

    /// Property: every chunk fits the window and matches its offsets.
    #[test]
    fn prop_chunks_bounded_and_aligned(text in transcript_text(), (size, overlap) in splitter_params()) {
        let chunks = ChunkSplitter::new(size, overlap).unwrap().split(&text);
        for (i, chunk) in chunks.iter().enumerate() {
            prop_assert_eq!(chunk.index, i);
            prop_assert!(chunk.char_len() <= size);
            prop_assert!(chunk.char_len() > 0);
            let expected: String = text
                .chars()
                .skip(chunk.char_start)
                .take(chunk.char_len())
                .collect();
            prop_assert_eq!(&chunk.text, &expected);
        }
    }

    /// Property: a window shorter than its full size was cut after a period,
    /// within the overlap of its end.
    #[test]
    fn prop_short_windows_end_on_sentence(text in transcript_text(), (size, overlap) in splitter_params()) {
        let chunks = ChunkSplitter::new(size, overlap).unwrap().split(&text);
        let Some((_, non_final)) = chunks.split_last() else {
            return Ok(());
        };
        for chunk in non_final {
            if chunk.char_len() < size {
                prop_assert!(chunk.text.ends_with('.'), "cut inside a sentence: {:?}", chunk.text);
                prop_assert!(chunk.char_len() > size - overlap);
            }
        }
    }

    /// Property: splitting is deterministic.
    #[test]
    fn prop_split_deterministic(text in transcript_text(), (size, overlap) in splitter_params()) {
        let splitter = ChunkSplitter::new(size, overlap).unwrap();
        prop_assert_eq!(splitter.split(&text), splitter.split(&text));
    }

    /// Property: arbitrary text never panics the splitter.
    #[test]
    fn prop_split_arbitrary_text(text in "\\PC{0,600}", (size, overlap) in splitter_params()) {
        let chunks = ChunkSplitter::new(size, overlap).unwrap().split(&text);
        let rebuilt: usize = chunks.iter().map(|c| c.char_len()).sum();
        prop_assert!(rebuilt >= text.chars().count());
    }
}

// ============================================================================
// Selection
// ============================================================================

proptest! {
    /// Property: selection keeps only relevant episodes, ranked, capped, and
    /// accounts for every input.
    #[test]
    fn prop_selection_partitions_input(
        input in candidates(),
        threshold in 0.0_f64..=1.0,
        cap in 1_usize..8,
    ) {
        let all = ids(&input);
        let selection = EpisodeSelector::new(threshold, cap).select(input, "AI News");

        prop_assert!(selection.selected.len() <= cap);
        prop_assert!(selection.selected.iter().all(|c| c.topic_score >= threshold));
        prop_assert!(selection
            .selected
            .windows(2)
            .all(|pair| rank_order(&pair[0], &pair[1]).is_le()));

        let mut seen = ids(&selection.selected);
        seen.extend(selection.excluded_ids.iter().cloned());
        seen.sort();
        let mut expected = all;
        expected.sort();
        prop_assert_eq!(seen, expected);
    }
}

// ============================================================================
// Budget
// ============================================================================

proptest! {
    /// Property: a fit keeps the top of the ranking and stays within the limit;
    /// an infeasible budget means the top two alone are too large.
    #[test]
    fn prop_budget_keeps_ranked_prefix(input in candidates(), max_tokens in 1_usize..4000) {
        let enforcer = BudgetEnforcer::new(max_tokens);
        let mut ranked = input.clone();
        ranked.sort_by(rank_order);

        match enforcer.fit(input) {
            Ok(fit) => {
                prop_assert!(fit.estimated_tokens <= fit.limit);
                prop_assert!(fit.kept.len() >= ranked.len().min(MIN_CANDIDATES));
                prop_assert_eq!(ids(&fit.kept), ids(&ranked[..fit.kept.len()]));

                let mut dropped = ids(&ranked[fit.kept.len()..]);
                dropped.reverse();
                prop_assert_eq!(fit.dropped_ids, dropped);
            },
            Err(Error::BudgetInfeasible { estimated_tokens, limit }) => {
                let floor: usize = ranked
                    .iter()
                    .take(MIN_CANDIDATES)
                    .map(|c| estimate_tokens(c.summary_chars()))
                    .sum();
                prop_assert_eq!(estimated_tokens, floor);
                prop_assert!(estimated_tokens > limit);
            },
            Err(other) => prop_assert!(false, "unexpected error: {}", other),
        }
    }

    /// Property: the outcome does not depend on input order.
    #[test]
    fn prop_budget_order_independent(
        (input, shuffled) in candidates().prop_flat_map(|c| (Just(c.clone()), Just(c).prop_shuffle())),
        max_tokens in 1_usize..4000,
    ) {
        let enforcer = BudgetEnforcer::new(max_tokens);
        match (enforcer.fit(input), enforcer.fit(shuffled)) {
            (Ok(a), Ok(b)) => {
                prop_assert_eq!(ids(&a.kept), ids(&b.kept));
                prop_assert_eq!(a.dropped_ids, b.dropped_ids);
            },
            (Err(_), Err(_)) => {},
            (a, b) => prop_assert!(false, "diverged: {:?} vs {:?}", a.is_ok(), b.is_ok()),
        }
    }
}
