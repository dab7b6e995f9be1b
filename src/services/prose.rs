//! Prose validation for narrator-ready text.
//!
//! Text destined for speech synthesis must read as paragraphs, not as a slide
//! deck. [`ProseValidator::check`] flags list, heading and label structure with
//! line-ratio heuristics; [`ProseValidator::ensure_prose`] asks the model to
//! rewrite offending text a bounded number of times.

// Static patterns are compiled once and known to be valid.
#![allow(clippy::expect_used)]

use super::meter::StageMeter;
use crate::config::{DigestConfig, StageConfig};
use crate::llm::{
    CompletionRequest, OperationMode, ResilientCaller, StructuredResponse, build_system_prompt,
    wrap_data,
};
use crate::models::RunId;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

/// Lines shorter than this are "short".
pub const SHORT_LINE_CHARS: usize = 30;
/// All-caps lines must be shorter than this to count as labels.
pub const CAPS_LINE_MAX_CHARS: usize = 60;
/// Minimum average words per sentence.
pub const MIN_AVG_SENTENCE_WORDS: f64 = 8.0;
/// Markdown matches tolerated before the text is flagged.
pub const MAX_MARKDOWN_MATCHES: usize = 5;

const LIST_RATIO: f64 = 0.20;
const HEADER_RATIO: f64 = 0.10;
const SHORT_RATIO: f64 = 0.40;
const COLON_RATIO: f64 = 0.30;
const CAPITALIZED_RATIO: f64 = 0.20;
const CAPITALIZED_WORDS_SHARE: f64 = 0.60;
const CAPITALIZED_MIN_WORDS: usize = 4;

static LIST_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*+\u{2022}\u{25CF}]|\d{1,3}[.)]|[a-zA-Z][.)])\s+")
        .expect("static regex: list line")
});

static HEADER_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*#{1,6}\s").expect("static regex: header line"));

static MARKDOWN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)\*\*[^*\n]+\*\*|__[^_\n]+__|\*[^*\s][^*\n]*\*|\b_[^_\n]+_\b|`[^`\n]+`|\[[^\]\n]+\]\([^)\n]+\)|^\s*#{1,6}\s|^\s*>\s|^\s*\|.*\|\s*$|^\s*(?:-{3,}|\*{3,})\s*$",
    )
    .expect("static regex: markdown")
});

static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+(?:\s+|$)").expect("static regex: sentence end"));

/// Terminal state of the prose loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProseState {
    /// The text (original or rewritten) passed every check.
    Accepted,
    /// Every rewrite attempt was used up and issues remain.
    RejectedAfterAttempts(u32),
}

/// Result of [`ProseValidator::ensure_prose`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProseOutcome {
    /// Whether the final text passed.
    pub ok: bool,
    /// Final text: the input if it passed, otherwise the latest rewrite.
    pub text: String,
    /// Issues of the final text (empty when accepted).
    pub issues: Vec<String>,
    /// Rewrite attempts made, successful or not.
    pub attempts: u32,
    /// Terminal state.
    pub state: ProseState,
}

/// Structured response of a rewrite call.
#[derive(Debug, Deserialize)]
pub struct ProseRewriteResponse {
    /// The rewritten text.
    pub text: String,
}

impl StructuredResponse for ProseRewriteResponse {
    const SCHEMA_NAME: &'static str = "prose_rewrite";

    fn schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "text": {"type": "string"}
            },
            "required": ["text"],
            "additionalProperties": false
        })
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.text.trim().is_empty() {
            return Err("text is empty".to_string());
        }
        Ok(())
    }
}

/// Checks and repairs digest prose.
pub struct ProseValidator {
    caller: ResilientCaller,
    stage: StageConfig,
    max_attempts: u32,
}

impl ProseValidator {
    /// Creates a validator.
    #[must_use]
    pub fn new(caller: ResilientCaller, config: &DigestConfig) -> Self {
        Self {
            caller,
            stage: config.rewriter.clone(),
            max_attempts: config.prose.max_rewrite_attempts,
        }
    }

    /// Model used for rewrites.
    #[must_use]
    pub fn model(&self) -> &str {
        self.caller.model()
    }

    /// Runs every heuristic over the non-empty lines of `text`.
    ///
    /// Returns one description per failed heuristic; an empty list means the
    /// text is acceptable.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn check(text: &str) -> Vec<String> {
        let lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        if lines.is_empty() {
            return vec!["text is empty".to_string()];
        }

        let total = lines.len();
        let ratio = |count: usize| count as f64 / total as f64;
        let mut issues = Vec::new();

        let list = lines.iter().filter(|l| LIST_LINE.is_match(l)).count();
        if ratio(list) > LIST_RATIO {
            issues.push(format!("list lines: {list} of {total}"));
        }

        let headers = lines
            .iter()
            .filter(|l| HEADER_LINE.is_match(l) || is_caps_label(l))
            .count();
        if ratio(headers) > HEADER_RATIO {
            issues.push(format!("heading or all-caps lines: {headers} of {total}"));
        }

        let short: Vec<&&str> = lines
            .iter()
            .filter(|l| l.chars().count() < SHORT_LINE_CHARS)
            .collect();
        if ratio(short.len()) > SHORT_RATIO {
            issues.push(format!("short lines: {} of {total}", short.len()));
        }

        let labels = short.iter().filter(|l| l.contains(':')).count();
        if ratio(labels) > COLON_RATIO {
            issues.push(format!("label lines: {labels} of {total}"));
        }

        let capitalized = lines.iter().filter(|l| is_heavily_capitalized(l)).count();
        if ratio(capitalized) > CAPITALIZED_RATIO {
            issues.push(format!("title-case lines: {capitalized} of {total}"));
        }

        let average = average_sentence_words(text);
        if average < MIN_AVG_SENTENCE_WORDS {
            issues.push(format!("average sentence length {average:.1} words"));
        }

        let markdown = MARKDOWN.find_iter(text).count();
        if markdown > MAX_MARKDOWN_MATCHES {
            issues.push(format!("markdown formatting: {markdown} matches"));
        }

        issues
    }

    /// Ensures `text` is narrator-ready prose.
    ///
    /// Invalid text is rewritten up to the configured number of attempts, each
    /// candidate re-checked. A failed rewrite call still uses up an attempt and
    /// keeps the previous candidate. Never fails: rejection is reported through
    /// [`ProseOutcome::ok`].
    pub fn ensure_prose(
        &self,
        run_id: &RunId,
        meter: &StageMeter,
        topic: &str,
        text: &str,
    ) -> ProseOutcome {
        let mut candidate = text.to_string();
        let mut issues = Self::check(&candidate);
        let mut attempts = 0;

        while !issues.is_empty() && attempts < self.max_attempts {
            attempts += 1;
            tracing::debug!(topic, attempt = attempts, issues = ?issues, "Prose invalid, rewriting");
            if let Some(rewritten) = self.rewrite(run_id, meter, topic, &candidate, &issues, attempts)
            {
                candidate = rewritten;
                issues = Self::check(&candidate);
            }
        }

        let ok = issues.is_empty();
        let state = if ok {
            ProseState::Accepted
        } else {
            ProseState::RejectedAfterAttempts(attempts)
        };
        metrics::counter!(
            "prose_checks_total",
            "result" => if ok { "accepted" } else { "rejected" }
        )
        .increment(1);
        if ok {
            tracing::info!(topic, attempts, "Prose accepted");
        } else {
            tracing::warn!(topic, attempts, issues = ?issues, "Prose rejected after rewrites");
        }

        ProseOutcome {
            ok,
            text: candidate,
            issues,
            attempts,
            state,
        }
    }

    fn rewrite(
        &self,
        run_id: &RunId,
        meter: &StageMeter,
        topic: &str,
        draft: &str,
        issues: &[String],
        attempt: u32,
    ) -> Option<String> {
        let request = CompletionRequest::new(
            build_system_prompt(OperationMode::ProseRewrite, Some(topic)),
            format!(
                "Problems found: {}.\n\n{}",
                issues.join("; "),
                wrap_data("draft", draft)
            ),
        )
        .with_max_output_tokens(self.stage.max_output_tokens)
        .with_reasoning_effort(self.stage.reasoning_effort)
        .with_timeout(self.stage.timeout());

        let idempotency_key = format!("{run_id}/prose/{topic}/{attempt}");
        match self.caller.call::<ProseRewriteResponse>(
            OperationMode::ProseRewrite.component(),
            run_id,
            &idempotency_key,
            request,
        ) {
            Ok(result) => {
                meter.record_success(result.usage, result.attempts);
                Some(result.value.text.trim().to_string())
            },
            Err(e) => {
                meter.record_failure(&e);
                tracing::warn!(topic, attempt, error = %e, "Prose rewrite failed");
                None
            },
        }
    }
}

fn is_caps_label(line: &str) -> bool {
    if line.chars().count() >= CAPS_LINE_MAX_CHARS {
        return false;
    }
    let letters = line.chars().filter(|c| c.is_alphabetic()).count();
    letters >= 2 && !line.chars().any(char::is_lowercase)
}

#[allow(clippy::cast_precision_loss)]
fn is_heavily_capitalized(line: &str) -> bool {
    let words: Vec<&str> = line.split_whitespace().collect();
    if words.len() < CAPITALIZED_MIN_WORDS {
        return false;
    }
    let capitalized = words
        .iter()
        .filter(|w| w.chars().find(|c| c.is_alphabetic()).is_some_and(char::is_uppercase))
        .count();
    capitalized as f64 / words.len() as f64 >= CAPITALIZED_WORDS_SHARE
}

#[allow(clippy::cast_precision_loss)]
fn average_sentence_words(text: &str) -> f64 {
    let sentences: Vec<usize> = SENTENCE_END
        .split(text)
        .map(|s| s.split_whitespace().count())
        .filter(|&words| words > 0)
        .collect();
    if sentences.is_empty() {
        return 0.0;
    }
    sentences.iter().sum::<usize>() as f64 / sentences.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::llm::testing::{MockCompletion, instant_caller, user_message};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use test_case::test_case;

    const GOOD: &str = "The first episode spent most of its hour on the new accelerator launch and what it means for cloud pricing. \
        Both hosts agreed that supply will stay tight through the middle of next year at the very least. \
        A guest from a chip startup argued that smaller labs will be priced out of frontier training runs entirely. \
        The show closed with a long discussion of export rules and how they might shift after the election.";

    const REWRITTEN: &str = "The episode covered three developments in detail, starting with the accelerator launch that dominated the news. \
        It then moved on to pricing, where the hosts expected cloud costs to rise over the coming months. \
        Finally, the hosts discussed export rules and what they could mean for research labs abroad.";

    fn validator(service: Arc<MockCompletion>) -> ProseValidator {
        ProseValidator::new(instant_caller(service), &DigestConfig::default())
    }

    fn reply(text: &str) -> String {
        serde_json::json!({ "text": text }).to_string()
    }

    #[test]
    fn test_good_paragraph_has_no_issues() {
        assert!(ProseValidator::check(GOOD).is_empty(), "{:?}", ProseValidator::check(GOOD));
    }

    #[test]
    fn test_five_bullets_of_six_rejected() {
        let text = "Here is what happened across the shows this week in artificial intelligence news.\n\
            - Nvidia shipped a new accelerator for data centers\n\
            - Prices for cloud training are expected to rise\n\
            - A startup raised a large round for inference chips\n\
            - Export rules may tighten after the election\n\
            - Researchers published a new open model family";
        let issues = ProseValidator::check(text);
        assert!(issues.iter().any(|i| i.starts_with("list lines: 5 of 6")), "{issues:?}");
    }

    #[test_case("## Overview\nThe first show spent most of its time on the launch of a new accelerator chip.\n## Pricing\nThe second show was all about cloud pricing and what it means for smaller labs." ; "markdown headers")]
    #[test_case("KEY POINTS\nThe first show spent most of its time on the launch of a new accelerator chip and its pricing." ; "all caps label")]
    #[test_case("Chips: up\nPrices: up\nThe hosts spent the rest of the hour on export rules and what they mean for labs." ; "label lines")]
    #[test_case("Big news. Chips shipped. Prices rose. Labs worried. Hosts argued. Show ended." ; "short sentences")]
    #[test_case("The New Accelerator From The Biggest Chip Maker Arrives\nWhat It Means For Cloud Pricing And Small Labs Everywhere\nThe hosts spent the rest of the hour on export rules and what they mean for labs abroad." ; "title case lines")]
    #[test_case("The show covered **chips** and **prices** and **labs** and **rules** and **models** and **funding** at length today, which was a lot for one hour." ; "markdown emphasis")]
    #[test_case("The show covered *chips* and *prices* and *labs* and *rules* and *models* and *funding* at length today, which was a lot for one hour." ; "asterisk italics")]
    #[test_case("The show covered _chips_ and _prices_ and _labs_ and _rules_ and _models_ and _funding_ at length today, which was a lot for one hour." ; "underscore italics")]
    fn test_structure_is_flagged(text: &str) {
        assert!(!ProseValidator::check(text).is_empty());
    }

    #[test]
    fn test_identifiers_and_arithmetic_are_not_markdown() {
        let text = "The hosts read the rate_limit_config and max_batch_size settings aloud and compared them with last year. \
            They worked out that 3 * 4 * 5 accelerators per rack would still leave the smaller labs waiting for capacity.";
        assert_eq!(MARKDOWN.find_iter(text).count(), 0);
    }

    #[test]
    fn test_bold_counts_once() {
        assert_eq!(MARKDOWN.find_iter("A **bold** claim and an *italic* one.").count(), 2);
    }

    #[test_case("KEY POINTS", true ; "caps")]
    #[test_case("AI", true ; "two letters")]
    #[test_case("A", false ; "one letter")]
    #[test_case("Key points", false ; "mixed case")]
    #[test_case("2024", false ; "digits only")]
    fn test_caps_label(line: &str, expected: bool) {
        assert_eq!(is_caps_label(line), expected);
    }

    #[test]
    fn test_empty_text_is_invalid() {
        assert_eq!(ProseValidator::check("  \n\n "), vec!["text is empty"]);
    }

    #[test]
    fn test_valid_text_is_accepted_without_calls() {
        let service = Arc::new(MockCompletion::new(|_| Ok(reply(REWRITTEN))));
        let validator = validator(Arc::clone(&service));
        let meter = StageMeter::start("prose_validator", validator.model());
        let outcome = validator.ensure_prose(&RunId::new("r"), &meter, "AI News", GOOD);

        assert!(outcome.ok);
        assert_eq!(outcome.text, GOOD);
        assert_eq!(outcome.attempts, 0);
        assert_eq!(outcome.state, ProseState::Accepted);
        assert_eq!(service.calls(), 0);
    }

    #[test]
    fn test_rewrite_repairs_text() {
        let service = Arc::new(MockCompletion::new(|_| Ok(reply(REWRITTEN))));
        let validator = validator(Arc::clone(&service));
        let meter = StageMeter::start("prose_validator", validator.model());
        let outcome =
            validator.ensure_prose(&RunId::new("r"), &meter, "AI News", "- chips\n- prices\n- labs");

        assert!(outcome.ok);
        assert_eq!(outcome.text, REWRITTEN);
        assert_eq!(outcome.attempts, 1);
        assert!(outcome.issues.is_empty());
        let payload = user_message(&service.requests()[0]).to_string();
        assert!(payload.contains("<draft>"));
        assert!(payload.contains("list lines"));
    }

    #[test]
    fn test_rejected_after_two_attempts_keeps_latest_candidate() {
        let counter = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&counter);
        let service = Arc::new(MockCompletion::new(move |_| {
            let n = seen.fetch_add(1, Ordering::SeqCst);
            Ok(reply(&format!("- still\n- a\n- list {n}")))
        }));
        let validator = validator(Arc::clone(&service));
        let meter = StageMeter::start("prose_validator", validator.model());
        let outcome = validator.ensure_prose(&RunId::new("r"), &meter, "AI News", "- x\n- y");

        assert!(!outcome.ok);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.state, ProseState::RejectedAfterAttempts(2));
        assert_eq!(outcome.text, "- still\n- a\n- list 1");
        assert!(!outcome.issues.is_empty());
        assert_eq!(service.calls(), 2);
    }

    #[test]
    fn test_failed_rewrite_counts_as_attempt() {
        let counter = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&counter);
        let service = Arc::new(MockCompletion::new(move |_| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(Error::OperationFailed {
                    operation: "openai_request".to_string(),
                    cause: "400".to_string(),
                })
            } else {
                Ok(reply(REWRITTEN))
            }
        }));
        let validator = validator(Arc::clone(&service));
        let meter = StageMeter::start("prose_validator", validator.model());
        let outcome = validator.ensure_prose(&RunId::new("r"), &meter, "AI News", "- a\n- b");

        assert!(outcome.ok);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.text, REWRITTEN);
        assert_eq!(meter.header(&RunId::new("r")).failures, 1);
    }
}
