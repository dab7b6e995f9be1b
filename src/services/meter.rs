//! Per-stage call accounting that becomes a [`RunHeader`].

use crate::llm::TokenUsage;
use crate::models::{RunHeader, RunId};
use crate::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Accumulates token, retry and failure counts for one API-calling stage.
///
/// Shared by reference across worker threads, so every counter is atomic.
#[derive(Debug)]
pub struct StageMeter {
    component: &'static str,
    model: String,
    started: Instant,
    tokens_in: AtomicU64,
    tokens_out: AtomicU64,
    retries: AtomicU64,
    failures: AtomicU64,
}

impl StageMeter {
    /// Starts metering `component`. Wall time counts from here.
    #[must_use]
    pub fn start(component: &'static str, model: impl Into<String>) -> Self {
        Self {
            component,
            model: model.into(),
            started: Instant::now(),
            tokens_in: AtomicU64::new(0),
            tokens_out: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Component name.
    #[must_use]
    pub const fn component(&self) -> &'static str {
        self.component
    }

    /// Records a successful call.
    pub fn record_success(&self, usage: TokenUsage, attempts: u32) {
        self.tokens_in.fetch_add(usage.input, Ordering::Relaxed);
        self.tokens_out.fetch_add(usage.output, Ordering::Relaxed);
        self.retries
            .fetch_add(u64::from(attempts.saturating_sub(1)), Ordering::Relaxed);
    }

    /// Records a failed call.
    pub fn record_failure(&self, err: &Error) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.retries
            .fetch_add(u64::from(err.attempts().saturating_sub(1)), Ordering::Relaxed);
    }

    /// Snapshot of the counters as a header for `run_id`.
    #[must_use]
    pub fn header(&self, run_id: &RunId) -> RunHeader {
        let mut header = RunHeader::new(run_id, self.component, self.model.clone());
        header.tokens_in = self.tokens_in.load(Ordering::Relaxed);
        header.tokens_out = self.tokens_out.load(Ordering::Relaxed);
        header.retries = self.retries.load(Ordering::Relaxed);
        header.failures = self.failures.load(Ordering::Relaxed);
        header.wall_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        header
    }
}
