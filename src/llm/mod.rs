//! Completion service abstraction.
//!
//! Every stage that needs the model builds a [`CompletionRequest`] and sends it
//! through a [`ResilientCaller`], which wraps a [`CompletionService`] with
//! retries, safety screening, structured parsing and auditing.

mod openai;
mod resilience;
mod safety;
pub mod system_prompt;
#[cfg(test)]
pub(crate) mod testing;

pub use openai::OpenAiClient;
pub use resilience::{
    CallResult, JitterSource, RandomJitter, ResilientCaller, RetryPolicy, Sleeper, ThreadSleeper,
};
pub use safety::{ECHO_LONG_LINE_COUNT, LONG_LINE_CHARS, screen_response};
pub use system_prompt::{
    ANTI_INJECTION_PREAMBLE, CHUNK_SUMMARY_PROMPT_VERSION, OperationMode, build_system_prompt,
    wrap_data,
};

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A remote completion service.
///
/// Implementations perform exactly one request per call; retrying belongs to
/// [`ResilientCaller`]. Transient failures must be reported as
/// [`Error::TransientApi`] so they are retried.
pub trait CompletionService: Send + Sync {
    /// The provider name.
    fn name(&self) -> &'static str;

    /// The model requests are sent to.
    fn model(&self) -> &str;

    /// Performs one completion request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransientApi`] for retryable failures and
    /// [`Error::OperationFailed`] for everything else.
    fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse>;
}

/// Reasoning effort hint for models that support it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    /// Minimal reasoning.
    Minimal,
    /// Low reasoning.
    Low,
    /// Medium reasoning.
    Medium,
    /// High reasoning.
    High,
}

impl ReasoningEffort {
    /// Returns the effort as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Parses an effort string (case-insensitive).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "minimal" => Some(Self::Minimal),
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

/// JSON schema the response must follow.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseSchema {
    /// Schema name sent to the service.
    pub name: String,
    /// JSON schema document.
    pub schema: serde_json::Value,
}

impl ResponseSchema {
    /// The schema of a structured response type.
    #[must_use]
    pub fn of<T: StructuredResponse>() -> Self {
        Self {
            name: T::SCHEMA_NAME.to_string(),
            schema: T::schema(),
        }
    }
}

/// A completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// System messages, in order.
    pub system_messages: Vec<String>,
    /// User messages, in order.
    pub user_messages: Vec<String>,
    /// Structured output schema.
    pub response_schema: Option<ResponseSchema>,
    /// Upper bound on completion tokens.
    pub max_output_tokens: u32,
    /// Reasoning effort hint.
    pub reasoning_effort: Option<ReasoningEffort>,
    /// Per-request timeout; the client default applies when `None`.
    pub timeout: Option<Duration>,
}

impl CompletionRequest {
    /// Default completion token limit.
    pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 1024;

    /// Creates a request with one system and one user message.
    #[must_use]
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system_messages: vec![system.into()],
            user_messages: vec![user.into()],
            response_schema: None,
            max_output_tokens: Self::DEFAULT_MAX_OUTPUT_TOKENS,
            reasoning_effort: None,
            timeout: None,
        }
    }

    /// Sets the structured output schema.
    #[must_use]
    pub fn with_schema(mut self, schema: ResponseSchema) -> Self {
        self.response_schema = Some(schema);
        self
    }

    /// Sets the completion token limit.
    #[must_use]
    pub const fn with_max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = tokens;
        self
    }

    /// Sets the reasoning effort hint.
    #[must_use]
    pub const fn with_reasoning_effort(mut self, effort: Option<ReasoningEffort>) -> Self {
        self.reasoning_effort = effort;
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Puts `preamble` ahead of every other system message.
    ///
    /// Does nothing if the preamble is already first.
    #[must_use]
    pub fn with_preamble(mut self, preamble: &str) -> Self {
        if self.system_messages.first().map(String::as_str) != Some(preamble) {
            self.system_messages.insert(0, preamble.to_string());
        }
        self
    }
}

/// Token accounting reported by the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens.
    pub input: u64,
    /// Completion tokens.
    pub output: u64,
}

/// A raw completion response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionResponse {
    /// Response body as returned by the model.
    pub text: String,
    /// Token usage.
    pub usage: TokenUsage,
}

/// A typed response parsed from model output.
pub trait StructuredResponse: DeserializeOwned {
    /// Schema name sent with the request.
    const SCHEMA_NAME: &'static str;

    /// JSON schema of the response.
    fn schema() -> serde_json::Value;

    /// Checks constraints the JSON schema cannot express.
    ///
    /// # Errors
    ///
    /// Returns a description of the violated constraint.
    fn validate(&self) -> std::result::Result<(), String> {
        Ok(())
    }
}

/// Parses and validates a structured response.
///
/// # Errors
///
/// Returns [`Error::SchemaViolation`] if the text is not valid JSON for `T` or
/// fails `T::validate`.
pub fn parse_structured<T: StructuredResponse>(text: &str) -> Result<T> {
    let json = extract_json_from_response(text);
    let value: T = serde_json::from_str(json).map_err(|e| Error::SchemaViolation {
        cause: format!("{}: {e}", T::SCHEMA_NAME),
    })?;
    value.validate().map_err(|cause| Error::SchemaViolation {
        cause: format!("{}: {cause}", T::SCHEMA_NAME),
    })?;
    Ok(value)
}

/// HTTP client configuration for completion requests.
#[derive(Debug, Clone, Copy)]
pub struct LlmHttpConfig {
    /// Request timeout in milliseconds (0 to disable).
    pub timeout_ms: u64,
    /// Connect timeout in milliseconds (0 to disable).
    pub connect_timeout_ms: u64,
}

impl Default for LlmHttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 60_000,
            connect_timeout_ms: 5_000,
        }
    }
}

/// Builds a blocking HTTP client with the configured timeouts.
#[must_use]
pub fn build_http_client(config: LlmHttpConfig) -> reqwest::blocking::Client {
    let mut builder = reqwest::blocking::Client::builder();
    if config.timeout_ms > 0 {
        builder = builder.timeout(Duration::from_millis(config.timeout_ms));
    }
    if config.connect_timeout_ms > 0 {
        builder = builder.connect_timeout(Duration::from_millis(config.connect_timeout_ms));
    }

    builder.build().unwrap_or_else(|err| {
        tracing::warn!("Failed to build completion HTTP client: {err}");
        reqwest::blocking::Client::new()
    })
}

/// Extracts JSON from model output, handling markdown code fences and chatter
/// around the object.
#[must_use]
pub fn extract_json_from_response(response: &str) -> &str {
    let trimmed = response.trim();

    if let Some(start) = trimmed.find("```json") {
        let json_start = start + 7;
        if let Some(end) = trimmed[json_start..].find("```") {
            return trimmed[json_start..json_start + end].trim();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after_marker = start + 3;
        let json_start = trimmed[after_marker..]
            .find('{')
            .map_or(after_marker, |pos| after_marker + pos);
        if let Some(end) = trimmed[json_start..].find("```") {
            return trimmed[json_start..json_start + end].trim();
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            return &trimmed[start..=end];
        }
    }

    trimmed
}
