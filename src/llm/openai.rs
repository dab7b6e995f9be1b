//! `OpenAI`-compatible Chat Completions client.

use super::{
    CompletionRequest, CompletionResponse, CompletionService, LlmHttpConfig, TokenUsage,
    build_http_client,
};
use crate::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// `OpenAI` completion client.
///
/// Works against any endpoint that speaks the Chat Completions protocol with
/// `json_schema` response formats.
pub struct OpenAiClient {
    api_key: Option<SecretString>,
    endpoint: String,
    model: String,
    client: reqwest::blocking::Client,
}

impl OpenAiClient {
    /// Default API endpoint.
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.openai.com/v1";

    /// Default model.
    pub const DEFAULT_MODEL: &'static str = "gpt-5-mini";

    /// Creates a client, reading the key from `OPENAI_API_KEY`.
    #[must_use]
    pub fn new() -> Self {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .map(SecretString::from);
        Self {
            api_key,
            endpoint: Self::DEFAULT_ENDPOINT.to_string(),
            model: Self::DEFAULT_MODEL.to_string(),
            client: build_http_client(LlmHttpConfig::default()),
        }
    }

    /// Sets the API key.
    #[must_use]
    pub fn with_api_key(mut self, key: SecretString) -> Self {
        self.api_key = Some(key);
        self
    }

    /// Sets the API endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Replaces the HTTP client timeouts.
    #[must_use]
    pub fn with_http_config(mut self, config: LlmHttpConfig) -> Self {
        self.client = build_http_client(config);
        self
    }

    /// Whether the model takes `max_completion_tokens` and reasoning effort.
    ///
    /// These models also reject a non-default temperature.
    fn is_reasoning_model(&self) -> bool {
        self.model.starts_with("gpt-5")
            || self.model.starts_with("o1")
            || self.model.starts_with("o3")
            || self.model.starts_with("o4")
    }

    fn build_body(&self, request: &CompletionRequest) -> ChatCompletionRequest {
        let messages = request
            .system_messages
            .iter()
            .map(|content| ChatMessage {
                role: "system".to_string(),
                content: Some(content.clone()),
            })
            .chain(request.user_messages.iter().map(|content| ChatMessage {
                role: "user".to_string(),
                content: Some(content.clone()),
            }))
            .collect();

        let response_format = request.response_schema.as_ref().map(|schema| ResponseFormat {
            kind: "json_schema",
            json_schema: JsonSchemaFormat {
                name: schema.name.clone(),
                schema: schema.schema.clone(),
                strict: true,
            },
        });

        let reasoning = self.is_reasoning_model();
        ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            max_tokens: (!reasoning).then_some(request.max_output_tokens),
            max_completion_tokens: reasoning.then_some(request.max_output_tokens),
            temperature: (!reasoning).then_some(0.3),
            reasoning_effort: if reasoning {
                request.reasoning_effort.map(super::ReasoningEffort::as_str)
            } else {
                None
            },
            response_format,
        }
    }
}

impl Default for OpenAiClient {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionService for OpenAiClient {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let api_key = self.api_key.as_ref().ok_or_else(|| Error::OperationFailed {
            operation: "openai_request".to_string(),
            cause: "OPENAI_API_KEY not set".to_string(),
        })?;

        let mut http = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .bearer_auth(api_key.expose_secret())
            .json(&self.build_body(request));
        if let Some(timeout) = request.timeout {
            http = http.timeout(timeout);
        }

        let response = http.send().map_err(|e| classify_transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(classify_status(status.as_u16(), &body));
        }

        let body: ChatCompletionResponse =
            response.json().map_err(|e| Error::SchemaViolation {
                cause: format!("unreadable completion envelope: {e}"),
            })?;
        completion_from_envelope(body)
    }
}

fn completion_from_envelope(body: ChatCompletionResponse) -> Result<CompletionResponse> {
    let usage = body.usage.map_or_else(TokenUsage::default, |usage| TokenUsage {
        input: usage.prompt_tokens,
        output: usage.completion_tokens,
    });
    let text = body
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| Error::SchemaViolation {
            cause: "completion has no content".to_string(),
        })?;
    Ok(CompletionResponse { text, usage })
}

fn classify_transport_error(err: &reqwest::Error) -> Error {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        Error::TransientApi {
            status: None,
            cause: err.to_string(),
        }
    } else {
        Error::OperationFailed {
            operation: "openai_request".to_string(),
            cause: err.to_string(),
        }
    }
}

/// Maps a non-success HTTP status to an error.
///
/// Rate limiting (429), request timeouts (408) and server errors (5xx) are
/// transient; everything else is permanent.
fn classify_status(status: u16, body: &str) -> Error {
    let cause = truncate(body, 300);
    if status == 429 || status == 408 || (500..=599).contains(&status) {
        Error::TransientApi {
            status: Some(status),
            cause,
        }
    } else {
        Error::OperationFailed {
            operation: "openai_request".to_string(),
            cause: format!("API returned status {status}: {cause}"),
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
    json_schema: JsonSchemaFormat,
}

#[derive(Debug, Serialize)]
struct JsonSchemaFormat {
    name: String,
    schema: serde_json::Value,
    strict: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}
