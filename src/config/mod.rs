//! Configuration management.
//!
//! A [`DigestConfig`] is built once, from defaults, then an optional TOML file,
//! then `BRIEFCAST_*` environment variables, and is passed by reference into
//! every component constructor. Nothing reads configuration after that.

use crate::llm::ReasoningEffort;
use crate::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, Serializer};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "BRIEFCAST_CONFIG_PATH";

/// Main configuration for briefcast.
#[derive(Debug, Clone, Serialize)]
pub struct DigestConfig {
    /// Directory holding `briefcast.db`, the audit log and diagnostics.
    pub data_dir: PathBuf,
    /// Transcript chunking.
    pub chunking: ChunkingConfig,
    /// Map-phase coverage thresholds.
    pub coverage: CoverageConfig,
    /// Episode selection.
    pub selection: SelectionConfig,
    /// Reduce-phase token budget.
    pub budget: BudgetConfig,
    /// Retry policy for completion calls.
    pub retry: RetryConfig,
    /// Prose validation.
    pub prose: ProseConfig,
    /// Completion service connection.
    pub llm: LlmConfig,
    /// Chunk summarization calls.
    pub summarizer: StageConfig,
    /// Digest synthesis calls.
    pub synthesizer: StageConfig,
    /// Prose rewrite calls.
    pub rewriter: StageConfig,
    /// Concurrency and run limits.
    pub runtime: RuntimeConfig,
    /// Call audit log.
    pub audit: AuditSettings,
    /// Logging output.
    pub logging: LoggingConfig,
}

/// Chunking configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkingConfig {
    /// Window size in characters.
    pub chunk_size: usize,
    /// Overlap between windows in characters.
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: crate::services::DEFAULT_CHUNK_SIZE,
            chunk_overlap: crate::services::DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// Coverage thresholds for the map phase.
///
/// Applied per included episode. An episode is OK only when at least
/// `min_chunks_ok` of its chunks (or all of them, if it has fewer) were
/// summarized by the model and they make up at least `min_coverage_pct`
/// percent of its chunks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CoverageConfig {
    /// Minimum successfully summarized chunks.
    pub min_chunks_ok: usize,
    /// Minimum percentage of successfully summarized chunks.
    pub min_coverage_pct: f64,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            min_chunks_ok: 2,
            min_coverage_pct: 60.0,
        }
    }
}

/// Episode selection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SelectionConfig {
    /// Inclusive minimum topic score.
    pub relevance_threshold: f64,
    /// Maximum episodes kept per topic.
    pub max_episodes_per_topic: usize,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            relevance_threshold: 0.65,
            max_episodes_per_topic: 6,
        }
    }
}

/// Reduce-phase token budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BudgetConfig {
    /// Token budget of the synthesis request, before the safety margin.
    pub max_reduce_tokens: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_reduce_tokens: 6000,
        }
    }
}

/// Retry policy for completion calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryConfig {
    /// Maximum attempts per call, including the first.
    pub max_retries: u32,
    /// Backoff base delay in milliseconds.
    pub backoff_base_delay_ms: u64,
    /// Upper bound of the random jitter added to each delay, in milliseconds.
    pub max_jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 4,
            backoff_base_delay_ms: 750,
            max_jitter_ms: 400,
        }
    }
}

/// Prose validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProseConfig {
    /// Model-assisted rewrite attempts before giving up.
    pub max_rewrite_attempts: u32,
}

impl Default for ProseConfig {
    fn default() -> Self {
        Self {
            max_rewrite_attempts: 2,
        }
    }
}

/// Completion service connection settings.
#[derive(Debug, Clone, Serialize)]
pub struct LlmConfig {
    /// Chat Completions endpoint base URL.
    pub endpoint: String,
    /// API key. Falls back to `OPENAI_API_KEY`.
    #[serde(serialize_with = "serialize_secret")]
    pub api_key: Option<SecretString>,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: crate::llm::OpenAiClient::DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            connect_timeout_ms: 5_000,
        }
    }
}

/// Per-component completion settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageConfig {
    /// Model name.
    pub model: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Completion token limit.
    pub max_output_tokens: u32,
    /// Reasoning effort hint.
    pub reasoning_effort: Option<ReasoningEffort>,
}

impl StageConfig {
    fn with_tokens(max_output_tokens: u32, reasoning_effort: ReasoningEffort) -> Self {
        Self {
            model: crate::llm::OpenAiClient::DEFAULT_MODEL.to_string(),
            timeout_secs: 60,
            max_output_tokens,
            reasoning_effort: Some(reasoning_effort),
        }
    }

    /// Request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Concurrency and run limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuntimeConfig {
    /// Concurrent chunk summarization workers per topic.
    pub workers: usize,
    /// Topics digested in parallel.
    pub topic_workers: usize,
    /// Abort runs that take longer than this many seconds.
    pub run_deadline_secs: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: crate::services::DEFAULT_WORKERS,
            topic_workers: 2,
            run_deadline_secs: None,
        }
    }
}

/// Call audit log settings.
#[derive(Debug, Clone, Serialize)]
pub struct AuditSettings {
    /// Whether calls are written to the audit file (always kept in memory).
    pub enabled: bool,
    /// Audit file; defaults to `<data_dir>/audit.jsonl`.
    pub log_path: Option<PathBuf>,
    /// HMAC key for chaining entries. Falls back to `BRIEFCAST_AUDIT_HMAC_KEY`.
    #[serde(serialize_with = "serialize_secret")]
    pub hmac_key: Option<SecretString>,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            log_path: None,
            hmac_key: None,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Parses a format string (case-insensitive); unknown values are pretty.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Also write logs to this file.
    pub file: Option<PathBuf>,
    /// Write a Prometheus snapshot of all metrics here on exit.
    pub metrics_file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            level: "info".to_string(),
            file: None,
            metrics_file: None,
        }
    }
}

fn serialize_secret<S: Serializer>(
    secret: &Option<SecretString>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    // Never serialize the actual secret.
    match secret {
        Some(_) => serializer.serialize_some("***REDACTED***"),
        None => serializer.serialize_none(),
    }
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Data directory.
    pub data_dir: Option<String>,
    /// Chunk size.
    pub chunk_size: Option<usize>,
    /// Chunk overlap.
    pub chunk_overlap: Option<usize>,
    /// Minimum successful chunks.
    pub min_chunks_ok: Option<usize>,
    /// Minimum coverage percentage.
    pub min_coverage_pct: Option<f64>,
    /// Relevance threshold.
    pub relevance_threshold: Option<f64>,
    /// Maximum episodes per topic.
    pub max_episodes_per_topic: Option<usize>,
    /// Reduce token budget.
    pub max_reduce_tokens: Option<usize>,
    /// Maximum attempts per call.
    pub max_retries: Option<u32>,
    /// Backoff base delay in seconds.
    pub backoff_base_delay: Option<f64>,
    /// Maximum jitter in seconds.
    pub max_jitter: Option<f64>,
    /// Rewrite attempts.
    pub max_rewrite_attempts: Option<u32>,
    /// Chunk workers.
    pub workers: Option<usize>,
    /// Topic workers.
    pub topic_workers: Option<usize>,
    /// Run deadline in seconds.
    pub run_deadline_secs: Option<u64>,
    /// LLM section.
    pub llm: Option<ConfigFileLlm>,
    /// Audit section.
    pub audit: Option<ConfigFileAudit>,
    /// Logging section.
    pub logging: Option<ConfigFileLogging>,
}

/// LLM section in config file.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileLlm {
    /// Endpoint base URL.
    pub endpoint: Option<String>,
    /// API key.
    pub api_key: Option<String>,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: Option<u64>,
    /// Model for every stage unless overridden below.
    pub model: Option<String>,
    /// Chunk summarization overrides.
    pub summarizer: Option<ConfigFileStage>,
    /// Synthesis overrides.
    pub synthesizer: Option<ConfigFileStage>,
    /// Rewrite overrides.
    pub rewriter: Option<ConfigFileStage>,
}

/// Per-stage section in config file.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileStage {
    /// Model name.
    pub model: Option<String>,
    /// Timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Completion token limit.
    pub max_output_tokens: Option<u32>,
    /// Reasoning effort (`minimal`, `low`, `medium`, `high`, or `none`).
    pub reasoning_effort: Option<String>,
}

/// Audit section in config file.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileAudit {
    /// Enable the audit file.
    pub enabled: Option<bool>,
    /// Audit file path.
    pub log_path: Option<String>,
    /// HMAC key.
    pub hmac_key: Option<String>,
}

/// Logging section in config file.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileLogging {
    /// `pretty` or `json`.
    pub format: Option<String>,
    /// Default filter directive.
    pub level: Option<String>,
    /// Log file path.
    pub file: Option<String>,
    /// Prometheus snapshot path.
    pub metrics_file: Option<String>,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            data_dir: crate::storage::default_data_dir()
                .unwrap_or_else(|_| PathBuf::from(".briefcast")),
            chunking: ChunkingConfig::default(),
            coverage: CoverageConfig::default(),
            selection: SelectionConfig::default(),
            budget: BudgetConfig::default(),
            retry: RetryConfig::default(),
            prose: ProseConfig::default(),
            llm: LlmConfig::default(),
            summarizer: StageConfig::with_tokens(400, ReasoningEffort::Minimal),
            synthesizer: StageConfig::with_tokens(4000, ReasoningEffort::Medium),
            rewriter: StageConfig::with_tokens(3000, ReasoningEffort::Low),
            runtime: RuntimeConfig::default(),
            audit: AuditSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl DigestConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path, then applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or the result is
    /// invalid.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        let mut config = Self::from_toml(&contents)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from `BRIEFCAST_CONFIG_PATH` or the default location.
    ///
    /// Checks the following paths in order:
    /// 1. `BRIEFCAST_CONFIG_PATH`
    /// 2. Platform-specific config dir (`<config_dir>/briefcast/config.toml`)
    /// 3. XDG config dir (`~/.config/briefcast/config.toml`)
    ///
    /// Falls back to defaults plus environment overrides if no file is found.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but is unreadable or invalid.
    pub fn load_default() -> Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Self::load_from_file(Path::new(&path));
        }

        if let Some(base_dirs) = directories::BaseDirs::new() {
            let candidates = [
                base_dirs.config_dir().join("briefcast").join("config.toml"),
                base_dirs
                    .home_dir()
                    .join(".config")
                    .join("briefcast")
                    .join("config.toml"),
            ];
            if let Some(path) = candidates.iter().find(|p| p.exists()) {
                return Self::load_from_file(path);
            }
        }

        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parses TOML text over the defaults, without environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid config file.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(contents).map_err(|e| Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })?;
        Self::from_config_file(file)
    }

    /// Converts a `ConfigFile` to `DigestConfig`.
    fn from_config_file(file: ConfigFile) -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = file.data_dir {
            config.data_dir = PathBuf::from(v);
        }
        if let Some(v) = file.chunk_size {
            config.chunking.chunk_size = v;
        }
        if let Some(v) = file.chunk_overlap {
            config.chunking.chunk_overlap = v;
        }
        if let Some(v) = file.min_chunks_ok {
            config.coverage.min_chunks_ok = v;
        }
        if let Some(v) = file.min_coverage_pct {
            config.coverage.min_coverage_pct = v;
        }
        if let Some(v) = file.relevance_threshold {
            config.selection.relevance_threshold = v;
        }
        if let Some(v) = file.max_episodes_per_topic {
            config.selection.max_episodes_per_topic = v;
        }
        if let Some(v) = file.max_reduce_tokens {
            config.budget.max_reduce_tokens = v;
        }
        if let Some(v) = file.max_retries {
            config.retry.max_retries = v;
        }
        if let Some(v) = file.backoff_base_delay {
            config.retry.backoff_base_delay_ms = secs_to_ms(v)?;
        }
        if let Some(v) = file.max_jitter {
            config.retry.max_jitter_ms = secs_to_ms(v)?;
        }
        if let Some(v) = file.max_rewrite_attempts {
            config.prose.max_rewrite_attempts = v;
        }
        if let Some(v) = file.workers {
            config.runtime.workers = v;
        }
        if let Some(v) = file.topic_workers {
            config.runtime.topic_workers = v;
        }
        if file.run_deadline_secs.is_some() {
            config.runtime.run_deadline_secs = file.run_deadline_secs;
        }

        if let Some(llm) = file.llm {
            if let Some(v) = llm.endpoint {
                config.llm.endpoint = v;
            }
            if let Some(v) = llm.api_key {
                config.llm.api_key = Some(SecretString::from(v));
            }
            if let Some(v) = llm.connect_timeout_ms {
                config.llm.connect_timeout_ms = v;
            }
            if let Some(model) = llm.model {
                config.set_model(&model);
            }
            apply_stage(&mut config.summarizer, llm.summarizer)?;
            apply_stage(&mut config.synthesizer, llm.synthesizer)?;
            apply_stage(&mut config.rewriter, llm.rewriter)?;
        }

        if let Some(audit) = file.audit {
            if let Some(v) = audit.enabled {
                config.audit.enabled = v;
            }
            config.audit.log_path = audit.log_path.map(PathBuf::from);
            config.audit.hmac_key = audit.hmac_key.map(SecretString::from);
        }

        if let Some(logging) = file.logging {
            if let Some(v) = logging.format {
                config.logging.format = LogFormat::parse(&v);
            }
            if let Some(v) = logging.level {
                config.logging.level = v;
            }
            config.logging.file = logging.file.map(PathBuf::from);
            config.logging.metrics_file = logging.metrics_file.map(PathBuf::from);
        }

        Ok(config)
    }

    /// Applies `BRIEFCAST_*` and `OPENAI_API_KEY` overrides from the process
    /// environment. Call after `dotenvy` has loaded any `.env` file.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Applies environment-style overrides from an arbitrary lookup.
    ///
    /// Unparseable values are logged and ignored.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("BRIEFCAST_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        override_parsed(&get, "BRIEFCAST_CHUNK_SIZE", &mut self.chunking.chunk_size);
        override_parsed(&get, "BRIEFCAST_CHUNK_OVERLAP", &mut self.chunking.chunk_overlap);
        override_parsed(&get, "BRIEFCAST_MIN_CHUNKS_OK", &mut self.coverage.min_chunks_ok);
        override_parsed(&get, "BRIEFCAST_MIN_COVERAGE_PCT", &mut self.coverage.min_coverage_pct);
        override_parsed(
            &get,
            "BRIEFCAST_RELEVANCE_THRESHOLD",
            &mut self.selection.relevance_threshold,
        );
        override_parsed(
            &get,
            "BRIEFCAST_MAX_EPISODES_PER_TOPIC",
            &mut self.selection.max_episodes_per_topic,
        );
        override_parsed(&get, "BRIEFCAST_MAX_REDUCE_TOKENS", &mut self.budget.max_reduce_tokens);
        override_parsed(&get, "BRIEFCAST_MAX_RETRIES", &mut self.retry.max_retries);
        override_parsed(
            &get,
            "BRIEFCAST_BACKOFF_BASE_MS",
            &mut self.retry.backoff_base_delay_ms,
        );
        override_parsed(&get, "BRIEFCAST_WORKERS", &mut self.runtime.workers);
        override_parsed(&get, "BRIEFCAST_TOPIC_WORKERS", &mut self.runtime.topic_workers);
        if let Some(v) = get("BRIEFCAST_RUN_DEADLINE_SECS") {
            match v.parse() {
                Ok(secs) => self.runtime.run_deadline_secs = Some(secs),
                Err(_) => warn_unparsed("BRIEFCAST_RUN_DEADLINE_SECS", &v),
            }
        }
        if let Some(v) = get("BRIEFCAST_MODEL") {
            self.set_model(&v);
        }
        if let Some(v) = get("BRIEFCAST_LLM_ENDPOINT") {
            self.llm.endpoint = v;
        }
        if self.llm.api_key.is_none() {
            self.llm.api_key = get("OPENAI_API_KEY").map(SecretString::from);
        }
        if self.audit.hmac_key.is_none() {
            self.audit.hmac_key = get("BRIEFCAST_AUDIT_HMAC_KEY").map(SecretString::from);
        }
        if let Some(v) = get("BRIEFCAST_LOG_FORMAT") {
            self.logging.format = LogFormat::parse(&v);
        }
        if let Some(v) = get("BRIEFCAST_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = get("BRIEFCAST_LOG_FILE") {
            self.logging.file = Some(PathBuf::from(v));
        }
    }

    /// Checks for impossible values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::InvalidInput(msg));

        if self.chunking.chunk_size == 0 {
            return invalid("chunk_size must be positive".to_string());
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return invalid(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunking.chunk_overlap, self.chunking.chunk_size
            ));
        }
        if !(0.0..=1.0).contains(&self.selection.relevance_threshold) {
            return invalid(format!(
                "relevance_threshold ({}) must be within 0..=1",
                self.selection.relevance_threshold
            ));
        }
        if !(0.0..=100.0).contains(&self.coverage.min_coverage_pct) {
            return invalid(format!(
                "min_coverage_pct ({}) must be within 0..=100",
                self.coverage.min_coverage_pct
            ));
        }
        if self.selection.max_episodes_per_topic == 0 {
            return invalid("max_episodes_per_topic must be positive".to_string());
        }
        if self.budget.max_reduce_tokens == 0 {
            return invalid("max_reduce_tokens must be positive".to_string());
        }
        if self.retry.max_retries == 0 {
            return invalid("max_retries must allow at least one attempt".to_string());
        }
        if self.runtime.workers == 0 || self.runtime.topic_workers == 0 {
            return invalid("workers and topic_workers must be positive".to_string());
        }
        for (name, stage) in [
            ("summarizer", &self.summarizer),
            ("synthesizer", &self.synthesizer),
            ("rewriter", &self.rewriter),
        ] {
            if stage.model.trim().is_empty() {
                return invalid(format!("{name} model must not be empty"));
            }
            if stage.max_output_tokens == 0 {
                return invalid(format!("{name} max_output_tokens must be positive"));
            }
        }
        Ok(())
    }

    /// Sets the data directory.
    #[must_use]
    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = path.into();
        self
    }

    /// Uses `model` for every stage.
    pub fn set_model(&mut self, model: &str) {
        self.summarizer.model = model.to_string();
        self.synthesizer.model = model.to_string();
        self.rewriter.model = model.to_string();
    }

    /// Path of the shared `SQLite` database.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(crate::storage::DATABASE_FILE)
    }

    /// Directory for diagnostic artifacts.
    #[must_use]
    pub fn diagnostics_dir(&self) -> PathBuf {
        self.data_dir.join(crate::storage::DIAGNOSTICS_DIR)
    }

    /// Audit log file path.
    #[must_use]
    pub fn audit_log_path(&self) -> PathBuf {
        self.audit
            .log_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("audit.jsonl"))
    }

    /// Whether an API key is configured (the key itself is never exposed here).
    #[must_use]
    pub fn has_api_key(&self) -> bool {
        self.llm
            .api_key
            .as_ref()
            .is_some_and(|key| !key.expose_secret().trim().is_empty())
    }

    /// Renders the effective configuration as TOML with secrets masked.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_display_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::io("render_config", e))
    }
}

fn apply_stage(stage: &mut StageConfig, file: Option<ConfigFileStage>) -> Result<()> {
    let Some(file) = file else {
        return Ok(());
    };
    if let Some(v) = file.model {
        stage.model = v;
    }
    if let Some(v) = file.timeout_secs {
        stage.timeout_secs = v;
    }
    if let Some(v) = file.max_output_tokens {
        stage.max_output_tokens = v;
    }
    if let Some(v) = file.reasoning_effort {
        stage.reasoning_effort = if v.eq_ignore_ascii_case("none") {
            None
        } else {
            Some(ReasoningEffort::parse(&v).ok_or_else(|| {
                Error::InvalidInput(format!("unknown reasoning_effort '{v}'"))
            })?)
        };
    }
    Ok(())
}

fn secs_to_ms(secs: f64) -> Result<u64> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(Error::InvalidInput(format!(
            "duration must be a non-negative number of seconds, got {secs}"
        )));
    }
    Ok(Duration::from_secs_f64(secs).as_millis().try_into().unwrap_or(u64::MAX))
}

fn override_parsed<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    if let Some(raw) = get(key) {
        match raw.trim().parse() {
            Ok(value) => *target = value,
            Err(_) => warn_unparsed(key, &raw),
        }
    }
}

fn warn_unparsed(key: &str, raw: &str) {
    tracing::warn!(key, value = raw, "Ignoring unparseable environment override");
}
