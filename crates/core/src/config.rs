use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIG_PATHS: [&str; 2] = ["autostream.toml", "config/autostream.toml"];

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub retrieval: RetrievalConfig,
    pub lead_capture: LeadCaptureConfig,
    pub conversation: ConversationConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub classification_temperature: f32,
    pub answer_temperature: f32,
}

#[derive(Clone, Debug)]
pub struct RetrievalConfig {
    pub knowledge_base_path: Option<PathBuf>,
    pub top_k: usize,
    pub embedding_dimensions: usize,
}

#[derive(Clone, Debug)]
pub struct LeadCaptureConfig {
    pub mode: LeadCaptureMode,
    pub webhook_url: Option<String>,
    pub on_failure: SinkFailurePolicy,
}

#[derive(Clone, Debug)]
pub struct ConversationConfig {
    pub max_turns: u32,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    Gemini,
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Ollama,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Ollama => "ollama",
        }
    }

    pub fn requires_api_key(&self) -> bool {
        !matches!(self, Self::Ollama)
    }

    /// Endpoint root used when `llm.base_url` is not configured.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Anthropic => "https://api.anthropic.com/v1",
            Self::Ollama => "http://localhost:11434",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadCaptureMode {
    Log,
    Webhook,
}

impl LeadCaptureMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Webhook => "webhook",
        }
    }
}

/// What the executor does with `tool_called` when the lead sink fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkFailurePolicy {
    #[default]
    MarkAttempted,
    AllowRetry,
}

impl SinkFailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MarkAttempted => "mark_attempted",
            Self::AllowRetry => "allow_retry",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compact => "compact",
            Self::Pretty => "pretty",
            Self::Json => "json",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub knowledge_base_path: Option<PathBuf>,
    pub lead_capture_mode: Option<LeadCaptureMode>,
    pub lead_capture_webhook_url: Option<String>,
    pub max_turns: Option<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://autostream.db?mode=rwc".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: None,
                model: "llama3.1".to_string(),
                timeout_secs: 30,
                max_retries: 2,
                classification_temperature: 0.0,
                answer_temperature: 0.3,
            },
            retrieval: RetrievalConfig {
                knowledge_base_path: None,
                top_k: 2,
                embedding_dimensions: 256,
            },
            lead_capture: LeadCaptureConfig {
                mode: LeadCaptureMode::Log,
                webhook_url: None,
                on_failure: SinkFailurePolicy::MarkAttempted,
            },
            conversation: ConversationConfig { max_turns: 10 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected gemini|openai|anthropic|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LeadCaptureMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "log" => Ok(Self::Log),
            "webhook" => Ok(Self::Webhook),
            other => Err(ConfigError::Validation(format!(
                "unsupported lead_capture.mode `{other}` (expected log|webhook)"
            ))),
        }
    }
}

impl std::str::FromStr for SinkFailurePolicy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mark_attempted" => Ok(Self::MarkAttempted),
            "allow_retry" => Ok(Self::AllowRetry),
            other => Err(ConfigError::Validation(format!(
                "unsupported lead_capture.on_failure `{other}` (expected mark_attempted|allow_retry)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATHS[0]));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
            if let Some(temperature) = llm.classification_temperature {
                self.llm.classification_temperature = temperature;
            }
            if let Some(temperature) = llm.answer_temperature {
                self.llm.answer_temperature = temperature;
            }
        }

        if let Some(retrieval) = patch.retrieval {
            if let Some(path) = retrieval.knowledge_base_path {
                self.retrieval.knowledge_base_path = Some(path);
            }
            if let Some(top_k) = retrieval.top_k {
                self.retrieval.top_k = top_k;
            }
            if let Some(dimensions) = retrieval.embedding_dimensions {
                self.retrieval.embedding_dimensions = dimensions;
            }
        }

        if let Some(lead_capture) = patch.lead_capture {
            if let Some(mode) = lead_capture.mode {
                self.lead_capture.mode = mode;
            }
            if let Some(webhook_url) = lead_capture.webhook_url {
                self.lead_capture.webhook_url = Some(webhook_url);
            }
            if let Some(on_failure) = lead_capture.on_failure {
                self.lead_capture.on_failure = on_failure;
            }
        }

        if let Some(conversation) = patch.conversation {
            if let Some(max_turns) = conversation.max_turns {
                self.conversation.max_turns = max_turns;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("AUTOSTREAM_DATABASE_URL") {
            self.database.url = value;
        }

        if let Some(value) = read_env("AUTOSTREAM_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("AUTOSTREAM_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("AUTOSTREAM_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("AUTOSTREAM_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("AUTOSTREAM_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("AUTOSTREAM_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("AUTOSTREAM_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("AUTOSTREAM_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("AUTOSTREAM_RETRIEVAL_KNOWLEDGE_BASE_PATH") {
            self.retrieval.knowledge_base_path = Some(PathBuf::from(value));
        }
        if let Some(value) = read_env("AUTOSTREAM_RETRIEVAL_TOP_K") {
            self.retrieval.top_k = parse_usize("AUTOSTREAM_RETRIEVAL_TOP_K", &value)?;
        }

        if let Some(value) = read_env("AUTOSTREAM_LEAD_CAPTURE_MODE") {
            self.lead_capture.mode = value.parse()?;
        }
        if let Some(value) = read_env("AUTOSTREAM_LEAD_CAPTURE_WEBHOOK_URL") {
            self.lead_capture.webhook_url = Some(value);
        }
        if let Some(value) = read_env("AUTOSTREAM_LEAD_CAPTURE_ON_FAILURE") {
            self.lead_capture.on_failure = value.parse()?;
        }

        if let Some(value) = read_env("AUTOSTREAM_CONVERSATION_MAX_TURNS") {
            self.conversation.max_turns = parse_u32("AUTOSTREAM_CONVERSATION_MAX_TURNS", &value)?;
        }

        let log_level =
            read_env("AUTOSTREAM_LOGGING_LEVEL").or_else(|| read_env("AUTOSTREAM_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("AUTOSTREAM_LOGGING_FORMAT").or_else(|| read_env("AUTOSTREAM_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(path) = overrides.knowledge_base_path {
            self.retrieval.knowledge_base_path = Some(path);
        }
        if let Some(mode) = overrides.lead_capture_mode {
            self.lead_capture.mode = mode;
        }
        if let Some(webhook_url) = overrides.lead_capture_webhook_url {
            self.lead_capture.webhook_url = Some(webhook_url);
        }
        if let Some(max_turns) = overrides.max_turns {
            self.conversation.max_turns = max_turns;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_retrieval(&self.retrieval)?;
        validate_lead_capture(&self.lead_capture)?;
        validate_conversation(&self.conversation)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

/// First config file that would be loaded for `explicit_path`, if any exists.
pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    DEFAULT_CONFIG_PATHS.iter().map(PathBuf::from).find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    for (key, value) in [
        ("llm.classification_temperature", llm.classification_temperature),
        ("llm.answer_temperature", llm.answer_temperature),
    ] {
        if !(0.0..=2.0).contains(&value) {
            return Err(ConfigError::Validation(format!("{key} must be in range 0.0..=2.0")));
        }
    }

    if llm.provider.requires_api_key() {
        let missing = llm
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing {
            return Err(ConfigError::Validation(format!(
                "llm.api_key is required for the {} provider (set AUTOSTREAM_LLM_API_KEY)",
                llm.provider.as_str()
            )));
        }
    }

    if let Some(base_url) = &llm.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "llm.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_retrieval(retrieval: &RetrievalConfig) -> Result<(), ConfigError> {
    if retrieval.top_k == 0 {
        return Err(ConfigError::Validation(
            "retrieval.top_k must be greater than zero".to_string(),
        ));
    }

    if retrieval.embedding_dimensions < 16 {
        return Err(ConfigError::Validation(
            "retrieval.embedding_dimensions must be at least 16".to_string(),
        ));
    }

    Ok(())
}

fn validate_lead_capture(lead_capture: &LeadCaptureConfig) -> Result<(), ConfigError> {
    match (&lead_capture.mode, &lead_capture.webhook_url) {
        (LeadCaptureMode::Webhook, None) => Err(ConfigError::Validation(
            "lead_capture.webhook_url is required when lead_capture.mode is webhook".to_string(),
        )),
        (_, Some(url)) if !url.starts_with("http://") && !url.starts_with("https://") => {
            Err(ConfigError::Validation(
                "lead_capture.webhook_url must start with http:// or https://".to_string(),
            ))
        }
        _ => Ok(()),
    }
}

fn validate_conversation(conversation: &ConversationConfig) -> Result<(), ConfigError> {
    if conversation.max_turns == 0 {
        return Err(ConfigError::Validation(
            "conversation.max_turns must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    retrieval: Option<RetrievalPatch>,
    lead_capture: Option<LeadCapturePatch>,
    conversation: Option<ConversationPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    classification_temperature: Option<f32>,
    answer_temperature: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct RetrievalPatch {
    knowledge_base_path: Option<PathBuf>,
    top_k: Option<usize>,
    embedding_dimensions: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct LeadCapturePatch {
    mode: Option<LeadCaptureMode>,
    webhook_url: Option<String>,
    on_failure: Option<SinkFailurePolicy>,
}

#[derive(Debug, Default, Deserialize)]
struct ConversationPatch {
    max_turns: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
